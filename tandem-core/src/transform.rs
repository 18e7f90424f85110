//! Rebasing concurrent deltas.
//!
//! Both inputs are expressed against the same document. [`transform`]
//! rewrites each so it applies after the other, with `a` winning every tie:
//! its inserts go first at equal positions and its style fields override
//! `b`'s where both retains touch the same attribute. Computing both sides
//! in one pass keeps the tie-break consistent, which is what makes
//!
//! ```text
//! compose(a, b') == compose(b, a')
//! ```
//!
//! hold for every pair.

use crate::cursor::{Cursor, Piece};
use crate::delta::Delta;
use crate::error::OtError;
use crate::meta::StyleMeta;
use crate::op::char_len;

/// Rebase `a` and `b` over each other. Returns `(a', b')` where `a'`
/// applies after `b` and `b'` applies after `a`.
pub fn transform(a: &Delta, b: &Delta) -> Result<(Delta, Delta), OtError> {
    let mut ca = Cursor::new(a);
    let mut cb = Cursor::new(b);
    let mut a_prime = Delta::with_capacity(a.ops().len() + b.ops().len());
    let mut b_prime = Delta::with_capacity(a.ops().len() + b.ops().len());

    loop {
        if ca.is_insert() {
            if let Some(Piece::Insert(text, meta)) = ca.take_all() {
                a_prime.insert(text, *meta);
                b_prime.retain(char_len(text), StyleMeta::EMPTY);
            }
            continue;
        }
        if cb.is_insert() {
            if let Some(Piece::Insert(text, meta)) = cb.take_all() {
                a_prime.retain(char_len(text), StyleMeta::EMPTY);
                b_prime.insert(text, *meta);
            }
            continue;
        }
        match (ca.is_done(), cb.is_done()) {
            (true, true) => return Ok((a_prime, b_prime)),
            (false, false) => {}
            _ => return Err(OtError::mismatch("transform", a.base_len(), b.base_len())),
        }

        let n = ca.remaining().min(cb.remaining());
        match (ca.take(n), cb.take(n)) {
            (Some(Piece::Retain(_, ma)), Some(Piece::Retain(_, mb))) => {
                a_prime.retain(n, *ma);
                b_prime.retain(n, ma.complement(mb));
            }
            (Some(Piece::Delete(_)), Some(Piece::Retain(..))) => {
                a_prime.delete(n);
            }
            (Some(Piece::Retain(..)), Some(Piece::Delete(_))) => {
                b_prime.delete(n);
            }
            (Some(Piece::Delete(_)), Some(Piece::Delete(_))) => {}
            _ => return Err(OtError::mismatch("transform", a.base_len(), b.base_len())),
        }
    }
}

/// `a` rebased to apply after `b`.
pub fn rebase(a: &Delta, b: &Delta) -> Result<Delta, OtError> {
    transform(a, b).map(|(a_prime, _)| a_prime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::compose;
    use crate::op::Op;

    #[test]
    fn test_rebase_after_concurrent_insert() {
        // "Hello World": A inserts " there" after "Hello", B appends "!".
        let a = Delta::from_ops([Op::retain(5), Op::insert(" there"), Op::retain(6)]);
        let b = Delta::from_ops([Op::retain(11), Op::insert("!")]);

        let b_after_a = rebase(&b, &a).unwrap();
        assert_eq!(b_after_a.ops(), &[Op::retain(17), Op::insert("!")]);
    }

    #[test]
    fn test_same_position_inserts_converge() {
        let base = Delta::from_ops([Op::insert("xy")]);
        let a = Delta::from_ops([Op::retain(1), Op::insert("A"), Op::retain(1)]);
        let b = Delta::from_ops([Op::retain(1), Op::insert("B"), Op::retain(1)]);

        let (a_prime, b_prime) = transform(&a, &b).unwrap();
        let left = compose(&compose(&base, &a).unwrap(), &b_prime).unwrap();
        let right = compose(&compose(&base, &b).unwrap(), &a_prime).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.text(), "xABy");
    }

    #[test]
    fn test_concurrent_deletes_overlap() {
        let a = Delta::from_ops([Op::delete(3), Op::retain(2)]);
        let b = Delta::from_ops([Op::retain(1), Op::delete(3), Op::retain(1)]);

        let (a_prime, b_prime) = transform(&a, &b).unwrap();
        assert_eq!(a_prime.ops(), &[Op::delete(1), Op::retain(1)]);
        assert_eq!(b_prime.ops(), &[Op::delete(1), Op::retain(1)]);
    }

    #[test]
    fn test_meta_conflict_resolves_to_a() {
        let a = Delta::from_ops([Op::retain_with(2, StyleMeta::EMPTY.with_bold(true))]);
        let b = Delta::from_ops([Op::retain_with(
            2,
            StyleMeta::EMPTY.with_bold(false).with_italic(true),
        )]);

        let (a_prime, b_prime) = transform(&a, &b).unwrap();
        assert_eq!(a_prime, a);
        assert_eq!(
            b_prime.ops(),
            &[Op::retain_with(2, StyleMeta::EMPTY.with_italic(true))]
        );
    }

    #[test]
    fn test_transform_length_mismatch() {
        let a = Delta::identity(3);
        let b = Delta::identity(4);
        assert!(matches!(
            transform(&a, &b),
            Err(OtError::LengthMismatch { operation: "transform", left: 3, right: 4 })
        ));
    }
}
