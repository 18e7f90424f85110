//! Sequential composition of two deltas.

use crate::cursor::{Cursor, Piece};
use crate::delta::Delta;
use crate::error::OtError;

/// The delta equivalent to applying `first` and then `second`.
///
/// `second` must be expressed against the result of `first`, i.e.
/// `first.target_len() == second.base_len()`.
///
/// | first \ second | Insert       | Retain(mb)             | Delete  |
/// |----------------|--------------|------------------------|---------|
/// | (any)          | Insert (b)   |                        |         |
/// | Insert(ma)     |              | Insert, mb over ma     | nothing |
/// | Retain(ma)     |              | Retain, mb over ma     | Delete  |
/// | Delete         | Delete       | Delete                 | Delete  |
pub fn compose(first: &Delta, second: &Delta) -> Result<Delta, OtError> {
    let mut a = Cursor::new(first);
    let mut b = Cursor::new(second);
    let mut out = Delta::with_capacity(first.ops().len() + second.ops().len());

    loop {
        if b.is_insert() {
            if let Some(Piece::Insert(text, meta)) = b.take_all() {
                out.insert(text, *meta);
            }
            continue;
        }
        if a.is_delete() {
            if let Some(Piece::Delete(len)) = a.take_all() {
                out.delete(len);
            }
            continue;
        }
        match (a.is_done(), b.is_done()) {
            (true, true) => return Ok(out),
            (false, false) => {}
            _ => {
                return Err(OtError::mismatch(
                    "compose",
                    first.target_len(),
                    second.base_len(),
                ))
            }
        }

        let n = a.remaining().min(b.remaining());
        match (a.take(n), b.take(n)) {
            (Some(Piece::Insert(text, ma)), Some(Piece::Retain(_, mb))) => {
                out.insert(text, mb.overlay(ma));
            }
            (Some(Piece::Insert(..)), Some(Piece::Delete(_))) => {}
            (Some(Piece::Retain(_, ma)), Some(Piece::Retain(_, mb))) => {
                out.retain(n, mb.overlay(ma));
            }
            (Some(Piece::Retain(..)), Some(Piece::Delete(_))) => {
                out.delete(n);
            }
            _ => {
                return Err(OtError::mismatch(
                    "compose",
                    first.target_len(),
                    second.base_len(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::StyleMeta;
    use crate::op::Op;

    fn doc(text: &str) -> Delta {
        Delta::from_ops([Op::insert(text)])
    }

    #[test]
    fn test_compose_insert_into_document() {
        let base = doc("Hello World");
        let edit = Delta::from_ops([Op::retain(5), Op::insert(" there"), Op::retain(6)]);
        let result = compose(&base, &edit).unwrap();
        assert_eq!(result, doc("Hello there World"));
    }

    #[test]
    fn test_compose_delete_cancels_insert() {
        let first = Delta::from_ops([Op::insert("abc")]);
        let second = Delta::from_ops([Op::retain(1), Op::delete(1), Op::retain(1)]);
        assert_eq!(compose(&first, &second).unwrap(), doc("ac"));
    }

    #[test]
    fn test_compose_deletes_pass_through() {
        let first = Delta::from_ops([Op::delete(2), Op::retain(3)]);
        let second = Delta::from_ops([Op::retain(1), Op::delete(2)]);
        let result = compose(&first, &second).unwrap();
        assert_eq!(result.ops(), &[Op::delete(2), Op::retain(1), Op::delete(2)]);
    }

    #[test]
    fn test_compose_overlays_retain_meta() {
        let base = Delta::from_ops([Op::insert_with("ab", StyleMeta::EMPTY.with_bold(false))]);
        let bold = Delta::from_ops([Op::retain_with(1, StyleMeta::EMPTY.with_bold(true)), Op::retain(1)]);
        let result = compose(&base, &bold).unwrap();
        assert_eq!(
            result.ops(),
            &[
                Op::insert_with("a", StyleMeta::EMPTY.with_bold(true)),
                Op::insert_with("b", StyleMeta::EMPTY.with_bold(false)),
            ]
        );
    }

    #[test]
    fn test_compose_retains_merge_meta() {
        let first = Delta::from_ops([Op::retain_with(3, StyleMeta::EMPTY.with_italic(true))]);
        let second = Delta::from_ops([Op::retain_with(3, StyleMeta::EMPTY.with_bold(true))]);
        let result = compose(&first, &second).unwrap();
        assert_eq!(
            result.ops(),
            &[Op::retain_with(3, StyleMeta::EMPTY.with_italic(true).with_bold(true))]
        );
    }

    #[test]
    fn test_compose_identity() {
        let base = doc("unchanged");
        assert_eq!(compose(&base, &Delta::identity(9)).unwrap(), base);
    }

    #[test]
    fn test_compose_empty_document() {
        let result = compose(&Delta::new(), &Delta::from_ops([Op::insert("x")])).unwrap();
        assert_eq!(result, doc("x"));
    }

    #[test]
    fn test_compose_length_mismatch() {
        let err = compose(&doc("abc"), &Delta::identity(5)).unwrap_err();
        assert_eq!(
            err,
            OtError::LengthMismatch {
                operation: "compose",
                left: 3,
                right: 5
            }
        );
        assert!(compose(&doc("abcdef"), &Delta::identity(2)).is_err());
    }
}
