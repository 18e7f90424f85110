use crate::cursor::{Cursor, Piece};
use crate::delta::Delta;
use crate::error::OtError;
use crate::op::OpKind;

/// The delta that undoes `delta`, given the document it was applied to.
///
/// Inserts become deletes, deletes re-insert the text and metadata found in
/// `base`, and retains restore exactly the style fields they touched.
pub fn invert(delta: &Delta, base: &Delta) -> Result<Delta, OtError> {
    if let Some(op) = base
        .ops()
        .iter()
        .find(|op| !op.is_empty() && op.kind() != OpKind::Insert)
    {
        return Err(OtError::NotADocument {
            found: op.kind().name(),
        });
    }

    let mut cd = Cursor::new(delta);
    let mut cb = Cursor::new(base);
    let mut out = Delta::with_capacity(delta.ops().len());

    loop {
        if cd.is_insert() {
            let len = cd.remaining();
            cd.take_all();
            out.delete(len);
            continue;
        }
        match (cd.is_done(), cb.is_done()) {
            (true, true) => return Ok(out),
            (false, false) => {}
            _ => return Err(OtError::mismatch("invert", delta.base_len(), base.target_len())),
        }

        let n = cd.remaining().min(cb.remaining());
        match (cd.take(n), cb.take(n)) {
            (Some(Piece::Delete(_)), Some(Piece::Insert(text, meta))) => {
                out.insert(text, *meta);
            }
            (Some(Piece::Retain(_, applied)), Some(Piece::Insert(_, meta))) => {
                out.retain(n, applied.invert(meta));
            }
            _ => return Err(OtError::mismatch("invert", delta.base_len(), base.target_len())),
        }
    }
}
