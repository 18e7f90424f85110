//! Permission clamping for deltas received from clients.

use crate::delta::Delta;
use crate::meta::{StyleMeta, UserId};
use crate::op::Op;

/// Normalize a client-supplied op list before it touches history.
///
/// - empty inserts and zero-length retains/deletes are dropped
/// - every insert is attributed to `caller` and carries fully materialized
///   style fields
/// - a retain may only claim authorship for `caller`, unless the caller
///   holds whitewash rights
pub fn sanitize(ops: impl IntoIterator<Item = Op>, caller: UserId, whitewash: bool) -> Delta {
    let mut delta = Delta::new();
    for op in ops {
        match op {
            Op::Insert { text, meta } => {
                delta.insert(&text, meta.with_author(caller).materialized());
            }
            Op::Delete { len } => {
                delta.delete(len);
            }
            Op::Retain { len, meta } => {
                let author = meta.author.filter(|id| whitewash || *id == caller);
                delta.retain(len, StyleMeta { author, ..meta });
            }
        }
    }
    delta
}
