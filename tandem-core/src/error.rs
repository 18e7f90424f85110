use thiserror::Error;

/// Structural failure of a merge algorithm.
///
/// Raised when the two inputs do not describe the same span of text, which
/// happens for deltas built against a stale revision or for corrupted
/// history. The failing request is aborted; nothing else is affected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtError {
    #[error("{operation}: length mismatch (left spans {left}, right spans {right})")]
    LengthMismatch {
        operation: &'static str,
        left: u32,
        right: u32,
    },
    #[error("invert: base contains a {found} op, expected a document of inserts")]
    NotADocument { found: &'static str },
}

impl OtError {
    pub(crate) fn mismatch(operation: &'static str, left: u32, right: u32) -> Self {
        OtError::LengthMismatch {
            operation,
            left,
            right,
        }
    }
}
