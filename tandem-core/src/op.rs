use serde::{Deserialize, Serialize};

use crate::meta::StyleMeta;

/// A single edit operation. Lengths count Unicode scalar values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Insert { text: String, meta: StyleMeta },
    Delete { len: u32 },
    Retain { len: u32, meta: StyleMeta },
}

/// Discriminant of an [`Op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Insert,
    Delete,
    Retain,
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Insert => "insert",
            OpKind::Delete => "delete",
            OpKind::Retain => "retain",
        }
    }
}

impl Op {
    pub fn insert(text: impl Into<String>) -> Self {
        Op::Insert {
            text: text.into(),
            meta: StyleMeta::EMPTY,
        }
    }

    pub fn insert_with(text: impl Into<String>, meta: StyleMeta) -> Self {
        Op::Insert {
            text: text.into(),
            meta,
        }
    }

    pub fn delete(len: u32) -> Self {
        Op::Delete { len }
    }

    pub fn retain(len: u32) -> Self {
        Op::Retain {
            len,
            meta: StyleMeta::EMPTY,
        }
    }

    pub fn retain_with(len: u32, meta: StyleMeta) -> Self {
        Op::Retain { len, meta }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Op::Insert { .. } => OpKind::Insert,
            Op::Delete { .. } => OpKind::Delete,
            Op::Retain { .. } => OpKind::Retain,
        }
    }

    /// Number of characters this op spans.
    pub fn len(&self) -> u32 {
        match self {
            Op::Insert { text, .. } => char_len(text),
            Op::Delete { len } | Op::Retain { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Op::Insert { text, .. } => text.is_empty(),
            Op::Delete { len } | Op::Retain { len, .. } => *len == 0,
        }
    }

    pub fn meta(&self) -> Option<&StyleMeta> {
        match self {
            Op::Insert { meta, .. } | Op::Retain { meta, .. } => Some(meta),
            Op::Delete { .. } => None,
        }
    }
}

/// Character count of `text`, saturating at `u32::MAX`.
pub(crate) fn char_len(text: &str) -> u32 {
    u32::try_from(text.chars().count()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_counts_chars_not_bytes() {
        assert_eq!(Op::insert("héllo").len(), 5);
        assert_eq!(Op::insert("日本語").len(), 3);
        assert_eq!(Op::delete(4).len(), 4);
        assert_eq!(Op::retain(9).len(), 9);
    }

    #[test]
    fn test_is_empty() {
        assert!(Op::insert("").is_empty());
        assert!(Op::delete(0).is_empty());
        assert!(!Op::retain(1).is_empty());
    }

    #[test]
    fn test_kind_and_meta() {
        let meta = StyleMeta::EMPTY.with_bold(true);
        assert_eq!(Op::retain_with(2, meta).kind(), OpKind::Retain);
        assert_eq!(Op::retain_with(2, meta).meta(), Some(&meta));
        assert_eq!(Op::delete(2).meta(), None);
        assert_eq!(OpKind::Insert.name(), "insert");
    }
}
