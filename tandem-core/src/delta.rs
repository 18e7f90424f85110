//! Coalescing op sequences.
//!
//! Every push merges into the previous op when kind and metadata match and
//! discards zero-length ops, so deltas produced by the engine are canonical
//! and can be compared with `==`.

use serde::{Deserialize, Serialize};

use crate::compose::compose;
use crate::error::OtError;
use crate::meta::{StyleMeta, UserId};
use crate::op::{char_len, Op};

/// An ordered sequence of ops spanning a whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    ops: Vec<Op>,
}

impl Delta {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    /// A single plain retain over `len` characters: the no-op delta.
    pub fn identity(len: u32) -> Self {
        let mut delta = Self::new();
        delta.retain(len, StyleMeta::EMPTY);
        delta
    }

    /// Build a delta from arbitrary ops, coalescing as they are pushed.
    pub fn from_ops(ops: impl IntoIterator<Item = Op>) -> Self {
        let mut delta = Self::new();
        for op in ops {
            delta.push(op);
        }
        delta
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when applying this delta changes nothing: only unstyled retains.
    pub fn is_identity(&self) -> bool {
        self.ops
            .iter()
            .all(|op| matches!(op, Op::Retain { meta, .. } if meta.is_empty()))
    }

    /// Length of the document this delta applies to.
    pub fn base_len(&self) -> u32 {
        self.ops.iter().fold(0u32, |acc, op| match op {
            Op::Retain { len, .. } | Op::Delete { len } => acc.saturating_add(*len),
            Op::Insert { .. } => acc,
        })
    }

    /// Length of the document this delta produces.
    pub fn target_len(&self) -> u32 {
        self.ops.iter().fold(0u32, |acc, op| match op {
            Op::Retain { len, .. } => acc.saturating_add(*len),
            Op::Insert { text, .. } => acc.saturating_add(char_len(text)),
            Op::Delete { .. } => acc,
        })
    }

    /// True when the delta consists of inserts only.
    pub fn is_document(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, Op::Insert { .. }))
    }

    /// Concatenated inserted text.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for op in &self.ops {
            if let Op::Insert { text: chunk, .. } = op {
                text.push_str(chunk);
            }
        }
        text
    }

    /// Users referenced by attribution metadata, in op order.
    pub fn authors(&self) -> impl Iterator<Item = UserId> + '_ {
        self.ops.iter().filter_map(|op| op.meta().and_then(|meta| meta.author))
    }

    /// Append an op, merging it into the previous one when possible.
    pub fn push(&mut self, op: Op) {
        match op {
            Op::Insert { text, meta } => self.insert(&text, meta),
            Op::Delete { len } => self.delete(len),
            Op::Retain { len, meta } => self.retain(len, meta),
        };
    }

    pub fn insert(&mut self, text: &str, meta: StyleMeta) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        if let Some(Op::Insert {
            text: last,
            meta: last_meta,
        }) = self.ops.last_mut()
        {
            if *last_meta == meta {
                last.push_str(text);
                return self;
            }
        }
        self.ops.push(Op::Insert {
            text: text.to_owned(),
            meta,
        });
        self
    }

    pub fn delete(&mut self, len: u32) -> &mut Self {
        if len == 0 {
            return self;
        }
        if let Some(Op::Delete { len: last }) = self.ops.last_mut() {
            *last = last.saturating_add(len);
            return self;
        }
        self.ops.push(Op::Delete { len });
        self
    }

    pub fn retain(&mut self, len: u32, meta: StyleMeta) -> &mut Self {
        if len == 0 {
            return self;
        }
        if let Some(Op::Retain {
            len: last,
            meta: last_meta,
        }) = self.ops.last_mut()
        {
            if *last_meta == meta {
                *last = last.saturating_add(len);
                return self;
            }
        }
        self.ops.push(Op::Retain { len, meta });
        self
    }

    /// Wrap ops verbatim, skipping coalescing.
    #[cfg(test)]
    pub(crate) fn from_raw(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    /// Apply this delta to `document`.
    pub fn apply_to(&self, document: &Delta) -> Result<Delta, OtError> {
        compose(document, self)
    }
}

impl FromIterator<Op> for Delta {
    fn from_iter<I: IntoIterator<Item = Op>>(iter: I) -> Self {
        Self::from_ops(iter)
    }
}
