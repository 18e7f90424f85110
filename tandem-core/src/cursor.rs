use crate::delta::Delta;
use crate::meta::StyleMeta;
use crate::op::Op;

/// A slice of the op under the cursor.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Piece<'a> {
    Insert(&'a str, &'a StyleMeta),
    Delete(u32),
    Retain(u32, &'a StyleMeta),
}

/// Walks a delta op by op, handing out partial ops on demand.
///
/// Empty ops are skipped, so `remaining()` is non-zero whenever the cursor
/// is not done.
pub(crate) struct Cursor<'a> {
    ops: &'a [Op],
    index: usize,
    /// Units of the current op already consumed.
    consumed: u32,
    /// Byte position inside the current insert's text.
    byte_offset: usize,
    current_len: u32,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(delta: &'a Delta) -> Self {
        let mut cursor = Self {
            ops: delta.ops(),
            index: 0,
            consumed: 0,
            byte_offset: 0,
            current_len: 0,
        };
        cursor.load();
        cursor
    }

    fn load(&mut self) {
        while let Some(op) = self.ops.get(self.index) {
            if !op.is_empty() {
                self.current_len = op.len();
                self.consumed = 0;
                self.byte_offset = 0;
                return;
            }
            self.index += 1;
        }
        self.current_len = 0;
        self.consumed = 0;
        self.byte_offset = 0;
    }

    pub(crate) fn is_done(&self) -> bool {
        self.index >= self.ops.len()
    }

    pub(crate) fn is_insert(&self) -> bool {
        matches!(self.ops.get(self.index), Some(Op::Insert { .. }))
    }

    pub(crate) fn is_delete(&self) -> bool {
        matches!(self.ops.get(self.index), Some(Op::Delete { .. }))
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.current_len - self.consumed
    }

    /// Consume up to `n` units of the current op.
    pub(crate) fn take(&mut self, n: u32) -> Option<Piece<'a>> {
        let op = self.ops.get(self.index)?;
        let n = n.min(self.remaining());
        let piece = match op {
            Op::Insert { text, meta } => {
                let rest = &text[self.byte_offset..];
                let end = rest
                    .char_indices()
                    .nth(n as usize)
                    .map_or(rest.len(), |(i, _)| i);
                self.byte_offset += end;
                Piece::Insert(&rest[..end], meta)
            }
            Op::Delete { .. } => Piece::Delete(n),
            Op::Retain { meta, .. } => Piece::Retain(n, meta),
        };
        self.consumed += n;
        if self.consumed >= self.current_len {
            self.index += 1;
            self.load();
        }
        Some(piece)
    }

    /// Consume the rest of the current op.
    pub(crate) fn take_all(&mut self) -> Option<Piece<'a>> {
        self.take(self.remaining())
    }
}
