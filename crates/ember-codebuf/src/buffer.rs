//! Multi-block executable code buffer
//!
//! New machine code is placed into the smallest existing block with enough
//! free space; when none fits, a fresh block is mapped sized to the request
//! (rounded up to a page). This keeps fragmentation low for the common case
//! of many small fragments sharing a handful of blocks.

use parking_lot::Mutex;

use crate::block::CodeBlock;
use crate::error::{CodeBufError, CodeBufResult};

/// Default size requested for a freshly mapped block when no existing block
/// has room; actual capacity is rounded up to a page and to at least the
/// code being installed.
const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// A stable reference to a span of installed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeHandle {
    block_index: usize,
    offset: usize,
    len: usize,
}

impl CodeHandle {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct Inner {
    blocks: Vec<CodeBlock>,
}

pub struct CodeBuffer {
    inner: Mutex<Inner>,
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer { inner: Mutex::new(Inner { blocks: Vec::new() }) }
    }

    /// Install `code`, returning a handle to it. Picks the smallest block
    /// with sufficient free space, mapping a new one only if none fits.
    pub fn allocate(&self, code: &[u8]) -> CodeBufResult<CodeHandle> {
        let mut inner = self.inner.lock();
        let best = inner
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.remaining() >= code.len())
            .min_by_key(|(_, b)| b.remaining())
            .map(|(i, _)| i);

        let block_index = match best {
            Some(i) => i,
            None => {
                let size = code.len().max(DEFAULT_BLOCK_SIZE);
                inner.blocks.push(CodeBlock::new(size)?);
                inner.blocks.len() - 1
            }
        };

        let offset = inner.blocks[block_index].append(code)?;
        Ok(CodeHandle { block_index, offset, len: code.len() })
    }

    /// Patch bytes already installed at `handle` — `code.len()` must not
    /// exceed the handle's original length.
    pub fn overwrite(&self, handle: &CodeHandle, code: &[u8]) -> CodeBufResult<()> {
        if code.len() > handle.len {
            return Err(CodeBufError::OverwriteTooLarge(code.len(), handle.len));
        }
        let mut inner = self.inner.lock();
        let block = inner.blocks.get_mut(handle.block_index).ok_or(CodeBufError::InvalidHandle)?;
        block.overwrite(handle.offset, code)
    }

    /// Raw entry pointer for `handle`. Callers must not retain this past the
    /// `CodeBuffer`'s lifetime.
    pub fn entry_ptr(&self, handle: &CodeHandle) -> CodeBufResult<*const u8> {
        let inner = self.inner.lock();
        let block = inner.blocks.get(handle.block_index).ok_or(CodeBufError::InvalidHandle)?;
        Ok(block.entry_ptr(handle.offset))
    }

    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    pub fn total_size(&self) -> usize {
        self.inner.lock().blocks.iter().map(|b| b.capacity()).sum()
    }

    pub fn total_used_bytes(&self) -> usize {
        self.inner.lock().blocks.iter().map(|b| b.used()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_existing_block_when_it_fits() {
        let buf = CodeBuffer::new();
        buf.allocate(&[0x90; 16]).unwrap();
        buf.allocate(&[0x90; 16]).unwrap();
        assert_eq!(buf.block_count(), 1);
    }

    #[test]
    fn picks_smallest_sufficient_block() {
        let buf = CodeBuffer::new();
        // Force two blocks to exist by exceeding the default size once.
        buf.allocate(&vec![0x90; 70 * 1024]).unwrap();
        buf.allocate(&[0xC3; 4]).unwrap();
        assert_eq!(buf.block_count(), 2);
    }

    #[test]
    fn overwrite_rejects_oversized_patch() {
        let buf = CodeBuffer::new();
        let handle = buf.allocate(&[0x90, 0x90]).unwrap();
        let err = buf.overwrite(&handle, &[0x90, 0x90, 0x90]);
        assert!(matches!(err, Err(CodeBufError::OverwriteTooLarge(_, _))));
    }

    #[test]
    fn total_used_bytes_tracks_allocations() {
        let buf = CodeBuffer::new();
        buf.allocate(&[0xC3]).unwrap();
        buf.allocate(&[0xC3; 3]).unwrap();
        assert_eq!(buf.total_used_bytes(), 4);
    }
}
