//! A single `mmap`-backed region of executable memory.
//!
//! Memory is mapped `PROT_READ|PROT_WRITE` and filled, then flipped to
//! `PROT_READ|PROT_EXEC` before any generated code can run — the region is
//! never simultaneously writable and executable (W^X).

use std::ptr::NonNull;

use crate::error::{CodeBufError, CodeBufResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
    Writable,
    Executable,
}

pub struct CodeBlock {
    ptr: NonNull<u8>,
    capacity: usize,
    used: usize,
    protection: Protection,
}

// The mapped region outlives any single thread's use of it; fragments are
// installed once and then only ever read (or re-protected under the code
// buffer's lock) from whichever thread calls them.
unsafe impl Send for CodeBlock {}
unsafe impl Sync for CodeBlock {}

fn page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE never fails on a POSIX system.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_up_to_page(size: usize, page: usize) -> usize {
    if size == 0 {
        return page;
    }
    (size + page - 1) / page * page
}

impl CodeBlock {
    /// Map a fresh block with room for at least `min_size` bytes.
    pub fn new(min_size: usize) -> CodeBufResult<Self> {
        let page = page_size();
        let capacity = round_up_to_page(min_size, page);
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CodeBufError::MmapFailed(std::io::Error::last_os_error()));
        }
        Ok(CodeBlock {
            ptr: NonNull::new(ptr as *mut u8).expect("mmap returned null on success"),
            capacity,
            used: 0,
            protection: Protection::Writable,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    fn ensure_writable(&mut self) -> CodeBufResult<()> {
        if self.protection == Protection::Writable {
            return Ok(());
        }
        self.mprotect(libc::PROT_READ | libc::PROT_WRITE)?;
        self.protection = Protection::Writable;
        Ok(())
    }

    fn ensure_executable(&mut self) -> CodeBufResult<()> {
        if self.protection == Protection::Executable {
            return Ok(());
        }
        self.mprotect(libc::PROT_READ | libc::PROT_EXEC)?;
        self.protection = Protection::Executable;
        Ok(())
    }

    fn mprotect(&self, prot: libc::c_int) -> CodeBufResult<()> {
        let rc = unsafe { libc::mprotect(self.ptr.as_ptr() as *mut libc::c_void, self.capacity, prot) };
        if rc != 0 {
            return Err(CodeBufError::MprotectFailed(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Append `code` at the current end of the block, returning its offset.
    pub fn append(&mut self, code: &[u8]) -> CodeBufResult<usize> {
        if code.len() > self.remaining() {
            return Err(CodeBufError::CodeTooLarge(code.len(), self.remaining()));
        }
        self.ensure_writable()?;
        let offset = self.used;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), self.ptr.as_ptr().add(offset), code.len());
        }
        self.used += code.len();
        self.ensure_executable()?;
        Ok(offset)
    }

    /// Rewrite `len` bytes already present at `offset` (e.g. patching a
    /// resolver stub into its resolved call target). `code.len()` must not
    /// exceed the span originally allocated there.
    pub fn overwrite(&mut self, offset: usize, code: &[u8]) -> CodeBufResult<()> {
        if offset + code.len() > self.used {
            return Err(CodeBufError::InvalidHandle);
        }
        self.ensure_writable()?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), self.ptr.as_ptr().add(offset), code.len());
        }
        self.ensure_executable()?;
        Ok(())
    }

    /// Pointer to the start of `offset` within this block. Valid only while
    /// the block is alive and protected executable.
    pub fn entry_ptr(&self, offset: usize) -> *const u8 {
        unsafe { self.ptr.as_ptr().add(offset) }
    }
}

impl Drop for CodeBlock {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_back_through_raw_pointer() {
        let mut block = CodeBlock::new(64).unwrap();
        let code = [0xC3u8]; // ret
        let offset = block.append(&code).unwrap();
        let ptr = block.entry_ptr(offset);
        let byte = unsafe { std::ptr::read(ptr) };
        assert_eq!(byte, 0xC3);
    }

    #[test]
    fn capacity_rounds_up_to_a_page() {
        let block = CodeBlock::new(1).unwrap();
        assert!(block.capacity() >= page_size());
        assert_eq!(block.capacity() % page_size(), 0);
    }

    #[test]
    fn append_beyond_capacity_fails() {
        let mut block = CodeBlock::new(16).unwrap();
        let huge = vec![0u8; block.capacity() + 1];
        assert!(matches!(block.append(&huge), Err(CodeBufError::CodeTooLarge(_, _))));
    }

    #[test]
    fn overwrite_patches_in_place() {
        let mut block = CodeBlock::new(64).unwrap();
        let offset = block.append(&[0x90, 0x90, 0x90]).unwrap();
        block.overwrite(offset, &[0xC3]).unwrap();
        let byte = unsafe { std::ptr::read(block.entry_ptr(offset)) };
        assert_eq!(byte, 0xC3);
    }
}
