//! Failures from mapping or writing executable memory.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodeBufError {
    #[error("mmap failed: {0}")]
    MmapFailed(std::io::Error),

    #[error("mprotect failed: {0}")]
    MprotectFailed(std::io::Error),

    #[error("code of {0} bytes exceeds the maximum block size of {1} bytes")]
    CodeTooLarge(usize, usize),

    #[error("overwrite of {0} bytes does not fit the original {1}-byte allocation")]
    OverwriteTooLarge(usize, usize),

    #[error("handle refers to a block or offset that no longer exists")]
    InvalidHandle,
}

pub type CodeBufResult<T> = Result<T, CodeBufError>;
