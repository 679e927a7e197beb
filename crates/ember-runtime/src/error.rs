//! Runtime-domain error types.
//!
//! Catchable, recoverable failures (format-string validation) use
//! [`RuntimeError`]. Conditions the spec defines as uncatchable — refcount
//! underflow, code-map failure, patch overflow — use [`FatalError`], which is
//! never threaded through a `Result` the interpreter can recover from; the
//! only consumer is [`FatalError::abort`].

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("format error: {0}")]
    FormatError(String),
}

/// A process-aborting condition. These mirror §7's "fatal runtime errors":
/// they are reported once to stderr and then the process exits, because the
/// spec defines them as not catchable by user code.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("refcount underflow: delete_reference observed a count already at zero")]
    RefcountUnderflow,

    #[error("unresolvable import dependency cycle involving module {0}")]
    ImportCycle(String),

    #[error("failed to map a new executable code block: {0}")]
    CodeMapFailure(#[from] ember_codebuf::CodeBufError),

    #[error("patch offset {0} overflows the installed code region of {1} bytes")]
    PatchOverflow(usize, usize),
}

impl FatalError {
    /// Flush the diagnostic to stderr and terminate the process. This is the
    /// only place a `FatalError` is ever consumed — it is constructed right
    /// before the process can no longer make progress.
    pub fn abort(self) -> ! {
        eprintln!("fatal runtime error: {self}");
        std::process::exit(101);
    }
}
