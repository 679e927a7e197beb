//! Compile-time errors: the first of the three error domains. These always
//! carry a source byte offset so the front end (out of scope here) can map
//! them back to a line/column for diagnostics.

use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("at byte {offset}: unknown name `{name}`")]
    UnknownName { offset: usize, name: String },

    #[error("at byte {offset}: `{name}` is not callable")]
    NotCallable { offset: usize, name: String },

    #[error("at byte {offset}: wrong number of arguments: expected {expected}, got {got}")]
    ArityMismatch { offset: usize, expected: usize, got: usize },

    #[error("at byte {offset}: attribute `{attr}` is not defined on this class")]
    UnknownAttribute { offset: usize, attr: String },

    #[error("at byte {offset}: break/continue outside a loop")]
    LoopControlOutsideLoop { offset: usize },

    #[error("at byte {offset}: return outside a function")]
    ReturnOutsideFunction { offset: usize },

    #[error("at byte {offset}: register allocator exhausted for this expression")]
    RegisterAllocatorExhausted { offset: usize },

    #[error("at byte {offset}: assembler error: {source}")]
    Assembler { offset: usize, #[source] source: ember_asm::AsmError },

    #[error("code installation failed: {0}")]
    CodeInstall(#[from] ember_codebuf::CodeBufError),

    #[error("at byte {offset}: unsupported: {what}")]
    Unsupported { offset: usize, what: String },
}

impl CompileError {
    /// Best-effort source offset for errors that carry one; codegen/codebuf
    /// failures aren't tied to one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CompileError::UnknownName { offset, .. }
            | CompileError::NotCallable { offset, .. }
            | CompileError::ArityMismatch { offset, .. }
            | CompileError::UnknownAttribute { offset, .. }
            | CompileError::LoopControlOutsideLoop { offset }
            | CompileError::ReturnOutsideFunction { offset }
            | CompileError::RegisterAllocatorExhausted { offset }
            | CompileError::Assembler { offset, .. }
            | CompileError::Unsupported { offset, .. } => Some(*offset),
            CompileError::CodeInstall(_) => None,
        }
    }
}
