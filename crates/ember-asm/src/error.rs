//! Assembly-time failures
//!
//! All of these are fatal to the fragment being assembled (§7.1): the
//! compiler catches them, attaches a source offset, and reports a compile
//! error rather than continuing to assemble invalid code.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),

    #[error("undefined label: {0}")]
    UndefinedLabel(String),

    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    #[error("immediate {0} does not fit in 32 bits")]
    ImmediateOutOfRange(i64),

    #[error("relative displacement {0} does not fit in {1}-bit field")]
    DisplacementOutOfRange(i64, u8),

    #[error("unconditional jump target is unreachable even with a 64-bit trampoline")]
    TargetUnreachable,

    #[error("conditional jumps and calls beyond 2 GiB are not supported")]
    LongConditionalUnsupported,
}

pub type AsmResult<T> = Result<T, AsmError>;
