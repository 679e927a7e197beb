//! Native calling convention: a System V AMD64-like convention extended with
//! four process-reserved registers that every generated fragment can rely on
//! without passing them explicitly.
//!
//! Reserved registers are callee-saved in the System V sense (`rbx`, `r12`,
//! `r13`, `r14`) so a fragment calling into another fragment, a common-object
//! helper, or libc never needs to reload them afterward.

use ember_asm::{Reg, Xmm};

/// Integer-class argument registers, in order. Overflow beyond six integer
/// arguments goes on the stack, right-to-left.
pub const INT_ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Floating-point argument registers, in order. Overflow beyond eight
/// floating arguments goes on the stack, right-to-left.
pub const FLOAT_ARG_REGS: [Xmm; 8] =
    [Xmm(0), Xmm(1), Xmm(2), Xmm(3), Xmm(4), Xmm(5), Xmm(6), Xmm(7)];

/// The register a scalar return value comes back in, integer or floating
/// depending on the fragment's return type.
pub const INT_RETURN_REG: Reg = Reg::Rax;
pub const FLOAT_RETURN_REG: Xmm = Xmm(0);

/// Base of the current module's global-variable slot table.
pub const GLOBALS_BASE_REG: Reg = Reg::Rbx;
/// Base of the common-objects table (`malloc`, `free`, `add_reference`,
/// `delete_reference`, and the built-in type helpers), addressed through a
/// fixed register so calls into it encode as a short `[reg + offset]` form.
pub const COMMON_OBJECTS_BASE_REG: Reg = Reg::R12;
/// Head of the current exception-block linked list; NULL outside any
/// try/except/finally region.
pub const EXCEPTION_BLOCK_HEAD_REG: Reg = Reg::R13;
/// The in-flight exception object, or NULL when no exception is active.
pub const ACTIVE_EXCEPTION_REG: Reg = Reg::R14;

/// General-purpose registers left over once the four reserved roles and the
/// six integer argument registers are accounted for — what the intra-
/// expression register allocator (`regalloc.rs`) has to work with, alongside
/// `rax` once it's no longer holding a live return value.
pub const SCRATCH_INT_REGS: [Reg; 2] = [Reg::Rax, Reg::R15];

pub fn is_reserved(reg: Reg) -> bool {
    matches!(reg, GLOBALS_BASE_REG | COMMON_OBJECTS_BASE_REG | EXCEPTION_BLOCK_HEAD_REG | ACTIVE_EXCEPTION_REG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_registers_are_mutually_distinct() {
        let reserved = [GLOBALS_BASE_REG, COMMON_OBJECTS_BASE_REG, EXCEPTION_BLOCK_HEAD_REG, ACTIVE_EXCEPTION_REG];
        for (i, a) in reserved.iter().enumerate() {
            for (j, b) in reserved.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn argument_registers_never_alias_reserved_registers() {
        for r in INT_ARG_REGS {
            assert!(!is_reserved(r));
        }
    }

    #[test]
    fn scratch_registers_are_not_reserved() {
        for r in SCRATCH_INT_REGS {
            assert!(!is_reserved(r));
        }
    }
}
