//! AMD64 register names
//!
//! General-purpose registers are a flat 16-value space; registers 8-15 are
//! "extension" registers that require a REX prefix bit to address (REX.R for
//! the reg field, REX.B/REX.X for the base/index fields).

/// A general-purpose AMD64 register, encoded 0-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// The low 3 bits used in ModR/M and SIB byte fields.
    #[inline]
    pub fn low_bits(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register needs a REX extension bit (registers 8-15).
    #[inline]
    pub fn is_extended(self) -> bool {
        (self as u8) >= 8
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// An XMM register, encoded 0-15 in parallel with the general-purpose set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Xmm(pub u8);

impl Xmm {
    pub const fn new(n: u8) -> Self {
        assert!(n < 16);
        Xmm(n)
    }

    #[inline]
    pub fn low_bits(self) -> u8 {
        self.0 & 0x7
    }

    #[inline]
    pub fn is_extended(self) -> bool {
        self.0 >= 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_registers_start_at_r8() {
        assert!(!Reg::Rdi.is_extended());
        assert!(Reg::R8.is_extended());
        assert!(Reg::R15.is_extended());
    }

    #[test]
    fn low_bits_mask_to_three_bits() {
        assert_eq!(Reg::R15.low_bits(), 0x7);
        assert_eq!(Reg::Rax.low_bits(), 0x0);
    }
}
