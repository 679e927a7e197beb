//! Operands: registers, memory references, and operand sizes

use crate::reg::Reg;

/// Width of an operand: selects the 0x66 size-override prefix (word) or the
/// REX.W bit (quadword).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSize {
    Byte,
    Word,
    DWord,
    QWord,
}

/// The base of a memory reference: either a general-purpose register, or the
/// special RIP-relative form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    Reg(Reg),
    Rip,
}

/// `base [+ index * scale] + offset`.
///
/// Invariants enforced at construction (see [`MemRef::new`]):
///   - `scale` is one of 1, 2, 4, 8 when an index is present.
///   - `Rsp` may not be used as an index register.
///   - `offset` fits in a signed 32-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    pub base: Base,
    pub index: Option<(Reg, u8)>,
    pub offset: i32,
}

impl MemRef {
    pub fn new(base: Base, index: Option<(Reg, u8)>, offset: i64) -> Result<Self, String> {
        if let Some((idx, scale)) = index {
            if !matches!(scale, 1 | 2 | 4 | 8) {
                return Err(format!("invalid SIB scale {scale}, must be 1, 2, 4, or 8"));
            }
            if idx == Reg::Rsp {
                return Err("RSP cannot be used as an index register".to_string());
            }
            if matches!(base, Base::Rip) {
                return Err("RIP cannot be used with scaled index addressing".to_string());
            }
        }
        let offset = i32::try_from(offset).map_err(|_| "offset must fit in 32 bits".to_string())?;
        Ok(MemRef { base, index, offset })
    }

    /// `[base]` with no index and no offset.
    pub fn direct(base: Reg) -> Self {
        MemRef { base: Base::Reg(base), index: None, offset: 0 }
    }

    /// `[base + offset]` with no index.
    pub fn offset(base: Reg, offset: i64) -> Self {
        MemRef::new(Base::Reg(base), None, offset).expect("offset must fit in 32 bits")
    }

    /// `[rip + offset]`, i.e. PC-relative addressing.
    pub fn rip(offset: i64) -> Self {
        MemRef::new(Base::Rip, None, offset).expect("offset must fit in 32 bits")
    }
}

/// Either a register-direct operand or a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Mem(MemRef),
}

impl From<Reg> for Operand {
    fn from(r: Reg) -> Self {
        Operand::Reg(r)
    }
}

impl From<MemRef> for Operand {
    fn from(m: MemRef) -> Self {
        Operand::Mem(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_rsp_as_index() {
        let err = MemRef::new(Base::Reg(Reg::Rax), Some((Reg::Rsp, 4)), 0);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_bad_scale() {
        let err = MemRef::new(Base::Reg(Reg::Rax), Some((Reg::Rbx, 3)), 0);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_oversized_offset() {
        let err = MemRef::new(Base::Reg(Reg::Rax), None, (i32::MAX as i64) + 1);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_rip_with_index() {
        let err = MemRef::new(Base::Rip, Some((Reg::Rbx, 1)), 0);
        assert!(err.is_err());
    }
}
