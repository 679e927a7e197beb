//! ModR/M + SIB + REX encoding core
//!
//! This is the one place that understands AMD64's addressing-mode byte
//! layout; every instruction emitter in [`crate::assembler`] funnels through
//! [`encode_modrm`].

use crate::error::{AsmError, AsmResult};
use crate::operand::{Base, MemRef, Operand, OperandSize};
use crate::reg::Reg;

/// The ModR/M "reg" field: either a real register operand, or a numeric
/// opcode extension ("/digit" in Intel syntax) for instructions that only
/// have one real operand (e.g. the `imul`/shift/unary groups).
#[derive(Debug, Clone, Copy)]
pub enum RegField {
    Reg(Reg),
    Digit(u8),
}

impl RegField {
    fn low_bits(self) -> u8 {
        match self {
            RegField::Reg(r) => r.low_bits(),
            RegField::Digit(d) => d & 0x7,
        }
    }

    fn is_extended(self) -> bool {
        match self {
            RegField::Reg(r) => r.is_extended(),
            RegField::Digit(_) => false,
        }
    }
}

/// Registers whose low 3 bits are 0b101 (RBP, R13): using them as a base with
/// a zero displacement collides with the mod=00 "RIP/no-base" encoding, so a
/// fake 8-bit zero displacement must be forced instead.
fn needs_forced_disp8(base: Reg) -> bool {
    base.low_bits() == Reg::Rbp.low_bits()
}

/// Emit REX prefix (if required), opcode, ModR/M, optional SIB, and optional
/// displacement for `op reg, rm` (or `op rm` with a `/digit` extension).
///
/// `opcode` is the 1- or 2-byte primary opcode (callers needing a `0F`
/// two-byte opcode pass both bytes); this function appends it between the
/// optional size-override/REX prefixes and the ModR/M byte.
pub fn encode_modrm(
    buf: &mut Vec<u8>,
    opcode: &[u8],
    reg: RegField,
    rm: Operand,
    size: OperandSize,
) -> AsmResult<()> {
    if size == OperandSize::Word {
        buf.push(0x66);
    }

    let reg_ext = reg.is_extended();
    let reg_bits = reg.low_bits();

    match rm {
        Operand::Reg(rm_reg) => {
            let rex = 0x40
                | if size == OperandSize::QWord { 0x08 } else { 0 }
                | if reg_ext { 0x04 } else { 0 }
                | if rm_reg.is_extended() { 0x01 } else { 0 };
            if rex != 0x40 {
                buf.push(rex);
            }
            buf.extend_from_slice(opcode);
            buf.push(0xC0 | (reg_bits << 3) | rm_reg.low_bits());
            Ok(())
        }
        Operand::Mem(mem) => encode_modrm_mem(buf, opcode, reg_bits, reg_ext, &mem, size),
    }
}

fn encode_disp(buf: &mut Vec<u8>, offset: i32, mode_forces_disp8: bool) -> u8 {
    if offset == 0 && !mode_forces_disp8 {
        0b00
    } else if let Ok(d8) = i8::try_from(offset) {
        buf.push(d8 as u8);
        0b01
    } else {
        buf.extend_from_slice(&offset.to_le_bytes());
        0b10
    }
}

fn encode_modrm_mem(
    buf: &mut Vec<u8>,
    opcode: &[u8],
    reg_bits: u8,
    reg_ext: bool,
    mem: &MemRef,
    size: OperandSize,
) -> AsmResult<()> {
    if let Base::Rip = mem.base {
        // mod=00, rm=101: RIP-relative, always a 4-byte displacement.
        let rex = 0x40 | if size == OperandSize::QWord { 0x08 } else { 0 } | if reg_ext { 0x04 } else { 0 };
        if rex != 0x40 {
            buf.push(rex);
        }
        buf.extend_from_slice(opcode);
        buf.push((reg_bits << 3) | 0x05);
        buf.extend_from_slice(&mem.offset.to_le_bytes());
        return Ok(());
    }

    let Base::Reg(base) = mem.base else { unreachable!() };
    let use_sib = mem.index.is_some() || base == Reg::Rsp;

    let (index_reg, scale) = mem.index.unwrap_or((Reg::Rsp, 1));
    let index_ext = mem.index.is_some() && index_reg.is_extended();
    let base_ext = base.is_extended();

    let rex = 0x40
        | if size == OperandSize::QWord { 0x08 } else { 0 }
        | if reg_ext { 0x04 } else { 0 }
        | if index_ext { 0x02 } else { 0 }
        | if base_ext { 0x01 } else { 0 };
    if rex != 0x40 {
        buf.push(rex);
    }
    buf.extend_from_slice(opcode);

    let forces_disp8 = needs_forced_disp8(base);
    if use_sib {
        let rm_byte_placeholder = buf.len();
        buf.push(0); // ModR/M, patched below once we know mod bits
        let scale_bits = match scale {
            1 => 0b00,
            2 => 0b01,
            4 => 0b10,
            8 => 0b11,
            other => return Err(AsmError::InvalidOperand(format!("invalid SIB scale {other}"))),
        };
        let index_field = if mem.index.is_some() { index_reg.low_bits() } else { 0b100 };
        let sib = (scale_bits << 6) | (index_field << 3) | base.low_bits();
        buf.push(sib);
        let mode = encode_disp(buf, mem.offset, forces_disp8);
        buf[rm_byte_placeholder] = (mode << 6) | (reg_bits << 3) | 0b100;
    } else {
        let rm_byte_placeholder = buf.len();
        buf.push(0);
        let mode = encode_disp(buf, mem.offset, forces_disp8);
        buf[rm_byte_placeholder] = (mode << 6) | (reg_bits << 3) | base.low_bits();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::MemRef;

    #[test]
    fn register_direct_mov_r8_rcx_is_three_bytes() {
        // mov r8, rcx -> REX.WB, 0x89, ModRM(C1)
        let mut buf = Vec::new();
        encode_modrm(&mut buf, &[0x89], RegField::Reg(Reg::Rcx), Operand::Reg(Reg::R8), OperandSize::QWord).unwrap();
        assert_eq!(buf, vec![0x49, 0x89, 0xC1]);
    }

    #[test]
    fn zero_displacement_rbp_forces_disp8() {
        let mut buf = Vec::new();
        let mem = MemRef::offset(Reg::Rbp, 0);
        encode_modrm(&mut buf, &[0x8B], RegField::Reg(Reg::Rax), Operand::Mem(mem), OperandSize::QWord).unwrap();
        // mod=01 (forced), rm=101 (rbp), disp8=0 trailing byte
        assert_eq!(buf.last(), Some(&0u8));
        let modrm = buf[2];
        assert_eq!(modrm >> 6, 0b01);
    }

    #[test]
    fn plain_base_without_index_still_uses_sib_only_for_rsp() {
        let mut buf = Vec::new();
        let mem = MemRef::offset(Reg::Rax, 8);
        encode_modrm(&mut buf, &[0x8B], RegField::Reg(Reg::Rcx), Operand::Mem(mem), OperandSize::QWord).unwrap();
        // REX.W, opcode, modrm (mod=01, rm=000=rax), disp8
        assert_eq!(buf[0], 0x48);
        assert_eq!(buf[1], 0x8B);
        assert_eq!(buf[2] & 0x07, Reg::Rax.low_bits());
        assert_eq!(buf[2] >> 6, 0b01);
    }

    #[test]
    fn rsp_base_forces_sib() {
        let mut buf = Vec::new();
        let mem = MemRef::offset(Reg::Rsp, 16);
        encode_modrm(&mut buf, &[0x8B], RegField::Reg(Reg::Rax), Operand::Mem(mem), OperandSize::QWord).unwrap();
        let modrm = buf[2];
        assert_eq!(modrm & 0x07, 0b100); // rm=4 -> SIB follows
        let sib = buf[3];
        assert_eq!(sib & 0x07, Reg::Rsp.low_bits());
    }

    #[test]
    fn rip_relative_uses_four_byte_displacement() {
        let mut buf = Vec::new();
        let mem = MemRef::rip(0x1234);
        encode_modrm(&mut buf, &[0x8B], RegField::Reg(Reg::Rax), Operand::Mem(mem), OperandSize::QWord).unwrap();
        assert_eq!(buf[2] & 0xC7, 0x05); // mod=00, rm=101
        assert_eq!(&buf[3..7], &0x1234i32.to_le_bytes());
    }
}
