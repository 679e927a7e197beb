//! The `Assembler`: the public surface every codegen emitter in
//! `ember-compiler` drives.
//!
//! Instructions are appended to an internal byte buffer as they're emitted;
//! labels may be referenced before they're bound, and [`Assembler::finish`]
//! patches every outstanding reference once all label positions are known.

use crate::cc::Cc;
use crate::encode::{encode_modrm, RegField};
use crate::error::{AsmError, AsmResult};
use crate::label::{Label, LabelTable, Patch, PatchKind};
use crate::operand::{Operand, OperandSize};
use crate::reg::Reg;

/// The eight arithmetic-group operations, numbered to match their `/digit`
/// opcode extension and `op*8` base opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// The shift/rotate group, numbered to match their `/digit` opcode extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Rol = 0,
    Ror = 1,
    Rcl = 2,
    Rcr = 3,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

pub struct Assembler {
    code: Vec<u8>,
    labels: LabelTable,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Assembler { code: Vec::new(), labels: LabelTable::new() }
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn new_label(&mut self, name: &str) -> Label {
        self.labels.new_label(name)
    }

    pub fn bind_label(&mut self, label: Label) -> AsmResult<()> {
        self.labels.bind(label, self.code.len())
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.offset_of(label)
    }

    // ---- arithmetic group --------------------------------------------

    /// `op dst, src` with both operands in registers (or `dst` a memory
    /// reference, `src` always a register).
    pub fn op_rm_reg(&mut self, op: ArithOp, dst: Operand, src: Reg, size: OperandSize) -> AsmResult<()> {
        let base = (op as u8) * 8;
        let opcode = if size == OperandSize::Byte { base } else { base + 1 };
        encode_modrm(&mut self.code, &[opcode], RegField::Reg(src), dst, size)
    }

    /// `op dst, src` with `dst` a register and `src` a register or memory
    /// reference.
    pub fn op_reg_rm(&mut self, op: ArithOp, dst: Reg, src: Operand, size: OperandSize) -> AsmResult<()> {
        let base = (op as u8) * 8;
        let opcode = if size == OperandSize::Byte { base + 2 } else { base + 3 };
        encode_modrm(&mut self.code, &[opcode], RegField::Reg(dst), src, size)
    }

    /// `op dst, imm`. Uses the 8-bit sign-extended immediate form (`0x83`)
    /// whenever the value fits and the operand isn't byte-sized.
    pub fn op_rm_imm(&mut self, op: ArithOp, dst: Operand, imm: i64, size: OperandSize) -> AsmResult<()> {
        let digit = op as u8;
        if size == OperandSize::Byte {
            let imm8 = i8::try_from(imm).map_err(|_| AsmError::ImmediateOutOfRange(imm))?;
            encode_modrm(&mut self.code, &[0x80], RegField::Digit(digit), dst, size)?;
            self.code.push(imm8 as u8);
            return Ok(());
        }
        if let Ok(imm8) = i8::try_from(imm) {
            encode_modrm(&mut self.code, &[0x83], RegField::Digit(digit), dst, size)?;
            self.code.push(imm8 as u8);
        } else {
            let imm32 = i32::try_from(imm).map_err(|_| AsmError::ImmediateOutOfRange(imm))?;
            encode_modrm(&mut self.code, &[0x81], RegField::Digit(digit), dst, size)?;
            self.code.extend_from_slice(&imm32.to_le_bytes());
        }
        Ok(())
    }

    // ---- mov -----------------------------------------------------------

    pub fn mov_rm_reg(&mut self, dst: Operand, src: Reg, size: OperandSize) -> AsmResult<()> {
        let opcode = if size == OperandSize::Byte { 0x88 } else { 0x89 };
        encode_modrm(&mut self.code, &[opcode], RegField::Reg(src), dst, size)
    }

    pub fn mov_reg_rm(&mut self, dst: Reg, src: Operand, size: OperandSize) -> AsmResult<()> {
        let opcode = if size == OperandSize::Byte { 0x8A } else { 0x8B };
        encode_modrm(&mut self.code, &[opcode], RegField::Reg(dst), src, size)
    }

    /// `mov reg, imm64` — the only way to materialize a full 64-bit
    /// immediate. Always 10 bytes: REX.W, `0xB8+reg`, 8-byte immediate.
    pub fn mov_reg_imm64(&mut self, dst: Reg, imm: i64) -> AsmResult<()> {
        let rex = 0x48 | if dst.is_extended() { 0x01 } else { 0 };
        self.code.push(rex);
        self.code.push(0xB8 + dst.low_bits());
        self.code.extend_from_slice(&imm.to_le_bytes());
        Ok(())
    }

    pub fn mov_rm_imm32(&mut self, dst: Operand, imm: i32, size: OperandSize) -> AsmResult<()> {
        encode_modrm(&mut self.code, &[0xC7], RegField::Digit(0), dst, size)?;
        self.code.extend_from_slice(&imm.to_le_bytes());
        Ok(())
    }

    // ---- stack ops -------------------------------------------------------

    pub fn push_reg(&mut self, reg: Reg) {
        if reg.is_extended() {
            self.code.push(0x41);
        }
        self.code.push(0x50 + reg.low_bits());
    }

    pub fn pop_reg(&mut self, reg: Reg) {
        if reg.is_extended() {
            self.code.push(0x41);
        }
        self.code.push(0x58 + reg.low_bits());
    }

    // ---- test / compare --------------------------------------------------

    pub fn test_rm_reg(&mut self, dst: Operand, src: Reg, size: OperandSize) -> AsmResult<()> {
        let opcode = if size == OperandSize::Byte { 0x84 } else { 0x85 };
        encode_modrm(&mut self.code, &[opcode], RegField::Reg(src), dst, size)
    }

    pub fn test_rm_imm32(&mut self, dst: Operand, imm: i32, size: OperandSize) -> AsmResult<()> {
        let opcode = if size == OperandSize::Byte { 0xF6 } else { 0xF7 };
        encode_modrm(&mut self.code, &[opcode], RegField::Digit(0), dst, size)?;
        if size == OperandSize::Byte {
            self.code.push(imm as u8);
        } else {
            self.code.extend_from_slice(&imm.to_le_bytes());
        }
        Ok(())
    }

    pub fn xchg_rr(&mut self, a: Reg, b: Reg, size: OperandSize) -> AsmResult<()> {
        let opcode = if size == OperandSize::Byte { 0x86 } else { 0x87 };
        encode_modrm(&mut self.code, &[opcode], RegField::Reg(a), Operand::Reg(b), size)
    }

    // ---- multiply / divide -------------------------------------------------

    /// Two-operand signed multiply: `dst *= src`. `0F AF /r`.
    pub fn imul_reg_rm(&mut self, dst: Reg, src: Operand, size: OperandSize) -> AsmResult<()> {
        encode_modrm(&mut self.code, &[0x0F, 0xAF], RegField::Reg(dst), src, size)
    }

    /// Sign-extend `rax` into `rdx:rax` ahead of `idiv`. `99` (with REX.W for
    /// 64-bit).
    pub fn cqo(&mut self) {
        self.code.push(0x48);
        self.code.push(0x99);
    }

    /// Signed divide `rdx:rax` by `src`: quotient into `rax`, remainder into
    /// `rdx`. Callers must sign-extend with `cqo` first. `F7 /7`.
    pub fn idiv_rm(&mut self, src: Operand, size: OperandSize) -> AsmResult<()> {
        encode_modrm(&mut self.code, &[0xF7], RegField::Digit(7), src, size)
    }

    /// Two's-complement negate in place. `F7 /3`.
    pub fn neg_rm(&mut self, dst: Operand, size: OperandSize) -> AsmResult<()> {
        encode_modrm(&mut self.code, &[0xF7], RegField::Digit(3), dst, size)
    }

    /// Bitwise complement in place. `F7 /2`.
    pub fn not_rm(&mut self, dst: Operand, size: OperandSize) -> AsmResult<()> {
        encode_modrm(&mut self.code, &[0xF7], RegField::Digit(2), dst, size)
    }

    // ---- shift / rotate ----------------------------------------------------

    pub fn shift_imm(&mut self, op: ShiftOp, dst: Operand, count: u8, size: OperandSize) -> AsmResult<()> {
        let digit = op as u8;
        if count == 1 {
            let opcode = if size == OperandSize::Byte { 0xD0 } else { 0xD1 };
            return encode_modrm(&mut self.code, &[opcode], RegField::Digit(digit), dst, size);
        }
        let opcode = if size == OperandSize::Byte { 0xC0 } else { 0xC1 };
        encode_modrm(&mut self.code, &[opcode], RegField::Digit(digit), dst, size)?;
        self.code.push(count);
        Ok(())
    }

    /// Shift/rotate by the count in `CL`.
    pub fn shift_cl(&mut self, op: ShiftOp, dst: Operand, size: OperandSize) -> AsmResult<()> {
        let digit = op as u8;
        let opcode = if size == OperandSize::Byte { 0xD2 } else { 0xD3 };
        encode_modrm(&mut self.code, &[opcode], RegField::Digit(digit), dst, size)
    }

    pub fn setcc(&mut self, cc: Cc, dst: Operand) -> AsmResult<()> {
        encode_modrm(&mut self.code, &[0x0F, 0x90 + cc.bits()], RegField::Digit(0), dst, OperandSize::Byte)
    }

    // ---- control flow ---------------------------------------------------

    /// Unconditional jump to a label. Chooses the 8-bit displacement form
    /// when the label is already bound (backward jump) and in range;
    /// otherwise emits the near (`rel32`) form, which is always safe for
    /// forward references since the code buffer is under 2 GiB.
    pub fn jmp(&mut self, label: Label) {
        if let Some(target) = self.labels.offset_of(label) {
            let instr_end = self.code.len() + 2;
            let rel = target as i64 - instr_end as i64;
            if i8::try_from(rel).is_ok() {
                self.code.push(0xEB);
                self.code.push(rel as i8 as u8);
                return;
            }
        }
        self.code.push(0xE9);
        let field_offset = self.code.len();
        self.code.extend_from_slice(&[0; 4]);
        let instr_end = self.code.len();
        self.labels.record_patch(Patch { label, kind: PatchKind::JmpRel32, field_offset, instr_end });
    }

    pub fn jcc(&mut self, cc: Cc, label: Label) {
        if let Some(target) = self.labels.offset_of(label) {
            let instr_end = self.code.len() + 2;
            let rel = target as i64 - instr_end as i64;
            if i8::try_from(rel).is_ok() {
                self.code.push(0x70 + cc.bits());
                self.code.push(rel as i8 as u8);
                return;
            }
        }
        self.code.push(0x0F);
        self.code.push(0x80 + cc.bits());
        let field_offset = self.code.len();
        self.code.extend_from_slice(&[0; 4]);
        let instr_end = self.code.len();
        self.labels.record_patch(Patch { label, kind: PatchKind::JccRel32(cc), field_offset, instr_end });
    }

    pub fn jmp_rm(&mut self, target: Operand) -> AsmResult<()> {
        encode_modrm(&mut self.code, &[0xFF], RegField::Digit(4), target, OperandSize::QWord)
    }

    /// Unconditional jump to an absolute 64-bit address that may be out of
    /// `rel32` range: pushes the low 32 bits, overwrites the high 32 bits of
    /// the pushed slot, then `ret`s into it. `RAX` is not touched.
    pub fn jmp_abs64(&mut self, target: u64) {
        let low = target as u32;
        let high = (target >> 32) as u32;
        self.code.push(0x68); // push imm32 (sign-extended to 64 bits on push)
        self.code.extend_from_slice(&low.to_le_bytes());
        // mov dword [rsp+4], high
        self.code.push(0xC7);
        self.code.push(0x44);
        self.code.push(0x24);
        self.code.push(0x04);
        self.code.extend_from_slice(&high.to_le_bytes());
        self.code.push(0xC3); // ret
    }

    pub fn call(&mut self, label: Label) {
        self.code.push(0xE8);
        let field_offset = self.code.len();
        self.code.extend_from_slice(&[0; 4]);
        let instr_end = self.code.len();
        self.labels.record_patch(Patch { label, kind: PatchKind::CallRel32, field_offset, instr_end });
    }

    pub fn call_rm(&mut self, target: Operand) -> AsmResult<()> {
        encode_modrm(&mut self.code, &[0xFF], RegField::Digit(2), target, OperandSize::QWord)
    }

    pub fn ret(&mut self) {
        self.code.push(0xC3);
    }

    pub fn ret_imm16(&mut self, imm: u16) {
        self.code.push(0xC2);
        self.code.extend_from_slice(&imm.to_le_bytes());
    }

    pub fn movsd(&mut self, dst: crate::reg::Xmm, src: crate::reg::Xmm) {
        crate::sse::movsd_xmm_xmm(&mut self.code, dst, src)
    }

    pub fn addsd(&mut self, dst: crate::reg::Xmm, src: crate::reg::Xmm) {
        crate::sse::addsd(&mut self.code, dst, src)
    }

    pub fn subsd(&mut self, dst: crate::reg::Xmm, src: crate::reg::Xmm) {
        crate::sse::subsd(&mut self.code, dst, src)
    }

    pub fn mulsd(&mut self, dst: crate::reg::Xmm, src: crate::reg::Xmm) {
        crate::sse::mulsd(&mut self.code, dst, src)
    }

    pub fn divsd(&mut self, dst: crate::reg::Xmm, src: crate::reg::Xmm) {
        crate::sse::divsd(&mut self.code, dst, src)
    }

    pub fn ucomisd(&mut self, a: crate::reg::Xmm, b: crate::reg::Xmm) {
        crate::sse::ucomisd(&mut self.code, a, b)
    }

    pub fn xorpd_self(&mut self, dst: crate::reg::Xmm) {
        crate::sse::xorpd_self(&mut self.code, dst)
    }

    pub fn cvtsi2sd(&mut self, dst: crate::reg::Xmm, src: Reg) {
        crate::sse::cvtsi2sd(&mut self.code, dst, src)
    }

    pub fn cvttsd2si(&mut self, dst: Reg, src: crate::reg::Xmm) {
        crate::sse::cvttsd2si(&mut self.code, dst, src)
    }

    pub fn movq_xmm_from_gpr(&mut self, dst: crate::reg::Xmm, src: Reg) {
        crate::sse::movq_xmm_from_gpr(&mut self.code, dst, src)
    }

    pub fn movq_gpr_from_xmm(&mut self, dst: Reg, src: crate::reg::Xmm) {
        crate::sse::movq_gpr_from_xmm(&mut self.code, dst, src)
    }

    /// Resolve every label reference and return the finished machine code
    /// along with each label's offset, indexed by label id — the compiler
    /// uses this to record fragment entry points and exception-handler
    /// targets.
    pub fn finish(mut self) -> AsmResult<(Vec<u8>, Vec<usize>)> {
        self.labels.apply(&mut self.code)?;
        let mut offsets = Vec::new();
        let mut id = 0u32;
        while let Some(off) = self.labels.offset_of(Label(id)) {
            offsets.push(off);
            id += 1;
        }
        Ok((self.code, offsets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_reg_imm64_is_ten_bytes() {
        let mut asm = Assembler::new();
        asm.mov_reg_imm64(Reg::Rax, 0x1122_3344_5566_7788).unwrap();
        let (code, _) = asm.finish().unwrap();
        assert_eq!(code.len(), 10);
        assert_eq!(code[0], 0x48);
        assert_eq!(code[1], 0xB8);
    }

    #[test]
    fn scenario_copy_rcx_into_rax_through_frame() {
        // push rbp; mov rax, rcx; pop rbp; ret
        let mut asm = Assembler::new();
        asm.push_reg(Reg::Rbp);
        asm.mov_rm_reg(Operand::Reg(Reg::Rax), Reg::Rcx, OperandSize::QWord).unwrap();
        asm.pop_reg(Reg::Rbp);
        asm.ret();
        let (code, _) = asm.finish().unwrap();
        assert_eq!(code, vec![0x55, 0x48, 0x89, 0xC8, 0x5D, 0xC3]);
    }

    #[test]
    fn backward_jump_prefers_short_form() {
        let mut asm = Assembler::new();
        let top = asm.new_label("top");
        asm.bind_label(top).unwrap();
        asm.jmp(top);
        let (code, _) = asm.finish().unwrap();
        assert_eq!(code, vec![0xEB, 0xFE]);
    }

    #[test]
    fn forward_jump_patches_near_form() {
        let mut asm = Assembler::new();
        let end = asm.new_label("end");
        asm.jmp(end);
        asm.push_reg(Reg::Rbx);
        asm.bind_label(end).unwrap();
        asm.ret();
        let (code, _) = asm.finish().unwrap();
        assert_eq!(code[0], 0xE9);
        let rel = i32::from_le_bytes(code[1..5].try_into().unwrap());
        assert_eq!(rel, 1); // one byte (push rbx) between the jump and its target
    }

    #[test]
    fn jmp_abs64_is_twelve_bytes() {
        let mut asm = Assembler::new();
        asm.jmp_abs64(0xDEAD_BEEF_0000_1234);
        let (code, _) = asm.finish().unwrap();
        assert_eq!(code.len(), 12);
        assert_eq!(*code.last().unwrap(), 0xC3);
    }
}
