//! Minimal scalar double-precision SSE2 encodings, register-direct only.
//!
//! Floating-point locals live on the stack like everything else; codegen
//! moves them in and out of xmm registers through a general-purpose register
//! (`movq`) rather than through a dedicated SSE memory-operand encoder, so
//! this module only needs to cover the xmm-xmm and xmm-gpr register-direct
//! forms actually used by arithmetic and comparisons.

use crate::reg::{Reg, Xmm};

fn modrm_reg_direct(reg_field: u8, rm_field: u8) -> u8 {
    0xC0 | ((reg_field & 0x7) << 3) | (rm_field & 0x7)
}

fn rex(w: bool, r_ext: bool, b_ext: bool) -> Option<u8> {
    if !w && !r_ext && !b_ext {
        None
    } else {
        Some(0x40 | (w as u8) << 3 | (r_ext as u8) << 2 | (b_ext as u8))
    }
}

fn push_rex(buf: &mut Vec<u8>, w: bool, r_ext: bool, b_ext: bool) {
    if let Some(byte) = rex(w, r_ext, b_ext) {
        buf.push(byte);
    }
}

/// `movsd xmm_dst, xmm_src`
pub fn movsd_xmm_xmm(buf: &mut Vec<u8>, dst: Xmm, src: Xmm) {
    buf.push(0xF2);
    push_rex(buf, false, dst.is_extended(), src.is_extended());
    buf.push(0x0F);
    buf.push(0x10);
    buf.push(modrm_reg_direct(dst.low_bits(), src.low_bits()));
}

/// `addsd/subsd/mulsd/divsd xmm_dst, xmm_src` — `dst := dst op src`.
fn arith_sd(buf: &mut Vec<u8>, opcode: u8, dst: Xmm, src: Xmm) {
    buf.push(0xF2);
    push_rex(buf, false, dst.is_extended(), src.is_extended());
    buf.push(0x0F);
    buf.push(opcode);
    buf.push(modrm_reg_direct(dst.low_bits(), src.low_bits()));
}

pub fn addsd(buf: &mut Vec<u8>, dst: Xmm, src: Xmm) {
    arith_sd(buf, 0x58, dst, src)
}
pub fn subsd(buf: &mut Vec<u8>, dst: Xmm, src: Xmm) {
    arith_sd(buf, 0x5C, dst, src)
}
pub fn mulsd(buf: &mut Vec<u8>, dst: Xmm, src: Xmm) {
    arith_sd(buf, 0x59, dst, src)
}
pub fn divsd(buf: &mut Vec<u8>, dst: Xmm, src: Xmm) {
    arith_sd(buf, 0x5E, dst, src)
}

/// `ucomisd xmm_a, xmm_b` — sets RFLAGS for an unordered float compare.
pub fn ucomisd(buf: &mut Vec<u8>, a: Xmm, b: Xmm) {
    buf.push(0x66);
    push_rex(buf, false, a.is_extended(), b.is_extended());
    buf.push(0x0F);
    buf.push(0x2E);
    buf.push(modrm_reg_direct(a.low_bits(), b.low_bits()));
}

/// `xorpd xmm_dst, xmm_dst` — zero a register (used to materialize 0.0).
pub fn xorpd_self(buf: &mut Vec<u8>, dst: Xmm) {
    buf.push(0x66);
    push_rex(buf, false, dst.is_extended(), dst.is_extended());
    buf.push(0x0F);
    buf.push(0x57);
    buf.push(modrm_reg_direct(dst.low_bits(), dst.low_bits()));
}

/// `cvtsi2sd xmm_dst, gpr_src` — widen a 64-bit integer to double.
pub fn cvtsi2sd(buf: &mut Vec<u8>, dst: Xmm, src: Reg) {
    buf.push(0xF2);
    push_rex(buf, true, dst.is_extended(), src.is_extended());
    buf.push(0x0F);
    buf.push(0x2A);
    buf.push(modrm_reg_direct(dst.low_bits(), src.low_bits()));
}

/// `cvttsd2si gpr_dst, xmm_src` — truncate a double to a 64-bit integer.
pub fn cvttsd2si(buf: &mut Vec<u8>, dst: Reg, src: Xmm) {
    buf.push(0xF2);
    push_rex(buf, true, dst.is_extended(), src.is_extended());
    buf.push(0x0F);
    buf.push(0x2C);
    buf.push(modrm_reg_direct(dst.low_bits(), src.low_bits()));
}

/// `movq xmm_dst, gpr_src` — reinterpret 64 integer bits as an xmm's low
/// lane. Used to load/spill bit patterns (e.g. for sign-bit flips on negate)
/// without a dedicated memory-operand SSE encoder.
pub fn movq_xmm_from_gpr(buf: &mut Vec<u8>, dst: Xmm, src: Reg) {
    buf.push(0x66);
    push_rex(buf, true, dst.is_extended(), src.is_extended());
    buf.push(0x0F);
    buf.push(0x6E);
    buf.push(modrm_reg_direct(dst.low_bits(), src.low_bits()));
}

/// `movq gpr_dst, xmm_src`
pub fn movq_gpr_from_xmm(buf: &mut Vec<u8>, dst: Reg, src: Xmm) {
    buf.push(0x66);
    push_rex(buf, true, src.is_extended(), dst.is_extended());
    buf.push(0x0F);
    buf.push(0x7E);
    buf.push(modrm_reg_direct(src.low_bits(), dst.low_bits()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movsd_register_direct_is_five_bytes_without_rex() {
        let mut buf = Vec::new();
        movsd_xmm_xmm(&mut buf, Xmm(0), Xmm(1));
        assert_eq!(buf, vec![0xF2, 0x0F, 0x10, 0xC1]);
    }

    #[test]
    fn movq_xmm_from_gpr_uses_rex_w() {
        let mut buf = Vec::new();
        movq_xmm_from_gpr(&mut buf, Xmm(0), Reg::Rax);
        assert_eq!(buf, vec![0x66, 0x48, 0x0F, 0x6E, 0xC0]);
    }

    #[test]
    fn extended_xmm_register_sets_rex_r() {
        let mut buf = Vec::new();
        addsd(&mut buf, Xmm(8), Xmm(0));
        assert_eq!(buf[1], 0x44); // REX with only the R extension bit set
    }
}
