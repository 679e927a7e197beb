//! Assembles a small function with `ember-asm`, installs it into a
//! `CodeBuffer`, and actually executes it — the full path from instruction
//! stream to running machine code.

use ember_asm::{Assembler, Operand, OperandSize, Reg};
use ember_codebuf::CodeBuffer;

#[test]
fn copies_rcx_into_rax_and_returns() {
    let mut asm = Assembler::new();
    asm.push_reg(Reg::Rbp);
    asm.mov_rm_reg(Operand::Reg(Reg::Rax), Reg::Rcx, OperandSize::QWord).unwrap();
    asm.pop_reg(Reg::Rbp);
    asm.ret();
    let (code, _) = asm.finish().unwrap();

    let buffer = CodeBuffer::new();
    let handle = buffer.allocate(&code).unwrap();
    let entry = buffer.entry_ptr(&handle).unwrap();

    let result: u64;
    unsafe {
        std::arch::asm!(
            "mov rcx, {input}",
            "call {entry}",
            "mov {result}, rax",
            input = in(reg) 0xCAFE_F00Du64,
            entry = in(reg) entry,
            result = out(reg) result,
            out("rax") _,
            out("rcx") _,
        );
    }
    assert_eq!(result, 0xCAFE_F00D);
}
