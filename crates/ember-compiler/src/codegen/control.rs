//! If/while/for codegen.

use ember_asm::{Cc, Operand, OperandSize};
use ember_ast::{Expr, Span, Stmt, Symbol};

use crate::codegen::{asm_err, call, expr, stmt, FunctionCompiler, Loc, LoopLabels, Outcome, StmtResult};
use crate::error::CompileError;

const QW: OperandSize = OperandSize::QWord;

pub fn compile_if(fc: &mut FunctionCompiler, branches: &[(Expr, Vec<Stmt>)], orelse: &[Stmt], span: Span) -> StmtResult {
    let end_label = fc.new_label("if_end");
    for (cond, body) in branches {
        let next_label = fc.new_label("if_next");
        let c = match expr::compile_expr(fc, cond)? {
            Outcome::Value(c) => c,
            Outcome::Split => return Ok(Outcome::Split),
        };
        let reg = match c.loc {
            Loc::Int(r) => r,
            Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "a float condition".to_string() }),
        };
        fc.asm.test_rm_reg(Operand::Reg(reg), reg, QW).map_err(asm_err)?;
        fc.regs.release_int(reg);
        fc.asm.jcc(Cc::Equal, next_label);
        for stmt in body {
            stmt::compile_stmt(fc, stmt)?;
        }
        fc.asm.jmp(end_label);
        fc.asm.bind_label(next_label).map_err(asm_err)?;
    }
    for stmt in orelse {
        stmt::compile_stmt(fc, stmt)?;
    }
    fc.asm.bind_label(end_label).map_err(asm_err)?;
    Ok(Outcome::Value(()))
}

pub fn compile_while(fc: &mut FunctionCompiler, cond: &Expr, body: &[Stmt], orelse: &[Stmt], span: Span) -> StmtResult {
    let start = fc.new_label("while_start");
    let post_else = fc.new_label("while_post_else");
    let end = fc.new_label("while_end");
    fc.loops.push(LoopLabels { continue_label: start, break_label: end });

    fc.asm.bind_label(start).map_err(asm_err)?;
    let c = match expr::compile_expr(fc, cond)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    let reg = match c.loc {
        Loc::Int(r) => r,
        Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "a float condition".to_string() }),
    };
    fc.asm.test_rm_reg(Operand::Reg(reg), reg, QW).map_err(asm_err)?;
    fc.regs.release_int(reg);
    fc.asm.jcc(Cc::Equal, post_else);

    for stmt in body {
        stmt::compile_stmt(fc, stmt)?;
    }
    fc.asm.jmp(start);

    fc.asm.bind_label(post_else).map_err(asm_err)?;
    for stmt in orelse {
        stmt::compile_stmt(fc, stmt)?;
    }
    fc.asm.bind_label(end).map_err(asm_err)?;
    fc.loops.pop();
    Ok(Outcome::Value(()))
}

/// Iterate a list by index. Only list iterables are supported — ranges and
/// other iterables are a known gap; `for x in range(...)` front ends would
/// need to lower to an explicit list or a separate counted-loop form this
/// compiler doesn't see yet.
pub fn compile_for(fc: &mut FunctionCompiler, target: Symbol, iter: &Expr, body: &[Stmt], orelse: &[Stmt], span: Span) -> StmtResult {
    let c = match expr::compile_expr(fc, iter)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    let list_reg = match c.loc {
        Loc::Int(r) => r,
        Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "iterating a float".to_string() }),
    };
    let idx_reg = fc.regs.alloc_int().map_err(|_| CompileError::RegisterAllocatorExhausted { offset: span.start as usize })?;
    fc.asm.mov_reg_imm64(idx_reg, 0).map_err(asm_err)?;

    let cond_label = fc.new_label("for_cond");
    let continue_label = fc.new_label("for_continue");
    let post_else = fc.new_label("for_post_else");
    let end = fc.new_label("for_end");
    fc.loops.push(LoopLabels { continue_label, break_label: end });

    fc.asm.bind_label(cond_label).map_err(asm_err)?;
    fc.asm.push_reg(list_reg);
    fc.asm.mov_rm_reg(Operand::Reg(ember_asm::Reg::Rdi), list_reg, QW).map_err(asm_err)?;
    call::emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, list_len))?;
    fc.asm.op_rm_reg(ember_asm::ArithOp::Cmp, Operand::Reg(idx_reg), ember_asm::Reg::Rax, QW).map_err(asm_err)?;
    fc.asm.pop_reg(list_reg);
    fc.asm.jcc(Cc::GreaterOrEqual, post_else);

    fc.asm.push_reg(list_reg);
    fc.asm.push_reg(idx_reg);
    fc.asm.mov_rm_reg(Operand::Reg(ember_asm::Reg::Rdi), list_reg, QW).map_err(asm_err)?;
    fc.asm.mov_rm_reg(Operand::Reg(ember_asm::Reg::Rsi), idx_reg, QW).map_err(asm_err)?;
    call::emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, list_get))?;
    let off = fc.local_offset(target, span)?;
    fc.asm.mov_rm_reg(Operand::Mem(fc.local_mem(off)), ember_asm::Reg::Rax, QW).map_err(asm_err)?;
    fc.asm.pop_reg(idx_reg);
    fc.asm.pop_reg(list_reg);

    for stmt in body {
        stmt::compile_stmt(fc, stmt)?;
    }

    fc.asm.bind_label(continue_label).map_err(asm_err)?;
    fc.asm.op_rm_imm(ember_asm::ArithOp::Add, Operand::Reg(idx_reg), 1, QW).map_err(asm_err)?;
    fc.asm.jmp(cond_label);

    fc.asm.bind_label(post_else).map_err(asm_err)?;
    for stmt in orelse {
        stmt::compile_stmt(fc, stmt)?;
    }
    fc.asm.bind_label(end).map_err(asm_err)?;
    fc.loops.pop();

    fc.regs.release_int(list_reg);
    fc.regs.release_int(idx_reg);
    Ok(Outcome::Value(()))
}
