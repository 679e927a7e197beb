//! Raise and try/except/finally codegen.
//!
//! There is no stack-walking unwinder here. `ACTIVE_EXCEPTION_REG` is a
//! reserved, callee-saved register that holds the in-flight exception
//! instance or zero; a call that raises simply leaves it non-zero on return,
//! the same way a Result-returning function would leave an Err. A `try`
//! block polls it after each of its direct statements and dispatches to its
//! handlers inline by comparing the exception's stored class id. Nothing
//! here walks into a loop or nested `if` body to poll early, so a raise deep
//! inside a loop isn't noticed until the loop as a whole finishes running;
//! `ember_runtime::exception`'s `ExceptionBlock` chain exists for a future,
//! fuller unwinder and isn't threaded through yet.
//!
//! A `raise` (here or synthesized by other codegen, e.g. `expr.rs`'s
//! negative-exponent `ValueError`) jumps straight to `fc.raise_target()`
//! rather than falling through to the next statement's poll: the nearest
//! enclosing `try`'s dispatch label, or the function's `return_label` when
//! no `try` is in scope. `compile_try` pushes its dispatch label onto that
//! stack only while compiling its own `body`, so a raise from a handler,
//! `finally`, or `else` block correctly targets whatever `try` encloses
//! *this* one instead of dispatching to itself again.

use ember_asm::{Cc, MemRef, Operand, OperandSize};
use ember_ast::{ExceptHandler, Expr, Span, Stmt};

use crate::abi::ACTIVE_EXCEPTION_REG;
use crate::codegen::{asm_err, expr, stmt, FunctionCompiler, Loc, Outcome, StmtResult};
use crate::error::CompileError;

const QW: OperandSize = OperandSize::QWord;

pub fn compile_raise(fc: &mut FunctionCompiler, value: &Option<Expr>, span: Span) -> StmtResult {
    let Some(value) = value else {
        return Err(CompileError::Unsupported { offset: span.start as usize, what: "a bare re-raise".to_string() });
    };
    let c = match expr::compile_expr(fc, value)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    let reg = match c.loc {
        Loc::Int(r) => r,
        Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "raising a float".to_string() }),
    };
    fc.asm.mov_rm_reg(Operand::Reg(ACTIVE_EXCEPTION_REG), reg, QW).map_err(asm_err)?;
    fc.regs.release_int(reg);
    fc.asm.jmp(fc.raise_target());
    Ok(Outcome::Value(()))
}

pub fn compile_try(fc: &mut FunctionCompiler, body: &[Stmt], handlers: &[ExceptHandler], orelse: &[Stmt], finally: &[Stmt], span: Span) -> StmtResult {
    let dispatch_label = fc.new_label("try_dispatch");
    let finally_label = fc.new_label("try_finally");

    fc.try_dispatch.push(dispatch_label);
    for s in body {
        stmt::compile_stmt(fc, s)?;
        fc.asm.test_rm_reg(Operand::Reg(ACTIVE_EXCEPTION_REG), ACTIVE_EXCEPTION_REG, QW).map_err(asm_err)?;
        fc.asm.jcc(Cc::NotEqual, dispatch_label);
    }
    fc.try_dispatch.pop();
    for s in orelse {
        stmt::compile_stmt(fc, s)?;
    }
    fc.asm.jmp(finally_label);

    fc.asm.bind_label(dispatch_label).map_err(asm_err)?;
    for handler in handlers {
        let handler_body = fc.new_label("try_handler_body");
        if handler.classes.is_empty() {
            fc.asm.jmp(handler_body);
        } else {
            for class_sym in &handler.classes {
                let Some(class_id) = fc.compiler.context.find_class(fc.module, *class_sym) else {
                    continue;
                };
                let probe = fc.regs.alloc_int().map_err(|_| CompileError::RegisterAllocatorExhausted { offset: span.start as usize })?;
                fc.asm
                    .mov_reg_rm(probe, Operand::Mem(MemRef::offset(ACTIVE_EXCEPTION_REG, std::mem::offset_of!(ember_runtime::instance::InstanceObject, class_id) as i64)), QW)
                    .map_err(asm_err)?;
                fc.asm.op_rm_imm(ember_asm::ArithOp::Cmp, Operand::Reg(probe), class_id.0 as i64, QW).map_err(asm_err)?;
                fc.regs.release_int(probe);
                fc.asm.jcc(Cc::Equal, handler_body);
            }
        }
        let next_handler = fc.new_label("try_next_handler");
        fc.asm.jmp(next_handler);

        fc.asm.bind_label(handler_body).map_err(asm_err)?;
        if let Some(binding) = handler.binding {
            let off = fc.local_offset(binding, span)?;
            fc.asm.mov_rm_reg(Operand::Mem(fc.local_mem(off)), ACTIVE_EXCEPTION_REG, QW).map_err(asm_err)?;
            fc.set_local_type(binding, crate::value::Value::indeterminate());
        }
        fc.asm.mov_reg_imm64(ACTIVE_EXCEPTION_REG, 0).map_err(asm_err)?;
        for s in &handler.body {
            stmt::compile_stmt(fc, s)?;
        }
        fc.asm.jmp(finally_label);
        fc.asm.bind_label(next_handler).map_err(asm_err)?;
    }

    fc.asm.bind_label(finally_label).map_err(asm_err)?;
    for s in finally {
        stmt::compile_stmt(fc, s)?;
    }
    fc.asm.test_rm_reg(Operand::Reg(ACTIVE_EXCEPTION_REG), ACTIVE_EXCEPTION_REG, QW).map_err(asm_err)?;
    // An exception still active here reached `finally` without a handler of
    // this `try` claiming it — propagate it outward (this try's own
    // dispatch label was already popped above, so `raise_target` resolves
    // to whatever `try` encloses this one, or `return_label` at top level).
    fc.asm.jcc(Cc::NotEqual, fc.raise_target());
    Ok(Outcome::Value(()))
}
