//! Statement codegen: dispatches each `Stmt` variant to its specialist
//! (`control`, `exception`, `class`) or handles it directly when it's small
//! enough not to need one.

use ember_asm::{Operand, OperandSize, Reg};
use ember_ast::{Expr, Stmt};

use crate::codegen::{asm_err, class, control, exception, expr, FunctionCompiler, Outcome, StmtResult};
use crate::error::CompileError;

const QW: OperandSize = OperandSize::QWord;

pub fn compile_stmt(fc: &mut FunctionCompiler, stmt: &Stmt) -> StmtResult {
    match stmt {
        Stmt::Expr(e) => {
            let outcome = expr::compile_expr(fc, e)?;
            if let Outcome::Value(c) = outcome {
                match c.loc {
                    crate::codegen::Loc::Int(r) => fc.regs.release_int(r),
                    crate::codegen::Loc::Float(r) => fc.regs.release_float(r),
                }
            }
            Ok(Outcome::Value(()))
        }
        Stmt::Assign { target, value, span } => {
            let rhs = match expr::compile_expr(fc, value)? {
                Outcome::Value(c) => c,
                Outcome::Split => return Ok(Outcome::Split),
            };
            match target {
                Expr::Name(sym, _) => {
                    store_local(fc, *sym, &rhs, *span)?;
                    Ok(Outcome::Value(()))
                }
                Expr::Attribute { value, attr, span: attr_span } => {
                    class::compile_attribute_store(fc, value, *attr, rhs, *attr_span)?;
                    Ok(Outcome::Value(()))
                }
                Expr::Subscript { value, index, span: sub_span } => {
                    store_subscript(fc, value, index, rhs, *sub_span)?;
                    Ok(Outcome::Value(()))
                }
                _ => Err(CompileError::Unsupported { offset: span.start as usize, what: "this assignment target".to_string() }),
            }
        }
        Stmt::AnnAssign { target, value, span, .. } => {
            let Some(value) = value else { return Ok(Outcome::Value(())) };
            let rhs = match expr::compile_expr(fc, value)? {
                Outcome::Value(c) => c,
                Outcome::Split => return Ok(Outcome::Split),
            };
            store_local(fc, *target, &rhs, *span)?;
            Ok(Outcome::Value(()))
        }
        Stmt::Return(value, span) => {
            if let Some(value) = value {
                let c = match expr::compile_expr(fc, value)? {
                    Outcome::Value(c) => c,
                    Outcome::Split => return Ok(Outcome::Split),
                };
                fc.record_return_type(c.value.clone());
                match c.loc {
                    crate::codegen::Loc::Int(r) => {
                        if r != Reg::Rax {
                            fc.asm.mov_rm_reg(Operand::Reg(Reg::Rax), r, QW).map_err(asm_err)?;
                        }
                        fc.regs.release_int(r);
                    }
                    crate::codegen::Loc::Float(r) => {
                        if r != crate::abi::FLOAT_RETURN_REG {
                            fc.asm.movsd(crate::abi::FLOAT_RETURN_REG, r);
                        }
                        fc.regs.release_float(r);
                    }
                }
            } else {
                fc.record_return_type(crate::value::Value::simple(crate::value::TypeTag::None));
                fc.asm.mov_reg_imm64(Reg::Rax, 0).map_err(asm_err)?;
            }
            let _ = span;
            fc.asm.jmp(fc.return_label);
            Ok(Outcome::Value(()))
        }
        Stmt::Raise(value, span) => exception::compile_raise(fc, value, *span),
        Stmt::Break(span) => {
            let Some(labels) = fc.loops.last() else {
                return Err(CompileError::LoopControlOutsideLoop { offset: span.start as usize });
            };
            fc.asm.jmp(labels.break_label);
            Ok(Outcome::Value(()))
        }
        Stmt::Continue(span) => {
            let Some(labels) = fc.loops.last() else {
                return Err(CompileError::LoopControlOutsideLoop { offset: span.start as usize });
            };
            fc.asm.jmp(labels.continue_label);
            Ok(Outcome::Value(()))
        }
        Stmt::Pass(_) => Ok(Outcome::Value(())),
        Stmt::If { branches, orelse, span } => control::compile_if(fc, branches, orelse, *span),
        Stmt::While { cond, body, orelse, span } => control::compile_while(fc, cond, body, orelse, *span),
        Stmt::For { target, iter, body, orelse, span } => control::compile_for(fc, *target, iter, body, orelse, *span),
        Stmt::Try { body, handlers, orelse, finally, span } => exception::compile_try(fc, body, handlers, orelse, finally, *span),
        Stmt::FunctionDef(def) => Err(CompileError::Unsupported { offset: def.span.start as usize, what: "a nested function definition".to_string() }),
        Stmt::ClassDef(def) => Err(CompileError::Unsupported { offset: def.span.start as usize, what: "a nested class definition".to_string() }),
    }
}

fn store_local(fc: &mut FunctionCompiler, sym: ember_ast::Symbol, rhs: &crate::codegen::Computed, span: ember_ast::Span) -> Result<(), CompileError> {
    let off = fc.local_offset(sym, span)?;
    match rhs.loc {
        crate::codegen::Loc::Int(r) => {
            fc.asm.mov_rm_reg(Operand::Mem(fc.local_mem(off)), r, QW).map_err(asm_err)?;
            fc.regs.release_int(r);
        }
        crate::codegen::Loc::Float(r) => {
            let gpr = fc.regs.alloc_int().map_err(|_| CompileError::RegisterAllocatorExhausted { offset: span.start as usize })?;
            fc.asm.movq_gpr_from_xmm(gpr, r);
            fc.asm.mov_rm_reg(Operand::Mem(fc.local_mem(off)), gpr, QW).map_err(asm_err)?;
            fc.regs.release_int(gpr);
            fc.regs.release_float(r);
        }
    }
    fc.set_local_type(sym, rhs.value.clone());
    Ok(())
}

fn store_subscript(fc: &mut FunctionCompiler, value: &Expr, index: &Expr, rhs: crate::codegen::Computed, span: ember_ast::Span) -> Result<(), CompileError> {
    let list_c = match expr::compile_expr(fc, value)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(()),
    };
    let idx_c = match expr::compile_expr(fc, index)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(()),
    };
    let list_reg = match list_c.loc {
        crate::codegen::Loc::Int(r) => r,
        crate::codegen::Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "subscripting a float".to_string() }),
    };
    let idx_reg = match idx_c.loc {
        crate::codegen::Loc::Int(r) => r,
        crate::codegen::Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "a float subscript index".to_string() }),
    };
    let value_reg = match rhs.loc {
        crate::codegen::Loc::Int(r) => r,
        crate::codegen::Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "storing a float into a list".to_string() }),
    };
    fc.asm.mov_rm_reg(Operand::Reg(Reg::Rdi), list_reg, QW).map_err(asm_err)?;
    fc.asm.mov_rm_reg(Operand::Reg(Reg::Rsi), idx_reg, QW).map_err(asm_err)?;
    fc.asm.mov_rm_reg(Operand::Reg(Reg::Rdx), value_reg, QW).map_err(asm_err)?;
    fc.regs.release_int(list_reg);
    fc.regs.release_int(idx_reg);
    fc.regs.release_int(value_reg);
    crate::codegen::call::emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, list_set))
}
