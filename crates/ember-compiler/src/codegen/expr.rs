//! Expression codegen: one native value per AST node, materialized into
//! either a scratch integer register or an xmm register per the regalloc's
//! two-class model.
//!
//! Tuple, dict, and set literals, plus membership tests, are out of scope
//! for now — they'd need a richer object model than lists and instances
//! give us; see `Expr::Tuple`/`Expr::Dict`/`Expr::Set` below.

use ember_asm::{ArithOp, Cc, MemRef, Operand, OperandSize, Reg, ShiftOp};
use ember_ast::{BinOp, BoolOp, CmpOp, Expr, Literal, Span, UnaryOp};

use crate::codegen::{asm_err, call, class, Computed, ExprResult, FunctionCompiler, Loc, Outcome};
use crate::error::CompileError;
use crate::value::{TypeTag, Value};

const QW: OperandSize = OperandSize::QWord;

pub fn compile_expr(fc: &mut FunctionCompiler, expr: &Expr) -> ExprResult {
    match expr {
        Expr::Literal(lit, span) => compile_literal(fc, lit, *span),
        Expr::Name(sym, span) => compile_name(fc, *sym, *span),
        Expr::BinOp { op, left, right, span } => compile_binop(fc, *op, left, right, *span),
        Expr::UnaryOp { op, operand, span } => compile_unaryop(fc, *op, operand, *span),
        Expr::BoolOp { op, values, span } => compile_boolop(fc, *op, values, *span),
        Expr::Compare { left, op, right, span } => compile_compare(fc, left, *op, right, *span),
        Expr::Call { func, args, span, .. } => compile_call_or_instantiate(fc, func, args, *span),
        Expr::Attribute { value, attr, span } => class::compile_attribute(fc, value, *attr, *span),
        Expr::Subscript { value, index, span } => compile_subscript(fc, value, index, *span),
        Expr::List(items, span) => compile_list(fc, items, *span),
        Expr::Tuple(_, span) | Expr::Dict(_, span) | Expr::Set(_, span) => {
            Err(CompileError::Unsupported { offset: span.start as usize, what: "tuple/dict/set literals".to_string() })
        }
    }
}

fn compile_call_or_instantiate(fc: &mut FunctionCompiler, func: &Expr, args: &[Expr], span: Span) -> ExprResult {
    if let Expr::Name(sym, _) = func {
        if let Some(class_id) = fc.compiler.context.find_class(fc.module, *sym) {
            let mut computed_args = Vec::with_capacity(args.len());
            for arg in args {
                match compile_expr(fc, arg)? {
                    Outcome::Value(c) => computed_args.push(c),
                    Outcome::Split => return Ok(Outcome::Split),
                }
            }
            return class::compile_instantiate(fc, class_id, &computed_args, span);
        }
    }
    call::compile_call(fc, func, args, span)
}

fn alloc_int_scratch(fc: &mut FunctionCompiler, span: Span) -> Result<Reg, CompileError> {
    fc.regs.alloc_int().map_err(|_| CompileError::RegisterAllocatorExhausted { offset: span.start as usize })
}

fn alloc_float_scratch(fc: &mut FunctionCompiler, span: Span) -> Result<ember_asm::Xmm, CompileError> {
    fc.regs.alloc_float().map_err(|_| CompileError::RegisterAllocatorExhausted { offset: span.start as usize })
}

fn compile_literal(fc: &mut FunctionCompiler, lit: &Literal, span: Span) -> ExprResult {
    match lit {
        Literal::None => {
            let r = alloc_int_scratch(fc, span)?;
            fc.asm.mov_reg_imm64(r, 0).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::None), loc: Loc::Int(r) }))
        }
        Literal::Bool(b) => {
            let r = alloc_int_scratch(fc, span)?;
            fc.asm.mov_reg_imm64(r, if *b { 1 } else { 0 }).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::bool_literal(*b), loc: Loc::Int(r) }))
        }
        Literal::Int(v) => {
            let r = alloc_int_scratch(fc, span)?;
            fc.asm.mov_reg_imm64(r, *v).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::int_literal(*v), loc: Loc::Int(r) }))
        }
        Literal::Float(v) => {
            let dst = alloc_float_scratch(fc, span)?;
            let scratch = alloc_int_scratch(fc, span)?;
            fc.asm.mov_reg_imm64(scratch, v.to_bits() as i64).map_err(asm_err)?;
            fc.asm.movq_xmm_from_gpr(dst, scratch);
            fc.regs.release_int(scratch);
            Ok(Outcome::Value(Computed { value: Value::float_literal(*v), loc: Loc::Float(dst) }))
        }
        Literal::Bytes(_) | Literal::Unicode(_) => {
            Err(CompileError::Unsupported { offset: span.start as usize, what: "bytes/unicode literals".to_string() })
        }
    }
}

/// Load a scalar out of `mem` into a fresh register, picking the register
/// class from `value`'s type. Shared by a local's `rbp`-relative slot and a
/// module global's `GLOBALS_BASE_REG`-relative slot — same materialization,
/// different base register.
fn compile_load(fc: &mut FunctionCompiler, value: Value, mem: ember_asm::MemRef, span: Span) -> ExprResult {
    if matches!(value.tag, TypeTag::Float) {
        let dst = alloc_float_scratch(fc, span)?;
        let gpr = alloc_int_scratch(fc, span)?;
        fc.asm.mov_reg_rm(gpr, Operand::Mem(mem), QW).map_err(asm_err)?;
        fc.asm.movq_xmm_from_gpr(dst, gpr);
        fc.regs.release_int(gpr);
        Ok(Outcome::Value(Computed { value, loc: Loc::Float(dst) }))
    } else {
        let dst = alloc_int_scratch(fc, span)?;
        fc.asm.mov_reg_rm(dst, Operand::Mem(mem), QW).map_err(asm_err)?;
        Ok(Outcome::Value(Computed { value, loc: Loc::Int(dst) }))
    }
}

/// A bare name is a local/parameter if it's in this function's own slot
/// table; otherwise it falls back to the owning module's globals (a name
/// read but never assigned within this function, e.g. a module-level
/// constant). Anything in neither is genuinely unresolved.
fn compile_name(fc: &mut FunctionCompiler, sym: ember_ast::Symbol, span: Span) -> ExprResult {
    if let Some(off) = fc.try_local_offset(sym) {
        let value = fc.local_type(sym);
        return compile_load(fc, value, fc.local_mem(off), span);
    }
    let module = fc.compiler.context.module(fc.module);
    if let Some(&slot) = module.globals.get(&sym) {
        let value = module.global_types.get(&sym).cloned().unwrap_or_else(Value::indeterminate);
        let mem = MemRef::offset(crate::abi::GLOBALS_BASE_REG, (slot as i64) * 8);
        return compile_load(fc, value, mem, span);
    }
    Err(CompileError::UnknownName { offset: span.start as usize, name: format!("<symbol {:?}>", sym) })
}

/// Drive an integer division through `idiv`'s hard `rax`/`rdx` requirement
/// with only two scratch registers to work with: spill the divisor to the
/// stack (freeing its register), force the dividend into `rax`, run
/// `cqo`/`idiv` against the stashed value, then pop it back off. After this
/// both original operand registers are free, so the next `alloc_int` lands
/// deterministically on `rax` — already holding the quotient, or one move
/// away from the remainder.
fn compile_int_divmod(fc: &mut FunctionCompiler, want_remainder: bool, left: Reg, right: Reg, span: Span) -> Result<Reg, CompileError> {
    fc.asm.push_reg(right);
    if left != Reg::Rax {
        fc.asm.mov_rm_reg(Operand::Reg(Reg::Rax), left, QW).map_err(asm_err)?;
    }
    fc.asm.cqo();
    fc.asm.idiv_rm(Operand::Mem(ember_asm::MemRef::offset(Reg::Rsp, 0)), QW).map_err(asm_err)?;
    fc.asm.op_rm_imm(ArithOp::Add, Operand::Reg(Reg::Rsp), 8, QW).map_err(asm_err)?;
    fc.regs.release_int(left);
    fc.regs.release_int(right);
    let dst = alloc_int_scratch(fc, span)?;
    let source = if want_remainder { Reg::Rdx } else { Reg::Rax };
    if dst != source {
        fc.asm.mov_rm_reg(Operand::Reg(dst), source, QW).map_err(asm_err)?;
    }
    Ok(dst)
}

fn compile_int_binop(fc: &mut FunctionCompiler, op: BinOp, left: Reg, right: Reg, span: Span) -> Result<Reg, CompileError> {
    match op {
        BinOp::Add => {
            fc.asm.op_rm_reg(ArithOp::Add, Operand::Reg(left), right, QW).map_err(asm_err)?;
            fc.regs.release_int(right);
            Ok(left)
        }
        BinOp::Sub => {
            fc.asm.op_rm_reg(ArithOp::Sub, Operand::Reg(left), right, QW).map_err(asm_err)?;
            fc.regs.release_int(right);
            Ok(left)
        }
        BinOp::BitAnd => {
            fc.asm.op_rm_reg(ArithOp::And, Operand::Reg(left), right, QW).map_err(asm_err)?;
            fc.regs.release_int(right);
            Ok(left)
        }
        BinOp::BitOr => {
            fc.asm.op_rm_reg(ArithOp::Or, Operand::Reg(left), right, QW).map_err(asm_err)?;
            fc.regs.release_int(right);
            Ok(left)
        }
        BinOp::BitXor => {
            fc.asm.op_rm_reg(ArithOp::Xor, Operand::Reg(left), right, QW).map_err(asm_err)?;
            fc.regs.release_int(right);
            Ok(left)
        }
        BinOp::Mul => {
            fc.asm.imul_reg_rm(left, Operand::Reg(right), QW).map_err(asm_err)?;
            fc.regs.release_int(right);
            Ok(left)
        }
        BinOp::Div | BinOp::FloorDiv => compile_int_divmod(fc, false, left, right, span),
        BinOp::Mod => compile_int_divmod(fc, true, left, right, span),
        BinOp::LShift | BinOp::RShift => {
            if right != Reg::Rcx {
                fc.asm.mov_rm_reg(Operand::Reg(Reg::Rcx), right, QW).map_err(asm_err)?;
            }
            let shift_op = if matches!(op, BinOp::LShift) { ShiftOp::Shl } else { ShiftOp::Sar };
            fc.asm.shift_cl(shift_op, Operand::Reg(left), QW).map_err(asm_err)?;
            fc.regs.release_int(right);
            Ok(left)
        }
        BinOp::Pow => compile_int_pow(fc, left, right, span),
    }
}

const VALUE_ERROR_CLASS: &str = "ValueError";

/// `left ** right` by square-and-multiply: the classic loop, since the
/// exponent is a runtime value rather than a compile-time constant. A
/// negative exponent raises `ValueError` when the calling module declares
/// a class by that name (the same by-name lookup `exception.rs` uses to
/// match `except` handlers) — there's no way for this codegen path to
/// conjure a exception class the module never defined, so a module
/// without one simply gets squaring behavior for negative exponents
/// rather than a hard compile error.
fn compile_int_pow(fc: &mut FunctionCompiler, base: Reg, exp: Reg, span: Span) -> Result<Reg, CompileError> {
    let result = alloc_int_scratch(fc, span)?;
    fc.asm.mov_reg_imm64(result, 1).map_err(asm_err)?;

    let loop_start = fc.new_label("pow_loop");
    let skip_mul = fc.new_label("pow_skip_mul");
    let loop_end = fc.new_label("pow_end");
    let negative = fc.new_label("pow_negative_exponent");
    let done = fc.new_label("pow_done");

    let value_error_sym = fc.compiler.intern(VALUE_ERROR_CLASS);
    let value_error_class = fc.compiler.context.find_class(fc.module, value_error_sym);

    if value_error_class.is_some() {
        fc.asm.test_rm_reg(Operand::Reg(exp), exp, QW).map_err(asm_err)?;
        fc.asm.jcc(Cc::Sign, negative);
    }

    fc.asm.bind_label(loop_start).map_err(asm_err)?;
    fc.asm.test_rm_reg(Operand::Reg(exp), exp, QW).map_err(asm_err)?;
    fc.asm.jcc(Cc::Equal, loop_end);
    fc.asm.test_rm_imm32(Operand::Reg(exp), 1, QW).map_err(asm_err)?;
    fc.asm.jcc(Cc::Equal, skip_mul);
    fc.asm.imul_reg_rm(result, Operand::Reg(base), QW).map_err(asm_err)?;
    fc.asm.bind_label(skip_mul).map_err(asm_err)?;
    fc.asm.imul_reg_rm(base, Operand::Reg(base), QW).map_err(asm_err)?;
    fc.asm.shift_imm(ShiftOp::Shr, Operand::Reg(exp), 1, QW).map_err(asm_err)?;
    fc.asm.jmp(loop_start);
    fc.asm.bind_label(loop_end).map_err(asm_err)?;
    fc.asm.jmp(done);

    fc.asm.bind_label(negative).map_err(asm_err)?;
    if let Some(class_id) = value_error_class {
        let attr_count = fc.compiler.context.class(class_id).attr_count() as u64;
        fc.asm.mov_reg_imm64(Reg::Rdi, class_id.0 as i64).map_err(asm_err)?;
        fc.asm.mov_reg_imm64(Reg::Rsi, attr_count as i64).map_err(asm_err)?;
        fc.asm.mov_reg_imm64(Reg::Rdx, ember_runtime::header::free_destructor as i64).map_err(asm_err)?;
        call::emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, instance_alloc))?;
        fc.asm.mov_rm_reg(Operand::Reg(crate::abi::ACTIVE_EXCEPTION_REG), Reg::Rax, QW).map_err(asm_err)?;
    }
    fc.asm.jmp(fc.raise_target());

    fc.asm.bind_label(done).map_err(asm_err)?;
    fc.regs.release_int(base);
    fc.regs.release_int(exp);
    Ok(result)
}

fn compile_float_binop(fc: &mut FunctionCompiler, op: BinOp, left: ember_asm::Xmm, right: ember_asm::Xmm, span: Span) -> Result<ember_asm::Xmm, CompileError> {
    match op {
        BinOp::Add => {
            fc.asm.addsd(left, right);
            fc.regs.release_float(right);
            Ok(left)
        }
        BinOp::Sub => {
            fc.asm.subsd(left, right);
            fc.regs.release_float(right);
            Ok(left)
        }
        BinOp::Mul => {
            fc.asm.mulsd(left, right);
            fc.regs.release_float(right);
            Ok(left)
        }
        BinOp::Div => {
            fc.asm.divsd(left, right);
            fc.regs.release_float(right);
            Ok(left)
        }
        _ => Err(CompileError::Unsupported { offset: span.start as usize, what: "this operator on float operands".to_string() }),
    }
}

fn compile_binop(fc: &mut FunctionCompiler, op: BinOp, left: &Expr, right: &Expr, span: Span) -> ExprResult {
    let l = match compile_expr(fc, left)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    let r = match compile_expr(fc, right)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };

    match (l.loc, r.loc) {
        (Loc::Int(lr), Loc::Int(rr)) => {
            let dst = compile_int_binop(fc, op, lr, rr, span)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Int), loc: Loc::Int(dst) }))
        }
        (Loc::Float(lf), Loc::Float(rf)) => {
            let dst = compile_float_binop(fc, op, lf, rf, span)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Float), loc: Loc::Float(dst) }))
        }
        (Loc::Int(lr), Loc::Float(rf)) => {
            let promoted = alloc_float_scratch(fc, span)?;
            fc.asm.cvtsi2sd(promoted, lr);
            fc.regs.release_int(lr);
            let dst = compile_float_binop(fc, op, promoted, rf, span)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Float), loc: Loc::Float(dst) }))
        }
        (Loc::Float(lf), Loc::Int(rr)) => {
            let promoted = alloc_float_scratch(fc, span)?;
            fc.asm.cvtsi2sd(promoted, rr);
            fc.regs.release_int(rr);
            let dst = compile_float_binop(fc, op, lf, promoted, span)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Float), loc: Loc::Float(dst) }))
        }
    }
}

fn compile_unaryop(fc: &mut FunctionCompiler, op: UnaryOp, operand: &Expr, span: Span) -> ExprResult {
    let c = match compile_expr(fc, operand)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    match (op, c.loc) {
        (UnaryOp::Neg, Loc::Int(r)) => {
            fc.asm.neg_rm(Operand::Reg(r), QW).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Int), loc: Loc::Int(r) }))
        }
        (UnaryOp::Invert, Loc::Int(r)) => {
            fc.asm.not_rm(Operand::Reg(r), QW).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Int), loc: Loc::Int(r) }))
        }
        (UnaryOp::Not, Loc::Int(r)) => {
            fc.asm.test_rm_reg(Operand::Reg(r), r, QW).map_err(asm_err)?;
            fc.asm.mov_reg_imm64(r, 0).map_err(asm_err)?;
            fc.asm.setcc(Cc::Equal, Operand::Reg(r)).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Bool), loc: Loc::Int(r) }))
        }
        (UnaryOp::Neg, Loc::Float(r)) => {
            let gpr = alloc_int_scratch(fc, span)?;
            let sign_bit = alloc_int_scratch(fc, span)?;
            fc.asm.movq_gpr_from_xmm(gpr, r);
            fc.asm.mov_reg_imm64(sign_bit, i64::MIN).map_err(asm_err)?;
            fc.asm.op_rm_reg(ArithOp::Xor, Operand::Reg(gpr), sign_bit, QW).map_err(asm_err)?;
            fc.asm.movq_xmm_from_gpr(r, gpr);
            fc.regs.release_int(gpr);
            fc.regs.release_int(sign_bit);
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Float), loc: Loc::Float(r) }))
        }
        (UnaryOp::Not, Loc::Float(_)) | (UnaryOp::Invert, Loc::Float(_)) => {
            Err(CompileError::Unsupported { offset: span.start as usize, what: "this unary operator on a float operand".to_string() })
        }
    }
}

fn compile_boolop(fc: &mut FunctionCompiler, op: BoolOp, values: &[Expr], span: Span) -> ExprResult {
    let result = alloc_int_scratch(fc, span)?;
    let end_label = fc.new_label("boolop_end");

    for (i, value) in values.iter().enumerate() {
        let c = match compile_expr(fc, value)? {
            Outcome::Value(c) => c,
            Outcome::Split => return Ok(Outcome::Split),
        };
        let reg = match c.loc {
            Loc::Int(r) => r,
            Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "a float operand to and/or".to_string() }),
        };
        fc.asm.mov_rm_reg(Operand::Reg(result), reg, QW).map_err(asm_err)?;
        fc.regs.release_int(reg);

        if i + 1 < values.len() {
            fc.asm.test_rm_reg(Operand::Reg(result), result, QW).map_err(asm_err)?;
            let short_circuit_if = if matches!(op, BoolOp::And) { Cc::Equal } else { Cc::NotEqual };
            fc.asm.jcc(short_circuit_if, end_label);
        }
    }
    fc.asm.bind_label(end_label).map_err(asm_err)?;
    Ok(Outcome::Value(Computed { value: Value::indeterminate(), loc: Loc::Int(result) }))
}

fn cmp_cc(op: CmpOp, span: Span) -> Result<Cc, CompileError> {
    match op {
        CmpOp::Eq | CmpOp::Is => Ok(Cc::Equal),
        CmpOp::NotEq | CmpOp::IsNot => Ok(Cc::NotEqual),
        CmpOp::Lt => Ok(Cc::Less),
        CmpOp::LtE => Ok(Cc::LessOrEqual),
        CmpOp::Gt => Ok(Cc::Greater),
        CmpOp::GtE => Ok(Cc::GreaterOrEqual),
        CmpOp::In | CmpOp::NotIn => Err(CompileError::Unsupported { offset: span.start as usize, what: "in/not in".to_string() }),
    }
}

fn compile_compare(fc: &mut FunctionCompiler, left: &Expr, op: CmpOp, right: &Expr, span: Span) -> ExprResult {
    let cc = cmp_cc(op, span)?;
    let l = match compile_expr(fc, left)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    let r = match compile_expr(fc, right)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };

    match (l.loc, r.loc) {
        (Loc::Int(lr), Loc::Int(rr)) => {
            fc.asm.op_rm_reg(ArithOp::Cmp, Operand::Reg(lr), rr, QW).map_err(asm_err)?;
            fc.regs.release_int(rr);
            fc.asm.mov_reg_imm64(lr, 0).map_err(asm_err)?;
            fc.asm.setcc(cc, Operand::Reg(lr)).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Bool), loc: Loc::Int(lr) }))
        }
        (Loc::Float(lf), Loc::Float(rf)) => {
            fc.asm.ucomisd(lf, rf);
            fc.regs.release_float(lf);
            fc.regs.release_float(rf);
            let dst = alloc_int_scratch(fc, span)?;
            fc.asm.mov_reg_imm64(dst, 0).map_err(asm_err)?;
            fc.asm.setcc(cc, Operand::Reg(dst)).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Bool), loc: Loc::Int(dst) }))
        }
        (Loc::Int(lr), Loc::Float(rf)) => {
            let promoted = alloc_float_scratch(fc, span)?;
            fc.asm.cvtsi2sd(promoted, lr);
            fc.regs.release_int(lr);
            fc.asm.ucomisd(promoted, rf);
            fc.regs.release_float(promoted);
            fc.regs.release_float(rf);
            let dst = alloc_int_scratch(fc, span)?;
            fc.asm.mov_reg_imm64(dst, 0).map_err(asm_err)?;
            fc.asm.setcc(cc, Operand::Reg(dst)).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Bool), loc: Loc::Int(dst) }))
        }
        (Loc::Float(lf), Loc::Int(rr)) => {
            let promoted = alloc_float_scratch(fc, span)?;
            fc.asm.cvtsi2sd(promoted, rr);
            fc.regs.release_int(rr);
            fc.asm.ucomisd(lf, promoted);
            fc.regs.release_float(lf);
            fc.regs.release_float(promoted);
            let dst = alloc_int_scratch(fc, span)?;
            fc.asm.mov_reg_imm64(dst, 0).map_err(asm_err)?;
            fc.asm.setcc(cc, Operand::Reg(dst)).map_err(asm_err)?;
            Ok(Outcome::Value(Computed { value: Value::simple(TypeTag::Bool), loc: Loc::Int(dst) }))
        }
    }
}

fn compile_subscript(fc: &mut FunctionCompiler, value: &Expr, index: &Expr, span: Span) -> ExprResult {
    let list = match compile_expr(fc, value)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    let idx = match compile_expr(fc, index)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    let (list_reg, idx_reg) = match (list.loc, idx.loc) {
        (Loc::Int(l), Loc::Int(i)) => (l, i),
        _ => return Err(CompileError::Unsupported { offset: span.start as usize, what: "non-integer subscript operands".to_string() }),
    };

    fc.asm.mov_rm_reg(Operand::Reg(Reg::Rdi), list_reg, QW).map_err(asm_err)?;
    fc.asm.mov_rm_reg(Operand::Reg(Reg::Rsi), idx_reg, QW).map_err(asm_err)?;
    fc.regs.release_int(list_reg);
    fc.regs.release_int(idx_reg);
    call::emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, list_get))?;

    let dst = alloc_int_scratch(fc, span)?;
    fc.asm.mov_rm_reg(Operand::Reg(dst), Reg::Rax, QW).map_err(asm_err)?;
    Ok(Outcome::Value(Computed { value: Value::indeterminate(), loc: Loc::Int(dst) }))
}

fn compile_list(fc: &mut FunctionCompiler, items: &[Expr], span: Span) -> ExprResult {
    let mut computed_items = Vec::with_capacity(items.len());
    for item in items {
        match compile_expr(fc, item)? {
            Outcome::Value(c) => computed_items.push(c),
            Outcome::Split => return Ok(Outcome::Split),
        }
    }
    let items_are_objects = computed_items.first().map(|c| c.value.is_refcounted()).unwrap_or(false);

    fc.asm.mov_reg_imm64(Reg::Rdi, if items_are_objects { 1 } else { 0 }).map_err(asm_err)?;
    call::emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, list_alloc))?;
    let list_reg = alloc_int_scratch(fc, span)?;
    fc.asm.mov_rm_reg(Operand::Reg(list_reg), Reg::Rax, QW).map_err(asm_err)?;

    let elem_type = computed_items.first().map(|c| c.value.clone()).unwrap_or_else(Value::indeterminate);
    for item in computed_items {
        let item_reg = match item.loc {
            Loc::Int(r) => r,
            Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "floating-point list elements".to_string() }),
        };
        fc.asm.mov_rm_reg(Operand::Reg(Reg::Rdi), list_reg, QW).map_err(asm_err)?;
        fc.asm.mov_rm_reg(Operand::Reg(Reg::Rsi), item_reg, QW).map_err(asm_err)?;
        fc.regs.release_int(item_reg);
        call::emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, list_push))?;
    }

    Ok(Outcome::Value(Computed { value: Value::list_of(elem_type), loc: Loc::Int(list_reg) }))
}
