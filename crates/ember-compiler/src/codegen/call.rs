//! Call-site codegen: argument register shuffling and the three ways a call
//! can resolve (self-recursive, already-compiled, or deferred to a resolver
//! stub).

use ember_asm::{MemRef, Operand, OperandSize, Reg};
use ember_ast::{Expr, Span};

use crate::abi::{COMMON_OBJECTS_BASE_REG, INT_ARG_REGS};
use crate::callsite::CallsiteInfo;
use crate::codegen::{asm_err, Computed, ExprResult, FunctionCompiler, Loc, Outcome};
use crate::error::{CompileError, CompileResult};
use crate::fragment::FragmentId;
use crate::value::Value;

/// Scratch register used to break cycles in the argument shuffle and to
/// carry a resolved stub's target address — the same role `r11` plays in a
/// real PLT trampoline. Never an argument register, never reserved.
const SHUFFLE_SCRATCH: Reg = Reg::R11;

/// Placeholder `FragmentId` for a callsite registered while its own caller
/// fragment is still mid-compile and has no id yet. Never dereferenced:
/// this design never patches a caller's code after the fact, so
/// `caller_fragment` is informational only.
const CALLER_FRAGMENT_PENDING: FragmentId = FragmentId(u32::MAX);

/// Sequentialize a parallel register-to-register move set (`src` -> `dst`
/// for each pair) into an order that can be emitted one `mov` at a time,
/// breaking any cyclic dependency through `scratch`.
pub fn sequentialize_moves(moves: &[(Reg, Reg)], scratch: Reg) -> Vec<(Reg, Reg)> {
    let mut pending: Vec<(Reg, Reg)> = moves.iter().copied().filter(|(s, d)| s != d).collect();
    let mut emitted = Vec::new();
    while !pending.is_empty() {
        if let Some(idx) = pending.iter().position(|&(_, d)| !pending.iter().any(|&(s2, _)| s2 == d)) {
            emitted.push(pending.remove(idx));
        } else {
            let (s, d) = pending.remove(0);
            emitted.push((s, scratch));
            pending.push((scratch, d));
        }
    }
    emitted
}

fn emit_moves(fc: &mut FunctionCompiler, moves: &[(Reg, Reg)]) -> CompileResult<()> {
    for &(src, dst) in moves {
        fc.asm.mov_rm_reg(Operand::Reg(dst), src, OperandSize::QWord).map_err(asm_err)?;
    }
    Ok(())
}

fn argument_moves(args: &[Computed]) -> CompileResult<Vec<(Reg, Reg)>> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| match arg.loc {
            Loc::Int(r) => Ok((r, INT_ARG_REGS[i])),
            Loc::Float(_) => Err(CompileError::Unsupported { offset: 0, what: "floating-point call arguments".to_string() }),
        })
        .collect()
}

fn release_args(fc: &mut FunctionCompiler, args: &[Computed]) {
    for arg in args {
        match arg.loc {
            Loc::Int(r) => fc.regs.release_int(r),
            Loc::Float(r) => fc.regs.release_float(r),
        }
    }
}

/// Call a native helper reached through the common-objects-base register at
/// a given struct field offset — `offset_of!(ember_runtime::CommonObjects,
/// field)` computed by the caller.
pub fn emit_common_call(fc: &mut FunctionCompiler, field_offset: usize) -> CompileResult<()> {
    let mem = MemRef::offset(COMMON_OBJECTS_BASE_REG, field_offset as i64);
    fc.asm.call_rm(Operand::Mem(mem)).map_err(asm_err)
}

/// Move computed argument values into their ABI-mandated registers and emit
/// a direct call to `entry`. More than six arguments is a known limitation:
/// nothing this compiler generates needs a seventh.
fn call_direct_entry(fc: &mut FunctionCompiler, args: &[Computed], entry: *const u8) -> CompileResult<()> {
    let moves = argument_moves(args)?;
    let sequenced = sequentialize_moves(&moves, SHUFFLE_SCRATCH);
    emit_moves(fc, &sequenced)?;
    fc.asm.mov_reg_imm64(Reg::Rax, entry as i64).map_err(asm_err)?;
    fc.asm.call_rm(Operand::Reg(Reg::Rax)).map_err(asm_err)
}

/// Call this fragment's own entry label — true self-recursion, where the
/// callee is the exact specialization currently being compiled.
fn call_self(fc: &mut FunctionCompiler, args: &[Computed]) -> CompileResult<()> {
    let moves = argument_moves(args)?;
    let sequenced = sequentialize_moves(&moves, SHUFFLE_SCRATCH);
    emit_moves(fc, &sequenced)?;
    let entry_label = fc.entry_label;
    fc.asm.call(entry_label);
    Ok(())
}

/// Emit a deferred-resolution stub call: save integer argument registers,
/// call the native resolver with this callsite's token, restore the
/// arguments, and tail-jump to the resolved entry point.
fn call_via_stub(fc: &mut FunctionCompiler, args: &[Computed], token: u64) -> CompileResult<()> {
    let moves = argument_moves(args)?;
    let sequenced = sequentialize_moves(&moves, SHUFFLE_SCRATCH);
    emit_moves(fc, &sequenced)?;

    let used = args.len().min(INT_ARG_REGS.len());
    for &reg in INT_ARG_REGS[..used].iter() {
        fc.asm.push_reg(reg);
    }
    fc.asm.mov_reg_imm64(Reg::Rdi, token as i64).map_err(asm_err)?;
    fc.asm.mov_reg_imm64(Reg::Rax, crate::resolver::resolve_callsite as i64).map_err(asm_err)?;
    fc.asm.call_rm(Operand::Reg(Reg::Rax)).map_err(asm_err)?;
    fc.asm.mov_rm_reg(Operand::Reg(SHUFFLE_SCRATCH), Reg::Rax, OperandSize::QWord).map_err(asm_err)?;
    for &reg in INT_ARG_REGS[..used].iter().rev() {
        fc.asm.pop_reg(reg);
    }
    fc.asm.jmp_rm(Operand::Reg(SHUFFLE_SCRATCH)).map_err(asm_err)
}

/// Compile a call expression: evaluate the callee and arguments, then pick
/// one of the three dispatch strategies. Only plain name callees are
/// handled here; a call through an attribute (`obj.method(...)`) is a
/// method call and is codegen'd in `class.rs` instead.
pub fn compile_call(fc: &mut FunctionCompiler, func: &Expr, args: &[Expr], span: Span) -> ExprResult {
    let func_sym = match func {
        Expr::Name(sym, _) => *sym,
        _ => return Err(CompileError::NotCallable { offset: span.start as usize, name: "<expression>".to_string() }),
    };

    let mut computed_args = Vec::with_capacity(args.len());
    for arg in args {
        match crate::codegen::expr::compile_expr(fc, arg)? {
            Outcome::Value(c) => computed_args.push(c),
            Outcome::Split => return Ok(Outcome::Split),
        }
    }

    let callee = fc.compiler.context.find_function(fc.module, func_sym).ok_or_else(|| CompileError::UnknownName {
        offset: span.start as usize,
        name: format!("{:?}", func_sym),
    })?;

    let arg_types: Vec<Value> = computed_args.iter().map(|c| c.value.clone()).collect();
    release_args(fc, &computed_args);

    let is_self_recursive = callee == fc.function
        && arg_types.len() == fc.arg_types.len()
        && arg_types.iter().zip(fc.arg_types.iter()).all(|(a, b)| a.type_matches(b));

    let return_type = if is_self_recursive {
        call_self(fc, &computed_args)?;
        fc.return_type.clone().unwrap_or_else(Value::indeterminate)
    } else if fc.compiler.is_compiling(callee, &arg_types) {
        let token = fc.compiler.callsites.register(CallsiteInfo {
            callee,
            arg_types: arg_types.clone(),
            caller_module: fc.module,
            caller_function: fc.function,
            caller_fragment: CALLER_FRAGMENT_PENDING,
            caller_split: 0,
            return_offset: fc.asm.offset(),
        });
        call_via_stub(fc, &computed_args, token.0)?;
        Value::indeterminate()
    } else {
        let (_, entry) = fc.compiler.compile_function(callee, arg_types.clone())?;
        call_direct_entry(fc, &computed_args, entry)?;
        let key = crate::fragment::FragmentKey { function: callee, arg_types };
        fc.compiler.fragments.get(&key).map(|id| fc.compiler.fragments.fragment(id).return_type.clone()).unwrap_or_else(Value::indeterminate)
    };

    let dst = fc.regs.alloc_int().map_err(|_| CompileError::RegisterAllocatorExhausted { offset: span.start as usize })?;
    fc.asm.mov_rm_reg(Operand::Reg(dst), Reg::Rax, OperandSize::QWord).map_err(asm_err)?;
    Ok(Outcome::Value(Computed { value: return_type, loc: Loc::Int(dst) }))
}
