//! Class registration, instance construction, and attribute access.
//!
//! Attribute slots are assigned once, at registration time, by scanning
//! `__init__`'s body for `self.attr = ...` assignments in first-sight
//! order: inherited slots come first (copied from the base class), then
//! this class's own. Which slots hold a refcounted value isn't known until
//! an assignment to them has actually been compiled once, since that's the
//! earliest point an attribute's type is known — see `record_attr_type`.

use ember_asm::{ArithOp, MemRef, Operand, OperandSize, Reg};
use ember_ast::{ClassDef, Expr, FunctionDef, Span, Stmt, Symbol};

use crate::abi::INT_ARG_REGS;
use crate::codegen::call::{emit_common_call, sequentialize_moves};
use crate::codegen::{asm_err, Computed, ExprResult, FunctionCompiler, Loc, Outcome};
use crate::compiler::Compiler;
use crate::context::{ClassId, ModuleId};
use crate::error::{CompileError, CompileResult};
use crate::value::Value;

const INIT_METHOD: &str = "__init__";
const DEL_METHOD: &str = "__del__";

/// Same role as `call.rs`'s `SHUFFLE_SCRATCH`: a register never live across
/// a constructor call, used to break cycles in the argument shuffle.
const SHUFFLE_SCRATCH: Reg = Reg::R11;

pub fn register_class(compiler: &mut Compiler, def: &ClassDef, module: ModuleId) -> ClassId {
    let base = def.base.and_then(|name| compiler.context.find_class(module, name));
    let class_id = compiler.context.register_class(def.name, base);

    if let Some(base_id) = base {
        let inherited: Vec<(Symbol, u32)> = compiler.context.class(base_id).attr_slots.iter().map(|(s, i)| (*s, *i)).collect();
        for (sym, slot) in inherited {
            compiler.context.class_mut(class_id).attr_slots.insert(sym, slot);
        }
    }

    let init_sym = compiler.intern(INIT_METHOD);
    let del_sym = compiler.intern(DEL_METHOD);

    for method in &def.methods {
        let method_id = compiler.context.register_function(method.name, method.clone(), module);
        compiler.context.function_mut(method_id).owning_class = Some(class_id);
        compiler.context.class_mut(class_id).methods.insert(method.name, method_id);
        if method.name == init_sym {
            assign_attr_slots(compiler, class_id, method);
            compiler.context.class_mut(class_id).constructor = Some(method_id);
        } else if method.name == del_sym {
            compiler.context.class_mut(class_id).destructor = Some(method_id);
        }
    }

    compiler.context.module_mut(module).classes.push(class_id);
    class_id
}

fn assign_attr_slots(compiler: &mut Compiler, class_id: ClassId, init: &FunctionDef) {
    let Some(self_param) = init.params.first() else { return };
    let mut found = Vec::new();
    collect_attr_assigns(&init.body, self_param.name, &mut found);
    let mut next_slot = compiler.context.class(class_id).attr_slots.len() as u32;
    let slots = &mut compiler.context.class_mut(class_id).attr_slots;
    for attr in found {
        if !slots.contains_key(&attr) {
            slots.insert(attr, next_slot);
            next_slot += 1;
        }
    }
}

fn collect_attr_assigns(body: &[Stmt], self_sym: Symbol, out: &mut Vec<Symbol>) {
    for stmt in body {
        match stmt {
            Stmt::Assign { target: Expr::Attribute { value, attr, .. }, .. } => {
                if let Expr::Name(sym, _) = value.as_ref() {
                    if *sym == self_sym && !out.contains(attr) {
                        out.push(*attr);
                    }
                }
            }
            Stmt::If { branches, orelse, .. } => {
                for (_, b) in branches {
                    collect_attr_assigns(b, self_sym, out);
                }
                collect_attr_assigns(orelse, self_sym, out);
            }
            Stmt::While { body, orelse, .. } => {
                collect_attr_assigns(body, self_sym, out);
                collect_attr_assigns(orelse, self_sym, out);
            }
            Stmt::For { body, orelse, .. } => {
                collect_attr_assigns(body, self_sym, out);
                collect_attr_assigns(orelse, self_sym, out);
            }
            Stmt::Try { body, handlers, orelse, finally, .. } => {
                collect_attr_assigns(body, self_sym, out);
                for h in handlers {
                    collect_attr_assigns(&h.body, self_sym, out);
                }
                collect_attr_assigns(orelse, self_sym, out);
                collect_attr_assigns(finally, self_sym, out);
            }
            _ => {}
        }
    }
}

/// Record that a given attribute slot was just assigned a value of this
/// type — first-assignment-wins, the same simplification used to infer a
/// function's return type. Once a slot is known to hold a refcounted value
/// it's added to the class's destructor release list.
pub fn record_attr_type(fc: &mut FunctionCompiler, slot: u32, value: &Value) {
    let Some(class_id) = fc.self_class else { return };
    if value.is_refcounted() {
        let refcounted = &mut fc.compiler.context.class_mut(class_id).refcounted_attrs;
        if !refcounted.contains(&slot) {
            refcounted.push(slot);
        }
    }
}

/// The native destructor every instance whose class declares `__del__` or
/// owns a refcounted attribute is allocated with. Looks the class back up
/// by the id stashed on the instance at construction time, so one function
/// serves every class rather than needing a synthesized trampoline per
/// class.
///
/// # Safety
/// Called by `delete_reference` exactly once, at the point an instance's
/// refcount reaches zero — same contract as any `Destructor`.
pub unsafe extern "C" fn instance_destructor_trampoline(header: *mut ember_runtime::header::ObjectHeader) {
    let instance = header as *mut ember_runtime::instance::InstanceObject;
    let class_id = crate::context::ClassId((*instance).class_id as u32);
    crate::resolver::with_global(|compiler| {
        let refcounted = compiler.context.class(class_id).refcounted_attrs.clone();
        let destructor = compiler.context.class(class_id).destructor;
        let class_name = compiler.context.class(class_id).name;
        ember_runtime::del_guard::run_guarded(
            header,
            || {
                if let Some(del_fn) = destructor {
                    if let Ok((_, entry)) = compiler.compile_function(del_fn, vec![Value::instance_of(class_name)]) {
                        let f: unsafe extern "C" fn(u64) -> u64 = std::mem::transmute(entry);
                        f(instance as u64);
                    }
                }
            },
            || {
                for slot in refcounted {
                    let attr = ember_runtime::instance::get_attr(instance, slot as usize);
                    ember_runtime::header::delete_reference(attr as *mut ember_runtime::header::ObjectHeader);
                }
                ember_runtime::header::free_destructor(header);
            },
        );
    });
}

fn constructor_destructor(fc: &FunctionCompiler, class_id: ClassId) -> ember_runtime::header::Destructor {
    let class = fc.compiler.context.class(class_id);
    if class.destructor.is_some() || !class.refcounted_attrs.is_empty() {
        instance_destructor_trampoline
    } else {
        ember_runtime::header::free_destructor
    }
}

/// Compile `ClassName(args...)`: allocate an instance, then call `__init__`
/// on it (if the class declares one) with `self` prepended to the argument
/// list. Constructors are always compiled eagerly; a constructor that
/// recurses into constructing another instance of the same class before its
/// own fragment finishes compiling is a known limitation — the resolver-
/// stub path `call.rs` uses for recursive functions isn't wired up here.
pub fn compile_instantiate(fc: &mut FunctionCompiler, class_id: ClassId, args: &[Computed], span: Span) -> ExprResult {
    let attr_count = fc.compiler.context.class(class_id).attr_count() as u64;
    let destructor = constructor_destructor(fc, class_id);

    fc.asm.mov_reg_imm64(Reg::Rdi, class_id.0 as i64).map_err(asm_err)?;
    fc.asm.mov_reg_imm64(Reg::Rsi, attr_count as i64).map_err(asm_err)?;
    fc.asm.mov_reg_imm64(Reg::Rdx, destructor as i64).map_err(asm_err)?;
    emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, instance_alloc))?;

    let instance_reg = fc.regs.alloc_int().map_err(|_| CompileError::RegisterAllocatorExhausted { offset: span.start as usize })?;
    fc.asm.mov_rm_reg(Operand::Reg(instance_reg), Reg::Rax, OperandSize::QWord).map_err(asm_err)?;

    let class_name = fc.compiler.context.class(class_id).name;
    if let Some(init_id) = fc.compiler.context.class(class_id).constructor {
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Computed { value: Value::instance_of(class_name), loc: Loc::Int(instance_reg) });
        call_args.extend(args.iter().cloned());

        let moves: Vec<(Reg, Reg)> = call_args
            .iter()
            .enumerate()
            .map(|(i, a)| match a.loc {
                Loc::Int(r) => Ok((r, INT_ARG_REGS[i])),
                Loc::Float(_) => Err(CompileError::Unsupported { offset: span.start as usize, what: "floating-point constructor arguments".to_string() }),
            })
            .collect::<CompileResult<Vec<_>>>()?;
        let sequenced = sequentialize_moves(&moves, SHUFFLE_SCRATCH);
        for (src, dst) in sequenced {
            fc.asm.mov_rm_reg(Operand::Reg(dst), src, OperandSize::QWord).map_err(asm_err)?;
        }

        let mut init_arg_types = vec![Value::instance_of(class_name)];
        init_arg_types.extend(args.iter().map(|a| a.value.clone()));
        let (_, entry) = fc.compiler.compile_function(init_id, init_arg_types)?;
        fc.asm.mov_reg_imm64(Reg::Rax, entry as i64).map_err(asm_err)?;
        fc.asm.call_rm(Operand::Reg(Reg::Rax)).map_err(asm_err)?;
    }

    for arg in args {
        match arg.loc {
            Loc::Int(r) => fc.regs.release_int(r),
            Loc::Float(r) => fc.regs.release_float(r),
        }
    }

    Ok(Outcome::Value(Computed { value: Value::instance_of(class_name), loc: Loc::Int(instance_reg) }))
}

/// Compile `value.attr`: look up which class `value`'s static type belongs
/// to, find the attribute's slot, and load it through the common-objects
/// `instance_get_attr` helper.
pub fn compile_attribute(fc: &mut FunctionCompiler, value: &Expr, attr: Symbol, span: Span) -> ExprResult {
    let computed = match crate::codegen::expr::compile_expr(fc, value)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(Outcome::Split),
    };
    let class_id = attribute_class(fc, &computed, attr, span)?;
    let slot = *fc.compiler.context.class(class_id).attr_slots.get(&attr).ok_or(CompileError::UnknownAttribute {
        offset: span.start as usize,
        attr: format!("{attr:?}"),
    })?;

    let instance_reg = match computed.loc {
        Loc::Int(r) => r,
        Loc::Float(_) => unreachable!("an instance value never lives in an xmm register"),
    };
    fc.asm.mov_rm_reg(Operand::Reg(Reg::Rdi), instance_reg, OperandSize::QWord).map_err(asm_err)?;
    fc.asm.mov_reg_imm64(Reg::Rsi, slot as i64).map_err(asm_err)?;
    fc.regs.release_int(instance_reg);
    emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, instance_get_attr))?;

    let dst = fc.regs.alloc_int().map_err(|_| CompileError::RegisterAllocatorExhausted { offset: span.start as usize })?;
    fc.asm.mov_rm_reg(Operand::Reg(dst), Reg::Rax, OperandSize::QWord).map_err(asm_err)?;
    Ok(Outcome::Value(Computed { value: Value::indeterminate(), loc: Loc::Int(dst) }))
}

/// Emit `value.attr = rhs`, storing through `instance_set_attr` and
/// recording the slot's inferred type for destructor synthesis.
///
/// When `rhs` is a refcounted value this also retains it and releases
/// whatever the slot held before, the same `add_reference`/`delete_reference`
/// pair the synthesized destructor runs at teardown — here run on every
/// store instead of only once at the end, so an attribute overwritten with a
/// fresh value doesn't leak the old one or free a value still reachable
/// through another reference. `delete_reference` is a no-op on the NULL a
/// freshly-allocated, not-yet-assigned slot holds, so this needs no special
/// case for a slot's first assignment.
pub fn compile_attribute_store(fc: &mut FunctionCompiler, value: &Expr, attr: Symbol, rhs: Computed, span: Span) -> CompileResult<()> {
    let computed = match crate::codegen::expr::compile_expr(fc, value)? {
        Outcome::Value(c) => c,
        Outcome::Split => return Ok(()),
    };
    let class_id = attribute_class(fc, &computed, attr, span)?;
    let slot = {
        let slots = &mut fc.compiler.context.class_mut(class_id).attr_slots;
        let next = slots.len() as u32;
        *slots.entry(attr).or_insert(next)
    };
    record_attr_type(fc, slot, &rhs.value);

    let instance_reg = match computed.loc {
        Loc::Int(r) => r,
        Loc::Float(_) => unreachable!("an instance value never lives in an xmm register"),
    };
    let rhs_reg = match rhs.loc {
        Loc::Int(r) => r,
        Loc::Float(_) => return Err(CompileError::Unsupported { offset: span.start as usize, what: "storing a float into an attribute slot".to_string() }),
    };

    if rhs.value.is_refcounted() {
        // Spill both operands to the stack before the first call: either one
        // may live in `rax`, which every call below clobbers with its return
        // value. Stack layout after the two pushes: [rsp+0] = rhs, [rsp+8] =
        // instance; pushing the fetched old value on top shifts both down by
        // 8 for the remaining calls.
        fc.asm.push_reg(instance_reg);
        fc.asm.push_reg(rhs_reg);
        fc.regs.release_int(instance_reg);
        fc.regs.release_int(rhs_reg);

        fc.asm.mov_reg_rm(Reg::Rdi, Operand::Mem(MemRef::offset(Reg::Rsp, 0)), OperandSize::QWord).map_err(asm_err)?;
        emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, add_reference))?;

        fc.asm.mov_reg_rm(Reg::Rdi, Operand::Mem(MemRef::offset(Reg::Rsp, 8)), OperandSize::QWord).map_err(asm_err)?;
        fc.asm.mov_reg_imm64(Reg::Rsi, slot as i64).map_err(asm_err)?;
        emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, instance_get_attr))?;
        fc.asm.push_reg(Reg::Rax);

        fc.asm.mov_reg_rm(Reg::Rdi, Operand::Mem(MemRef::offset(Reg::Rsp, 16)), OperandSize::QWord).map_err(asm_err)?;
        fc.asm.mov_reg_imm64(Reg::Rsi, slot as i64).map_err(asm_err)?;
        fc.asm.mov_reg_rm(Reg::Rdx, Operand::Mem(MemRef::offset(Reg::Rsp, 8)), OperandSize::QWord).map_err(asm_err)?;
        emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, instance_set_attr))?;

        fc.asm.mov_reg_rm(Reg::Rdi, Operand::Mem(MemRef::offset(Reg::Rsp, 0)), OperandSize::QWord).map_err(asm_err)?;
        emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, delete_reference))?;

        fc.asm.op_rm_imm(ArithOp::Add, Operand::Reg(Reg::Rsp), 24, OperandSize::QWord).map_err(asm_err)
    } else {
        fc.asm.mov_rm_reg(Operand::Reg(Reg::Rdi), instance_reg, OperandSize::QWord).map_err(asm_err)?;
        fc.asm.mov_reg_imm64(Reg::Rsi, slot as i64).map_err(asm_err)?;
        fc.asm.mov_rm_reg(Operand::Reg(Reg::Rdx), rhs_reg, OperandSize::QWord).map_err(asm_err)?;
        fc.regs.release_int(instance_reg);
        fc.regs.release_int(rhs_reg);
        emit_common_call(fc, std::mem::offset_of!(ember_runtime::CommonObjects, instance_set_attr))
    }
}

fn attribute_class(fc: &FunctionCompiler, computed: &Computed, attr: Symbol, span: Span) -> CompileResult<ClassId> {
    let class_sym = computed.value.class.ok_or(CompileError::UnknownAttribute { offset: span.start as usize, attr: format!("{attr:?}") })?;
    fc.compiler.context.find_class(fc.module, class_sym).ok_or(CompileError::UnknownAttribute { offset: span.start as usize, attr: format!("{attr:?}") })
}
