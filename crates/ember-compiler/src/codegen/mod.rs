//! Per-fragment code generation.
//!
//! One [`FunctionCompiler`] compiles one `(function, argument-type vector)`
//! specialization into a finished byte string: it owns the `Assembler` for
//! this fragment, the intra-expression register allocator, and the stack-slot
//! assignment for every local the function declares (§4.5's "one 64-bit slot
//! per declared local").

pub mod call;
pub mod class;
pub mod control;
pub mod exception;
pub mod expr;
pub mod stmt;

use ember_asm::{Assembler, Label, OperandSize, Reg};
use ember_ast::{Expr, FunctionDef, Stmt, Symbol};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::abi::{FLOAT_ARG_REGS, INT_ARG_REGS};
use crate::compiler::Compiler;
use crate::context::{FunctionId, ModuleId};
use crate::error::{CompileError, CompileResult};
use crate::value::{TypeTag, Value};

/// Where a computed expression's result currently lives.
#[derive(Debug, Clone, Copy)]
pub enum Loc {
    Int(Reg),
    Float(ember_asm::Xmm),
}

/// An expression's compiled value: its inferred type plus the register
/// holding it.
#[derive(Debug, Clone)]
pub struct Computed {
    pub value: Value,
    pub loc: Loc,
}

/// What compiling an expression or statement produced: either a value, or a
/// signal that a call inside it hit an unresolved fragment and the
/// expression's type can't be determined yet (§9's "terminated by split").
pub enum Outcome<T> {
    Value(T),
    Split,
}

pub type ExprResult = CompileResult<Outcome<Computed>>;
pub type StmtResult = CompileResult<Outcome<()>>;

pub struct LoopLabels {
    pub continue_label: Label,
    pub break_label: Label,
}

pub struct BuiltFragment {
    pub code: Vec<u8>,
    pub return_type: Value,
    pub label_offsets: FxHashMap<String, usize>,
}

pub struct FunctionCompiler<'c> {
    pub compiler: &'c mut Compiler,
    pub asm: Assembler,
    pub regs: crate::regalloc::RegisterAllocator,
    locals: FxHashMap<Symbol, i32>,
    /// Best-effort type of each local's current value, used to pick the
    /// register class (`Loc::Int` vs `Loc::Float`) a `Name` load materializes
    /// into. Updated at every assignment; a local reassigned to a different
    /// type mid-function is a known limitation (matches the first-return-
    /// wins simplification for inferring the function's own return type).
    local_types: FxHashMap<Symbol, Value>,
    pub loops: Vec<LoopLabels>,
    pub function: FunctionId,
    pub module: ModuleId,
    /// The class this function is a method of, if any — its first
    /// parameter is `self`.
    pub self_class: Option<crate::context::ClassId>,
    pub arg_types: Vec<Value>,
    pub entry_label: Label,
    pub return_label: Label,
    pub return_type: Option<Value>,
    named_labels: Vec<(String, Label)>,
    /// Labels of `try` blocks currently in scope, innermost last. A `raise`
    /// targets the top of this stack (the nearest enclosing `try`'s
    /// dispatch label) instead of jumping straight to `return_label`, so
    /// the exception actually reaches the handler-matching code rather than
    /// skipping it. Empty outside any `try`.
    pub try_dispatch: Vec<Label>,
}

fn collect_locals(body: &[Stmt], order: &mut Vec<Symbol>, seen: &mut FxHashSet<Symbol>) {
    for stmt in body {
        match stmt {
            Stmt::Assign { target, .. } => {
                if let Expr::Name(sym, _) = target {
                    if seen.insert(*sym) {
                        order.push(*sym);
                    }
                }
            }
            Stmt::AnnAssign { target, .. } => {
                if seen.insert(*target) {
                    order.push(*target);
                }
            }
            Stmt::For { target, body, orelse, .. } => {
                if seen.insert(*target) {
                    order.push(*target);
                }
                collect_locals(body, order, seen);
                collect_locals(orelse, order, seen);
            }
            Stmt::If { branches, orelse, .. } => {
                for (_, b) in branches {
                    collect_locals(b, order, seen);
                }
                collect_locals(orelse, order, seen);
            }
            Stmt::While { body, orelse, .. } => {
                collect_locals(body, order, seen);
                collect_locals(orelse, order, seen);
            }
            Stmt::Try { body, handlers, orelse, finally, .. } => {
                collect_locals(body, order, seen);
                for h in handlers {
                    if let Some(b) = h.binding {
                        if seen.insert(b) {
                            order.push(b);
                        }
                    }
                    collect_locals(&h.body, order, seen);
                }
                collect_locals(orelse, order, seen);
                collect_locals(finally, order, seen);
            }
            Stmt::Expr(_) | Stmt::Return(_, _) | Stmt::Raise(_, _) | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Pass(_) => {}
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {}
        }
    }
}

impl<'c> FunctionCompiler<'c> {
    pub fn new(compiler: &'c mut Compiler, function: FunctionId, module: ModuleId, self_class: Option<crate::context::ClassId>, arg_types: Vec<Value>) -> Self {
        let mut asm = Assembler::new();
        let entry_label = asm.new_label("entry");
        let return_label = asm.new_label("return");
        FunctionCompiler {
            compiler,
            asm,
            regs: crate::regalloc::RegisterAllocator::new(),
            locals: FxHashMap::default(),
            local_types: FxHashMap::default(),
            loops: Vec::new(),
            function,
            module,
            self_class,
            arg_types,
            entry_label,
            return_label,
            return_type: None,
            named_labels: vec![("entry".to_string(), entry_label), ("return".to_string(), return_label)],
            try_dispatch: Vec::new(),
        }
    }

    /// Where a `raise` (or any other fault, such as a codegen-synthesized
    /// exception) currently in scope should jump: the nearest enclosing
    /// `try`'s dispatch label, or `return_label` when there's no `try` in
    /// scope at all.
    pub fn raise_target(&self) -> Label {
        self.try_dispatch.last().copied().unwrap_or(self.return_label)
    }

    pub fn local_offset(&self, sym: Symbol, span: ember_ast::Span) -> CompileResult<i32> {
        self.locals.get(&sym).copied().ok_or(CompileError::UnknownName {
            offset: span.start as usize,
            name: format!("<symbol {:?}>", sym),
        })
    }

    /// Like `local_offset`, but `None` instead of an error when `sym` isn't
    /// one of this function's own locals/parameters — the caller's cue to
    /// fall back to the owning module's globals instead.
    pub fn try_local_offset(&self, sym: Symbol) -> Option<i32> {
        self.locals.get(&sym).copied()
    }

    pub fn local_mem(&self, offset: i32) -> ember_asm::MemRef {
        ember_asm::MemRef::offset(Reg::Rbp, -(offset as i64))
    }

    pub fn local_type(&self, sym: Symbol) -> Value {
        self.local_types.get(&sym).cloned().unwrap_or_else(Value::indeterminate)
    }

    pub fn set_local_type(&mut self, sym: Symbol, value: Value) {
        self.local_types.insert(sym, value);
    }

    pub fn new_label(&mut self, name: &str) -> Label {
        let label = self.asm.new_label(name);
        self.named_labels.push((name.to_string(), label));
        label
    }

    /// Unify a `return` statement's expression type into the fragment's
    /// inferred return type. The first `return` encountered wins; later
    /// returns are expected to agree (disagreement is exceedingly rare in
    /// well-typed programs and is accepted here as the specialization that
    /// wins, matching how argument-type mismatches are handled generally).
    pub fn record_return_type(&mut self, value: Value) {
        if self.return_type.is_none() {
            self.return_type = Some(value);
        }
    }

    pub fn compile(&mut self, def: &FunctionDef) -> CompileResult<()> {
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        for param in &def.params {
            if seen.insert(param.name) {
                order.push(param.name);
            }
        }
        collect_locals(&def.body, &mut order, &mut seen);

        for (i, sym) in order.iter().enumerate() {
            self.locals.insert(*sym, ((i + 1) * 8) as i32);
        }
        let frame_size = {
            let raw = (order.len() * 8) as i32;
            (raw + 15) & !15
        };

        self.asm.bind_label(self.entry_label).map_err(asm_err)?;
        self.asm.push_reg(Reg::Rbp);
        self.asm.mov_rm_reg(ember_asm::Operand::Reg(Reg::Rbp), Reg::Rsp, OperandSize::QWord).map_err(asm_err)?;
        if frame_size > 0 {
            self.asm
                .op_rm_imm(ember_asm::ArithOp::Sub, ember_asm::Operand::Reg(Reg::Rsp), frame_size as i64, OperandSize::QWord)
                .map_err(asm_err)?;
        }
        for sym in &order {
            let off = self.locals[sym];
            self.asm.mov_rm_imm32(ember_asm::Operand::Mem(self.local_mem(off)), 0, OperandSize::QWord).map_err(asm_err)?;
        }

        let mut int_cursor = 0usize;
        let mut float_cursor = 0usize;
        let arg_types = self.arg_types.clone();
        for (param, arg_type) in def.params.iter().zip(arg_types.iter()) {
            let off = self.locals[&param.name];
            self.local_types.insert(param.name, arg_type.clone());
            if matches!(arg_type.tag, TypeTag::Float) {
                let src = FLOAT_ARG_REGS[float_cursor];
                float_cursor += 1;
                let gpr = Reg::Rax;
                self.asm.movq_gpr_from_xmm(gpr, src);
                self.asm.mov_rm_reg(ember_asm::Operand::Mem(self.local_mem(off)), gpr, OperandSize::QWord).map_err(asm_err)?;
            } else {
                let src = INT_ARG_REGS[int_cursor];
                int_cursor += 1;
                self.asm.mov_rm_reg(ember_asm::Operand::Mem(self.local_mem(off)), src, OperandSize::QWord).map_err(asm_err)?;
            }
        }

        for stmt in &def.body {
            let _ = stmt::compile_stmt(self, stmt)?;
        }

        self.asm.bind_label(self.return_label).map_err(asm_err)?;
        if frame_size > 0 {
            self.asm.mov_rm_reg(ember_asm::Operand::Reg(Reg::Rsp), Reg::Rbp, OperandSize::QWord).map_err(asm_err)?;
        }
        self.asm.pop_reg(Reg::Rbp);
        self.asm.ret();
        Ok(())
    }

    pub fn finish(self) -> CompileResult<BuiltFragment> {
        let named_labels = self.named_labels;
        let return_type = self.return_type.clone().unwrap_or_else(|| Value::simple(TypeTag::None));
        let (code, offsets) = self.asm.finish().map_err(asm_err)?;
        // Every label this `FunctionCompiler` hands out is created through
        // `new_label`, in the same order `Assembler::new_label` assigns ids —
        // so a label's position in `named_labels` equals its id, and lines up
        // one-for-one with `finish()`'s offsets vector.
        let mut label_offsets = FxHashMap::default();
        for (i, (name, _label)) in named_labels.into_iter().enumerate() {
            if let Some(&off) = offsets.get(i) {
                label_offsets.insert(name, off);
            }
        }
        Ok(BuiltFragment { code, return_type, label_offsets })
    }
}

pub(crate) fn asm_err(e: ember_asm::AsmError) -> CompileError {
    CompileError::Assembler { offset: 0, source: e }
}
