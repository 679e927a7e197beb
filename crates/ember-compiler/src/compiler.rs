//! The top-level compiler driver: owns every process-wide table and decides,
//! for each call site encountered during codegen, whether to compile the
//! callee eagerly, reuse an already-compiled fragment, or fall back to a
//! resolver stub because compiling the callee right now would recurse back
//! into a fragment still under construction.

use ember_ast::{Expr, Interner, Literal, Module, Stmt, Symbol};

use crate::context::{FunctionId, GlobalContext, ModuleId};
use crate::error::CompileResult;
use crate::fragment::{Fragment, FragmentKey, FragmentTable};
use crate::callsite::CallsiteTable;
use crate::value::{TypeTag, Value};

pub struct Compiler {
    pub context: GlobalContext,
    pub fragments: FragmentTable,
    pub callsites: CallsiteTable,
    pub code: ember_codebuf::CodeBuffer,
    /// The process-wide symbol interner. Front ends building a `Module` for
    /// this compiler are expected to intern identifiers through this same
    /// interner (via `intern`), so special method names like `__init__` can
    /// be recognized by symbol equality rather than by string comparison at
    /// every lookup.
    pub interner: Interner,
    /// Stack of (function, argument-type tags) currently being compiled, so
    /// a call discovered mid-compile can tell whether its callee is an
    /// ancestor of itself (a recursion cycle that must go through a stub)
    /// rather than a plain forward call.
    compiling: Vec<(FunctionId, Vec<TypeTag>)>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            context: GlobalContext::new(),
            fragments: FragmentTable::new(),
            callsites: CallsiteTable::new(),
            code: ember_codebuf::CodeBuffer::new(),
            interner: Interner::new(),
            compiling: Vec::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        self.interner.intern(s)
    }

    /// Register every top-level function and class in a parsed module,
    /// returning the `ModuleId` codegen anchors globals and fragments to.
    ///
    /// A top-level `name = ...` or `name: T = ...` also declares a module
    /// global: `name` gets a storage slot in the module's global-variable
    /// layout, readable from any of the module's functions through
    /// `GLOBALS_BASE_REG` (see `context::ModuleContext::globals`). The
    /// initial value itself isn't written here — populating it is the
    /// embedder's job, the same way the front end analysis pass that would
    /// normally drive this is out of scope for this crate.
    pub fn register_module(&mut self, module: &Module) -> ModuleId {
        let module_id = self.context.register_module(module.name.clone());
        for stmt in &module.statements {
            match stmt {
                Stmt::FunctionDef(def) => {
                    let id = self.context.register_function(def.name, def.clone(), module_id);
                    self.context.module_mut(module_id).functions.push(id);
                }
                Stmt::ClassDef(def) => {
                    crate::codegen::class::register_class(self, def, module_id);
                }
                Stmt::Assign { target: Expr::Name(sym, _), value, .. } => {
                    self.context.declare_global(module_id, *sym, Self::infer_global_type(value));
                }
                Stmt::AnnAssign { target, value, .. } => {
                    let inferred = value.as_ref().map(Self::infer_global_type).unwrap_or_else(Value::indeterminate);
                    self.context.declare_global(module_id, *target, inferred);
                }
                _ => {}
            }
        }
        module_id
    }

    /// Best-effort type of a module global from its initializer expression;
    /// anything but a plain literal is left indeterminate until some
    /// function's codegen narrows it further.
    fn infer_global_type(expr: &Expr) -> Value {
        match expr {
            Expr::Literal(Literal::Bool(b), _) => Value::bool_literal(*b),
            Expr::Literal(Literal::Int(v), _) => Value::int_literal(*v),
            Expr::Literal(Literal::Float(v), _) => Value::float_literal(*v),
            _ => Value::indeterminate(),
        }
    }

    fn tag_key(function: FunctionId, arg_types: &[Value]) -> (FunctionId, Vec<TypeTag>) {
        (function, arg_types.iter().map(|v| v.tag).collect())
    }

    /// True when `function` called with `arg_types` is an ancestor of the
    /// fragment currently being compiled — i.e. compiling it now would
    /// recurse into the compiler itself.
    pub fn is_compiling(&self, function: FunctionId, arg_types: &[Value]) -> bool {
        let key = Self::tag_key(function, arg_types);
        self.compiling.iter().any(|k| *k == key)
    }

    /// Compile (or fetch the cached) fragment for `function` specialized to
    /// `arg_types`. Callers must have already checked `is_compiling` and
    /// taken the resolver-stub path instead when it returns true.
    pub fn compile_function(&mut self, function: FunctionId, arg_types: Vec<Value>) -> CompileResult<(crate::fragment::FragmentId, *const u8)> {
        let key = FragmentKey { function, arg_types: arg_types.clone() };
        if let Some(id) = self.fragments.get(&key) {
            let entry = self.code.entry_ptr(&self.fragments.fragment(id).code)?;
            return Ok((id, entry));
        }

        let tag_key = Self::tag_key(function, &arg_types);
        debug_assert!(!self.compiling.contains(&tag_key), "recursive compile must go through a resolver stub");
        self.compiling.push(tag_key.clone());

        let def = self.context.function(function).def.clone();
        let module = self.context.function(function).owning_module;
        let self_class = self.context.function(function).owning_class;
        let mut fc = crate::codegen::FunctionCompiler::new(self, function, module, self_class, arg_types.clone());
        let result = fc.compile(&def).and_then(|_| fc.finish());

        self.compiling.retain(|k| *k != tag_key);
        let built = result?;

        let handle = self.code.allocate(&built.code)?;
        let index_in_function = self.fragments.specialization_count(function);
        let fragment = Fragment {
            owning_function: function,
            index_in_function,
            arg_types: arg_types.clone(),
            return_type: built.return_type,
            code: handle,
            label_offsets: built.label_offsets,
        };
        let id = self.fragments.insert(FragmentKey { function, arg_types }, fragment);
        self.context.function_mut(function).fragments.push(id);
        let entry = self.code.entry_ptr(&self.fragments.fragment(id).code)?;
        Ok((id, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_ast::{Expr, Interner, Literal, Param, Span, Stmt, TypeAnnotation};

    fn neg_float_module(interner: &mut Interner) -> Module {
        let x = interner.intern("x");
        let name = interner.intern("neg");
        let def = ember_ast::FunctionDef {
            name,
            params: vec![Param { name: x, annotation: TypeAnnotation::Float, default: None, span: Span::dummy() }],
            return_annotation: TypeAnnotation::Float,
            body: vec![Stmt::Return(
                Some(Expr::UnaryOp {
                    op: ember_ast::UnaryOp::Neg,
                    operand: Box::new(Expr::Name(x, Span::dummy())),
                    span: Span::dummy(),
                }),
                Span::dummy(),
            )],
            span: Span::dummy(),
        };
        Module { name: "m".to_string(), statements: vec![Stmt::FunctionDef(def)] }
    }

    #[test]
    fn compiling_the_same_specialization_twice_reuses_the_fragment() {
        let mut interner = Interner::new();
        let module = neg_float_module(&mut interner);
        let mut compiler = Compiler::new();
        let module_id = compiler.register_module(&module);
        let function = compiler.context.module(module_id).functions[0];

        let (id1, ptr1) = compiler.compile_function(function, vec![Value::simple(TypeTag::Float)]).unwrap();
        let (id2, ptr2) = compiler.compile_function(function, vec![Value::simple(TypeTag::Float)]).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(ptr1, ptr2);
    }

    #[test]
    fn different_argument_types_produce_a_second_fragment() {
        let mut interner = Interner::new();
        let module = neg_float_module(&mut interner);
        let mut compiler = Compiler::new();
        let module_id = compiler.register_module(&module);
        let function = compiler.context.module(module_id).functions[0];

        compiler.compile_function(function, vec![Value::simple(TypeTag::Float)]).unwrap();
        compiler.compile_function(function, vec![Value::simple(TypeTag::Int)]).unwrap();
        assert_eq!(compiler.fragments.specialization_count(function), 2);
    }
}
