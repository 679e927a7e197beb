//! Process-wide function/class/module context tables.
//!
//! Modeled on the teacher's monomorphization context: an append-mostly arena
//! indexed by a stable id. Entries are never moved or removed — a
//! `FunctionId`/`ClassId`/`ModuleId` handed out once stays valid for the rest
//! of the process, since fragments and resolver stubs capture these ids and
//! outlive any single compilation pass.

use ember_ast::{ClassDef, FunctionDef, Symbol};
use rustc_hash::FxHashMap;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

pub struct FunctionContext {
    pub name: Symbol,
    pub def: FunctionDef,
    pub owning_module: ModuleId,
    /// Set when this function is a method: which class it belongs to, so
    /// its first parameter can be treated as `self` during codegen.
    pub owning_class: Option<ClassId>,
    /// Indices into `Compiler::fragments` for this function, in creation
    /// order. A fresh argument-type tuple appends; nothing is ever removed.
    pub fragments: Vec<crate::fragment::FragmentId>,
}

pub struct ClassContext {
    pub name: Symbol,
    pub base: Option<ClassId>,
    pub methods: FxHashMap<Symbol, FunctionId>,
    /// Attribute name -> slot index, assigned in first-sight order across
    /// `__init__` (own attributes are appended after the base class's).
    pub attr_slots: FxHashMap<Symbol, u32>,
    /// Slot indices that hold a refcounted value, in the order the
    /// synthesized destructor releases them (definition order).
    pub refcounted_attrs: Vec<u32>,
    pub constructor: Option<FunctionId>,
    pub destructor: Option<FunctionId>,
}

impl ClassContext {
    pub fn attr_count(&self) -> usize {
        self.attr_slots.len()
    }
}

pub struct ModuleContext {
    pub name: String,
    /// Module-level variable name -> slot index, assigned in first-sight
    /// order as `register_module` scans the module's top-level `Assign`/
    /// `AnnAssign` statements. Read and written by compiled code through
    /// `GLOBALS_BASE_REG`, at `[GLOBALS_BASE_REG + slot * 8]`.
    pub globals: FxHashMap<Symbol, u32>,
    /// Best-effort type of each global, by the same first-assignment-wins
    /// rule `FunctionCompiler::local_types` uses.
    pub global_types: FxHashMap<Symbol, Value>,
    /// Backing storage for this module's globals, one `u64` slot per entry
    /// in `globals`. Grows only while `register_module` is still scanning
    /// the module; by the time any fragment is compiled or run, its length
    /// (and therefore its base pointer) is fixed — an embedder reads the
    /// pointer once with `globals_base_ptr` and seeds `GLOBALS_BASE_REG`
    /// with it before calling into the module's code.
    pub global_storage: Vec<u64>,
    pub functions: Vec<FunctionId>,
    pub classes: Vec<ClassId>,
}

impl ModuleContext {
    /// Base address compiled code for this module should find in
    /// `GLOBALS_BASE_REG`. Only valid once no further globals will be
    /// declared (`register_module` has returned).
    pub fn globals_base_ptr(&mut self) -> *mut u64 {
        self.global_storage.as_mut_ptr()
    }
}

/// The arenas themselves. One `GlobalContext` is shared across every
/// fragment compiled in a process.
#[derive(Default)]
pub struct GlobalContext {
    functions: Vec<FunctionContext>,
    classes: Vec<ClassContext>,
    modules: Vec<ModuleContext>,
}

impl GlobalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function(&mut self, name: Symbol, def: FunctionDef, owning_module: ModuleId) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(FunctionContext { name, def, owning_module, owning_class: None, fragments: Vec::new() });
        id
    }

    pub fn register_class(&mut self, name: Symbol, base: Option<ClassId>) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassContext {
            name,
            base,
            methods: FxHashMap::default(),
            attr_slots: FxHashMap::default(),
            refcounted_attrs: Vec::new(),
            constructor: None,
            destructor: None,
        });
        id
    }

    pub fn register_module(&mut self, name: String) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(ModuleContext {
            name,
            globals: FxHashMap::default(),
            global_types: FxHashMap::default(),
            global_storage: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
        });
        id
    }

    /// Assigns (or returns the existing) storage slot for a module-level
    /// global named `name`, growing the module's backing storage as needed.
    /// Called only while scanning a module's own top-level statements; never
    /// call this once any fragment of the module may already be running.
    pub fn declare_global(&mut self, module: ModuleId, name: Symbol, value: Value) -> u32 {
        let ctx = &mut self.modules[module.0 as usize];
        if let Some(&slot) = ctx.globals.get(&name) {
            return slot;
        }
        let slot = ctx.global_storage.len() as u32;
        ctx.global_storage.push(0);
        ctx.globals.insert(name, slot);
        ctx.global_types.insert(name, value);
        slot
    }

    pub fn function(&self, id: FunctionId) -> &FunctionContext {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut FunctionContext {
        &mut self.functions[id.0 as usize]
    }

    pub fn class(&self, id: ClassId) -> &ClassContext {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassContext {
        &mut self.classes[id.0 as usize]
    }

    pub fn module(&self, id: ModuleId) -> &ModuleContext {
        &self.modules[id.0 as usize]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut ModuleContext {
        &mut self.modules[id.0 as usize]
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Find a function named `name` visible from `module` — its own
    /// top-level functions only; no imports yet.
    pub fn find_function(&self, module: ModuleId, name: Symbol) -> Option<FunctionId> {
        self.module(module).functions.iter().copied().find(|&id| self.function(id).name == name)
    }

    /// Find a class named `name` visible from `module` — its own top-level
    /// classes only; no imports yet.
    pub fn find_class(&self, module: ModuleId, name: Symbol) -> Option<ClassId> {
        self.module(module).classes.iter().copied().find(|&id| self.class(id).name == name)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_ast::{Interner, Span};

    fn dummy_def(interner: &mut Interner, name: &str) -> FunctionDef {
        FunctionDef { name: interner.intern(name), params: Vec::new(), return_annotation: ember_ast::TypeAnnotation::Unannotated, body: Vec::new(), span: Span::dummy() }
    }

    #[test]
    fn registered_ids_are_stable_and_never_reused() {
        let mut interner = Interner::new();
        let mut ctx = GlobalContext::new();
        let module = ctx.register_module("m".to_string());
        let f1 = ctx.register_function(interner.intern("f1"), dummy_def(&mut interner, "f1"), module);
        let f2 = ctx.register_function(interner.intern("f2"), dummy_def(&mut interner, "f2"), module);
        assert_ne!(f1, f2);
        assert_eq!(ctx.function(f1).name, interner.intern("f1"));
        assert_eq!(ctx.function_count(), 2);
    }

    #[test]
    fn class_attr_slots_accumulate() {
        let mut interner = Interner::new();
        let mut ctx = GlobalContext::new();
        let c = ctx.register_class(interner.intern("C"), None);
        let n = interner.intern("n");
        ctx.class_mut(c).attr_slots.insert(n, 0);
        ctx.class_mut(c).refcounted_attrs.push(0);
        assert_eq!(ctx.class(c).attr_count(), 1);
        assert_eq!(ctx.class(c).refcounted_attrs, vec![0]);
    }
}
