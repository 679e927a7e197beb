//! Fragments: one compiled copy of a function per observed argument-type
//! tuple, and the table that keys them — directly modeled on the teacher's
//! `MonoKey`/`MonomorphizationContext` (generic function × concrete type
//! arguments -> specialized instantiation).

use ember_codebuf::CodeHandle;
use rustc_hash::FxHashMap;

use crate::context::FunctionId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentId(pub u32);

/// A function plus the concrete argument types it was compiled for — the
/// fragment table's key, equivalent to the teacher's `MonoKey`.
#[derive(Debug, Clone)]
pub struct FragmentKey {
    pub function: FunctionId,
    pub arg_types: Vec<Value>,
}

impl PartialEq for FragmentKey {
    fn eq(&self, other: &Self) -> bool {
        self.function == other.function
            && self.arg_types.len() == other.arg_types.len()
            && self.arg_types.iter().zip(&other.arg_types).all(|(a, b)| a.type_matches(b))
    }
}
impl Eq for FragmentKey {}

impl std::hash::Hash for FragmentKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.function.hash(state);
        self.arg_types.len().hash(state);
        for t in &self.arg_types {
            t.tag.hash(state);
        }
    }
}

pub struct Fragment {
    pub owning_function: FunctionId,
    /// Index of this fragment within its function's specialization list.
    pub index_in_function: usize,
    pub arg_types: Vec<Value>,
    pub return_type: Value,
    pub code: CodeHandle,
    pub label_offsets: FxHashMap<String, usize>,
}

/// The fragment table: every specialization ever compiled, keyed by
/// `(function, argument-type tuple)`, plus the unresolved-callsite registry
/// fragments introduce while compiling.
#[derive(Default)]
pub struct FragmentTable {
    fragments: Vec<Fragment>,
    by_key: FxHashMap<(FunctionId, Vec<crate::value::TypeTag>), FragmentId>,
}

impl FragmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn tag_key(key: &FragmentKey) -> (FunctionId, Vec<crate::value::TypeTag>) {
        (key.function, key.arg_types.iter().map(|v| v.tag).collect())
    }

    pub fn has(&self, key: &FragmentKey) -> bool {
        self.by_key.contains_key(&Self::tag_key(key))
    }

    pub fn get(&self, key: &FragmentKey) -> Option<FragmentId> {
        self.by_key.get(&Self::tag_key(key)).copied()
    }

    pub fn fragment(&self, id: FragmentId) -> &Fragment {
        &self.fragments[id.0 as usize]
    }

    /// Register a newly compiled fragment. Panics if this key was already
    /// registered — the caller (the compiler driver) is responsible for
    /// checking `has`/`get` first so a given argument-type tuple is compiled
    /// at most once.
    pub fn insert(&mut self, key: FragmentKey, fragment: Fragment) -> FragmentId {
        debug_assert!(!self.has(&key));
        let id = FragmentId(self.fragments.len() as u32);
        self.by_key.insert(Self::tag_key(&key), id);
        self.fragments.push(fragment);
        id
    }

    pub fn specialization_count(&self, function: FunctionId) -> usize {
        self.by_key.keys().filter(|(f, _)| *f == function).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{TypeTag, Value};
    use ember_codebuf::CodeBuffer;

    fn make_fragment(function: FunctionId, args: Vec<Value>, buf: &CodeBuffer) -> (FragmentKey, Fragment) {
        let handle = buf.allocate(&[0xC3]).unwrap();
        let key = FragmentKey { function, arg_types: args.clone() };
        let fragment = Fragment {
            owning_function: function,
            index_in_function: 0,
            arg_types: args,
            return_type: Value::simple(TypeTag::Int),
            code: handle,
            label_offsets: FxHashMap::default(),
        };
        (key, fragment)
    }

    #[test]
    fn distinct_argument_types_create_distinct_fragments() {
        let buf = CodeBuffer::new();
        let mut table = FragmentTable::new();
        let f = FunctionId(0);

        let (key_int, frag_int) = make_fragment(f, vec![Value::simple(TypeTag::Int)], &buf);
        let id_int = table.insert(key_int.clone(), frag_int);
        assert!(table.has(&key_int));

        let (key_float, frag_float) = make_fragment(f, vec![Value::simple(TypeTag::Float)], &buf);
        let id_float = table.insert(key_float, frag_float);

        assert_ne!(id_int, id_float);
        assert_eq!(table.specialization_count(f), 2);
    }

    #[test]
    fn literal_payload_does_not_affect_key_identity() {
        let buf = CodeBuffer::new();
        let mut table = FragmentTable::new();
        let f = FunctionId(1);
        let (key_a, frag_a) = make_fragment(f, vec![Value::int_literal(1)], &buf);
        table.insert(key_a, frag_a);
        let key_b = FragmentKey { function: f, arg_types: vec![Value::int_literal(2)] };
        assert!(table.has(&key_b));
    }
}
