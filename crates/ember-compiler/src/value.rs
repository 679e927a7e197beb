//! The compile-time type lattice.
//!
//! Every expression the compiler visits yields a `Value`: a type tag, an
//! optional known literal (for constant folding and dead-branch elimination),
//! and a vector of extension types describing element/class types for
//! collections and instances. `Indeterminate` is the lattice's top element.
//!
//! Equality between `Value`s for fragment-specialization purposes considers
//! only the tag and extension types, never the literal payload — two `int`
//! locals with different known constants are still the same specialization.

use ember_ast::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    None,
    Bool,
    Int,
    Float,
    Bytes,
    Unicode,
    List,
    Tuple,
    Set,
    Dict,
    Instance,
    Function,
    Class,
    Module,
    /// The top of the lattice: not yet narrowed, or deliberately erased
    /// (e.g. a resolver-stub callsite's return type before its first
    /// fragment compiles).
    Indeterminate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone)]
pub struct Value {
    pub tag: TypeTag,
    pub literal: Option<Literal>,
    pub extensions: Vec<Value>,
    /// Set only when `tag == Instance`: which class this is an instance of.
    pub class: Option<Symbol>,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.class == other.class && self.extensions == other.extensions
    }
}
impl Eq for Value {}

impl Value {
    pub fn simple(tag: TypeTag) -> Self {
        Value { tag, literal: None, extensions: Vec::new(), class: None }
    }

    pub fn indeterminate() -> Self {
        Self::simple(TypeTag::Indeterminate)
    }

    pub fn int_literal(v: i64) -> Self {
        Value { tag: TypeTag::Int, literal: Some(Literal::Int(v)), extensions: Vec::new(), class: None }
    }

    pub fn float_literal(v: f64) -> Self {
        Value { tag: TypeTag::Float, literal: Some(Literal::Float(v)), extensions: Vec::new(), class: None }
    }

    pub fn bool_literal(v: bool) -> Self {
        Value { tag: TypeTag::Bool, literal: Some(Literal::Bool(v)), extensions: Vec::new(), class: None }
    }

    pub fn instance_of(class: Symbol) -> Self {
        Value { tag: TypeTag::Instance, literal: None, extensions: Vec::new(), class: Some(class) }
    }

    pub fn list_of(item: Value) -> Self {
        Value { tag: TypeTag::List, literal: None, extensions: vec![item], class: None }
    }

    pub fn is_object_type(&self) -> bool {
        matches!(
            self.tag,
            TypeTag::Bytes
                | TypeTag::Unicode
                | TypeTag::List
                | TypeTag::Tuple
                | TypeTag::Set
                | TypeTag::Dict
                | TypeTag::Instance
                | TypeTag::Function
                | TypeTag::Class
                | TypeTag::Module
        )
    }

    /// Whether a value of this type is held with a refcount (i.e. needs
    /// `add_reference`/`delete_reference` at slot transitions).
    pub fn is_refcounted(&self) -> bool {
        self.is_object_type()
    }

    /// This Value's type "matches" `other` for specialization purposes: same
    /// tag, and recursively-matching extension types.
    pub fn type_matches(&self, other: &Value) -> bool {
        self.tag == other.tag
            && self.class == other.class
            && self.extensions.len() == other.extensions.len()
            && self.extensions.iter().zip(&other.extensions).all(|(a, b)| a.type_matches(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_values_with_different_payloads_still_type_match() {
        let a = Value::int_literal(1);
        let b = Value::int_literal(2);
        assert!(a.type_matches(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn list_of_int_does_not_match_list_of_float() {
        let a = Value::list_of(Value::simple(TypeTag::Int));
        let b = Value::list_of(Value::simple(TypeTag::Float));
        assert!(!a.type_matches(&b));
    }

    #[test]
    fn instances_of_different_classes_do_not_match() {
        let interner = ember_ast::Interner::new();
        let mut interner = interner;
        let a_sym = interner.intern("A");
        let b_sym = interner.intern("B");
        assert!(!Value::instance_of(a_sym).type_matches(&Value::instance_of(b_sym)));
    }
}
