//! String interning for identifiers carried in the AST
//!
//! The lexer/parser front end is out of scope for this core, but whatever
//! produces an `ember_ast::Module` is expected to have already interned its
//! identifiers the same way: small integer symbols instead of owned strings,
//! so the compiler's context tables can use them as stable map keys.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// An interned string symbol (32-bit index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(NonZeroU32);

impl Symbol {
    #[inline]
    fn from_raw(raw: u32) -> Self {
        Symbol(NonZeroU32::new(raw + 1).unwrap())
    }

    #[inline]
    fn to_raw(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Create a dummy symbol (for tests and placeholder nodes).
    #[inline]
    pub const fn dummy() -> Self {
        Symbol(unsafe { NonZeroU32::new_unchecked(1) })
    }
}

/// String interner that deduplicates identifier text.
#[derive(Clone, Default)]
pub struct Interner {
    map: FxHashMap<String, Symbol>,
    strings: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            strings: Vec::new(),
        }
    }

    /// Intern a string, returning its symbol. Repeated interning of the same
    /// text returns the same symbol.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let sym = Symbol::from_raw(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.map.insert(s.to_string(), sym);
        sym
    }

    /// Resolve a symbol back to its string.
    ///
    /// # Panics
    /// Panics if the symbol was not produced by this interner.
    #[inline]
    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.to_raw()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("world");
        let c = interner.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn resolve_roundtrips() {
        let mut interner = Interner::new();
        let sym = interner.intern("counter");
        assert_eq!(interner.resolve(sym), "counter");
    }
}
