//! Unresolved-callsite registry.
//!
//! A call to a fragment that doesn't exist yet compiles against a resolver
//! stub (see `resolver.rs`) instead of blocking on compiling the callee. The
//! stub needs enough information to compile the right fragment on first
//! entry and then patch the caller's call instruction to go direct; this
//! table is where that information lives, keyed by a token baked into the
//! stub's own code so it can find itself back here at call time.

use rustc_hash::FxHashMap;

use crate::context::{FunctionId, ModuleId};
use crate::fragment::FragmentId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallsiteToken(pub u64);

/// Everything needed to resolve one unresolved call: who's being called with
/// what argument types, and where in the caller to patch once the callee
/// fragment exists.
pub struct CallsiteInfo {
    pub callee: FunctionId,
    pub arg_types: Vec<Value>,
    pub caller_module: ModuleId,
    pub caller_function: FunctionId,
    pub caller_fragment: FragmentId,
    /// Identifies which split of the caller fragment contains the call, in
    /// case the caller itself suspended mid-compile (see `split.rs`).
    pub caller_split: u32,
    /// Offset of the call instruction within the caller fragment's code, so
    /// the resolver can overwrite it with a direct call once resolved.
    pub return_offset: usize,
}

#[derive(Default)]
pub struct CallsiteTable {
    next_token: u64,
    entries: FxHashMap<CallsiteToken, CallsiteInfo>,
}

impl CallsiteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: CallsiteInfo) -> CallsiteToken {
        let token = CallsiteToken(self.next_token);
        self.next_token += 1;
        self.entries.insert(token, info);
        token
    }

    pub fn get(&self, token: CallsiteToken) -> Option<&CallsiteInfo> {
        self.entries.get(&token)
    }

    /// Once a callsite resolves to a direct call, it never needs re-resolving
    /// from this table again — the caller's code no longer refers to it.
    pub fn remove(&mut self, token: CallsiteToken) -> Option<CallsiteInfo> {
        self.entries.remove(&token)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypeTag;

    fn info(callee: FunctionId) -> CallsiteInfo {
        CallsiteInfo {
            callee,
            arg_types: vec![Value::simple(TypeTag::Int)],
            caller_module: ModuleId(0),
            caller_function: FunctionId(1),
            caller_fragment: FragmentId(0),
            caller_split: 0,
            return_offset: 42,
        }
    }

    #[test]
    fn tokens_are_distinct_and_monotonic() {
        let mut table = CallsiteTable::new();
        let t1 = table.register(info(FunctionId(2)));
        let t2 = table.register(info(FunctionId(3)));
        assert_ne!(t1, t2);
        assert!(t2.0 > t1.0);
    }

    #[test]
    fn resolved_callsite_is_removed_and_cannot_resolve_twice() {
        let mut table = CallsiteTable::new();
        let token = table.register(info(FunctionId(5)));
        assert_eq!(table.pending_count(), 1);
        let removed = table.remove(token);
        assert!(removed.is_some());
        assert_eq!(table.pending_count(), 0);
        assert!(table.remove(token).is_none());
    }
}
