//! Compile-time "terminated by split" signaling.
//!
//! When an expression calls a function with an argument-type tuple that has
//! no compiled fragment yet, the compiler can't know the call's return type
//! without compiling the callee first. Rather than compile callees eagerly
//! (which could recurse arbitrarily deep, or never terminate for mutually
//! recursive functions), the compiler emits a resolver stub call and signals
//! `TerminatedBySplit` instead of a typed result: the current expression's
//! type is unknown until the stub resolves at run time.
//!
//! This is threaded through the AST visitor as an ordinary typed `Result`,
//! not an unwinding mechanism — every visitor method that can split returns
//! `Result<Value, TerminatedBySplit>` and the caller decides whether to
//! propagate the split upward or absorb it.

/// Carries no data: the visitor already emitted the stub call and recorded
/// it in the callsite table before returning this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminatedBySplit;

pub type SplitResult<T> = Result<T, TerminatedBySplit>;

/// How an enclosing statement should react when one or more of its arms
/// split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Both arms split (or there is only one arm, as in a bare `if` with no
    /// `else`): the statement itself has no determinable type and the split
    /// propagates to its own enclosing statement.
    Propagate,
    /// Exactly one arm split; the other arm's type stands in for the whole
    /// statement (e.g. a one-armed `if` where only the `then` branch calls
    /// an unresolved function — the statement's type is the implicit `None`
    /// of the missing `else`).
    AdoptOther,
}

/// Combine the split-ness of two branches (e.g. `if`/`else` arms) into the
/// policy the enclosing statement should follow.
pub fn combine(then_split: bool, else_split: bool) -> SplitPolicy {
    if then_split && else_split {
        SplitPolicy::Propagate
    } else if then_split || else_split {
        SplitPolicy::AdoptOther
    } else {
        SplitPolicy::Propagate // unreachable in practice: caller shouldn't ask when neither split
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_arms_splitting_propagates() {
        assert_eq!(combine(true, true), SplitPolicy::Propagate);
    }

    #[test]
    fn one_armed_split_adopts_the_other_arm() {
        assert_eq!(combine(true, false), SplitPolicy::AdoptOther);
        assert_eq!(combine(false, true), SplitPolicy::AdoptOther);
    }
}
