//! Resolver stub target: the single native function every unresolved
//! callsite's stub calls into.
//!
//! Modeled on the classic ELF PLT lazy-binding trampoline: the stub saves
//! every integer argument register to the stack (so the resolver's own call
//! doesn't clobber them), calls this function with the callsite's token,
//! restores the argument registers, and tail-jumps to the returned address.
//!
//! Unlike a real PLT, this does not patch the call site in place once
//! resolved — every call through an unresolved callsite pays the resolver's
//! cost again. Patching the caller's fragment in place is a real
//! optimization left undone here (see `callsite.rs`'s token staying valid
//! for the fragment's whole lifetime rather than being consumed once).

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::callsite::CallsiteToken;
use crate::compiler::Compiler;

static GLOBAL_COMPILER: OnceCell<Mutex<Compiler>> = OnceCell::new();

/// Install the process-wide compiler instance the resolver stub calls back
/// into. Must be called once, before any compiled code can run.
///
/// # Panics
/// Panics if a compiler has already been installed.
pub fn install_global(compiler: Compiler) {
    GLOBAL_COMPILER.set(Mutex::new(compiler)).map_err(|_| ()).expect("global compiler already installed");
}

pub fn with_global<R>(f: impl FnOnce(&mut Compiler) -> R) -> R {
    let mutex = GLOBAL_COMPILER.get().expect("global compiler not installed");
    let mut guard = mutex.lock();
    f(&mut guard)
}

/// The resolver stub's call target: compile the callsite's callee (if it
/// isn't already compiled) and return its entry pointer. Called from
/// generated code with the System V calling convention, so its single
/// argument arrives in `rdi` exactly like any other native function.
pub extern "C" fn resolve_callsite(token: u64) -> u64 {
    with_global(|compiler| {
        let info = compiler
            .callsites
            .get(CallsiteToken(token))
            .unwrap_or_else(|| panic!("resolver stub called with unregistered token {token}"));
        let callee = info.callee;
        let arg_types = info.arg_types.clone();
        match compiler.compile_function(callee, arg_types) {
            Ok((_, entry)) => entry as u64,
            Err(err) => {
                eprintln!("fatal: failed to resolve deferred call: {err}");
                std::process::exit(101);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_callsite_has_the_extern_c_signature_the_stub_expects() {
        let f: extern "C" fn(u64) -> u64 = resolve_callsite;
        let _ = f;
    }
}
