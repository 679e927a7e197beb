//! Exception-block chain and the unwinder that walks it.
//!
//! Exception blocks are stack-resident records chained through a reserved
//! register (the "current exception block head"); this module defines their
//! layout and the lookup the unwinder performs, but not the register
//! save/restore and jump itself — that's emitted code (`ember-compiler`'s
//! `codegen::exception` module).

#[repr(C)]
pub struct HandlerEntry {
    pub class_ids: *const u64,
    pub class_id_count: u64,
    pub handler_address: u64,
}

/// A stack-resident record, one per `try` region (or per function prologue,
/// so an uncaught exception can unwind to the caller).
#[repr(C)]
pub struct ExceptionBlock {
    pub previous: *mut ExceptionBlock,
    pub saved_rsp: u64,
    pub saved_rbp: u64,
    pub saved_callee_saves: [u64; 5],
    pub handlers: *const HandlerEntry,
    pub handler_count: u64,
    /// Address of the `finally` handler, or 0 if this block has none.
    pub finally_handler: u64,
}

/// What the unwinder decided to do with a raised exception of `class_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindTarget {
    /// Jump to this handler address; the exception-block head becomes
    /// `new_head` (this block, so nested raises inside the handler see the
    /// right enclosing chain).
    Handler { address: u64, new_head: *mut ExceptionBlock },
    /// No `except` clause matched here, but this block has a `finally`:
    /// run it, then keep unwinding from `new_head`.
    Finally { address: u64, new_head: *mut ExceptionBlock },
    /// Chain exhausted: the exception escapes the whole call stack.
    Unhandled,
}

unsafe fn handler_matches(entry: *const HandlerEntry, class_id: u64) -> bool {
    let ids = std::slice::from_raw_parts((*entry).class_ids, (*entry).class_id_count as usize);
    ids.contains(&class_id)
}

/// Find where a `class_id` exception should go, starting from `head` and
/// walking toward the root of the chain.
///
/// # Safety
/// `head` must be null or point to a live, well-formed `ExceptionBlock`
/// chain.
pub unsafe fn find_target(head: *mut ExceptionBlock, class_id: u64) -> UnwindTarget {
    let mut block = head;
    while !block.is_null() {
        let handlers = std::slice::from_raw_parts((*block).handlers, (*block).handler_count as usize);
        for entry in handlers {
            if handler_matches(entry, class_id) {
                return UnwindTarget::Handler { address: entry.handler_address, new_head: block };
            }
        }
        if (*block).finally_handler != 0 {
            return UnwindTarget::Finally { address: (*block).finally_handler, new_head: (*block).previous };
        }
        block = (*block).previous;
    }
    UnwindTarget::Unhandled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_handler_by_class_id() {
        let class_ids = [10u64, 11u64];
        let handlers =
            [HandlerEntry { class_ids: class_ids.as_ptr(), class_id_count: 2, handler_address: 0x1000 }];
        let mut block = ExceptionBlock {
            previous: std::ptr::null_mut(),
            saved_rsp: 0,
            saved_rbp: 0,
            saved_callee_saves: [0; 5],
            handlers: handlers.as_ptr(),
            handler_count: 1,
            finally_handler: 0,
        };
        unsafe {
            let target = find_target(&mut block, 11);
            assert_eq!(target, UnwindTarget::Handler { address: 0x1000, new_head: &mut block });
        }
    }

    #[test]
    fn falls_through_to_finally_when_nothing_matches() {
        let handlers: [HandlerEntry; 0] = [];
        let mut outer = ExceptionBlock {
            previous: std::ptr::null_mut(),
            saved_rsp: 0,
            saved_rbp: 0,
            saved_callee_saves: [0; 5],
            handlers: handlers.as_ptr(),
            handler_count: 0,
            finally_handler: 0,
        };
        let mut inner = ExceptionBlock {
            previous: &mut outer,
            saved_rsp: 0,
            saved_rbp: 0,
            saved_callee_saves: [0; 5],
            handlers: handlers.as_ptr(),
            handler_count: 0,
            finally_handler: 0x2000,
        };
        unsafe {
            let target = find_target(&mut inner, 99);
            assert_eq!(target, UnwindTarget::Finally { address: 0x2000, new_head: &mut outer });
        }
    }

    #[test]
    fn unhandled_when_chain_is_empty() {
        unsafe {
            assert_eq!(find_target(std::ptr::null_mut(), 1), UnwindTarget::Unhandled);
        }
    }
}
