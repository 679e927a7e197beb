//! The `__del__` recursion guard and resurrection check a synthesized class
//! destructor runs before actually freeing an instance.
//!
//! The guard is a refcount bias, the same trick CPython's `tp_dealloc` uses:
//! bump the count by one before running `__del__`, so any reference taken
//! (or `delete_reference` call made) during `__del__` can't drive the count
//! to zero a second time. After `__del__` returns, drop the bias; if nothing
//! else grabbed a reference in the meantime the count is back to zero and
//! the object is actually freed, otherwise it was "resurrected" and survives.

use std::sync::atomic::Ordering;

use crate::header::ObjectHeader;

/// Run `__del__` under the bias, then free the instance (via `free_body`,
/// which releases owned attribute slots and the backing allocation) only if
/// nothing resurrected it.
///
/// # Safety
/// `header` must point to a live object at refcount 0 (i.e. called from
/// exactly the position `delete_reference` calls a destructor from).
pub unsafe fn run_guarded(
    header: *mut ObjectHeader,
    run_del: impl FnOnce(),
    free_body: impl FnOnce(),
) {
    (*header).refcount.fetch_add(1, Ordering::AcqRel);
    run_del();
    let prev = (*header).refcount.fetch_sub(1, Ordering::AcqRel);
    if prev == 1 {
        free_body();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ObjectHeader;
    use std::cell::Cell;
    use std::sync::atomic::AtomicU64;

    unsafe extern "C" fn noop_destructor(_ptr: *mut ObjectHeader) {}

    #[test]
    fn del_runs_exactly_once_and_frees_when_not_resurrected() {
        let mut hdr = ObjectHeader { refcount: AtomicU64::new(0), destructor: noop_destructor };
        let del_runs = Cell::new(0);
        let freed = Cell::new(false);
        unsafe {
            run_guarded(&mut hdr, || del_runs.set(del_runs.get() + 1), || freed.set(true));
        }
        assert_eq!(del_runs.get(), 1);
        assert!(freed.get());
    }

    #[test]
    fn resurrection_during_del_prevents_free() {
        let mut hdr = ObjectHeader { refcount: AtomicU64::new(0), destructor: noop_destructor };
        let freed = Cell::new(false);
        unsafe {
            let hdr_ptr: *mut ObjectHeader = &mut hdr;
            run_guarded(
                hdr_ptr,
                || {
                    // Something takes a fresh reference during __del__.
                    (*hdr_ptr).refcount.fetch_add(1, Ordering::AcqRel);
                },
                || freed.set(true),
            );
        }
        assert!(!freed.get());
        assert_eq!(hdr.refcount.load(Ordering::SeqCst), 1);
    }
}
