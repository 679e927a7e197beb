//! The object header every heap value starts with, and the two refcounting
//! primitives (`add_reference`/`delete_reference`) codegen calls through the
//! common-objects table.

use std::sync::atomic::{AtomicU64, Ordering};

/// Destructors are plain C-ABI function pointers so compiled code can call
/// them directly through the header without going back through Rust's vtable
/// machinery.
pub type Destructor = unsafe extern "C" fn(*mut ObjectHeader);

#[repr(C)]
pub struct ObjectHeader {
    pub refcount: AtomicU64,
    pub destructor: Destructor,
}

impl ObjectHeader {
    pub fn new(destructor: Destructor) -> Self {
        ObjectHeader { refcount: AtomicU64::new(1), destructor }
    }
}

/// Bump a live object's refcount. No-op on a NULL pointer (an unset optional
/// slot).
///
/// # Safety
/// `ptr` must be either NULL or point to a live object whose header is at
/// offset 0.
pub unsafe fn add_reference(ptr: *mut ObjectHeader) {
    if ptr.is_null() {
        return;
    }
    let prev = (*ptr).refcount.fetch_add(1, Ordering::Relaxed);
    debug_assert!(prev > 0, "add_reference on an object already at zero refcount");
}

/// Release one reference, running the destructor if this was the last one.
///
/// # Safety
/// Same as [`add_reference`].
pub unsafe fn delete_reference(ptr: *mut ObjectHeader) {
    if ptr.is_null() {
        return;
    }
    let prev = (*ptr).refcount.fetch_sub(1, Ordering::AcqRel);
    if prev == 1 {
        let destructor = (*ptr).destructor;
        destructor(ptr);
    } else {
        debug_assert!(prev > 0, "delete_reference underflowed a refcount already at zero");
    }
}

/// A destructor for objects that are nothing but their header plus a single
/// `malloc`'d block with no owned children: free the block and stop.
///
/// # Safety
/// `ptr` must have been allocated with `libc::malloc` (or an allocator
/// compatible with `libc::free`).
pub unsafe extern "C" fn free_destructor(ptr: *mut ObjectHeader) {
    libc::free(ptr as *mut libc::c_void);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc, dealloc, Layout};

    unsafe extern "C" fn noop_destructor(_ptr: *mut ObjectHeader) {}

    fn make_header() -> *mut ObjectHeader {
        unsafe {
            let layout = Layout::new::<ObjectHeader>();
            let ptr = alloc(layout) as *mut ObjectHeader;
            ptr.write(ObjectHeader::new(noop_destructor));
            ptr
        }
    }

    #[test]
    fn add_then_delete_returns_to_one() {
        unsafe {
            let ptr = make_header();
            add_reference(ptr);
            assert_eq!((*ptr).refcount.load(Ordering::SeqCst), 2);
            delete_reference(ptr);
            assert_eq!((*ptr).refcount.load(Ordering::SeqCst), 1);
            dealloc(ptr as *mut u8, Layout::new::<ObjectHeader>());
        }
    }

    #[test]
    fn delete_reference_on_null_is_a_no_op() {
        unsafe {
            delete_reference(std::ptr::null_mut());
        }
    }

    #[test]
    fn delete_reference_runs_destructor_at_zero() {
        use std::sync::atomic::AtomicBool;
        static RAN: AtomicBool = AtomicBool::new(false);
        unsafe extern "C" fn mark_destructor(ptr: *mut ObjectHeader) {
            RAN.store(true, Ordering::SeqCst);
            libc::free(ptr as *mut libc::c_void);
        }
        unsafe {
            let layout = Layout::new::<ObjectHeader>();
            let ptr = libc::malloc(layout.size()) as *mut ObjectHeader;
            ptr.write(ObjectHeader::new(mark_destructor));
            delete_reference(ptr);
            assert!(RAN.load(Ordering::SeqCst));
        }
    }
}
