//! The common-objects table: a process-wide, `once_cell`-backed singleton of
//! native helper addresses that compiled code reaches through the reserved
//! common-objects-base register, plus the preallocated `MemoryError`
//! instance allocator exhaustion raises.
//!
//! Every field is a plain C-ABI function pointer (or, for `memory_error`, a
//! data pointer) so the compiler can embed its address directly as an
//! absolute patch rather than emitting a call through Rust's dispatch.

use once_cell::sync::OnceCell;

use crate::bytes::BytesObject;
use crate::dict::DictObject;
use crate::header::{add_reference, delete_reference, free_destructor, ObjectHeader};
use crate::instance::InstanceObject;
use crate::list::ListObject;
use crate::unicode::UnicodeObject;

unsafe extern "C" fn helper_malloc(size: usize) -> *mut libc::c_void {
    libc::malloc(size)
}

unsafe extern "C" fn helper_free(ptr: *mut libc::c_void) {
    libc::free(ptr)
}

unsafe extern "C" fn helper_bytes_concat(a: *const BytesObject, b: *const BytesObject) -> *mut BytesObject {
    crate::bytes::concat(a, b)
}

unsafe extern "C" fn helper_unicode_concat(a: *const UnicodeObject, b: *const UnicodeObject) -> *mut UnicodeObject {
    crate::unicode::concat(a, b)
}

unsafe extern "C" fn helper_list_push(list: *mut ListObject, value: u64) {
    crate::list::push(list, value)
}

unsafe extern "C" fn helper_list_alloc(items_are_objects: bool) -> *mut ListObject {
    crate::list::alloc(items_are_objects)
}

unsafe extern "C" fn helper_list_get(list: *const ListObject, index: u64) -> u64 {
    crate::list::get(list, index as usize)
}

unsafe extern "C" fn helper_list_set(list: *mut ListObject, index: u64, value: u64) {
    crate::list::set(list, index as usize, value)
}

unsafe extern "C" fn helper_list_len(list: *const ListObject) -> u64 {
    crate::list::len(list) as u64
}

unsafe extern "C" fn helper_instance_alloc(class_id: u64, attr_count: u64, destructor: crate::header::Destructor) -> *mut InstanceObject {
    crate::instance::alloc(class_id, attr_count as usize, destructor)
}

unsafe extern "C" fn helper_instance_get_attr(instance: *const InstanceObject, index: u64) -> u64 {
    crate::instance::get_attr(instance, index as usize)
}

unsafe extern "C" fn helper_instance_set_attr(instance: *mut InstanceObject, index: u64, value: u64) {
    crate::instance::set_attr(instance, index as usize, value)
}

unsafe extern "C" fn helper_dict_insert(dict: *mut DictObject, key: *const u8, key_len: u64, value: u64, value_is_object: bool) {
    let key = std::slice::from_raw_parts(key, key_len as usize);
    crate::dict::insert(dict, key, value, value_is_object)
}

/// Well-known helper addresses compiled code reaches through the
/// common-objects-base register.
#[repr(C)]
pub struct CommonObjects {
    pub malloc: unsafe extern "C" fn(usize) -> *mut libc::c_void,
    pub free: unsafe extern "C" fn(*mut libc::c_void),
    pub add_reference: unsafe extern "C" fn(*mut ObjectHeader),
    pub delete_reference: unsafe extern "C" fn(*mut ObjectHeader),
    pub free_destructor: unsafe extern "C" fn(*mut ObjectHeader),
    pub bytes_concat: unsafe extern "C" fn(*const BytesObject, *const BytesObject) -> *mut BytesObject,
    pub unicode_concat: unsafe extern "C" fn(*const UnicodeObject, *const UnicodeObject) -> *mut UnicodeObject,
    pub list_push: unsafe extern "C" fn(*mut ListObject, u64),
    pub list_alloc: unsafe extern "C" fn(bool) -> *mut ListObject,
    pub list_get: unsafe extern "C" fn(*const ListObject, u64) -> u64,
    pub list_set: unsafe extern "C" fn(*mut ListObject, u64, u64),
    pub list_len: unsafe extern "C" fn(*const ListObject) -> u64,
    pub instance_alloc: unsafe extern "C" fn(u64, u64, crate::header::Destructor) -> *mut InstanceObject,
    pub instance_get_attr: unsafe extern "C" fn(*const InstanceObject, u64) -> u64,
    pub instance_set_attr: unsafe extern "C" fn(*mut InstanceObject, u64, u64),
    pub dict_insert: unsafe extern "C" fn(*mut DictObject, *const u8, u64, u64, bool),
    /// The singleton `MemoryError` instance, biased so it's never freed.
    pub memory_error: *mut InstanceObject,
}

unsafe impl Sync for CommonObjects {}

unsafe extern "C" fn memory_error_destructor(_ptr: *mut ObjectHeader) {
    // Never actually called: the singleton's refcount is biased so it never
    // reaches zero through normal delete_reference traffic.
}

static COMMON_OBJECTS: OnceCell<CommonObjects> = OnceCell::new();

fn build() -> CommonObjects {
    // class_id 0 is reserved for MemoryError; the real class table lives in
    // ember-compiler, which is told to treat 0 specially.
    let memory_error = crate::instance::alloc(0, 0, memory_error_destructor);
    unsafe {
        // Bias the refcount so ordinary delete_reference traffic against a
        // caught-and-dropped MemoryError never triggers its destructor.
        add_reference(memory_error as *mut ObjectHeader);
    }
    CommonObjects {
        malloc: helper_malloc,
        free: helper_free,
        add_reference,
        delete_reference,
        free_destructor,
        bytes_concat: helper_bytes_concat,
        unicode_concat: helper_unicode_concat,
        list_push: helper_list_push,
        list_alloc: helper_list_alloc,
        list_get: helper_list_get,
        list_set: helper_list_set,
        list_len: helper_list_len,
        instance_alloc: helper_instance_alloc,
        instance_get_attr: helper_instance_get_attr,
        instance_set_attr: helper_instance_set_attr,
        dict_insert: helper_dict_insert,
        memory_error,
    }
}

/// The process-wide table, built on first access.
pub fn common_objects() -> &'static CommonObjects {
    COMMON_OBJECTS.get_or_init(build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_a_stable_singleton() {
        let a = common_objects() as *const CommonObjects;
        let b = common_objects() as *const CommonObjects;
        assert_eq!(a, b);
    }

    #[test]
    fn memory_error_refcount_is_biased_above_one() {
        let table = common_objects();
        unsafe {
            let header = table.memory_error as *mut ObjectHeader;
            assert!((*header).refcount.load(std::sync::atomic::Ordering::SeqCst) >= 2);
        }
    }
}
