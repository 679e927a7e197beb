//! The wide (Unicode) string object.
//!
//! Per the ABI table (§6), unicode strings store one 32-bit code point per
//! character (not UTF-8) so native helpers can index code points directly,
//! with a trailing zero code point for C interop.

use std::cmp::Ordering;

use crate::error::RuntimeError;
use crate::header::{add_reference, delete_reference, ObjectHeader};

#[repr(C)]
pub struct UnicodeObject {
    pub header: ObjectHeader,
    /// Length in code points, not bytes.
    pub length: u64,
}

unsafe extern "C" fn unicode_destructor(ptr: *mut ObjectHeader) {
    libc::free(ptr as *mut libc::c_void);
}

fn data_offset() -> usize {
    std::mem::size_of::<UnicodeObject>()
}

/// Allocate a new unicode string from a Rust `&str`, decoding it to code
/// points.
pub fn alloc(text: &str) -> *mut UnicodeObject {
    let chars: Vec<u32> = text.chars().map(|c| c as u32).collect();
    alloc_chars(&chars)
}

/// Allocate directly from a code-point array.
pub fn alloc_chars(chars: &[u32]) -> *mut UnicodeObject {
    let header_size = data_offset();
    let total = header_size + (chars.len() + 1) * 4;
    unsafe {
        let raw = libc::malloc(total) as *mut u8;
        assert!(!raw.is_null(), "allocation failure in ember-runtime unicode::alloc");
        let obj = raw as *mut UnicodeObject;
        obj.write(UnicodeObject { header: ObjectHeader::new(unicode_destructor), length: chars.len() as u64 });
        let dst = raw.add(header_size) as *mut u32;
        std::ptr::copy_nonoverlapping(chars.as_ptr(), dst, chars.len());
        *dst.add(chars.len()) = 0;
        obj
    }
}

/// # Safety
/// `ptr` must point to a live `UnicodeObject` produced by [`alloc`].
pub unsafe fn as_chars<'a>(ptr: *const UnicodeObject) -> &'a [u32] {
    let len = (*ptr).length as usize;
    let base = (ptr as *const u8).add(data_offset()) as *const u32;
    std::slice::from_raw_parts(base, len)
}

/// # Safety
/// `ptr` must point to a live `UnicodeObject`.
pub unsafe fn to_string(ptr: *const UnicodeObject) -> String {
    as_chars(ptr).iter().filter_map(|&c| char::from_u32(c)).collect()
}

/// # Safety
/// Both pointers must point to live `UnicodeObject`s.
pub unsafe fn concat(a: *const UnicodeObject, b: *const UnicodeObject) -> *mut UnicodeObject {
    let mut buf = Vec::with_capacity(as_chars(a).len() + as_chars(b).len());
    buf.extend_from_slice(as_chars(a));
    buf.extend_from_slice(as_chars(b));
    alloc_chars(&buf)
}

/// # Safety
/// Both pointers must point to live `UnicodeObject`s.
pub unsafe fn equals(a: *const UnicodeObject, b: *const UnicodeObject) -> bool {
    as_chars(a) == as_chars(b)
}

/// # Safety
/// Both pointers must point to live `UnicodeObject`s.
pub unsafe fn compare(a: *const UnicodeObject, b: *const UnicodeObject) -> Ordering {
    as_chars(a).cmp(as_chars(b))
}

/// # Safety
/// Both pointers must point to live `UnicodeObject`s.
pub unsafe fn contains(haystack: *const UnicodeObject, needle: *const UnicodeObject) -> bool {
    let h = as_chars(haystack);
    let n = as_chars(needle);
    if n.is_empty() {
        return true;
    }
    h.windows(n.len()).any(|w| w == n)
}

/// # Safety
/// `ptr` must point to a live object whose header is at offset 0.
pub unsafe fn retain(ptr: *mut UnicodeObject) {
    add_reference(ptr as *mut ObjectHeader);
}

/// # Safety
/// `ptr` must point to a live `UnicodeObject`.
pub unsafe fn release(ptr: *mut UnicodeObject) {
    delete_reference(ptr as *mut ObjectHeader);
}

/// Re-exported so callers formatting a unicode string don't need to depend
/// on `ember_runtime::bytes` directly for the specifier grammar.
pub use crate::bytes::{validate_format, FormatArgKind, FormatSpec};

pub fn format_error(msg: impl Into<String>) -> RuntimeError {
    RuntimeError::FormatError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_alloc_and_to_string() {
        let obj = alloc("héllo");
        unsafe {
            assert_eq!(to_string(obj), "héllo");
            assert_eq!(as_chars(obj).len(), 5);
            release(obj);
        }
    }

    #[test]
    fn concat_joins_both_halves() {
        let a = alloc("foo");
        let b = alloc("bar");
        unsafe {
            let c = concat(a, b);
            assert_eq!(to_string(c), "foobar");
            release(a);
            release(b);
            release(c);
        }
    }

    #[test]
    fn contains_is_substring_aware() {
        let h = alloc("hello world");
        let n = alloc("wor");
        unsafe {
            assert!(contains(h, n));
            release(h);
            release(n);
        }
    }
}
