//! The byte-string object and its printf-style format validator/formatter.
//!
//! Layout: header, then an 8-byte length, then `length` data bytes, then a
//! trailing NUL (not counted in `length`) so a `BytesObject`'s data can be
//! handed to C APIs without copying.

use std::cmp::Ordering;

use crate::error::RuntimeError;
use crate::header::{add_reference, delete_reference, ObjectHeader};

#[repr(C)]
pub struct BytesObject {
    pub header: ObjectHeader,
    pub length: u64,
}

unsafe extern "C" fn bytes_destructor(ptr: *mut ObjectHeader) {
    libc::free(ptr as *mut libc::c_void);
}

fn data_offset() -> usize {
    std::mem::size_of::<BytesObject>()
}

/// Allocate a new byte string holding a copy of `data`.
pub fn alloc(data: &[u8]) -> *mut BytesObject {
    let header_size = data_offset();
    let total = header_size + data.len() + 1; // + NUL
    unsafe {
        let raw = libc::malloc(total) as *mut u8;
        assert!(!raw.is_null(), "allocation failure in ember-runtime bytes::alloc");
        let obj = raw as *mut BytesObject;
        obj.write(BytesObject { header: ObjectHeader::new(bytes_destructor), length: data.len() as u64 });
        let dst = raw.add(header_size);
        std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        *dst.add(data.len()) = 0;
        obj
    }
}

/// # Safety
/// `ptr` must point to a live `BytesObject` produced by [`alloc`].
pub unsafe fn as_slice<'a>(ptr: *const BytesObject) -> &'a [u8] {
    let len = (*ptr).length as usize;
    let base = (ptr as *const u8).add(data_offset());
    std::slice::from_raw_parts(base, len)
}

/// # Safety
/// Both pointers must point to live `BytesObject`s.
pub unsafe fn concat(a: *const BytesObject, b: *const BytesObject) -> *mut BytesObject {
    let mut buf = Vec::with_capacity((*a).length as usize + (*b).length as usize);
    buf.extend_from_slice(as_slice(a));
    buf.extend_from_slice(as_slice(b));
    alloc(&buf)
}

/// Length-then-memcmp equality, per the spec's string equality rule.
///
/// # Safety
/// Both pointers must point to live `BytesObject`s.
pub unsafe fn equals(a: *const BytesObject, b: *const BytesObject) -> bool {
    as_slice(a) == as_slice(b)
}

/// Lexicographic ordering.
///
/// # Safety
/// Both pointers must point to live `BytesObject`s.
pub unsafe fn compare(a: *const BytesObject, b: *const BytesObject) -> Ordering {
    as_slice(a).cmp(as_slice(b))
}

/// Substring containment.
///
/// # Safety
/// Both pointers must point to live `BytesObject`s.
pub unsafe fn contains(haystack: *const BytesObject, needle: *const BytesObject) -> bool {
    let h = as_slice(haystack);
    let n = as_slice(needle);
    if n.is_empty() {
        return true;
    }
    h.windows(n.len()).any(|w| w == n)
}

/// # Safety
/// `ptr` must point to a live `ObjectHeader`-prefixed object (any type).
pub unsafe fn retain(ptr: *mut BytesObject) {
    add_reference(ptr as *mut ObjectHeader);
}

/// # Safety
/// `ptr` must point to a live `BytesObject`.
pub unsafe fn release(ptr: *mut BytesObject) {
    delete_reference(ptr as *mut ObjectHeader);
}

/// One `%`-specifier in a format string, with the argument type it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSpec {
    Int,
    Float,
    Str,
    Repr,
    Percent,
}

/// The type tags `validate_format` checks specifiers against — mirrors
/// `ember_compiler::value::TypeTag` without creating a dependency cycle
/// between the two crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArgKind {
    Int,
    Float,
    Bytes,
    Unicode,
    Other,
}

/// Parse `fmt` into its specifier sequence, checked against `arg_kinds` in
/// order. Called by the compiler at compile time so a format mismatch is a
/// compile error rather than a runtime crash.
pub fn validate_format(fmt: &[u8], arg_kinds: &[FormatArgKind]) -> Result<Vec<FormatSpec>, RuntimeError> {
    let mut specs = Vec::new();
    let mut arg_idx = 0;
    let mut i = 0;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            i += 1;
            continue;
        }
        i += 1;
        let Some(&c) = fmt.get(i) else {
            return Err(RuntimeError::FormatError("dangling '%' at end of format string".into()));
        };
        let spec = match c {
            b'%' => {
                i += 1;
                specs.push(FormatSpec::Percent);
                continue;
            }
            b'd' | b'i' => FormatSpec::Int,
            b'f' => FormatSpec::Float,
            b's' => FormatSpec::Str,
            b'r' => FormatSpec::Repr,
            other => {
                return Err(RuntimeError::FormatError(format!("unknown format specifier '%{}'", other as char)))
            }
        };
        i += 1;

        let expected = match spec {
            FormatSpec::Int => FormatArgKind::Int,
            FormatSpec::Float => FormatArgKind::Float,
            FormatSpec::Str | FormatSpec::Repr => {
                specs.push(spec);
                arg_idx += 1;
                continue;
            }
            FormatSpec::Percent => unreachable!(),
        };
        let got = arg_kinds.get(arg_idx).ok_or_else(|| {
            RuntimeError::FormatError(format!("format string expects an argument at position {arg_idx}"))
        })?;
        if *got != expected {
            return Err(RuntimeError::FormatError(format!(
                "format specifier at argument {arg_idx} expects {expected:?}, got {got:?}"
            )));
        }
        specs.push(spec);
        arg_idx += 1;
    }
    if arg_idx != arg_kinds.len() {
        return Err(RuntimeError::FormatError(format!(
            "format string consumes {arg_idx} arguments but {} were given",
            arg_kinds.len()
        )));
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_alloc_and_as_slice() {
        let obj = alloc(b"hello");
        unsafe {
            assert_eq!(as_slice(obj), b"hello");
            release(obj);
        }
    }

    #[test]
    fn concat_joins_both_halves() {
        let a = alloc(b"foo");
        let b = alloc(b"bar");
        unsafe {
            let c = concat(a, b);
            assert_eq!(as_slice(c), b"foobar");
            release(a);
            release(b);
            release(c);
        }
    }

    #[test]
    fn compare_is_lexicographic() {
        let a = alloc(b"abc");
        let b = alloc(b"abd");
        unsafe {
            assert_eq!(compare(a, b), Ordering::Less);
            release(a);
            release(b);
        }
    }

    #[test]
    fn contains_finds_substring() {
        let h = alloc(b"hello world");
        let n = alloc(b"wor");
        unsafe {
            assert!(contains(h, n));
            release(h);
            release(n);
        }
    }

    #[test]
    fn validate_format_accepts_matching_types() {
        let specs = validate_format(b"%d and %s", &[FormatArgKind::Int, FormatArgKind::Bytes]).unwrap();
        assert_eq!(specs, vec![FormatSpec::Int, FormatSpec::Str]);
    }

    #[test]
    fn validate_format_rejects_type_mismatch() {
        let err = validate_format(b"%d", &[FormatArgKind::Float]);
        assert!(err.is_err());
    }

    #[test]
    fn validate_format_rejects_arity_mismatch() {
        let err = validate_format(b"%d", &[]);
        assert!(err.is_err());
    }
}
