//! String conversion utilities for VST3 interfaces.
//!
//! VST3 uses a mix of C-strings and wide strings (UTF-16). These utilities
//! handle the conversions safely.

use std::ffi::{c_char, CString};
use vst3::Steinberg::{FUnknown, Vst::TChar};

/// AddRef a COM interface pointer, ignoring null.
///
/// # Safety
///
/// `ptr` must be a valid COM pointer or null.
pub(crate) unsafe fn com_addref<T>(ptr: *mut T) {
    if !ptr.is_null() {
        let unknown = ptr as *mut FUnknown;
        // SAFETY: every COM interface starts with the FUnknown vtable.
        unsafe { ((*(*unknown).vtbl).addRef)(unknown) };
    }
}

/// Release a COM interface pointer, ignoring null.
///
/// # Safety
///
/// `ptr` must be a valid COM pointer or null.
pub(crate) unsafe fn com_release<T>(ptr: *mut T) {
    if !ptr.is_null() {
        let unknown = ptr as *mut FUnknown;
        // SAFETY: every COM interface starts with the FUnknown vtable.
        unsafe { ((*(*unknown).vtbl).release)(unknown) };
    }
}

/// Length of a null-terminated wide string, in code units.
///
/// # Safety
///
/// `src` must point to a null-terminated TChar string.
pub unsafe fn len_wstring(src: *const TChar) -> usize {
    let mut len = 0;
    // SAFETY: the caller guarantees a terminator exists.
    while unsafe { *src.add(len) } != 0 {
        len += 1;
    }
    len
}

/// Copy a Rust string to a C-string buffer.
///
/// Truncates if the string is too long, ensuring null-termination.
pub fn copy_cstring(src: &str, dst: &mut [c_char]) {
    if dst.is_empty() {
        return;
    }

    let c_string = CString::new(src).unwrap_or_else(|_| CString::default());
    let bytes = c_string.as_bytes_with_nul();

    for (src, dst) in bytes.iter().zip(dst.iter_mut()) {
        *dst = *src as c_char;
    }

    // Ensure null-termination if truncated
    if bytes.len() > dst.len() {
        if let Some(last) = dst.last_mut() {
            *last = 0;
        }
    }
}

/// Copy a Rust string to a wide string (UTF-16) buffer.
///
/// Truncates if the string is too long, ensuring null-termination.
pub fn copy_wstring(src: &str, dst: &mut [TChar]) {
    if dst.is_empty() {
        return;
    }

    let mut len = 0;
    for (src_char, dst_char) in src.encode_utf16().zip(dst.iter_mut()) {
        *dst_char = src_char as TChar;
        len += 1;
    }

    // Add null-terminator
    if len < dst.len() {
        dst[len] = 0;
    } else if let Some(last) = dst.last_mut() {
        *last = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_cstring_truncates_with_terminator() {
        let mut buf = [1 as c_char; 4];
        copy_cstring("abcdef", &mut buf);
        assert_eq!(buf[3], 0);
        assert_eq!(buf[0] as u8, b'a');
    }

    #[test]
    fn test_copy_wstring_null_terminates() {
        let mut buf = [1 as TChar; 8];
        copy_wstring("Low", &mut buf);
        assert_eq!(buf[0] as u16, u16::from(b'L'));
        assert_eq!(buf[3], 0);
    }
}
