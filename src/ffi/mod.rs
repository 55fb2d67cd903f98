//! C-side types and string ownership helpers for the desktop ABI.

use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;
use std::ptr;

/// Log sink installed by the host through `V2RaySetLogSink`.
#[repr(C)]
pub struct V2RayLogSink {
    pub log: Option<
        unsafe extern "C" fn(
            level: *const c_char,
            message: *const c_char,
            breadcrumbs: u32,
            context: *mut c_void,
        ),
    >,
    pub context: *mut c_void,
    pub enabled_breadcrumbs: u32,
}

/// Borrows a host string. Null reads as empty; invalid UTF-8 is replaced.
///
/// # Safety
/// `value` must be null or point to a NUL-terminated string that stays
/// valid for the returned lifetime.
pub unsafe fn read_str<'a>(value: *const c_char) -> Cow<'a, str> {
    if value.is_null() {
        return Cow::Borrowed("");
    }
    unsafe { CStr::from_ptr(value) }.to_string_lossy()
}

/// Borrows a host file path. Null reads as empty. On unix the bytes are kept
/// as-is so names that are not UTF-8 still open.
///
/// # Safety
/// Same contract as [`read_str`].
pub unsafe fn read_path<'a>(value: *const c_char) -> Cow<'a, Path> {
    if value.is_null() {
        return Cow::Borrowed(Path::new(""));
    }
    let bytes = unsafe { CStr::from_ptr(value) }.to_bytes();
    #[cfg(unix)]
    {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        Cow::Borrowed(Path::new(OsStr::from_bytes(bytes)))
    }
    #[cfg(not(unix))]
    {
        match String::from_utf8_lossy(bytes) {
            Cow::Borrowed(text) => Cow::Borrowed(Path::new(text)),
            Cow::Owned(text) => Cow::Owned(text.into()),
        }
    }
}

/// Hands a reply to the host. The caller owns the allocation and must
/// release it with `FreeString`.
pub fn into_c_string(value: impl Into<Vec<u8>>) -> *mut c_char {
    let mut bytes = value.into();
    bytes.retain(|byte| *byte != 0);
    match CString::new(bytes) {
        Ok(text) => text.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Reclaims a string produced by [`into_c_string`].
///
/// # Safety
/// `value` must be null or a pointer returned by [`into_c_string`] that has
/// not been released yet.
pub unsafe fn release(value: *mut c_char) {
    if !value.is_null() {
        drop(unsafe { CString::from_raw(value) });
    }
}
