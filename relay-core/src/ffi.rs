//! C ABI for linking relay-core as a static library from native hosts (iOS, Android NDK).
//! Covers the pieces a host needs on its side of the bridge: the gate, URL tagging
//! and marker recovery. Strings are NUL-terminated UTF-8 in, raw bytes out (no NUL).

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use crate::gate::should_intercept;
use crate::id::CorrelationId;
use crate::protocol::{DEFAULT_MARKER_NAME, PROTOCOL_VERSION};
use crate::url;

/// Returns the relay payload version. Also keeps a C symbol in the staticlib.
#[no_mangle]
pub extern "C" fn relay_core_version() -> u8 {
    PROTOCOL_VERSION
}

/// Borrow a C string as UTF-8. None if null or not UTF-8.
unsafe fn c_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

/// Copy `s` into `out_buf`. Returns bytes written, or -1 if the buffer is null or too small.
fn write_out(s: &str, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || s.len() > out_buf_len || s.len() > c_int::MAX as usize {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(s.as_ptr(), s.len());
    }
    s.len() as c_int
}

/// Gate decision for (url, method). Returns 1 to intercept, 0 to pass through, -1 on bad input.
#[no_mangle]
pub extern "C" fn relay_core_should_intercept(
    url: *const c_char,
    method: *const c_char,
    enabled: c_int,
) -> c_int {
    let (Some(url), Some(method)) = (unsafe { c_str(url) }, unsafe { c_str(method) }) else {
        return -1;
    };
    should_intercept(url, method, enabled != 0) as c_int
}

/// Query-tag `url` with `marker=<id>`. `base` and `marker` may be null (no base;
/// default marker). Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn relay_core_tag_query(
    url: *const c_char,
    base: *const c_char,
    marker: *const c_char,
    id: *const c_char,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(url) = (unsafe { c_str(url) }) else {
        return -1;
    };
    let Some(id) = unsafe { c_str(id) }.and_then(CorrelationId::parse) else {
        return -1;
    };
    let base = unsafe { c_str(base) };
    let marker = unsafe { c_str(marker) }.unwrap_or(DEFAULT_MARKER_NAME);
    write_out(&url::encode_query(url, base, marker, &id), out_buf, out_buf_len)
}

/// Fragment-tag `url` with `^^^^<id>^^^^`. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn relay_core_tag_fragment(
    url: *const c_char,
    id: *const c_char,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(url) = (unsafe { c_str(url) }) else {
        return -1;
    };
    let Some(id) = unsafe { c_str(id) }.and_then(CorrelationId::parse) else {
        return -1;
    };
    write_out(&url::encode_fragment(url, &id), out_buf, out_buf_len)
}

/// Recover the correlation id from a tagged URL (query marker first, then fragment).
/// Returns bytes written, 0 when the URL carries no marker, or -1 on error.
#[no_mangle]
pub extern "C" fn relay_core_extract_request_id(
    url: *const c_char,
    marker: *const c_char,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(url) = (unsafe { c_str(url) }) else {
        return -1;
    };
    let marker = unsafe { c_str(marker) }.unwrap_or(DEFAULT_MARKER_NAME);
    match url::extract_query_id(url, marker).or_else(|| url::extract_fragment_id(url)) {
        Some(id) => write_out(id.as_str(), out_buf, out_buf_len),
        None => 0,
    }
}

/// URL with both markers removed, as the page originally wrote it.
/// Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn relay_core_strip_markers(
    url: *const c_char,
    marker: *const c_char,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(url) = (unsafe { c_str(url) }) else {
        return -1;
    };
    let marker = unsafe { c_str(marker) }.unwrap_or(DEFAULT_MARKER_NAME);
    let stripped = url::strip_fragment_marker(&url::strip_query_marker(url, marker));
    write_out(&stripped, out_buf, out_buf_len)
}
