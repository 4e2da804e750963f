//! Native error record - the out-of-band failure signal of throwing callables
//!
//! Throwing callables take a trailing `NativeError**`; a non-null value after
//! the call means the return value is meaningless.

use super::memory;
use crate::logging::trace;
use core::ffi::c_char;
use std::ffi::CStr;

/// C-layout error record (domain, code, message)
#[repr(C)]
#[derive(Debug)]
pub struct NativeError {
    pub domain: u32,
    pub code: i32,
    /// NUL-terminated, allocated with the C allocator
    pub message: *mut c_char,
}

impl NativeError {
    /// Allocate a new error record with the C allocator
    ///
    /// Returns null on allocation failure.
    pub fn new(domain: u32, code: i32, message: &str) -> *mut NativeError {
        let message = memory::strdup(message).unwrap_or(core::ptr::null_mut());
        unsafe {
            let err = libc::malloc(core::mem::size_of::<NativeError>()) as *mut NativeError;
            if err.is_null() {
                libc::free(message as *mut _);
                return err;
            }
            err.write(NativeError { domain, code, message });
            err
        }
    }

    /// Store a new error into `dest` unless it already holds one
    ///
    /// # Safety
    /// `dest` must be null or point to a writable `NativeError*` slot.
    pub unsafe fn set(dest: *mut *mut NativeError, domain: u32, code: i32, message: &str) {
        if dest.is_null() || !(*dest).is_null() {
            return;
        }
        *dest = Self::new(domain, code, message);
    }

    /// Release an error record and its message
    ///
    /// # Safety
    /// `err` must be null or a record produced by `new`.
    pub unsafe fn free(err: *mut NativeError) {
        if err.is_null() {
            return;
        }
        libc::free((*err).message as *mut _);
        libc::free(err as *mut _);
    }

    /// Copy the message out and release the record immediately
    ///
    /// # Safety
    /// `err` must be a non-null record produced by `new`.
    pub unsafe fn take_message(err: *mut NativeError) -> String {
        let record = &*err;
        let message = if record.message.is_null() {
            format!("native error (domain {}, code {})", record.domain, record.code)
        } else {
            CStr::from_ptr(record.message).to_string_lossy().into_owned()
        };
        trace!(event = "native_error_freed", domain = record.domain, code = record.code);
        Self::free(err);
        message
    }
}

/// Create a native error record
///
/// # Safety
/// `message` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn gir_bridge_error_new(
    domain: u32,
    code: i32,
    message: *const c_char,
) -> *mut NativeError {
    let text = if message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(message).to_string_lossy().into_owned()
    };
    NativeError::new(domain, code, &text)
}

/// Free a native error record
///
/// # Safety
/// `err` must be null or a record returned by `gir_bridge_error_new`.
#[no_mangle]
pub unsafe extern "C" fn gir_bridge_error_free(err: *mut NativeError) {
    NativeError::free(err);
}
