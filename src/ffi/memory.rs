//! C-allocator helpers
//!
//! Everything that may change hands with native code is allocated with the
//! C allocator so either side can release it.

use crate::errors::{BridgeError, Result};
use core::ffi::{c_char, c_void};

#[cfg(test)]
thread_local! {
    static LIVE: core::cell::Cell<isize> = core::cell::Cell::new(0);
}

#[inline]
fn track(_delta: isize) {
    #[cfg(test)]
    LIVE.with(|live| live.set(live.get() + _delta));
}

/// Allocations made here and not yet released through `free`, per thread
#[cfg(test)]
pub(crate) fn live_allocations() -> isize {
    LIVE.with(|live| live.get())
}

/// Duplicate `text` into a NUL-terminated C buffer
pub fn strdup(text: &str) -> Result<*mut c_char> {
    if text.as_bytes().contains(&0) {
        return Err(BridgeError::conversion(
            "string contains an interior NUL byte",
        ));
    }
    let len = text.len();
    unsafe {
        let buf = libc::malloc(len + 1) as *mut u8;
        if buf.is_null() {
            return Err(BridgeError::conversion("out of memory duplicating string"));
        }
        core::ptr::copy_nonoverlapping(text.as_ptr(), buf, len);
        *buf.add(len) = 0;
        track(1);
        Ok(buf as *mut c_char)
    }
}

/// Zero-initialised block of exactly `size` bytes (at least one byte is
/// requested so the result is never a dangling zero-size allocation)
pub fn alloc_zeroed(size: usize) -> Result<*mut c_void> {
    let block = unsafe { libc::calloc(1, size.max(1)) };
    if block.is_null() {
        Err(BridgeError::conversion(format!(
            "out of memory allocating {} bytes",
            size
        )))
    } else {
        track(1);
        Ok(block)
    }
}

/// # Safety
/// `ptr` must be null or owned memory from the C allocator.
pub unsafe fn free(ptr: *mut c_void) {
    if !ptr.is_null() {
        track(-1);
        libc::free(ptr);
    }
}

/// Release memory handed to scripting code by the bridge
///
/// # Safety
/// `ptr` must be null or memory allocated by the bridge.
#[no_mangle]
pub unsafe extern "C" fn gir_bridge_free(ptr: *mut c_void) {
    free(ptr);
}
