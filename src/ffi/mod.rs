//! C FFI - stable ABI shared with native libraries
//!
//! Design: everything native code may free or construct lives here:
//! 1. Error records for throwing callables
//! 2. C-allocator helpers for strings and caller-allocated blocks

mod error;
pub mod memory;

pub use error::{gir_bridge_error_free, gir_bridge_error_new, NativeError};
pub use memory::gir_bridge_free;

use crate::logging::debug;

/// Initialize logging from the environment (safe to call repeatedly)
#[no_mangle]
pub extern "C" fn gir_bridge_init() {
    crate::init();
    debug!("gir-bridge ready for native callers");
}
