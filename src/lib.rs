//! gir-bridge - dynamic foreign-function bridge between a scripting value
//! model and native C callables described by introspection metadata
//!
//! Architecture:
//! - `introspection` - type and callable descriptors, the type oracle
//! - `interop` - value conversion, argument marshalling, invocation, trampolines
//! - `runtime` - script values, object/struct wrappers, call entry points
//! - `ffi` - C ABI surface (error records, allocator helpers)

pub mod config;
pub mod errors;
pub mod ffi;
pub mod interop;
pub mod introspection;
pub mod logging;
pub mod runtime;

// Re-export commonly used items
pub use config::{BridgeConfig, OverflowPolicy};
pub use errors::{BridgeError, ErrorCategory, ErrorKind, Result};
pub use interop::{GenericValue, InteropStats, RawCell, SignalClosure, Trampoline, ValueType};
pub use introspection::{
    CallableDescriptor, InterfaceInfo, ParamDescriptor, Repository, Transfer, TypeDescriptor,
    TypeOracle,
};
pub use runtime::{Runtime, ScriptFunction, Value};

/// Initialize logging from the environment
pub fn init() {
    logging::init();
}

/// Initialize logging from the `[logging]` section of a loaded configuration
pub fn init_with(config: &BridgeConfig) {
    logging::init_with_config(logging::LogConfig::from(&config.logging));
}
