//! Interoperability - marshalling, native invocation and callbacks
//!
//! Design: every native value crosses the boundary as an untagged `RawCell`
//! interpreted through a `TypeDescriptor`.
//!
//! Architecture:
//! - `types.rs` - RawCell and the libffi type mapping
//! - `marshal.rs` - script value ↔ raw cell conversions
//! - `generic.rs` - self-describing generic values
//! - `arguments.rs` - in/out buffers and their native memory
//! - `call.rs` - native invocation and result assembly
//! - `closure.rs` - callback trampolines
//! - `signal.rs` - signal closures
//! - `library.rs` - dynamic library loading (dlopen)

mod arguments;
mod call;
mod closure;
mod generic;
mod library;
mod marshal;
mod signal;
mod types;

pub use arguments::{prepare, ArgumentSet, NativeScope, OutSlot};
pub use call::{assemble_result, invoke, Invocation};
pub use closure::{ClosureBinding, Trampoline};
pub use generic::{from_generic, guess_type, to_generic, GenericValue, ValueType};
pub use library::{Library, LoadError, SymbolError};
pub use marshal::{from_native, to_native, to_native_with};
pub use signal::SignalClosure;
pub use types::{abi_kind, ffi_type, AbiKind, RawCell};

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteropStats {
    pub calls_made: usize,
    pub marshaling_errors: usize,
    pub native_errors: usize,
    pub callbacks_invoked: usize,
    pub wrappers_created: usize,
}

#[cfg(test)]
mod tests;
