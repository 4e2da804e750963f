//! Introspection metadata - descriptors and the read-only type oracle
//!
//! Architecture:
//! - `descriptor.rs` - TypeDescriptor, InterfaceInfo, CallableDescriptor
//! - `repository.rs` - In-memory oracle populated by embedders

mod descriptor;
mod repository;

pub use descriptor::{
    ArrayKind, BoxedCopyFn, BoxedFreeFn, BoxedFuncs, CallableDescriptor, CallableKind,
    CallbackScope, Direction, EnumInfo, InterfaceInfo, ObjectInfo, ParamDescriptor, RefFn,
    StructInfo, StructKind, Symbol, Transfer, TypeDescriptor, UnrefFn,
};
pub use repository::Repository;

use crate::errors::Result;
use core::ffi::c_void;
use std::rc::Rc;

/// Read-only source of type metadata
pub trait TypeOracle {
    /// Look up a free function or constructor by namespace and name
    fn callable(&self, namespace: &str, name: &str) -> Option<Rc<CallableDescriptor>>;

    /// Look up a registered object, struct, enum or flags type
    fn interface(&self, namespace: &str, name: &str) -> Option<InterfaceInfo>;

    /// Signal signature declared on `object` or one of its ancestors
    fn find_signal(&self, object: &ObjectInfo, name: &str) -> Option<Rc<CallableDescriptor>> {
        object.find_signal(name)
    }

    /// Native entry point of a callable
    fn resolve_symbol(&self, callable: &CallableDescriptor) -> Result<*const c_void>;
}
