use super::descriptor::{CallableDescriptor, EnumInfo, InterfaceInfo, ObjectInfo, StructInfo, Symbol};
use super::TypeOracle;
use crate::errors::{BridgeError, Result};
use crate::interop::Library;
use crate::logging;
use core::ffi::c_void;
use std::collections::HashMap;
use std::rc::Rc;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory type repository
///
/// Populated once at startup and then shared read-only with the runtime.
#[derive(Default)]
pub struct Repository {
    callables: HashMap<Key, Rc<CallableDescriptor>>,
    interfaces: HashMap<Key, InterfaceInfo>,
    libraries: Vec<Library>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callable(&mut self, callable: CallableDescriptor) -> Rc<CallableDescriptor> {
        let callable = Rc::new(callable);
        self.callables
            .insert(key(&callable.namespace, &callable.name), callable.clone());
        callable
    }

    pub fn register_object(&mut self, info: ObjectInfo) -> Rc<ObjectInfo> {
        let info = Rc::new(info);
        self.interfaces
            .insert(key(&info.namespace, &info.name), InterfaceInfo::Object(info.clone()));
        info
    }

    pub fn register_struct(&mut self, info: StructInfo) -> Rc<StructInfo> {
        let info = Rc::new(info);
        self.interfaces
            .insert(key(&info.namespace, &info.name), InterfaceInfo::Struct(info.clone()));
        info
    }

    pub fn register_enum(&mut self, info: EnumInfo) -> Rc<EnumInfo> {
        let info = Rc::new(info);
        self.interfaces
            .insert(key(&info.namespace, &info.name), InterfaceInfo::Enum(info.clone()));
        info
    }

    pub fn register_flags(&mut self, info: EnumInfo) -> Rc<EnumInfo> {
        let info = Rc::new(info);
        self.interfaces
            .insert(key(&info.namespace, &info.name), InterfaceInfo::Flags(info.clone()));
        info
    }

    /// Make a loaded library available for symbol-name resolution
    pub fn add_library(&mut self, name: &str, library: Library) {
        logging::log_library_loaded(name);
        self.libraries.push(library);
    }

    pub fn len(&self) -> usize {
        self.callables.len() + self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TypeOracle for Repository {
    fn callable(&self, namespace: &str, name: &str) -> Option<Rc<CallableDescriptor>> {
        self.callables.get(&key(namespace, name)).cloned()
    }

    fn interface(&self, namespace: &str, name: &str) -> Option<InterfaceInfo> {
        self.interfaces.get(&key(namespace, name)).cloned()
    }

    fn resolve_symbol(&self, callable: &CallableDescriptor) -> Result<*const c_void> {
        match &callable.symbol {
            Symbol::Address(address) => Ok(*address as *const c_void),
            Symbol::Name(name) => self
                .libraries
                .iter()
                .find_map(|lib| lib.symbol(name).ok())
                .map(|ptr| ptr as *const c_void)
                .ok_or_else(|| BridgeError::symbol_not_found(name)),
            Symbol::None => Err(BridgeError::symbol_not_found(&callable.qualified_name())),
        }
    }
}
