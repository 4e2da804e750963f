//! Scripting-side runtime - values, wrappers and the call entry points
//!
//! The runtime is single-threaded. Every `RefCell` borrow is released before
//! control passes into native code or a script function, so callbacks can
//! re-enter the runtime at any depth.

mod function;
mod objects;
mod value;

pub use objects::{ObjectCache, ObjectWrapper, Storage, StructWrapper};
pub use value::{ScriptFunction, Value};

use crate::config::{BridgeConfig, OverflowPolicy};
use crate::errors::{BridgeError, Result};
use crate::interop::{self, InteropStats, Trampoline};
use crate::introspection::{CallableDescriptor, ObjectInfo, StructInfo, Transfer, TypeOracle};
use crate::logging;
use core::ffi::c_void;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

struct RuntimeInner {
    oracle: Rc<dyn TypeOracle>,
    config: BridgeConfig,
    objects: Rc<ObjectCache>,
    pending_error: RefCell<Option<BridgeError>>,
    retained: RefCell<Vec<Trampoline>>,
    stats: Cell<InteropStats>,
}

/// Handle to the bridge runtime; clones share state
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

/// Non-owning runtime handle held by trampolines
#[derive(Clone)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl Runtime {
    pub fn new(oracle: Rc<dyn TypeOracle>) -> Self {
        Self::with_config(oracle, BridgeConfig::default())
    }

    pub fn with_config(oracle: Rc<dyn TypeOracle>, config: BridgeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                oracle,
                config,
                objects: Rc::new(ObjectCache::new()),
                pending_error: RefCell::new(None),
                retained: RefCell::new(Vec::new()),
                stats: Cell::new(InteropStats::default()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn oracle(&self) -> &Rc<dyn TypeOracle> {
        &self.inner.oracle
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.inner.config.marshal.numeric_overflow
    }

    pub fn objects(&self) -> &Rc<ObjectCache> {
        &self.inner.objects
    }

    pub fn stats(&self) -> InteropStats {
        self.inner.stats.get()
    }

    fn bump(&self, update: impl FnOnce(&mut InteropStats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }

    pub(crate) fn record_callback(&self) {
        self.bump(|s| s.callbacks_invoked += 1);
    }

    /// Call a native callable with script arguments
    ///
    /// prepare → resolve → invoke → callback errors → native error → assemble.
    /// Nothing is retried.
    pub fn call(
        &self,
        callable: &Rc<CallableDescriptor>,
        args: &[Value],
        receiver: Option<&Value>,
    ) -> Result<Value> {
        let name = callable.qualified_name();
        let _span = logging::debug_span!("native_call", callable = %name).entered();
        let _perf = logging::perf::track(&name);

        let mut set = match interop::prepare(self, callable, args, receiver) {
            Ok(set) => set,
            Err(err) => {
                self.bump(|s| s.marshaling_errors += 1);
                logging::log_marshal_error(&name, &err.to_string());
                return Err(err);
            }
        };

        let entry = self.inner.oracle.resolve_symbol(callable)?;

        // Errors raised by callbacks during this call, not an enclosing one
        let outer = self.inner.pending_error.take();
        let invocation = interop::invoke(entry, callable, &mut set);
        let raised = self.inner.pending_error.replace(outer);
        let invocation = invocation?;
        self.bump(|s| s.calls_made += 1);

        if let Some(err) = raised {
            return Err(err);
        }
        if let Some(message) = invocation.error {
            self.bump(|s| s.native_errors += 1);
            logging::log_native_error(&name, &message);
            return Err(BridgeError::native(message));
        }

        interop::assemble_result(self, callable, &mut set, invocation.return_value)
    }

    /// Record a failure that has no direct way back to the caller
    ///
    /// The first error wins until it is taken.
    pub fn raise(&self, err: BridgeError) {
        let mut pending = self.inner.pending_error.borrow_mut();
        if pending.is_none() {
            *pending = Some(err);
        }
    }

    pub fn take_pending_error(&self) -> Option<BridgeError> {
        self.inner.pending_error.take()
    }

    /// Keep a trampoline alive for the life of the runtime
    pub fn retain_trampoline(&self, trampoline: Trampoline) {
        self.inner.retained.borrow_mut().push(trampoline);
    }

    pub fn retained_trampolines(&self) -> usize {
        self.inner.retained.borrow().len()
    }

    /// Identity-preserving object wrapper for `ptr`
    pub fn wrap_object(&self, ptr: *mut c_void, info: &Rc<ObjectInfo>, transfer: Transfer) -> Value {
        if ptr.is_null() {
            return Value::Null;
        }
        let fresh = self.inner.objects.lookup(ptr).is_none();
        let wrapper = ObjectWrapper::wrap(&self.inner.objects, ptr, info, transfer);
        if fresh {
            self.bump(|s| s.wrappers_created += 1);
        }
        Value::Object(wrapper)
    }

    /// Struct wrapper for native memory: adopted when ownership was
    /// transferred, copied otherwise
    pub fn wrap_struct(&self, ptr: *mut c_void, info: &Rc<StructInfo>, transfer: Transfer) -> Result<Value> {
        if ptr.is_null() {
            return Ok(Value::Null);
        }
        let wrapper = if transfer == Transfer::Everything {
            StructWrapper::adopt_transferred(info, ptr)
        } else {
            StructWrapper::copy_from(info, ptr)?
        };
        self.bump(|s| s.wrappers_created += 1);
        Ok(Value::Struct(wrapper))
    }

    /// Struct wrapper owning a block the bridge allocated
    pub(crate) fn adopt_struct(&self, block: *mut c_void, info: &Rc<StructInfo>) -> Value {
        self.bump(|s| s.wrappers_created += 1);
        Value::Struct(StructWrapper::adopt(info, block))
    }

    /// The native instance behind `ptr` is gone
    ///
    /// Drops the cache entry; a wrapper still held by scripts can no longer
    /// be passed to native code.
    pub fn instance_finalized(&self, ptr: *mut c_void) {
        if let Some(wrapper) = self.inner.objects.remove(ptr) {
            wrapper.mark_finalized();
            logging::trace!(event = "instance_finalized", address = ?ptr);
        }
    }
}
