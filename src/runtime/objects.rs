//! Wrappers for native instances and aggregate memory, plus the identity cache
//!
//! One native instance pointer maps to at most one live `ObjectWrapper`.

use crate::errors::{BridgeError, Result};
use crate::ffi::memory;
use crate::introspection::{BoxedFreeFn, ObjectInfo, StructInfo, Transfer};
use crate::logging::{self, trace};
use core::ffi::c_void;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Identity cache: native instance pointer → live wrapper
///
/// Entries are inserted only once a wrapper is fully built and removed when
/// the wrapper drops or its native instance is finalized.
#[derive(Default)]
pub struct ObjectCache {
    entries: RefCell<HashMap<usize, Weak<ObjectWrapper>>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, ptr: *mut c_void) -> Option<Rc<ObjectWrapper>> {
        self.entries
            .borrow()
            .get(&(ptr as usize))
            .and_then(Weak::upgrade)
    }

    fn insert(&self, wrapper: &Rc<ObjectWrapper>) {
        self.entries
            .borrow_mut()
            .insert(wrapper.ptr as usize, Rc::downgrade(wrapper));
    }

    /// Drop the entry for `ptr`, returning the wrapper if it is still alive
    pub fn remove(&self, ptr: *mut c_void) -> Option<Rc<ObjectWrapper>> {
        let removed = self.entries.borrow_mut().remove(&(ptr as usize));
        removed.and_then(|weak| weak.upgrade())
    }

    fn forget(&self, wrapper: *const ObjectWrapper, ptr: *mut c_void) {
        // A dropping wrapper may run while the map is borrowed elsewhere
        if let Ok(mut entries) = self.entries.try_borrow_mut() {
            let stale = entries
                .get(&(ptr as usize))
                .map_or(false, |weak| weak.as_ptr() == wrapper);
            if stale {
                entries.remove(&(ptr as usize));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scripting-side handle for a native instance
pub struct ObjectWrapper {
    ptr: *mut c_void,
    info: Rc<ObjectInfo>,
    cache: Weak<ObjectCache>,
    finalized: Cell<bool>,
}

impl ObjectWrapper {
    /// Wrap `ptr`, reusing the cached wrapper when one is alive
    ///
    /// With `Transfer::Everything` the caller's reference is adopted instead
    /// of taking a new one.
    pub fn wrap(
        cache: &Rc<ObjectCache>,
        ptr: *mut c_void,
        info: &Rc<ObjectInfo>,
        transfer: Transfer,
    ) -> Rc<ObjectWrapper> {
        if let Some(existing) = cache.lookup(ptr) {
            if transfer == Transfer::Everything {
                // The live wrapper already holds its own reference
                if let Some(unref) = info.unref_fn {
                    unsafe { unref(ptr) };
                }
            }
            return existing;
        }

        if transfer != Transfer::Everything {
            if let Some(ref_fn) = info.ref_fn {
                unsafe { ref_fn(ptr) };
            }
        }

        let wrapper = Rc::new(ObjectWrapper {
            ptr,
            info: info.clone(),
            cache: Rc::downgrade(cache),
            finalized: Cell::new(false),
        });
        cache.insert(&wrapper);
        logging::log_wrapper_created(&info.name, ptr);
        wrapper
    }

    /// Native instance pointer, unless the instance was finalized
    pub fn unwrap(&self) -> Result<*mut c_void> {
        if self.finalized.get() {
            return Err(BridgeError::argument(format!(
                "native instance of '{}' was already finalized",
                self.info.qualified_name()
            )));
        }
        Ok(self.ptr)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    pub fn info(&self) -> &Rc<ObjectInfo> {
        &self.info
    }

    pub fn type_name(&self) -> &str {
        &self.info.name
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    pub(crate) fn mark_finalized(&self) {
        self.finalized.set(true);
    }
}

impl Drop for ObjectWrapper {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.forget(self as *const ObjectWrapper, self.ptr);
        }
        if !self.finalized.get() {
            if let Some(unref) = self.info.unref_fn {
                unsafe { unref(self.ptr) };
            }
        }
    }
}

/// Who releases a struct wrapper's memory
#[derive(Clone, Copy)]
pub enum Storage {
    /// C allocator block owned by the wrapper
    Owned,
    /// Boxed copy released with the type's free function
    Boxed(BoxedFreeFn),
}

/// Scripting-side handle for struct, union or boxed memory
pub struct StructWrapper {
    ptr: *mut c_void,
    info: Rc<StructInfo>,
    storage: Storage,
    disposed: Cell<bool>,
}

impl StructWrapper {
    fn build(ptr: *mut c_void, info: &Rc<StructInfo>, storage: Storage) -> Rc<StructWrapper> {
        logging::log_wrapper_created(&info.name, ptr);
        Rc::new(StructWrapper {
            ptr,
            info: info.clone(),
            storage,
            disposed: Cell::new(false),
        })
    }

    /// Copy existing native memory: boxed types through their copy function,
    /// everything else bitwise into a fresh block of the declared size
    pub fn copy_from(info: &Rc<StructInfo>, src: *const c_void) -> Result<Rc<StructWrapper>> {
        if let Some(boxed) = info.boxed {
            let copy = unsafe { (boxed.copy)(src) };
            if copy.is_null() {
                return Err(BridgeError::conversion(format!(
                    "boxed copy of '{}' returned null",
                    info.name
                )));
            }
            return Ok(Self::build(copy, info, Storage::Boxed(boxed.free)));
        }
        let block = memory::alloc_zeroed(info.size)?;
        unsafe {
            core::ptr::copy_nonoverlapping(src as *const u8, block as *mut u8, info.size);
        }
        Ok(Self::build(block, info, Storage::Owned))
    }

    /// Take ownership of a C allocator block (caller-allocated out arguments)
    pub fn adopt(info: &Rc<StructInfo>, ptr: *mut c_void) -> Rc<StructWrapper> {
        Self::build(ptr, info, Storage::Owned)
    }

    /// Take ownership of memory the callee transferred to us
    pub fn adopt_transferred(info: &Rc<StructInfo>, ptr: *mut c_void) -> Rc<StructWrapper> {
        match info.boxed {
            Some(boxed) => Self::build(ptr, info, Storage::Boxed(boxed.free)),
            None => Self::build(ptr, info, Storage::Owned),
        }
    }

    /// Zero-initialised block of the declared size
    pub fn allocate(info: &Rc<StructInfo>) -> Result<Rc<StructWrapper>> {
        let block = memory::alloc_zeroed(info.size)?;
        Ok(Self::build(block, info, Storage::Owned))
    }

    pub fn unwrap(&self) -> Result<*mut c_void> {
        if self.disposed.get() {
            return Err(BridgeError::argument(format!(
                "struct '{}' was already disposed",
                self.info.name
            )));
        }
        Ok(self.ptr)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    pub fn info(&self) -> &Rc<StructInfo> {
        &self.info
    }

    pub fn type_name(&self) -> &str {
        &self.info.name
    }

    pub fn storage(&self) -> Storage {
        self.storage
    }

    /// Read a plain field at `offset`
    ///
    /// # Safety
    /// `offset + size_of::<T>()` must lie inside the declared struct size and
    /// the bytes there must be a valid `T`.
    pub unsafe fn read<T: Copy>(&self, offset: usize) -> T {
        core::ptr::read_unaligned((self.ptr as *const u8).add(offset) as *const T)
    }

    /// Write a plain field at `offset`
    ///
    /// # Safety
    /// Same contract as `read`.
    pub unsafe fn write<T: Copy>(&self, offset: usize, value: T) {
        core::ptr::write_unaligned((self.ptr as *mut u8).add(offset) as *mut T, value)
    }

    /// Release owned memory now; later unwraps fail
    pub fn dispose(&self) {
        if !self.disposed.replace(true) {
            self.release();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn release(&self) {
        trace!(event = "struct_released", type_name = %self.info.name);
        match self.storage {
            Storage::Owned => unsafe { memory::free(self.ptr) },
            Storage::Boxed(free) => unsafe { free(self.ptr) },
        }
    }
}

impl Drop for StructWrapper {
    fn drop(&mut self) {
        if !self.disposed.get() {
            self.release();
        }
    }
}
