//! Argument marshalling - script argument lists into in/out cell buffers
//!
//! Every native resource allocated while preparing a call belongs to the
//! `ArgumentSet`'s scope and is released when the set drops, unless its
//! ownership was handed on (to the callee or to a result wrapper).

use super::closure::Trampoline;
use super::generic::GenericValue;
use super::marshal::to_native_with;
use super::types::RawCell;
use crate::errors::{BridgeError, Result};
use crate::ffi::memory;
use crate::introspection::{
    CallableDescriptor, Direction, InterfaceInfo, ParamDescriptor, Transfer, TypeDescriptor,
};
use crate::logging::trace;
use crate::runtime::{Runtime, Value};
use core::ffi::{c_char, c_void};
use smallvec::SmallVec;
use std::fmt;
use std::rc::Rc;

/// Owner of the native memory created for one call
#[derive(Default)]
pub struct NativeScope {
    strings: Vec<*mut c_char>,
    blocks: Vec<*mut c_void>,
    generics: Vec<Box<GenericValue>>,
    trampolines: Vec<Trampoline>,
}

impl NativeScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate a string for native code
    ///
    /// With `Transfer::Everything` the callee owns the copy and the scope
    /// forgets it.
    pub fn strdup(&mut self, text: &str, transfer: Transfer) -> Result<*mut c_char> {
        let ptr = memory::strdup(text)?;
        if transfer != Transfer::Everything {
            self.strings.push(ptr);
        }
        Ok(ptr)
    }

    /// NULL-terminated vector of duplicated strings
    ///
    /// `Transfer::Container` hands the vector to the callee but keeps the
    /// strings; `Transfer::Everything` hands over both.
    pub fn strv(&mut self, items: &[&str], transfer: Transfer) -> Result<*mut c_void> {
        let slots = memory::alloc_zeroed((items.len() + 1) * core::mem::size_of::<*mut c_char>())?;
        if transfer == Transfer::Nothing {
            self.blocks.push(slots);
        }
        let vector = slots as *mut *mut c_char;
        for (i, item) in items.iter().enumerate() {
            match self.strdup(item, transfer) {
                Ok(ptr) => unsafe { *vector.add(i) = ptr },
                Err(err) => {
                    match transfer {
                        Transfer::Nothing => {}
                        Transfer::Container => unsafe { memory::free(slots) },
                        Transfer::Everything => unsafe { free_strv(vector) },
                    }
                    return Err(err);
                }
            }
        }
        Ok(slots)
    }

    /// Zero-initialised block owned by the scope until released
    pub fn alloc_block(&mut self, size: usize) -> Result<*mut c_void> {
        let block = memory::alloc_zeroed(size)?;
        self.blocks.push(block);
        Ok(block)
    }

    /// Stop tracking `block`; the caller now owns it
    pub fn release_block(&mut self, block: *mut c_void) -> bool {
        match self.blocks.iter().position(|b| *b == block) {
            Some(index) => {
                self.blocks.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Keep a generic value alive for the call and return its address
    pub fn keep_generic(&mut self, value: GenericValue) -> *mut c_void {
        let mut boxed = Box::new(value);
        let ptr = &mut *boxed as *mut GenericValue as *mut c_void;
        self.generics.push(boxed);
        ptr
    }

    /// Keep a call-scoped trampoline alive until the call completes
    pub fn keep_trampoline(&mut self, trampoline: Trampoline) {
        self.trampolines.push(trampoline);
    }

    #[cfg(test)]
    pub(crate) fn owned_strings(&self) -> usize {
        self.strings.len()
    }

    #[cfg(test)]
    pub(crate) fn owned_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[cfg(test)]
    pub(crate) fn owns_block(&self, block: *mut c_void) -> bool {
        self.blocks.contains(&block)
    }

    #[cfg(test)]
    pub(crate) fn trampoline_count(&self) -> usize {
        self.trampolines.len()
    }
}

unsafe fn free_strv(vector: *mut *mut c_char) {
    let mut cursor = vector;
    while !(*cursor).is_null() {
        libc::free(*cursor as *mut c_void);
        cursor = cursor.add(1);
    }
    libc::free(vector as *mut c_void);
}

impl Drop for NativeScope {
    fn drop(&mut self) {
        if !self.strings.is_empty() || !self.blocks.is_empty() {
            trace!(
                event = "scope_released",
                strings = self.strings.len(),
                blocks = self.blocks.len()
            );
        }
        for ptr in self.strings.drain(..) {
            unsafe { memory::free(ptr as *mut c_void) };
        }
        for block in self.blocks.drain(..) {
            unsafe { memory::free(block) };
        }
    }
}

/// Bookkeeping for one out cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutSlot {
    /// Index of the declared parameter
    pub param: usize,
    /// The cell points at a block the bridge allocated
    pub caller_allocated: bool,
}

/// Prepared cells for a single native call
pub struct ArgumentSet {
    pub(crate) in_cells: SmallVec<[RawCell; 8]>,
    pub(crate) out_cells: SmallVec<[RawCell; 4]>,
    pub(crate) out_slots: SmallVec<[OutSlot; 4]>,
    pub(crate) has_receiver: bool,
    pub(crate) scope: NativeScope,
}

impl ArgumentSet {
    fn new() -> Self {
        Self {
            in_cells: SmallVec::new(),
            out_cells: SmallVec::new(),
            out_slots: SmallVec::new(),
            has_receiver: false,
            scope: NativeScope::new(),
        }
    }

    /// In cells, receiver first for methods
    pub fn in_cells(&self) -> &[RawCell] {
        &self.in_cells
    }

    pub fn out_cells(&self) -> &[RawCell] {
        &self.out_cells
    }

    pub fn out_slots(&self) -> &[OutSlot] {
        &self.out_slots
    }

    pub fn has_receiver(&self) -> bool {
        self.has_receiver
    }

    pub fn scope(&self) -> &NativeScope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut NativeScope {
        &mut self.scope
    }
}

impl fmt::Debug for ArgumentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentSet")
            .field("in_cells", &self.in_cells.len())
            .field("out_cells", &self.out_cells.len())
            .field("out_slots", &self.out_slots)
            .field("has_receiver", &self.has_receiver)
            .finish()
    }
}

/// Build the in/out buffers for calling `callable` with `args`
///
/// `args` holds only the script-visible (IN/INOUT) parameters, in order.
/// On failure everything allocated so far is released.
pub fn prepare(
    rt: &Runtime,
    callable: &Rc<CallableDescriptor>,
    args: &[Value],
    receiver: Option<&Value>,
) -> Result<ArgumentSet> {
    let mut set = ArgumentSet::new();
    let mut ordinal = 0usize;

    for (index, param) in callable.params.iter().enumerate() {
        match param.direction {
            Direction::In | Direction::InOut => {
                let value = args.get(ordinal).cloned().unwrap_or_default();
                ordinal += 1;

                let cell = param_to_native(rt, &value, param, &mut set.scope)
                    .map_err(|err| err.with_argument(&param.name))?;

                if param.direction == Direction::In {
                    set.in_cells.push(cell);
                } else if param.caller_allocates {
                    let size = out_block_size(param).map_err(|err| err.with_argument(&param.name))?;
                    let block = set.scope.alloc_block(size)?;
                    if !cell.is_null() {
                        unsafe {
                            core::ptr::copy_nonoverlapping(cell.ptr as *const u8, block as *mut u8, size);
                        }
                    }
                    set.in_cells.push(RawCell::from_ptr(block));
                    set.out_cells.push(RawCell::from_ptr(block));
                    set.out_slots.push(OutSlot { param: index, caller_allocated: true });
                } else {
                    set.in_cells.push(cell);
                    set.out_cells.push(cell);
                    set.out_slots.push(OutSlot { param: index, caller_allocated: false });
                }
            }
            Direction::Out => {
                if param.caller_allocates {
                    let size = out_block_size(param).map_err(|err| err.with_argument(&param.name))?;
                    let block = set.scope.alloc_block(size)?;
                    set.out_cells.push(RawCell::from_ptr(block));
                    set.out_slots.push(OutSlot { param: index, caller_allocated: true });
                } else {
                    set.out_cells.push(RawCell::null());
                    set.out_slots.push(OutSlot { param: index, caller_allocated: false });
                }
            }
        }
    }

    if callable.is_method() {
        let receiver = receiver.ok_or_else(|| BridgeError::missing_receiver(&callable.qualified_name()))?;
        let ptr = match receiver {
            Value::Object(wrapper) => wrapper.unwrap()?,
            Value::Struct(wrapper) => wrapper.unwrap()?,
            other => {
                return Err(BridgeError::type_mismatch("object", other.type_name()).with_argument("this"))
            }
        };
        set.in_cells.insert(0, RawCell::from_ptr(ptr));
        set.has_receiver = true;
    }

    Ok(set)
}

fn param_to_native(
    rt: &Runtime,
    value: &Value,
    param: &ParamDescriptor,
    scope: &mut NativeScope,
) -> Result<RawCell> {
    if value.is_nullish() {
        if param.nullable || param.ty.is_void() {
            return Ok(RawCell::null());
        }
        return Err(BridgeError::not_nullable(&param.name));
    }
    to_native_with(rt, value, &param.ty, param.transfer, param.scope, scope)
}

/// Declared size of the struct or union a caller-allocated parameter points to
fn out_block_size(param: &ParamDescriptor) -> Result<usize> {
    match &param.ty {
        TypeDescriptor::Interface(InterfaceInfo::Struct(info)) => Ok(info.size),
        TypeDescriptor::Interface(_) => Err(BridgeError::unsupported(format!(
            "type \"{}\" for out caller-allocates Expected a struct or union.",
            param.ty.tag_name()
        ))),
        other => Err(BridgeError::unsupported(format!(
            "type \"{}\" for out caller-allocates",
            other.tag_name()
        ))),
    }
}
