//! Native invocation and return-value assembly
//!
//! ABI convention for a prepared call:
//! 1. Receiver pointer (methods only)
//! 2. Declared parameters in order: IN by value, OUT/INOUT by pointer
//!    (caller-allocated blocks are passed as the block itself)
//! 3. Trailing `NativeError**` for throwing callables

use super::arguments::ArgumentSet;
use super::marshal::from_native;
use super::types::{ffi_type, RawCell};
use crate::errors::{BridgeError, Result};
use crate::ffi::NativeError;
use crate::introspection::{CallableDescriptor, Direction, InterfaceInfo, ParamDescriptor, TypeDescriptor};
use crate::logging;
use crate::runtime::{Runtime, Value};
use core::ffi::c_void;
use libffi::middle::{Arg, Cif, CodePtr, Type};
use smallvec::SmallVec;

/// Outcome of a native call
#[derive(Debug)]
pub struct Invocation {
    /// Raw return value; meaningless when `error` is set
    pub return_value: RawCell,
    /// Message of the native error signal, already released
    pub error: Option<String>,
}

/// Call `entry` with the prepared cells
///
/// Out cells are written in place. The call is made exactly once.
pub fn invoke(
    entry: *const c_void,
    callable: &CallableDescriptor,
    set: &mut ArgumentSet,
) -> Result<Invocation> {
    if entry.is_null() {
        return Err(BridgeError::symbol_not_found(&callable.qualified_name()));
    }

    logging::log_native_call(
        &callable.qualified_name(),
        set.in_cells.len(),
        set.out_cells.len(),
    );

    // Addresses the callee writes through; stable for the whole call
    let out_base = set.out_cells.as_mut_ptr();
    let out_ptrs: SmallVec<[*mut c_void; 4]> = set
        .out_slots
        .iter()
        .enumerate()
        .map(|(i, slot)| unsafe {
            if slot.caller_allocated {
                (*out_base.add(i)).ptr
            } else {
                out_base.add(i) as *mut c_void
            }
        })
        .collect();

    let mut error: *mut NativeError = core::ptr::null_mut();
    let error_slot: *mut *mut NativeError = &mut error;

    let capacity = set.in_cells.len() + set.out_cells.len() + 1;
    let mut arg_types: Vec<Type> = Vec::with_capacity(capacity);
    let mut args: Vec<Arg> = Vec::with_capacity(capacity);

    let mut in_cursor = 0;
    if set.has_receiver {
        arg_types.push(Type::pointer());
        args.push(Arg::new(&set.in_cells[0]));
        in_cursor = 1;
    }

    let mut out_cursor = 0;
    for param in &callable.params {
        match param.direction {
            Direction::In => {
                arg_types.push(ffi_type(&param.ty));
                args.push(Arg::new(&set.in_cells[in_cursor]));
                in_cursor += 1;
            }
            Direction::Out | Direction::InOut => {
                if param.direction == Direction::InOut {
                    in_cursor += 1;
                }
                arg_types.push(Type::pointer());
                args.push(Arg::new(&out_ptrs[out_cursor]));
                out_cursor += 1;
            }
        }
    }

    if callable.can_throw {
        arg_types.push(Type::pointer());
        args.push(Arg::new(&error_slot));
    }

    let cif = Cif::new(arg_types, ffi_type(&callable.return_type));
    let code = CodePtr::from_ptr(entry);

    let return_value = unsafe {
        if callable.return_type.is_void() {
            cif.call::<()>(code, &args);
            RawCell::zeroed()
        } else {
            cif.call::<RawCell>(code, &args)
                .narrow_return(&callable.return_type)
        }
    };

    logging::log_native_return(&callable.qualified_name());

    let error = if error.is_null() {
        None
    } else {
        Some(unsafe { NativeError::take_message(error) })
    };

    Ok(Invocation { return_value, error })
}

/// Shape the script-visible result of a call
///
/// Nothing, a bare value, or an array: the return value first (unless
/// skipped), then every OUT/INOUT value in declaration order.
pub fn assemble_result(
    rt: &Runtime,
    callable: &CallableDescriptor,
    set: &mut ArgumentSet,
    return_value: RawCell,
) -> Result<Value> {
    let skip_return = callable.skip_return || callable.return_type.is_void();
    let count = usize::from(!skip_return) + set.out_cells.len();
    if count == 0 {
        return Ok(Value::Undefined);
    }

    let mut values = Vec::with_capacity(count);
    if !skip_return {
        values.push(from_native(
            rt,
            return_value,
            &callable.return_type,
            callable.return_transfer,
        )?);
    }

    let mut out_cursor = 0;
    for (index, param) in callable.params.iter().enumerate() {
        if !param.is_out() {
            continue;
        }
        let slot = set.out_slots[out_cursor];
        let cell = set.out_cells[out_cursor];
        out_cursor += 1;
        debug_assert_eq!(slot.param, index);

        let value = if slot.caller_allocated {
            adopt_block(rt, param, cell, set)?
        } else {
            from_native(rt, cell, &param.ty, param.transfer)
                .map_err(|err| err.with_argument(&param.name))?
        };
        values.push(value);
    }

    if count == 1 {
        Ok(values.pop().unwrap_or_default())
    } else {
        Ok(Value::array(values))
    }
}

/// Hand a caller-allocated block to a struct wrapper
fn adopt_block(
    rt: &Runtime,
    param: &ParamDescriptor,
    cell: RawCell,
    set: &mut ArgumentSet,
) -> Result<Value> {
    let info = match &param.ty {
        TypeDescriptor::Interface(InterfaceInfo::Struct(info)) => info,
        other => {
            return Err(BridgeError::unsupported(format!(
                "type \"{}\" for out caller-allocates",
                other.tag_name()
            ))
            .with_argument(&param.name))
        }
    };
    let block = cell.as_ptr();
    if set.scope.release_block(block) {
        Ok(rt.adopt_struct(block, info))
    } else {
        rt.wrap_struct(block, info, param.transfer)
    }
}
