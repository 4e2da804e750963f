//! Callback trampolines - native entry points that re-enter script code
//!
//! A trampoline is a libffi closure whose user data is a leaked
//! `TrampolineState`; dropping the trampoline frees the closure first and
//! then reclaims the state.

use super::arguments::NativeScope;
use super::marshal::{from_native, to_native_with};
use super::types::{ffi_type, RawCell};
use crate::errors::{BridgeError, Result};
use crate::introspection::{CallableDescriptor, CallbackScope, Direction};
use crate::logging;
use crate::runtime::{Runtime, ScriptFunction, WeakRuntime};
use core::ffi::c_void;
use libffi::low;
use libffi::middle::{Cif, Closure, Type};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// A script function paired with the signature native code calls it with
#[derive(Clone)]
pub struct ClosureBinding {
    /// Absent for signals without an introspectable signature
    pub descriptor: Option<Rc<CallableDescriptor>>,
    pub function: ScriptFunction,
}

impl ClosureBinding {
    pub fn new(descriptor: Option<Rc<CallableDescriptor>>, function: ScriptFunction) -> Self {
        Self { descriptor, function }
    }
}

struct TrampolineState {
    runtime: WeakRuntime,
    signature: Rc<CallableDescriptor>,
    function: ScriptFunction,
    /// Native memory backing the most recent return value
    last_return: RefCell<NativeScope>,
}

impl TrampolineState {
    unsafe fn dispatch(&self, rt: &Runtime, args: *const *const c_void) -> Result<RawCell> {
        let signature = &self.signature;
        let mut values = Vec::with_capacity(signature.params.len());

        for (index, param) in signature.params.iter().enumerate() {
            if param.ty.is_void() || param.direction == Direction::Out {
                continue;
            }
            let slot = *args.add(index);
            let cell = match param.direction {
                // INOUT arguments arrive as a pointer to the value
                Direction::InOut => {
                    let target = *(slot as *const *const c_void);
                    if target.is_null() {
                        RawCell::null()
                    } else {
                        RawCell::read(target, &param.ty)
                    }
                }
                _ => RawCell::read(slot, &param.ty),
            };
            let value = from_native(rt, cell, &param.ty, param.transfer)
                .map_err(|err| err.with_argument(&param.name))?;
            values.push(value);
        }

        rt.record_callback();
        logging::log_callback(self.function.name(), values.len());

        let result = self.function.call(&values)?;
        if signature.return_type.is_void() || result.is_nullish() {
            return Ok(RawCell::zeroed());
        }

        let mut scope = NativeScope::new();
        let cell = to_native_with(
            rt,
            &result,
            &signature.return_type,
            signature.return_transfer,
            CallbackScope::Call,
            &mut scope,
        )?;
        self.last_return.replace(scope);
        Ok(cell.widen_return(&signature.return_type))
    }
}

unsafe extern "C" fn trampoline_handler(
    _cif: &low::ffi_cif,
    result: &mut RawCell,
    args: *const *const c_void,
    state: &TrampolineState,
) {
    let returns_value = !state.signature.return_type.is_void();
    if returns_value {
        *result = RawCell::zeroed();
    }

    let rt = match state.runtime.upgrade() {
        Some(rt) => rt,
        None => {
            logging::log_dropped_callback_error(state.function.name(), "runtime is gone");
            return;
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| state.dispatch(&rt, args)));
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(_) => Err(BridgeError::argument(format!(
            "callback '{}' panicked",
            state.function.name()
        ))),
    };

    match outcome {
        Ok(cell) => {
            if returns_value {
                *result = cell;
            }
        }
        Err(err) => {
            logging::log_dropped_callback_error(state.function.name(), &err.to_string());
            rt.raise(err);
        }
    }
}

/// Native-callable entry point bound to a script function
pub struct Trampoline {
    closure: Option<Closure<'static>>,
    state: *mut TrampolineState,
    code: *mut c_void,
}

impl Trampoline {
    pub fn new(
        rt: &Runtime,
        signature: Rc<CallableDescriptor>,
        function: ScriptFunction,
    ) -> Result<Self> {
        let mut arg_types: Vec<Type> = signature
            .params
            .iter()
            .map(|param| match param.direction {
                Direction::In => ffi_type(&param.ty),
                Direction::Out | Direction::InOut => Type::pointer(),
            })
            .collect();
        if signature.can_throw {
            arg_types.push(Type::pointer());
        }
        let cif = Cif::new(arg_types, ffi_type(&signature.return_type));

        let state = Box::into_raw(Box::new(TrampolineState {
            runtime: rt.downgrade(),
            signature,
            function,
            last_return: RefCell::new(NativeScope::new()),
        }));
        let state_ref: &'static TrampolineState = unsafe { &*state };

        let closure = Closure::new(cif, trampoline_handler, state_ref);
        let code = {
            let entry: unsafe extern "C" fn() = *closure.code_ptr();
            entry as usize as *mut c_void
        };

        logging::trace!(
            event = "trampoline_created",
            callback = %state_ref.signature.name,
            address = ?code
        );

        Ok(Self {
            closure: Some(closure),
            state,
            code,
        })
    }

    /// Address native code calls
    pub fn code_ptr(&self) -> *mut c_void {
        self.code
    }

    pub fn signature(&self) -> &Rc<CallableDescriptor> {
        unsafe { &(*self.state).signature }
    }

    pub fn function(&self) -> &ScriptFunction {
        unsafe { &(*self.state).function }
    }

    pub fn binding(&self) -> ClosureBinding {
        ClosureBinding::new(Some(self.signature().clone()), self.function().clone())
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        // The closure references the state, so it goes first
        drop(self.closure.take());
        unsafe { drop(Box::from_raw(self.state)) };
    }
}
