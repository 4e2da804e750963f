//! Signal closures - the two-state (Bound → Finalized) reverse-call binding
//! used for signal connections

use super::arguments::NativeScope;
use super::closure::ClosureBinding;
use super::generic::{from_generic, to_generic, GenericValue};
use super::marshal::{from_native, to_native};
use crate::errors::{BridgeError, Result};
use crate::introspection::{CallableDescriptor, InterfaceInfo, Transfer, TypeDescriptor};
use crate::logging;
use crate::runtime::{Runtime, ScriptFunction, Value};
use std::cell::RefCell;
use std::rc::Rc;

enum ClosureState {
    Bound(ClosureBinding),
    Finalized,
}

/// Script function connected to a native signal
pub struct SignalClosure {
    runtime: Runtime,
    name: String,
    state: RefCell<ClosureState>,
}

impl SignalClosure {
    pub fn new(
        rt: &Runtime,
        name: &str,
        descriptor: Option<Rc<CallableDescriptor>>,
        function: ScriptFunction,
    ) -> Self {
        Self {
            runtime: rt.clone(),
            name: name.to_string(),
            state: RefCell::new(ClosureState::Bound(ClosureBinding::new(descriptor, function))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_typed(&self) -> bool {
        matches!(
            &*self.state.borrow(),
            ClosureState::Bound(ClosureBinding { descriptor: Some(_), .. })
        )
    }

    pub fn is_finalized(&self) -> bool {
        matches!(&*self.state.borrow(), ClosureState::Finalized)
    }

    /// Run the connected function for one emission
    ///
    /// `params[0]` is the emitting instance. A finalized closure never runs.
    pub fn invoke(&self, return_value: Option<&mut GenericValue>, params: &[GenericValue]) -> Result<()> {
        // Clone out so the function may finalize this closure while running
        let binding = match &*self.state.borrow() {
            ClosureState::Bound(binding) => binding.clone(),
            ClosureState::Finalized => return Err(BridgeError::closure_finalized()),
        };

        self.runtime.record_callback();
        logging::log_callback(&self.name, params.len());

        match &binding.descriptor {
            Some(signature) => self.invoke_typed(signature, &binding.function, return_value, params),
            None => self.invoke_untyped(&binding.function, return_value, params),
        }
    }

    fn invoke_typed(
        &self,
        signature: &CallableDescriptor,
        function: &ScriptFunction,
        return_value: Option<&mut GenericValue>,
        params: &[GenericValue],
    ) -> Result<()> {
        let rt = &self.runtime;
        let (instance, rest) = params.split_first().ok_or_else(|| {
            BridgeError::argument(format!("signal '{}' emitted without an instance", self.name))
        })?;
        if rest.len() != signature.params.len() {
            return Err(BridgeError::argument(format!(
                "signal '{}' expects {} arguments but received {}",
                self.name,
                signature.params.len(),
                rest.len()
            )));
        }

        let mut args = Vec::with_capacity(params.len());
        args.push(from_generic(rt, instance)?);
        for (param, value) in signature.params.iter().zip(rest) {
            if param.ty.is_void() {
                continue;
            }
            let converted = match &param.ty {
                TypeDescriptor::Interface(InterfaceInfo::Value) => from_generic(rt, value),
                ty => from_native(rt, value.to_cell(), ty, Transfer::Nothing),
            };
            args.push(converted.map_err(|err| err.with_argument(&param.name))?);
        }

        let result = function.call(&args)?;

        if let Some(slot) = return_value {
            if result.is_nullish() {
                slot.reset();
            } else if !signature.return_type.is_void() {
                let mut scope = NativeScope::new();
                let cell = to_native(rt, &result, &signature.return_type, &mut scope)?;
                *slot = GenericValue::from_cell(&signature.return_type, cell)?;
            }
        }
        Ok(())
    }

    fn invoke_untyped(
        &self,
        function: &ScriptFunction,
        return_value: Option<&mut GenericValue>,
        params: &[GenericValue],
    ) -> Result<()> {
        let rt = &self.runtime;
        let args = params
            .iter()
            .map(|value| from_generic(rt, value))
            .collect::<Result<Vec<Value>>>()?;

        let result = function.call(&args)?;

        if let Some(slot) = return_value {
            if !result.is_nullish() {
                *slot = to_generic(rt, &result, &slot.value_type())?;
            }
        }
        Ok(())
    }

    /// Native-facing entry: failures go to the runtime's pending error
    pub fn marshal(&self, return_value: Option<&mut GenericValue>, params: &[GenericValue]) {
        if let Err(err) = self.invoke(return_value, params) {
            logging::log_dropped_callback_error(&self.name, &err.to_string());
            self.runtime.raise(err);
        }
    }

    /// Release the function and signature; later calls are no-ops
    pub fn finalize(&self) {
        let previous = self.state.replace(ClosureState::Finalized);
        if let ClosureState::Bound(binding) = previous {
            logging::log_closure_finalized(&self.name);
            drop(binding);
        }
    }
}
