//! Script-visible entry points: functions, bound methods, struct
//! construction and signal connections

use super::{Runtime, ScriptFunction, StructWrapper, Value};
use crate::errors::{BridgeError, Result};
use crate::interop::SignalClosure;
use crate::introspection::{CallableDescriptor, StructInfo};
use std::rc::Rc;

impl Runtime {
    /// Wrap a registered free function as a script function
    pub fn function(&self, namespace: &str, name: &str) -> Result<Value> {
        let callable = self.oracle().callable(namespace, name).ok_or_else(|| {
            BridgeError::argument(format!("no callable named '{}.{}'", namespace, name))
        })?;
        Ok(Value::Function(self.function_for(callable)))
    }

    /// Script function calling `callable` without a receiver
    pub fn function_for(&self, callable: Rc<CallableDescriptor>) -> ScriptFunction {
        let rt = self.downgrade();
        let name = callable.qualified_name();
        ScriptFunction::new(&name, move |args| {
            let rt = rt
                .upgrade()
                .ok_or_else(|| BridgeError::argument("runtime is gone"))?;
            rt.call(&callable, args, None)
        })
    }

    /// Script function calling `callable` on `receiver`
    pub fn bound_method(&self, receiver: &Value, callable: Rc<CallableDescriptor>) -> Value {
        let rt = self.downgrade();
        let receiver = receiver.clone();
        let name = callable.qualified_name();
        Value::Function(ScriptFunction::new(&name, move |args| {
            let rt = rt
                .upgrade()
                .ok_or_else(|| BridgeError::argument("runtime is gone"))?;
            rt.call(&callable, args, Some(&receiver))
        }))
    }

    /// Call the method `name` declared on the receiver's type
    pub fn call_method(&self, receiver: &Value, name: &str, args: &[Value]) -> Result<Value> {
        let (method, type_name) = match receiver {
            Value::Object(wrapper) => (wrapper.info().find_method(name), wrapper.type_name().to_string()),
            Value::Struct(wrapper) => (wrapper.info().find_method(name), wrapper.type_name().to_string()),
            other => {
                return Err(BridgeError::type_mismatch("object", other.type_name()).with_argument("this"))
            }
        };
        let method = method.ok_or_else(|| {
            BridgeError::argument(format!("'{}' has no method named '{}'", type_name, name))
        })?;
        let receiver = if method.is_method() { Some(receiver) } else { None };
        self.call(&method, args, receiver)
    }

    /// `new` on a struct type
    ///
    /// Uses the zero-argument constructor, else a method named `new`, else a
    /// zeroed block of the declared size.
    pub fn construct_struct(&self, info: &Rc<StructInfo>, args: &[Value]) -> Result<Value> {
        match info.find_constructor() {
            Some(constructor) => self.call(&constructor, args, None),
            None => Ok(Value::Struct(StructWrapper::allocate(info)?)),
        }
    }

    /// Connect `function` to a signal of an object instance
    ///
    /// Signals without a registered signature (e.g. `notify::<property>`)
    /// get an untyped closure.
    pub fn connect(&self, instance: &Value, signal: &str, function: ScriptFunction) -> Result<SignalClosure> {
        let wrapper = match instance {
            Value::Object(wrapper) => wrapper,
            other => {
                return Err(BridgeError::type_mismatch("object", other.type_name()).with_argument("this"))
            }
        };
        let base_name = signal.split("::").next().unwrap_or(signal);
        let descriptor = self.oracle().find_signal(wrapper.info(), base_name);
        Ok(SignalClosure::new(self, signal, descriptor, function))
    }
}
