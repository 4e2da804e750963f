//! Type marshaling - script value ↔ raw cell conversions
//!
//! Design: one pattern match per direction over `TypeDescriptor`; kinds with
//! no conversion fail closed on the way in and degrade to `undefined` on the
//! way out.

use super::arguments::NativeScope;
use super::closure::Trampoline;
use super::generic::{from_generic, to_generic, GenericValue, ValueType};
use super::types::{abi_kind, AbiKind, RawCell};
use crate::config::OverflowPolicy;
use crate::errors::{BridgeError, Result};
use crate::introspection::{ArrayKind, CallbackScope, InterfaceInfo, Transfer, TypeDescriptor};
use crate::logging;
use crate::runtime::{Runtime, Value};
use core::ffi::{c_char, c_void};
use std::ffi::CStr;

/// Convert a script value into a raw cell of type `ty`
///
/// Native resources created on the way (strings, boxed values, trampolines)
/// are owned by `scope`.
pub fn to_native(
    rt: &Runtime,
    value: &Value,
    ty: &TypeDescriptor,
    scope: &mut NativeScope,
) -> Result<RawCell> {
    to_native_with(rt, value, ty, Transfer::Nothing, CallbackScope::Call, scope)
}

/// `to_native` honouring a parameter's ownership transfer and callback scope
pub fn to_native_with(
    rt: &Runtime,
    value: &Value,
    ty: &TypeDescriptor,
    transfer: Transfer,
    callback_scope: CallbackScope,
    scope: &mut NativeScope,
) -> Result<RawCell> {
    logging::log_conversion("to_native", ty.tag_name());

    match ty {
        TypeDescriptor::Void => Ok(RawCell::null()),

        TypeDescriptor::Boolean => Ok(RawCell { boolean: value.truthy() as i32 }),

        TypeDescriptor::Int8
        | TypeDescriptor::UInt8
        | TypeDescriptor::Int16
        | TypeDescriptor::UInt16
        | TypeDescriptor::Int32
        | TypeDescriptor::UInt32
        | TypeDescriptor::Int64
        | TypeDescriptor::UInt64
        | TypeDescriptor::GType => integral(rt, value.to_number(), ty),

        TypeDescriptor::Float => {
            let n = value.to_number();
            if rt.overflow_policy() == OverflowPolicy::Error
                && n.is_finite()
                && n.abs() > f32::MAX as f64
            {
                return Err(BridgeError::out_of_range(ty.tag_name(), n));
            }
            Ok(RawCell { f32: n as f32 })
        }

        TypeDescriptor::Double => Ok(RawCell { f64: value.to_number() }),

        TypeDescriptor::Utf8 | TypeDescriptor::Filename => match value {
            Value::String(s) => Ok(RawCell::from_ptr(scope.strdup(s, transfer)? as *mut c_void)),
            other => Err(BridgeError::type_mismatch(ty.tag_name(), other.type_name())),
        },

        TypeDescriptor::Interface(info) => {
            interface_to_native(rt, value, ty, info, transfer, callback_scope, scope)
        }

        TypeDescriptor::Array {
            element,
            kind,
            zero_terminated,
            ..
        } => match kind {
            ArrayKind::C => c_array_to_native(value, ty, element, *zero_terminated, transfer, scope),
            ArrayKind::Array | ArrayKind::PtrArray | ArrayKind::ByteArray => {
                Err(unsupported_argument(ty))
            }
        },

        TypeDescriptor::Unichar
        | TypeDescriptor::GList(_)
        | TypeDescriptor::GSList(_)
        | TypeDescriptor::GHash(..)
        | TypeDescriptor::Error => Err(unsupported_argument(ty)),
    }
}

fn unsupported_argument(ty: &TypeDescriptor) -> BridgeError {
    BridgeError::unsupported(format!("argument type \"{}\" is unsupported.", ty.tag_name()))
}

fn interface_to_native(
    rt: &Runtime,
    value: &Value,
    ty: &TypeDescriptor,
    info: &InterfaceInfo,
    transfer: Transfer,
    callback_scope: CallbackScope,
    scope: &mut NativeScope,
) -> Result<RawCell> {
    let mismatch = || BridgeError::type_mismatch(ty.tag_name(), value.type_name());
    match info {
        InterfaceInfo::Object(_) => match value {
            Value::Object(wrapper) => Ok(RawCell::from_ptr(wrapper.unwrap()?)),
            _ => Err(mismatch()),
        },
        InterfaceInfo::Value => {
            let generic = to_generic(rt, value, &ValueType::Invalid)?;
            Ok(RawCell::from_ptr(scope.keep_generic(generic)))
        }
        InterfaceInfo::Struct(info) => match value {
            // The callee reads `info.size` bytes through the pointer
            Value::Struct(wrapper) if wrapper.info().is_same_type(info) => {
                Ok(RawCell::from_ptr(wrapper.unwrap()?))
            }
            Value::Struct(wrapper) => Err(BridgeError::type_mismatch(
                info.name.clone(),
                wrapper.type_name(),
            )),
            _ => Err(mismatch()),
        },
        InterfaceInfo::Enum(_) => integral(rt, value.to_number(), ty),
        InterfaceInfo::Flags(_) => integral(rt, value.to_number(), ty),
        InterfaceInfo::Callback(signature) => match value {
            Value::Function(function) => {
                let trampoline = Trampoline::new(rt, signature.clone(), function.clone())?;
                let entry = trampoline.code_ptr();
                match (callback_scope, transfer) {
                    (CallbackScope::Forever, _) | (_, Transfer::Everything) => {
                        rt.retain_trampoline(trampoline)
                    }
                    _ => scope.keep_trampoline(trampoline),
                }
                Ok(RawCell::from_ptr(entry))
            }
            _ => Err(mismatch()),
        },
    }
}

fn c_array_to_native(
    value: &Value,
    ty: &TypeDescriptor,
    element: &TypeDescriptor,
    zero_terminated: bool,
    transfer: Transfer,
    scope: &mut NativeScope,
) -> Result<RawCell> {
    let is_strv = zero_terminated
        && matches!(element, TypeDescriptor::Utf8 | TypeDescriptor::Filename);
    if !is_strv {
        return Err(BridgeError::unsupported(format!(
            "argument type \"{}\" of \"{}\" is unsupported.",
            ty.tag_name(),
            element.tag_name()
        )));
    }
    let items = match value {
        Value::Array(items) => items,
        other => return Err(BridgeError::type_mismatch(ty.tag_name(), other.type_name())),
    };
    let mut strings = Vec::with_capacity(items.len());
    for item in items.iter() {
        match item {
            Value::String(s) => strings.push(s.as_ref()),
            other => return Err(BridgeError::type_mismatch(element.tag_name(), other.type_name())),
        }
    }
    Ok(RawCell::from_ptr(scope.strv(&strings, transfer)?))
}

/// Coerce a number into an integral cell according to the overflow policy
fn integral(rt: &Runtime, n: f64, ty: &TypeDescriptor) -> Result<RawCell> {
    let kind = abi_kind(ty);
    let (bits, signed) = kind
        .integer_layout()
        .ok_or_else(|| unsupported_argument(ty))?;

    let raw = match rt.overflow_policy() {
        OverflowPolicy::Truncate => wrap_integer(n, bits, signed),
        OverflowPolicy::Error => {
            let t = n.trunc();
            // Upper bound is exclusive: 2^63 - 1 is not representable in f64
            let (min, end) = if signed {
                (-(2f64.powi(bits as i32 - 1)), 2f64.powi(bits as i32 - 1))
            } else {
                (0.0, 2f64.powi(bits as i32))
            };
            if !n.is_finite() || t < min || t >= end {
                return Err(BridgeError::out_of_range(ty.tag_name(), n));
            }
            if signed {
                t as i64 as u64
            } else {
                t as u64
            }
        }
    };

    Ok(match kind {
        AbiKind::I8 => RawCell { i8: raw as i8 },
        AbiKind::U8 => RawCell { u8: raw as u8 },
        AbiKind::I16 => RawCell { i16: raw as i16 },
        AbiKind::U16 => RawCell { u16: raw as u16 },
        AbiKind::I32 => RawCell { i32: raw as i32 },
        AbiKind::U32 => RawCell { u32: raw as u32 },
        AbiKind::I64 => RawCell { i64: raw as i64 },
        AbiKind::USize => RawCell { usize: raw as usize },
        _ => RawCell { u64: raw },
    })
}

/// Native cast semantics: modular for narrow widths, saturating at 64 bits
fn wrap_integer(n: f64, bits: u32, signed: bool) -> u64 {
    if !n.is_finite() {
        return 0;
    }
    if bits >= 64 {
        return if signed { n as i64 as u64 } else { n as u64 };
    }
    let modulus = 2f64.powi(bits as i32);
    n.trunc().rem_euclid(modulus) as u64
}

/// Convert a raw cell of type `ty` into a script value
///
/// With `Transfer::Everything` the bridge takes over the native value:
/// strings are freed after copying, objects keep the transferred reference,
/// aggregates are adopted instead of copied.
pub fn from_native(rt: &Runtime, cell: RawCell, ty: &TypeDescriptor, transfer: Transfer) -> Result<Value> {
    logging::log_conversion("from_native", ty.tag_name());

    unsafe {
        Ok(match ty {
            TypeDescriptor::Void => Value::Undefined,
            TypeDescriptor::Boolean => Value::Boolean(cell.boolean != 0),
            TypeDescriptor::Int8 => Value::Number(cell.i8 as f64),
            TypeDescriptor::UInt8 => Value::Number(cell.u8 as f64),
            TypeDescriptor::Int16 => Value::Number(cell.i16 as f64),
            TypeDescriptor::UInt16 => Value::Number(cell.u16 as f64),
            TypeDescriptor::Int32 => Value::Number(cell.i32 as f64),
            TypeDescriptor::UInt32 => Value::Number(cell.u32 as f64),
            TypeDescriptor::Int64 => Value::Number(cell.i64 as f64),
            TypeDescriptor::UInt64 => Value::Number(cell.u64 as f64),
            TypeDescriptor::GType => Value::Number(cell.usize as f64),
            TypeDescriptor::Float => Value::Number(cell.f32 as f64),
            TypeDescriptor::Double => Value::Number(cell.f64),

            TypeDescriptor::Utf8 | TypeDescriptor::Filename => {
                if cell.is_null() {
                    Value::Null
                } else {
                    let text = CStr::from_ptr(cell.ptr as *const c_char)
                        .to_string_lossy()
                        .into_owned();
                    if transfer == Transfer::Everything {
                        libc::free(cell.ptr);
                    }
                    Value::from(text)
                }
            }

            TypeDescriptor::Interface(info) => interface_from_native(rt, cell, info, transfer)?,

            TypeDescriptor::Array {
                element,
                kind: ArrayKind::C,
                zero_terminated,
                fixed_size,
            } if *zero_terminated || fixed_size.is_some() => {
                c_array_from_native(rt, cell, element, *zero_terminated, *fixed_size, transfer)?
            }
            TypeDescriptor::Array { .. } => {
                return Err(BridgeError::unsupported("cannot convert native array type"))
            }

            // Unrepresentable kinds degrade instead of failing
            TypeDescriptor::Unichar
            | TypeDescriptor::GList(_)
            | TypeDescriptor::GSList(_)
            | TypeDescriptor::GHash(..)
            | TypeDescriptor::Error => Value::Undefined,
        })
    }
}

unsafe fn interface_from_native(
    rt: &Runtime,
    cell: RawCell,
    info: &InterfaceInfo,
    transfer: Transfer,
) -> Result<Value> {
    Ok(match info {
        InterfaceInfo::Enum(_) => Value::Number(cell.i32 as f64),
        InterfaceInfo::Flags(_) => Value::Number(cell.u32 as f64),
        _ if cell.is_null() => Value::Null,
        InterfaceInfo::Object(object) => rt.wrap_object(cell.ptr, object, transfer),
        InterfaceInfo::Struct(structure) => rt.wrap_struct(cell.ptr, structure, transfer)?,
        InterfaceInfo::Value => from_generic(rt, &*(cell.ptr as *const GenericValue))?,
        InterfaceInfo::Callback(signature) => {
            return Err(BridgeError::unsupported(format!(
                "return type with interface type \"{}\" is unsupported.",
                signature.name
            )))
        }
    })
}

unsafe fn c_array_from_native(
    rt: &Runtime,
    cell: RawCell,
    element: &TypeDescriptor,
    zero_terminated: bool,
    fixed_size: Option<usize>,
    transfer: Transfer,
) -> Result<Value> {
    if cell.is_null() {
        return Ok(Value::array(Vec::new()));
    }
    let stride = abi_kind(element).size();
    if stride == 0 {
        return Err(BridgeError::unsupported("cannot convert native array type"));
    }
    let element_transfer = if transfer == Transfer::Everything {
        Transfer::Everything
    } else {
        Transfer::Nothing
    };

    let base = cell.ptr as *const u8;
    let mut items = Vec::new();
    let mut index = 0usize;
    loop {
        if let Some(len) = fixed_size {
            if index >= len {
                break;
            }
        }
        let slot = base.add(index * stride);
        if zero_terminated && fixed_size.is_none() {
            let bytes = core::slice::from_raw_parts(slot, stride);
            if bytes.iter().all(|b| *b == 0) {
                break;
            }
        }
        let item = RawCell::read(slot as *const c_void, element);
        items.push(from_native(rt, item, element, element_transfer)?);
        index += 1;
    }

    if transfer != Transfer::Nothing {
        libc::free(cell.ptr);
    }
    Ok(Value::array(items))
}
