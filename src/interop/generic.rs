//! Generic value container - the self-describing native value used by
//! signal emission and `Value`-typed parameters

use super::arguments::NativeScope;
use super::marshal::to_native;
use super::types::RawCell;
use crate::errors::{BridgeError, Result};
use crate::introspection::{InterfaceInfo, ObjectInfo, StructInfo, Transfer, TypeDescriptor};
use crate::logging;
use crate::runtime::{Runtime, Value};
use core::ffi::c_void;
use std::ffi::{CStr, CString};
use std::rc::Rc;

/// Payload-free type of a `GenericValue`
#[derive(Debug, Clone)]
pub enum ValueType {
    Invalid,
    Char,
    UChar,
    Boolean,
    Int,
    UInt,
    Long,
    ULong,
    Int64,
    UInt64,
    Enum,
    Flags,
    Float,
    Double,
    String,
    Pointer,
    Boxed(Rc<StructInfo>),
    Object(Rc<ObjectInfo>),
    /// A value holding another value
    Value,
    Array,
    Param,
}

impl ValueType {
    pub fn name(&self) -> String {
        let name = match self {
            Self::Invalid => "invalid",
            Self::Char => "gchar",
            Self::UChar => "guchar",
            Self::Boolean => "gboolean",
            Self::Int => "gint",
            Self::UInt => "guint",
            Self::Long => "glong",
            Self::ULong => "gulong",
            Self::Int64 => "gint64",
            Self::UInt64 => "guint64",
            Self::Enum => "GEnum",
            Self::Flags => "GFlags",
            Self::Float => "gfloat",
            Self::Double => "gdouble",
            Self::String => "gchararray",
            Self::Pointer => "gpointer",
            Self::Boxed(info) => return info.name.clone(),
            Self::Object(info) => return info.name.clone(),
            Self::Value => "GValue",
            Self::Array => "GValueArray",
            Self::Param => "GParam",
        };
        name.to_string()
    }

    /// Generic type able to carry a value of `ty`
    pub fn from_descriptor(ty: &TypeDescriptor) -> Option<ValueType> {
        Some(match ty {
            TypeDescriptor::Boolean => Self::Boolean,
            TypeDescriptor::Int8 => Self::Char,
            TypeDescriptor::UInt8 => Self::UChar,
            TypeDescriptor::Int16 | TypeDescriptor::Int32 => Self::Int,
            TypeDescriptor::UInt16 | TypeDescriptor::UInt32 | TypeDescriptor::Unichar => Self::UInt,
            TypeDescriptor::Int64 => Self::Int64,
            TypeDescriptor::UInt64 => Self::UInt64,
            TypeDescriptor::GType => Self::ULong,
            TypeDescriptor::Float => Self::Float,
            TypeDescriptor::Double => Self::Double,
            TypeDescriptor::Utf8 | TypeDescriptor::Filename => Self::String,
            TypeDescriptor::Interface(InterfaceInfo::Enum(_)) => Self::Enum,
            TypeDescriptor::Interface(InterfaceInfo::Flags(_)) => Self::Flags,
            TypeDescriptor::Interface(InterfaceInfo::Object(info)) => Self::Object(info.clone()),
            TypeDescriptor::Interface(InterfaceInfo::Struct(info)) => Self::Boxed(info.clone()),
            TypeDescriptor::Interface(InterfaceInfo::Value) => Self::Value,
            _ => return None,
        })
    }

    /// Raw descriptor used to move scalars through `to_native`
    fn scalar_descriptor(&self) -> Option<TypeDescriptor> {
        Some(match self {
            Self::Char => TypeDescriptor::Int8,
            Self::UChar => TypeDescriptor::UInt8,
            Self::Boolean => TypeDescriptor::Boolean,
            Self::Int | Self::Enum => TypeDescriptor::Int32,
            Self::UInt | Self::Flags => TypeDescriptor::UInt32,
            Self::Long | Self::Int64 => TypeDescriptor::Int64,
            Self::ULong | Self::UInt64 => TypeDescriptor::UInt64,
            Self::Float => TypeDescriptor::Float,
            Self::Double => TypeDescriptor::Double,
            _ => return None,
        })
    }
}

/// Owned, self-describing native value
#[derive(Debug, Clone)]
pub enum GenericValue {
    Invalid,
    Char(i8),
    UChar(u8),
    Boolean(bool),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Int64(i64),
    UInt64(u64),
    Enum(i32),
    Flags(u32),
    Float(f32),
    Double(f64),
    String(Option<CString>),
    Pointer(*mut c_void),
    /// Borrowed aggregate memory
    Boxed { info: Rc<StructInfo>, ptr: *mut c_void },
    /// Borrowed instance pointer
    Object { info: Rc<ObjectInfo>, ptr: *mut c_void },
}

impl GenericValue {
    /// Zero value of `ty`
    pub fn new(ty: &ValueType) -> Self {
        match ty {
            ValueType::Invalid | ValueType::Value | ValueType::Array | ValueType::Param => {
                Self::Invalid
            }
            ValueType::Char => Self::Char(0),
            ValueType::UChar => Self::UChar(0),
            ValueType::Boolean => Self::Boolean(false),
            ValueType::Int => Self::Int(0),
            ValueType::UInt => Self::UInt(0),
            ValueType::Long => Self::Long(0),
            ValueType::ULong => Self::ULong(0),
            ValueType::Int64 => Self::Int64(0),
            ValueType::UInt64 => Self::UInt64(0),
            ValueType::Enum => Self::Enum(0),
            ValueType::Flags => Self::Flags(0),
            ValueType::Float => Self::Float(0.0),
            ValueType::Double => Self::Double(0.0),
            ValueType::String => Self::String(None),
            ValueType::Pointer => Self::Pointer(core::ptr::null_mut()),
            ValueType::Boxed(info) => Self::Boxed {
                info: info.clone(),
                ptr: core::ptr::null_mut(),
            },
            ValueType::Object(info) => Self::Object {
                info: info.clone(),
                ptr: core::ptr::null_mut(),
            },
        }
    }

    pub fn string(text: &str) -> Result<Self> {
        CString::new(text)
            .map(|s| Self::String(Some(s)))
            .map_err(|_| BridgeError::conversion("string contains an interior NUL byte"))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Invalid => ValueType::Invalid,
            Self::Char(_) => ValueType::Char,
            Self::UChar(_) => ValueType::UChar,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Int(_) => ValueType::Int,
            Self::UInt(_) => ValueType::UInt,
            Self::Long(_) => ValueType::Long,
            Self::ULong(_) => ValueType::ULong,
            Self::Int64(_) => ValueType::Int64,
            Self::UInt64(_) => ValueType::UInt64,
            Self::Enum(_) => ValueType::Enum,
            Self::Flags(_) => ValueType::Flags,
            Self::Float(_) => ValueType::Float,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
            Self::Pointer(_) => ValueType::Pointer,
            Self::Boxed { info, .. } => ValueType::Boxed(info.clone()),
            Self::Object { info, .. } => ValueType::Object(info.clone()),
        }
    }

    pub fn type_name(&self) -> String {
        self.value_type().name()
    }

    /// Reset to the zero value of the current type
    pub fn reset(&mut self) {
        *self = Self::new(&self.value_type());
    }

    /// Raw cell view; string and aggregate pointers borrow from `self`
    pub fn to_cell(&self) -> RawCell {
        match self {
            Self::Invalid => RawCell::zeroed(),
            Self::Char(v) => RawCell { i8: *v },
            Self::UChar(v) => RawCell { u8: *v },
            Self::Boolean(v) => RawCell { boolean: *v as i32 },
            Self::Int(v) | Self::Enum(v) => RawCell { i32: *v },
            Self::UInt(v) | Self::Flags(v) => RawCell { u32: *v },
            Self::Long(v) | Self::Int64(v) => RawCell { i64: *v },
            Self::ULong(v) | Self::UInt64(v) => RawCell { u64: *v },
            Self::Float(v) => RawCell { f32: *v },
            Self::Double(v) => RawCell { f64: *v },
            Self::String(s) => match s {
                Some(s) => RawCell::from_ptr(s.as_ptr() as *mut c_void),
                None => RawCell::null(),
            },
            Self::Pointer(ptr) | Self::Boxed { ptr, .. } | Self::Object { ptr, .. } => {
                RawCell::from_ptr(*ptr)
            }
        }
    }

    /// Build a generic value from a raw cell of type `ty`
    ///
    /// Strings are copied; aggregates are borrowed.
    pub fn from_cell(ty: &TypeDescriptor, cell: RawCell) -> Result<Self> {
        unsafe {
            Ok(match ty {
                TypeDescriptor::Void => Self::Invalid,
                TypeDescriptor::Boolean => Self::Boolean(cell.boolean != 0),
                TypeDescriptor::Int8 => Self::Char(cell.i8),
                TypeDescriptor::UInt8 => Self::UChar(cell.u8),
                TypeDescriptor::Int16 => Self::Int(cell.i16 as i32),
                TypeDescriptor::UInt16 => Self::UInt(cell.u16 as u32),
                TypeDescriptor::Int32 => Self::Int(cell.i32),
                TypeDescriptor::UInt32 | TypeDescriptor::Unichar => Self::UInt(cell.u32),
                TypeDescriptor::Int64 => Self::Int64(cell.i64),
                TypeDescriptor::UInt64 => Self::UInt64(cell.u64),
                TypeDescriptor::GType => Self::ULong(cell.usize as u64),
                TypeDescriptor::Float => Self::Float(cell.f32),
                TypeDescriptor::Double => Self::Double(cell.f64),
                TypeDescriptor::Utf8 | TypeDescriptor::Filename => {
                    if cell.is_null() {
                        Self::String(None)
                    } else {
                        Self::String(Some(CStr::from_ptr(cell.ptr as *const _).to_owned()))
                    }
                }
                TypeDescriptor::Interface(InterfaceInfo::Enum(_)) => Self::Enum(cell.i32),
                TypeDescriptor::Interface(InterfaceInfo::Flags(_)) => Self::Flags(cell.u32),
                TypeDescriptor::Interface(InterfaceInfo::Object(info)) => Self::Object {
                    info: info.clone(),
                    ptr: cell.ptr,
                },
                TypeDescriptor::Interface(InterfaceInfo::Struct(info)) => Self::Boxed {
                    info: info.clone(),
                    ptr: cell.ptr,
                },
                TypeDescriptor::Interface(InterfaceInfo::Value) => {
                    if cell.is_null() {
                        Self::Invalid
                    } else {
                        (*(cell.ptr as *const GenericValue)).clone()
                    }
                }
                other => {
                    return Err(BridgeError::unsupported(format!(
                        "type \"{}\" cannot be stored in a generic value",
                        other.tag_name()
                    )))
                }
            })
        }
    }
}

/// Pick a native type for a script value with no declared type
pub fn guess_type(value: &Value) -> ValueType {
    match value {
        Value::String(_) => ValueType::String,
        Value::Array(_) => ValueType::Array,
        Value::Boolean(_) => ValueType::Boolean,
        Value::Number(n) => {
            let whole = n.is_finite() && n.fract() == 0.0;
            if whole && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                ValueType::Int
            } else if whole && *n >= 0.0 && *n <= u32::MAX as f64 {
                ValueType::UInt
            } else {
                ValueType::Double
            }
        }
        Value::Null => ValueType::Pointer,
        _ => ValueType::Invalid,
    }
}

/// Convert a script value into a generic value of type `ty`
///
/// `ValueType::Invalid` and `ValueType::Value` pick the type from the value.
pub fn to_generic(rt: &Runtime, value: &Value, ty: &ValueType) -> Result<GenericValue> {
    logging::log_conversion("to_generic", &ty.name());

    if let Some(descriptor) = ty.scalar_descriptor() {
        let mut scope = NativeScope::new();
        let cell = to_native(rt, value, &descriptor, &mut scope)?;
        let converted = GenericValue::from_cell(&descriptor, cell)?;
        return Ok(match (ty, converted) {
            (ValueType::Enum, GenericValue::Int(v)) => GenericValue::Enum(v),
            (ValueType::Flags, GenericValue::UInt(v)) => GenericValue::Flags(v),
            (ValueType::Long, GenericValue::Int64(v)) => GenericValue::Long(v),
            (ValueType::ULong, GenericValue::UInt64(v)) => GenericValue::ULong(v),
            (_, other) => other,
        });
    }

    match ty {
        ValueType::Invalid | ValueType::Value => {
            let guessed = guess_type(value);
            if matches!(guessed, ValueType::Invalid) {
                return Err(BridgeError::conversion(
                    "Could not guess the native value type from the script value",
                ));
            }
            to_generic(rt, value, &guessed)
        }
        ValueType::String => match value {
            Value::String(s) => GenericValue::string(s),
            Value::Null | Value::Undefined => Ok(GenericValue::String(None)),
            _ => Err(BridgeError::conversion(format!(
                "Failed to convert value of type '{}' to '{}'",
                value.type_name(),
                ty.name()
            ))),
        },
        ValueType::Boxed(info) => match value {
            Value::Struct(wrapper) => Ok(GenericValue::Boxed {
                info: info.clone(),
                ptr: wrapper.unwrap()?,
            }),
            Value::Null | Value::Undefined => Ok(GenericValue::new(ty)),
            _ => Err(BridgeError::type_mismatch(info.name.clone(), value.type_name())),
        },
        ValueType::Object(info) => match value {
            Value::Object(wrapper) => Ok(GenericValue::Object {
                info: wrapper.info().clone(),
                ptr: wrapper.unwrap()?,
            }),
            Value::Null | Value::Undefined => Ok(GenericValue::new(ty)),
            _ => Err(BridgeError::type_mismatch(info.name.clone(), value.type_name())),
        },
        ValueType::Pointer | ValueType::Array | ValueType::Param => {
            Err(BridgeError::unsupported(format!(
                "Native value type '{}' is not yet supported",
                ty.name()
            )))
        }
        _ => Err(BridgeError::conversion("Failed to convert value")),
    }
}

/// Convert a generic value into a script value
pub fn from_generic(rt: &Runtime, value: &GenericValue) -> Result<Value> {
    logging::log_conversion("from_generic", &value.type_name());
    Ok(match value {
        GenericValue::Char(c) => Value::from((*c as u8 as char).to_string()),
        GenericValue::UChar(c) => Value::from((*c as char).to_string()),
        GenericValue::Boolean(b) => Value::Boolean(*b),
        GenericValue::Int(v) | GenericValue::Enum(v) => Value::Number(*v as f64),
        GenericValue::UInt(v) | GenericValue::Flags(v) => Value::Number(*v as f64),
        GenericValue::Long(v) | GenericValue::Int64(v) => Value::Number(*v as f64),
        GenericValue::ULong(v) | GenericValue::UInt64(v) => Value::Number(*v as f64),
        GenericValue::Float(v) => Value::Number(*v as f64),
        GenericValue::Double(v) => Value::Number(*v),
        GenericValue::String(None) => Value::Null,
        GenericValue::String(Some(s)) => Value::from(s.to_string_lossy().into_owned()),
        GenericValue::Boxed { ptr, .. } | GenericValue::Object { ptr, .. } if ptr.is_null() => {
            Value::Null
        }
        GenericValue::Boxed { info, ptr } => rt.wrap_struct(*ptr, info, Transfer::Nothing)?,
        GenericValue::Object { info, ptr } => rt.wrap_object(*ptr, info, Transfer::Nothing),
        GenericValue::Invalid | GenericValue::Pointer(_) => {
            return Err(BridgeError::unsupported(format!(
                "conversion of input type '{}' not supported",
                value.type_name()
            )))
        }
    })
}
