//! Dynamic scripting values
//!
//! Mirrors the value model of a dynamically typed scripting language:
//! primitives compare by value, everything heap-like compares by identity.

use super::objects::{ObjectWrapper, StructWrapper};
use crate::errors::Result;
use std::fmt;
use std::rc::Rc;

type Body = dyn Fn(&[Value]) -> Result<Value>;

/// A callable scripting function
///
/// Cloning shares the same function; identity is preserved.
#[derive(Clone)]
pub struct ScriptFunction {
    name: Rc<str>,
    body: Rc<Body>,
}

impl ScriptFunction {
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self {
            name: Rc::from(name),
            body: Rc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.body)(args)
    }

    pub fn ptr_eq(&self, other: &ScriptFunction) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }

    /// Number of outstanding handles to this function
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.body)
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<ObjectWrapper>),
    Struct(Rc<StructWrapper>),
    Function(ScriptFunction),
}

impl Value {
    pub fn string(text: &str) -> Self {
        Self::String(Rc::from(text))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(items))
    }

    /// `typeof` name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null | Self::Array(_) | Self::Object(_) | Self::Struct(_) => "object",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric coercion with the usual dynamic-language rules
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(n) => *n,
            Self::String(s) => parse_number(s),
            Self::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => match single {
                    Self::Array(_) | Self::Object(_) | Self::Struct(_) | Self::Function(_) => {
                        f64::NAN
                    }
                    Self::Null | Self::Undefined => 0.0,
                    other => other.to_number(),
                },
                _ => f64::NAN,
            },
            Self::Object(_) | Self::Struct(_) | Self::Function(_) => f64::NAN,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Rc<ObjectWrapper>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Rc<StructWrapper>> {
        match self {
            Self::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ScriptFunction> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let radix = |prefix: &str, radix: u32| {
        trimmed
            .strip_prefix(prefix)
            .map(|digits| u64::from_str_radix(digits, radix).map(|v| v as f64).unwrap_or(f64::NAN))
    };
    if let Some(n) = radix("0x", 16)
        .or_else(|| radix("0X", 16))
        .or_else(|| radix("0o", 8))
        .or_else(|| radix("0b", 2))
    {
        return n;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust accepts spellings like "inf" and "nan" that scripts do not
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Strict equality: primitives by value, heap values by identity
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Struct(a), Self::Struct(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Object(obj) => write!(f, "[object {}]", obj.type_name()),
            Self::Struct(s) => write!(f, "[struct {}]", s.type_name()),
            Self::Function(func) => write!(f, "{:?}", func),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<ScriptFunction> for Value {
    fn from(value: ScriptFunction) -> Self {
        Self::Function(value)
    }
}
