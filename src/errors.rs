//! Error taxonomy for marshalling, invocation and callbacks
//!
//! Every failure reaches scripting code as a single `BridgeError` whose
//! `Display` output matches the messages scripts historically matched on.

use std::fmt;

/// Coarse error class exposed to embedders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    TypeMismatch,
    UnsupportedType,
    ArgumentError,
    NativeInvocationError,
    ValueConversionError,
    RangeError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    TypeMismatch { expected: String, found: String },
    NotNullable,
    UnsupportedType { message: String },
    MissingReceiver { callable: String },
    Argument { message: String },
    NativeInvocation { message: String },
    ValueConversion { message: String },
    OutOfRange { target: String, value: f64 },
    ClosureFinalized,
    SymbolNotFound { symbol: String },
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TypeMismatch { .. } | Self::NotNullable => ErrorCategory::TypeMismatch,
            Self::UnsupportedType { .. } => ErrorCategory::UnsupportedType,
            Self::MissingReceiver { .. }
            | Self::Argument { .. }
            | Self::ClosureFinalized
            | Self::SymbolNotFound { .. } => ErrorCategory::ArgumentError,
            Self::NativeInvocation { .. } => ErrorCategory::NativeInvocationError,
            Self::ValueConversion { .. } => ErrorCategory::ValueConversionError,
            Self::OutOfRange { .. } => ErrorCategory::RangeError,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeError {
    pub kind: ErrorKind,
    /// Declared name of the parameter being converted, when known
    pub argument: Option<String>,
}

impl BridgeError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, argument: None }
    }

    pub fn with_argument(mut self, name: &str) -> Self {
        if self.argument.is_none() {
            self.argument = Some(name.to_string());
        }
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        })
    }

    pub fn not_nullable(argument: &str) -> Self {
        Self::new(ErrorKind::NotNullable).with_argument(argument)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedType { message: message.into() })
    }

    pub fn missing_receiver(callable: &str) -> Self {
        Self::new(ErrorKind::MissingReceiver { callable: callable.to_string() })
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Argument { message: message.into() })
    }

    pub fn native(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NativeInvocation { message: message.into() })
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueConversion { message: message.into() })
    }

    pub fn out_of_range(target: &str, value: f64) -> Self {
        Self::new(ErrorKind::OutOfRange { target: target.to_string(), value })
    }

    pub fn closure_finalized() -> Self {
        Self::new(ErrorKind::ClosureFinalized)
    }

    pub fn symbol_not_found(symbol: &str) -> Self {
        Self::new(ErrorKind::SymbolNotFound { symbol: symbol.to_string() })
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.argument) {
            (ErrorKind::TypeMismatch { expected, found }, Some(arg)) => write!(
                f,
                "Expected type '{}' for Argument '{}' but got type '{}'",
                expected, arg, found
            ),
            (ErrorKind::TypeMismatch { expected, found }, None) => {
                write!(f, "Expected type '{}' but got type '{}'", expected, found)
            }
            (ErrorKind::NotNullable, Some(arg)) => {
                write!(f, "Argument '{}' may not be null or undefined", arg)
            }
            (ErrorKind::NotNullable, None) => write!(f, "Argument may not be null or undefined"),
            (kind, Some(arg)) => write!(f, "Argument '{}': {}", arg, kind),
            (kind, None) => write!(f, "{}", kind),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "Expected type '{}' but got type '{}'", expected, found)
            }
            Self::NotNullable => write!(f, "value may not be null or undefined"),
            Self::UnsupportedType { message } => write!(f, "{}", message),
            Self::MissingReceiver { callable } => {
                write!(f, "method '{}' requires a receiver but none was supplied", callable)
            }
            Self::Argument { message } => write!(f, "{}", message),
            Self::NativeInvocation { message } => write!(f, "{}", message),
            Self::ValueConversion { message } => write!(f, "{}", message),
            Self::OutOfRange { target, value } => {
                write!(f, "value {} is out of range for type '{}'", value, target)
            }
            Self::ClosureFinalized => write!(f, "closure was invoked after it was finalized"),
            Self::SymbolNotFound { symbol } => write!(f, "native symbol '{}' not found", symbol),
        }
    }
}

impl std::error::Error for BridgeError {}

pub type Result<T> = std::result::Result<T, BridgeError>;
