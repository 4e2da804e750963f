//! Raw ABI cells and their libffi type mapping
//!
//! A `RawCell` has no tag of its own; every read goes through the
//! `TypeDescriptor` it was produced for.

use crate::introspection::{InterfaceInfo, TypeDescriptor};
use core::ffi::c_void;
use libffi::middle::Type;

/// Untagged native value container
#[repr(C)]
#[derive(Copy, Clone)]
pub union RawCell {
    /// gboolean (C int)
    pub boolean: i32,
    pub i8: i8,
    pub u8: u8,
    pub i16: i16,
    pub u16: u16,
    pub i32: i32,
    pub u32: u32,
    pub i64: i64,
    pub u64: u64,
    pub f32: f32,
    pub f64: f64,
    /// GType
    pub usize: usize,
    pub ptr: *mut c_void,
}

impl RawCell {
    #[inline]
    pub const fn zeroed() -> Self {
        Self { u64: 0 }
    }

    #[inline]
    pub const fn null() -> Self {
        Self { ptr: core::ptr::null_mut() }
    }

    #[inline]
    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        Self { ptr }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        unsafe { self.ptr }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.as_ptr().is_null()
    }

    /// Read one argument of type `ty` from the memory libffi hands a closure
    ///
    /// # Safety
    /// `src` must point to a readable value of the ABI type of `ty`.
    pub unsafe fn read(src: *const c_void, ty: &TypeDescriptor) -> Self {
        match abi_kind(ty) {
            AbiKind::Void => Self::zeroed(),
            AbiKind::I8 => Self { i8: *(src as *const i8) },
            AbiKind::U8 => Self { u8: *(src as *const u8) },
            AbiKind::I16 => Self { i16: *(src as *const i16) },
            AbiKind::U16 => Self { u16: *(src as *const u16) },
            AbiKind::I32 => Self { i32: *(src as *const i32) },
            AbiKind::U32 => Self { u32: *(src as *const u32) },
            AbiKind::I64 => Self { i64: *(src as *const i64) },
            AbiKind::U64 => Self { u64: *(src as *const u64) },
            AbiKind::F32 => Self { f32: *(src as *const f32) },
            AbiKind::F64 => Self { f64: *(src as *const f64) },
            AbiKind::USize => Self { usize: *(src as *const usize) },
            AbiKind::Pointer => Self { ptr: *(src as *const *mut c_void) },
        }
    }

    /// Widen an integral return value to the full return register
    ///
    /// libffi closures must store integral results narrower than `ffi_arg`
    /// as a full `ffi_arg`.
    pub fn widen_return(self, ty: &TypeDescriptor) -> Self {
        unsafe {
            match abi_kind(ty) {
                AbiKind::I8 => Self { i64: self.i8 as i64 },
                AbiKind::U8 => Self { u64: self.u8 as u64 },
                AbiKind::I16 => Self { i64: self.i16 as i64 },
                AbiKind::U16 => Self { u64: self.u16 as u64 },
                AbiKind::I32 => Self { i64: self.i32 as i64 },
                AbiKind::U32 => Self { u64: self.u32 as u64 },
                _ => self,
            }
        }
    }

    /// Inverse of `widen_return` for values captured from a forward call
    pub fn narrow_return(self, ty: &TypeDescriptor) -> Self {
        unsafe {
            match abi_kind(ty) {
                AbiKind::I8 => Self { i8: self.u64 as i8 },
                AbiKind::U8 => Self { u8: self.u64 as u8 },
                AbiKind::I16 => Self { i16: self.u64 as i16 },
                AbiKind::U16 => Self { u16: self.u64 as u16 },
                AbiKind::I32 => Self { i32: self.u64 as i32 },
                AbiKind::U32 => Self { u32: self.u64 as u32 },
                _ => self,
            }
        }
    }
}

impl Default for RawCell {
    #[inline]
    fn default() -> Self {
        Self::zeroed()
    }
}

impl core::fmt::Debug for RawCell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "RawCell({:#018x})", unsafe { self.u64 })
    }
}

/// Machine-level shape of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiKind {
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    USize,
    Pointer,
}

impl AbiKind {
    /// Storage size in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::USize | Self::Pointer => core::mem::size_of::<usize>(),
        }
    }

    /// Integer width and signedness
    #[inline]
    pub const fn integer_layout(self) -> Option<(u32, bool)> {
        match self {
            Self::I8 => Some((8, true)),
            Self::U8 => Some((8, false)),
            Self::I16 => Some((16, true)),
            Self::U16 => Some((16, false)),
            Self::I32 => Some((32, true)),
            Self::U32 => Some((32, false)),
            Self::I64 => Some((64, true)),
            Self::U64 => Some((64, false)),
            Self::USize => Some((usize::BITS, false)),
            _ => None,
        }
    }
}

pub fn abi_kind(ty: &TypeDescriptor) -> AbiKind {
    match ty {
        TypeDescriptor::Void => AbiKind::Void,
        TypeDescriptor::Boolean | TypeDescriptor::Int32 => AbiKind::I32,
        TypeDescriptor::Int8 => AbiKind::I8,
        TypeDescriptor::UInt8 => AbiKind::U8,
        TypeDescriptor::Int16 => AbiKind::I16,
        TypeDescriptor::UInt16 => AbiKind::U16,
        TypeDescriptor::UInt32 | TypeDescriptor::Unichar => AbiKind::U32,
        TypeDescriptor::Int64 => AbiKind::I64,
        TypeDescriptor::UInt64 => AbiKind::U64,
        TypeDescriptor::Float => AbiKind::F32,
        TypeDescriptor::Double => AbiKind::F64,
        TypeDescriptor::GType => AbiKind::USize,
        TypeDescriptor::Interface(InterfaceInfo::Enum(_)) => AbiKind::I32,
        TypeDescriptor::Interface(InterfaceInfo::Flags(_)) => AbiKind::U32,
        TypeDescriptor::Utf8
        | TypeDescriptor::Filename
        | TypeDescriptor::Interface(_)
        | TypeDescriptor::Array { .. }
        | TypeDescriptor::GList(_)
        | TypeDescriptor::GSList(_)
        | TypeDescriptor::GHash(..)
        | TypeDescriptor::Error => AbiKind::Pointer,
    }
}

/// libffi type used to pass or return a value of `ty`
pub fn ffi_type(ty: &TypeDescriptor) -> Type {
    match abi_kind(ty) {
        AbiKind::Void => Type::void(),
        AbiKind::I8 => Type::i8(),
        AbiKind::U8 => Type::u8(),
        AbiKind::I16 => Type::i16(),
        AbiKind::U16 => Type::u16(),
        AbiKind::I32 => Type::i32(),
        AbiKind::U32 => Type::u32(),
        AbiKind::I64 => Type::i64(),
        AbiKind::U64 => Type::u64(),
        AbiKind::F32 => Type::f32(),
        AbiKind::F64 => Type::f64(),
        AbiKind::USize => Type::usize(),
        AbiKind::Pointer => Type::pointer(),
    }
}
