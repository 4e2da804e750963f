//! Type and callable descriptors
//!
//! Descriptors are immutable once built and shared through `Rc`; the last
//! owner dropping its handle releases them.

use core::ffi::c_void;
use std::fmt;
use std::rc::Rc;

/// Native `ref` function of a reference-counted instance type
pub type RefFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
/// Native `unref` function of a reference-counted instance type
pub type UnrefFn = unsafe extern "C" fn(*mut c_void);
/// Boxed copy function
pub type BoxedCopyFn = unsafe extern "C" fn(*const c_void) -> *mut c_void;
/// Boxed free function
pub type BoxedFreeFn = unsafe extern "C" fn(*mut c_void);

/// Storage convention of a native array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    /// Plain C array (`T*`)
    C,
    /// Growable array (`GArray`)
    Array,
    /// Pointer array (`GPtrArray`)
    PtrArray,
    /// Byte array (`GByteArray`)
    ByteArray,
}

/// Recursive type descriptor for one native value
#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    Void,
    Boolean,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    GType,
    Unichar,
    Utf8,
    Filename,
    Interface(InterfaceInfo),
    Array {
        element: Box<TypeDescriptor>,
        kind: ArrayKind,
        zero_terminated: bool,
        fixed_size: Option<usize>,
    },
    GList(Box<TypeDescriptor>),
    GSList(Box<TypeDescriptor>),
    GHash(Box<TypeDescriptor>, Box<TypeDescriptor>),
    Error,
}

impl TypeDescriptor {
    /// Display name of the type tag
    pub fn tag_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Boolean => "gboolean",
            Self::Int8 => "gint8",
            Self::UInt8 => "guint8",
            Self::Int16 => "gint16",
            Self::UInt16 => "guint16",
            Self::Int32 => "gint32",
            Self::UInt32 => "guint32",
            Self::Int64 => "gint64",
            Self::UInt64 => "guint64",
            Self::Float => "gfloat",
            Self::Double => "gdouble",
            Self::GType => "GType",
            Self::Unichar => "gunichar",
            Self::Utf8 => "utf8",
            Self::Filename => "filename",
            Self::Interface(_) => "interface",
            Self::Array { .. } => "array",
            Self::GList(_) => "GList",
            Self::GSList(_) => "GSList",
            Self::GHash(..) => "GHashTable",
            Self::Error => "GError",
        }
    }

    /// Zero-terminated C array of `element`
    pub fn c_array(element: TypeDescriptor) -> Self {
        Self::Array {
            element: Box::new(element),
            kind: ArrayKind::C,
            zero_terminated: true,
            fixed_size: None,
        }
    }

    pub fn object(info: Rc<ObjectInfo>) -> Self {
        Self::Interface(InterfaceInfo::Object(info))
    }

    pub fn structure(info: Rc<StructInfo>) -> Self {
        Self::Interface(InterfaceInfo::Struct(info))
    }

    pub fn callback(signature: Rc<CallableDescriptor>) -> Self {
        Self::Interface(InterfaceInfo::Callback(signature))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Whether the native representation is a pointer
    pub fn is_pointer(&self) -> bool {
        match self {
            Self::Utf8
            | Self::Filename
            | Self::Array { .. }
            | Self::GList(_)
            | Self::GSList(_)
            | Self::GHash(..)
            | Self::Error => true,
            Self::Interface(info) => info.is_pointer(),
            _ => false,
        }
    }
}

/// Resolved interface of a `TypeDescriptor::Interface`
#[derive(Debug, Clone)]
pub enum InterfaceInfo {
    Object(Rc<ObjectInfo>),
    Struct(Rc<StructInfo>),
    Enum(Rc<EnumInfo>),
    Flags(Rc<EnumInfo>),
    /// The generic value container
    Value,
    Callback(Rc<CallableDescriptor>),
}

impl InterfaceInfo {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::Struct(info) => match info.kind {
                StructKind::Struct => "struct",
                StructKind::Union => "union",
                StructKind::Boxed => "boxed",
            },
            Self::Enum(_) => "enum",
            Self::Flags(_) => "flags",
            Self::Value => "value",
            Self::Callback(_) => "callback",
        }
    }

    pub fn is_pointer(&self) -> bool {
        !matches!(self, Self::Enum(_) | Self::Flags(_))
    }

    pub fn name(&self) -> String {
        match self {
            Self::Object(info) => info.name.clone(),
            Self::Struct(info) => info.name.clone(),
            Self::Enum(info) | Self::Flags(info) => info.name.clone(),
            Self::Value => "Value".to_string(),
            Self::Callback(info) => info.name.clone(),
        }
    }
}

/// Registered instance (object) type
pub struct ObjectInfo {
    pub namespace: String,
    pub name: String,
    pub parent: Option<Rc<ObjectInfo>>,
    pub ref_fn: Option<RefFn>,
    pub unref_fn: Option<UnrefFn>,
    pub signals: Vec<(String, Rc<CallableDescriptor>)>,
    pub methods: Vec<Rc<CallableDescriptor>>,
}

impl ObjectInfo {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            parent: None,
            ref_fn: None,
            unref_fn: None,
            signals: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: Rc<ObjectInfo>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_refcount(mut self, ref_fn: RefFn, unref_fn: UnrefFn) -> Self {
        self.ref_fn = Some(ref_fn);
        self.unref_fn = Some(unref_fn);
        self
    }

    pub fn with_signal(mut self, name: &str, signature: CallableDescriptor) -> Self {
        self.signals.push((name.to_string(), Rc::new(signature)));
        self
    }

    pub fn with_method(mut self, method: CallableDescriptor) -> Self {
        self.methods.push(Rc::new(method));
        self
    }

    /// Signal declared on this type or any ancestor
    pub fn find_signal(&self, name: &str) -> Option<Rc<CallableDescriptor>> {
        self.signals
            .iter()
            .find(|(signal, _)| signal == name)
            .map(|(_, info)| info.clone())
            .or_else(|| self.parent.as_ref().and_then(|p| p.find_signal(name)))
    }

    pub fn find_method(&self, name: &str) -> Option<Rc<CallableDescriptor>> {
        self.methods
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|p| p.find_method(name)))
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl fmt::Debug for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectInfo")
            .field("name", &self.qualified_name())
            .field("signals", &self.signals.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Struct,
    Union,
    Boxed,
}

/// Boxed copy/free pair registered for an aggregate type
#[derive(Clone, Copy)]
pub struct BoxedFuncs {
    pub copy: BoxedCopyFn,
    pub free: BoxedFreeFn,
}

/// Registered struct, union or boxed type
pub struct StructInfo {
    pub namespace: String,
    pub name: String,
    pub kind: StructKind,
    /// Declared byte size
    pub size: usize,
    pub boxed: Option<BoxedFuncs>,
    pub methods: Vec<Rc<CallableDescriptor>>,
}

impl StructInfo {
    pub fn new(namespace: &str, name: &str, kind: StructKind, size: usize) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
            size,
            boxed: None,
            methods: Vec::new(),
        }
    }

    pub fn with_boxed(mut self, copy: BoxedCopyFn, free: BoxedFreeFn) -> Self {
        self.boxed = Some(BoxedFuncs { copy, free });
        self
    }

    pub fn with_method(mut self, method: CallableDescriptor) -> Self {
        self.methods.push(Rc::new(method));
        self
    }

    pub fn is_boxed(&self) -> bool {
        self.kind == StructKind::Boxed || self.boxed.is_some()
    }

    /// Zero-argument constructor, else any method named `new`
    pub fn find_constructor(&self) -> Option<Rc<CallableDescriptor>> {
        self.methods
            .iter()
            .find(|m| m.kind == CallableKind::Constructor && m.in_arity() == 0)
            .or_else(|| self.methods.iter().find(|m| m.name == "new"))
            .cloned()
    }

    pub fn find_method(&self, name: &str) -> Option<Rc<CallableDescriptor>> {
        self.methods.iter().find(|m| m.name == name).cloned()
    }

    /// Same registered type: identical info, or same name and layout size
    pub fn is_same_type(&self, other: &StructInfo) -> bool {
        core::ptr::eq(self, other)
            || (self.namespace == other.namespace && self.name == other.name && self.size == other.size)
    }
}

impl fmt::Debug for StructInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructInfo")
            .field("name", &format!("{}.{}", self.namespace, self.name))
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish()
    }
}

/// Registered enumeration or flags type
#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub namespace: String,
    pub name: String,
    pub members: Vec<(String, i64)>,
}

impl EnumInfo {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, name: &str, value: i64) -> Self {
        self.members.push((name.to_string(), value));
        self
    }

    pub fn value_of(&self, member: &str) -> Option<i64> {
        self.members.iter().find(|(n, _)| n == member).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// Ownership transfer of a value crossing the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transfer {
    #[default]
    Nothing,
    Container,
    Everything,
}

/// Lifetime of a trampoline created for a callback-typed parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackScope {
    /// Valid for the duration of the call
    #[default]
    Call,
    /// Kept alive as long as the runtime
    Forever,
}

#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    pub name: String,
    pub direction: Direction,
    pub nullable: bool,
    pub caller_allocates: bool,
    pub ty: TypeDescriptor,
    pub transfer: Transfer,
    pub scope: CallbackScope,
}

impl ParamDescriptor {
    pub fn new(name: &str, ty: TypeDescriptor) -> Self {
        Self {
            name: name.to_string(),
            direction: Direction::In,
            nullable: false,
            caller_allocates: false,
            ty,
            transfer: Transfer::Nothing,
            scope: CallbackScope::Call,
        }
    }

    pub fn out(mut self) -> Self {
        self.direction = Direction::Out;
        self
    }

    pub fn inout(mut self) -> Self {
        self.direction = Direction::InOut;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn caller_allocates(mut self) -> Self {
        self.caller_allocates = true;
        self
    }

    pub fn transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn scope(mut self, scope: CallbackScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn is_in(&self) -> bool {
        matches!(self.direction, Direction::In | Direction::InOut)
    }

    pub fn is_out(&self) -> bool {
        matches!(self.direction, Direction::Out | Direction::InOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Function,
    Method,
    Constructor,
    VFunc,
    Signal,
    Callback,
}

/// Where the native entry point of a callable lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    None,
    Address(usize),
    Name(String),
}

#[derive(Debug, Clone)]
pub struct CallableDescriptor {
    pub namespace: String,
    pub name: String,
    pub kind: CallableKind,
    pub params: Vec<ParamDescriptor>,
    pub return_type: TypeDescriptor,
    pub return_transfer: Transfer,
    pub skip_return: bool,
    pub can_throw: bool,
    pub symbol: Symbol,
}

impl CallableDescriptor {
    pub fn new(kind: CallableKind, name: &str) -> Self {
        Self {
            namespace: String::new(),
            name: name.to_string(),
            kind,
            params: Vec::new(),
            return_type: TypeDescriptor::Void,
            return_transfer: Transfer::Nothing,
            skip_return: false,
            can_throw: false,
            symbol: Symbol::None,
        }
    }

    pub fn function(name: &str) -> Self {
        Self::new(CallableKind::Function, name)
    }

    pub fn method(name: &str) -> Self {
        Self::new(CallableKind::Method, name)
    }

    pub fn constructor(name: &str) -> Self {
        Self::new(CallableKind::Constructor, name)
    }

    pub fn signal(name: &str) -> Self {
        Self::new(CallableKind::Signal, name)
    }

    pub fn callback(name: &str) -> Self {
        Self::new(CallableKind::Callback, name)
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, ty: TypeDescriptor) -> Self {
        self.return_type = ty;
        self
    }

    pub fn returns_owned(mut self, ty: TypeDescriptor, transfer: Transfer) -> Self {
        self.return_type = ty;
        self.return_transfer = transfer;
        self
    }

    pub fn skip_return(mut self) -> Self {
        self.skip_return = true;
        self
    }

    pub fn throws(mut self) -> Self {
        self.can_throw = true;
        self
    }

    pub fn address(mut self, entry: *const c_void) -> Self {
        self.symbol = Symbol::Address(entry as usize);
        self
    }

    pub fn symbol_name(mut self, name: &str) -> Self {
        self.symbol = Symbol::Name(name.to_string());
        self
    }

    /// Methods take their receiver as the first native argument
    pub fn is_method(&self) -> bool {
        matches!(self.kind, CallableKind::Method | CallableKind::VFunc)
    }

    pub fn param_at(&self, index: usize) -> Option<&ParamDescriptor> {
        self.params.get(index)
    }

    /// Number of scripting-visible (IN/INOUT) parameters
    pub fn in_arity(&self) -> usize {
        self.params.iter().filter(|p| p.is_in()).count()
    }

    pub fn out_arity(&self) -> usize {
        self.params.iter().filter(|p| p.is_out()).count()
    }

    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}
