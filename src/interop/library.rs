//! Dynamic library loading and symbol resolution over dlopen/dlsym

use core::ffi::{c_char, c_void};
use core::ptr::NonNull;
use std::ffi::{CStr, CString};

/// Handle to a dynamically loaded library
pub struct Library {
    handle: NonNull<c_void>,
}

fn last_dl_error() -> String {
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "Unknown error".into()
        } else {
            CStr::from_ptr(err as *const c_char).to_string_lossy().into_owned()
        }
    }
}

impl Library {
    /// Load library by name
    ///
    /// Searches standard library paths. Use `load_path` for absolute paths.
    pub fn load(name: &str) -> Result<Self, LoadError> {
        let cname = CString::new(name).map_err(|_| LoadError::InvalidName)?;
        Self::open(cname.as_ptr())
    }

    /// Load library from an absolute path
    pub fn load_path(path: &str) -> Result<Self, LoadError> {
        if !path.starts_with('/') {
            return Err(LoadError::InvalidName);
        }
        Self::load(path)
    }

    /// The running process and everything already linked into it
    pub fn this() -> Result<Self, LoadError> {
        Self::open(core::ptr::null())
    }

    fn open(name: *const c_char) -> Result<Self, LoadError> {
        let handle = unsafe { libc::dlopen(name, libc::RTLD_NOW) };
        NonNull::new(handle)
            .map(|handle| Self { handle })
            .ok_or_else(|| LoadError::LoadFailed(last_dl_error()))
    }

    /// Get function pointer by symbol name
    pub fn symbol(&self, name: &str) -> Result<*const c_void, SymbolError> {
        let cname = CString::new(name).map_err(|_| SymbolError::InvalidName)?;
        let ptr = unsafe { libc::dlsym(self.handle.as_ptr(), cname.as_ptr()) };
        if ptr.is_null() {
            Err(SymbolError::NotFound)
        } else {
            Ok(ptr as *const c_void)
        }
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }
}

/// Library loading errors
#[derive(Debug)]
pub enum LoadError {
    InvalidName,
    LoadFailed(String),
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid library name"),
            Self::LoadFailed(msg) => write!(f, "Failed to load library: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

/// Symbol lookup errors
#[derive(Debug)]
pub enum SymbolError {
    InvalidName,
    NotFound,
}

impl core::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid symbol name"),
            Self::NotFound => write!(f, "Symbol not found"),
        }
    }
}

impl std::error::Error for SymbolError {}
