//! This module resolves exported symbols of native modules loaded into the
//! process, caching module handles so repeated lookups do not reload.

use std::collections::HashMap;

use log::debug;

use super::{AddressProvider, FunctionAddress, ResolveError};

/// A module/symbol pair naming a native export
#[derive(Debug, Clone, Copy)]
pub struct Export<'a> {
    /// Module file name, including the extension where the platform expects
    /// one (e.g. `"user32.dll"`, `"libc.so.6"`)
    pub module: &'a str,
    /// Exported symbol name
    pub symbol: &'a str,
}

/// Opaque handle to a loaded module
#[derive(Clone, Copy)]
struct ModuleHandle(*mut std::ffi::c_void);

// SAFETY: a module handle is a process-global identifier returned by the
// loader, not thread-local state.
unsafe impl Send for ModuleHandle {}
unsafe impl Sync for ModuleHandle {}

/// Resolves exported symbols, caching loaded-module handles for its own
/// lifetime.
///
/// The cache is owned by the resolver instance rather than being
/// process-global, so the host decides when it is constructed and torn down.
/// Cached modules are intentionally never unloaded: hooks may still point
/// into them.
#[derive(Default)]
pub struct ExportResolver {
    /// Handle cache keyed by module name
    modules: HashMap<String, ModuleHandle>,
}

impl ExportResolver {
    /// Creates a resolver with an empty module cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `symbol` from `module`, loading the module on first use and
    /// reusing the cached handle afterwards
    pub fn resolve(&mut self, module: &str, symbol: &str) -> Result<FunctionAddress, ResolveError> {
        let handle = match self.modules.get(module) {
            Some(handle) => *handle,
            None => {
                let handle = platform::load_module(module)?;
                debug!("cached module handle for {module:?}");
                self.modules.insert(module.to_owned(), handle);
                handle
            }
        };

        let addr = platform::find_symbol(handle, module, symbol)?;
        FunctionAddress::new(addr, format!("{module}!{symbol}"))
    }
}

impl AddressProvider for ExportResolver {
    type Descriptor<'a> = Export<'a>;

    fn resolve(&mut self, descriptor: Export<'_>) -> Result<FunctionAddress, ResolveError> {
        ExportResolver::resolve(self, descriptor.module, descriptor.symbol)
    }
}

#[cfg(unix)]
/// Loader bindings for unix-like platforms
mod platform {
    use std::ffi::{CStr, CString};

    use super::super::ResolveError;
    use super::ModuleHandle;

    /// Loads (or finds the already-loaded) `module` via `dlopen`
    pub fn load_module(module: &str) -> Result<ModuleHandle, ResolveError> {
        let name = CString::new(module)?;
        let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_LAZY) };
        if handle.is_null() {
            return Err(ResolveError::ModuleNotFound {
                module: module.to_owned(),
                reason: last_loader_error(),
            });
        }
        Ok(ModuleHandle(handle))
    }

    /// Finds `symbol` in the loaded module via `dlsym`
    pub fn find_symbol(
        handle: ModuleHandle,
        module: &str,
        symbol: &str,
    ) -> Result<usize, ResolveError> {
        let name = CString::new(symbol)?;
        let addr = unsafe { libc::dlsym(handle.0, name.as_ptr()) };
        if addr.is_null() {
            return Err(ResolveError::SymbolNotFound {
                module: module.to_owned(),
                symbol: symbol.to_owned(),
            });
        }
        Ok(addr as usize)
    }

    /// Formats the most recent `dlerror` message
    fn last_loader_error() -> String {
        let err = unsafe { libc::dlerror() };
        if err.is_null() {
            "unknown loader failure".to_owned()
        } else {
            unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
        }
    }
}

#[cfg(windows)]
/// Loader bindings for windows
mod platform {
    use std::ffi::CString;

    use windows::core::PCSTR;
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress, LoadLibraryA};

    use super::super::ResolveError;
    use super::ModuleHandle;

    /// Finds the already-loaded `module`, loading it if necessary
    pub fn load_module(module: &str) -> Result<ModuleHandle, ResolveError> {
        let name = CString::new(module)?;
        let name = PCSTR(name.as_ptr() as *const u8);
        let handle = unsafe { GetModuleHandleA(name) }
            .or_else(|_| unsafe { LoadLibraryA(name) })
            .map_err(|e| ResolveError::ModuleNotFound {
                module: module.to_owned(),
                reason: format!("{e}"),
            })?;
        Ok(ModuleHandle(handle.0))
    }

    /// Finds `symbol` in the loaded module via `GetProcAddress`
    pub fn find_symbol(
        handle: ModuleHandle,
        module: &str,
        symbol: &str,
    ) -> Result<usize, ResolveError> {
        let name = CString::new(symbol)?;
        let addr =
            unsafe { GetProcAddress(HMODULE(handle.0), PCSTR(name.as_ptr() as *const u8)) };
        match addr {
            Some(f) => Ok(f as usize),
            None => Err(ResolveError::SymbolNotFound {
                module: module.to_owned(),
                symbol: symbol.to_owned(),
            }),
        }
    }
}

#[cfg(all(test, target_os = "linux", target_env = "gnu"))]
mod tests {
    use super::ExportResolver;
    use crate::resolve::ResolveError;

    #[test]
    /// A well-known libc export resolves to a non-zero address and the module
    /// handle is cached across lookups
    fn test_resolve_libc() {
        let mut resolver = ExportResolver::new();

        let strlen = resolver.resolve("libc.so.6", "strlen").unwrap();
        assert_ne!(strlen.value(), 0);
        assert_eq!(strlen.origin(), "libc.so.6!strlen");

        let strcmp = resolver.resolve("libc.so.6", "strcmp").unwrap();
        assert_ne!(strcmp.value(), 0);
        assert_eq!(resolver.modules.len(), 1);
    }

    #[test]
    /// A missing symbol reports which module was searched
    fn test_missing_symbol() {
        let mut resolver = ExportResolver::new();
        let err = resolver
            .resolve("libc.so.6", "definitely_not_an_export")
            .unwrap_err();
        assert!(matches!(err, ResolveError::SymbolNotFound { .. }));
    }

    #[test]
    /// A missing module fails with the loader's reason
    fn test_missing_module() {
        let mut resolver = ExportResolver::new();
        let err = resolver
            .resolve("libhookpatch_does_not_exist.so", "anything")
            .unwrap_err();
        assert!(matches!(err, ResolveError::ModuleNotFound { .. }));
    }
}

#[cfg(all(test, windows))]
mod tests {
    use super::ExportResolver;

    #[test]
    /// The user32 MessageBoxA export resolves to a non-zero address
    fn test_resolve_user32() {
        let mut resolver = ExportResolver::new();
        let addr = resolver.resolve("user32.dll", "MessageBoxA").unwrap();
        assert_ne!(addr.value(), 0);
        assert_eq!(addr.origin(), "user32.dll!MessageBoxA");
    }
}
