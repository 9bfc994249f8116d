//! # Resolve
//!
//! Address providers: turning a symbolic name into the raw function address a
//! [`crate::hook::Hook`] patches. The hook itself is agnostic to how its
//! addresses were obtained; resolution happens before a hook is constructed
//! and a failure here creates no partial hook state.

pub mod native;
pub mod table;

use std::fmt;

use thiserror::Error;

/// Errors when resolving a symbolic name to a function address
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The module could not be loaded
    #[error("Module {module:?} could not be loaded: {reason}")]
    ModuleNotFound {
        /// Module that failed to load
        module: String,
        /// Loader-reported failure reason
        reason: String,
    },
    /// The module does not export the requested symbol
    #[error("Symbol {symbol:?} not found in module {module:?}")]
    SymbolNotFound {
        /// Module that was searched
        module: String,
        /// Symbol that was missing
        symbol: String,
    },
    /// No registered method matched the query
    #[error("No method matching {query} was found")]
    MethodNotFound {
        /// Human-readable description of the query
        query: String,
    },
    /// Several methods matched and the policy requires an unambiguous match
    #[error("{count} methods match {query}; supply parameter types to disambiguate")]
    Ambiguous {
        /// Human-readable description of the query
        query: String,
        /// Number of candidates that matched
        count: usize,
    },
    /// Resolution produced a null address
    #[error("Resolved {0} to a null address")]
    NullAddress(String),
    /// A module or symbol name contained an interior NUL byte
    #[error("Invalid name: {0}")]
    InvalidName(#[from] std::ffi::NulError),
}

/// A raw address into the running process's executable memory, tagged with
/// the identity it was resolved from for diagnostics.
///
/// Construction rejects null, so every lifecycle operation downstream runs
/// against a resolved, non-zero address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionAddress {
    /// The resolved address; never zero
    addr: usize,
    /// Human-readable identity of the function, used only for diagnostics
    origin: String,
}

impl FunctionAddress {
    /// Tags `addr` with the identity it was resolved from, rejecting null
    pub fn new(addr: usize, origin: String) -> Result<Self, ResolveError> {
        if addr == 0 {
            return Err(ResolveError::NullAddress(origin));
        }
        Ok(Self { addr, origin })
    }

    /// Wraps an already-resolved raw address
    pub fn from_raw(addr: usize) -> Result<Self, ResolveError> {
        Self::new(addr, format!("{addr:#x}"))
    }

    /// The raw address value
    pub fn value(&self) -> usize {
        self.addr
    }

    /// The address as a const pointer
    pub fn as_ptr(&self) -> *const u8 {
        self.addr as *const u8
    }

    /// The address as a mutable pointer, for patch writes
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.addr as *mut u8
    }

    /// The diagnostic identity this address was resolved from
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl fmt::Display for FunctionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.origin, self.addr)
    }
}

/// Capability of producing resolved function addresses from symbolic
/// descriptors.
///
/// [`crate::hook::Hook`] consumes the produced [`FunctionAddress`] values and
/// is parameterized only by this capability, never by hook subtypes per
/// provider kind.
pub trait AddressProvider {
    /// Descriptor type this provider resolves
    type Descriptor<'a>;

    /// Resolves `descriptor` to a non-null function address
    fn resolve(&mut self, descriptor: Self::Descriptor<'_>)
        -> Result<FunctionAddress, ResolveError>;
}

#[cfg(test)]
mod tests {
    use super::{FunctionAddress, ResolveError};

    #[test]
    /// Null addresses are rejected at construction
    fn test_null_rejected() {
        let err = FunctionAddress::from_raw(0).unwrap_err();
        assert!(matches!(err, ResolveError::NullAddress(_)));
    }

    #[test]
    /// The display form carries the origin and the address
    fn test_display() {
        let addr = FunctionAddress::new(0x1000, "user32.dll!MessageBoxA".into()).unwrap();
        assert_eq!(addr.to_string(), "user32.dll!MessageBoxA (0x1000)");
        assert_eq!(addr.value(), 0x1000);
    }
}
