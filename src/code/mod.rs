//! # Code
//!
//! This module covers the trampoline codec: pure production of the redirect
//! stub that is written over the first bytes of a hooked function. Nothing in
//! here touches process memory, so the codec can be exercised without any OS
//! privileges.

pub mod stub;

use thiserror::Error;

/// Errors when selecting a pointer width for stub generation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WidthError {
    /// The codec can only emit stubs for 4- and 8-byte pointers
    #[error("Unsupported pointer width: {0} bytes")]
    Unsupported(usize),
}

/// Pointer width of the process whose memory is being patched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    /// 4-byte pointers
    Four,
    /// 8-byte pointers
    Eight,
}

impl PointerWidth {
    /// Returns the pointer width of the running process
    pub fn native() -> Self {
        #[cfg(target_pointer_width = "64")]
        {
            Self::Eight
        }
        #[cfg(target_pointer_width = "32")]
        {
            Self::Four
        }
    }

    /// Converts a pointer size in bytes into a [`PointerWidth`], rejecting
    /// anything the codec cannot emit a stub for
    pub fn from_size(size: usize) -> Result<Self, WidthError> {
        match size {
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(WidthError::Unsupported(other)),
        }
    }

    /// Number of bytes overwritten at the source address for this width.
    ///
    /// Every snapshot and write a [`crate::hook::Hook`] performs uses this
    /// count, so captured byte buffers always line up with the stub.
    pub fn footprint(self) -> usize {
        match self {
            Self::Four => stub::FOOTPRINT_32,
            Self::Eight => stub::FOOTPRINT_64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PointerWidth, WidthError};

    #[test]
    /// Footprints are fixed constants per width
    fn test_footprints() {
        assert_eq!(PointerWidth::Eight.footprint(), 13);
        assert_eq!(PointerWidth::Four.footprint(), 6);
    }

    #[test]
    /// Only 4- and 8-byte pointers are supported
    fn test_from_size() {
        assert_eq!(PointerWidth::from_size(4), Ok(PointerWidth::Four));
        assert_eq!(PointerWidth::from_size(8), Ok(PointerWidth::Eight));
        assert_eq!(PointerWidth::from_size(2), Err(WidthError::Unsupported(2)));
        assert_eq!(
            PointerWidth::from_size(16),
            Err(WidthError::Unsupported(16))
        );
    }
}
