//! # Mem
//!
//! This module brackets raw memory writes with a scoped permission change so
//! that the executable pages a hook patches can be written safely, and
//! provides the snapshot reads the hook lifecycle depends on.

pub mod cstr;

use std::ptr;

use region::Protection;
use thiserror::Error;

/// Errors when changing page permissions around a patch write
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// Error when setting memory protections
    #[error("Error setting memory protections")]
    Protection(#[from] region::Error),
}

/// Scoped permission change over a byte range.
///
/// Acquiring the guard records the range's current protection and makes it
/// readable, writable and executable; releasing it (or dropping it) restores
/// the recorded protection on every exit path, including unwinding.
pub struct ProtectionGuard {
    /// Token holding the previous protection, restored when dropped
    _handle: region::ProtectGuard,
}

impl ProtectionGuard {
    /// Makes `len` bytes at `location` writable and executable until the
    /// guard is released.
    ///
    /// # Safety
    ///
    /// `location` must point into a mapped region valid for `len` bytes.
    pub unsafe fn acquire(location: *const u8, len: usize) -> Result<Self, ProtectionError> {
        let handle = region::protect_with_handle(location, len, Protection::READ_WRITE_EXECUTE)?;
        Ok(Self { _handle: handle })
    }

    /// Restores the previously recorded protection
    pub fn release(self) {
        // restoration happens in the handle's [`Drop`] implementation
    }
}

/// Writes `bytes` at `location` under a scoped permission change.
///
/// If the permission change cannot be acquired, the write is never attempted
/// and the page is left untouched. The permission change is scoped tightly
/// around the single copy, so the page is writable for as short a time as
/// possible.
///
/// # Safety
///
/// - `location` must point into a mapped region valid for `bytes.len()` bytes
/// - no other thread may be executing inside the written range
/// - the memory must not be tracked by Rust as `&T`/`&mut T` data
pub unsafe fn write_protected(location: *mut u8, bytes: &[u8]) -> Result<(), ProtectionError> {
    let guard = ProtectionGuard::acquire(location, bytes.len())?;
    ptr::copy_nonoverlapping(bytes.as_ptr(), location, bytes.len());
    guard.release();
    Ok(())
}

/// Snapshots `len` bytes starting at `location` into an owned buffer.
///
/// Pages being patched are readable, so no permission change is needed here.
///
/// # Safety
///
/// `location` must be valid for reads of `len` bytes.
pub unsafe fn read_bytes(location: *const u8, len: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; len];
    ptr::copy_nonoverlapping(location, buffer.as_mut_ptr(), len);
    buffer
}

#[cfg(test)]
mod tests {
    use std::slice;

    use region::Protection;

    use super::{read_bytes, write_protected};

    #[test]
    /// Writing under the guard succeeds on a page that is mapped read-only,
    /// and the page's protection is restored afterwards
    fn test_write_protected() {
        let alloc = region::alloc(region::page::size(), Protection::READ).unwrap();
        let ptr = alloc.as_ptr::<u8>() as *mut u8;

        // sanity check: the fresh mapping is read-only
        for found in region::query_range(ptr, 4).unwrap() {
            let found = found.unwrap();
            assert!(!found.is_guarded());
            assert_eq!(found.protection(), Protection::READ);
        }

        unsafe { write_protected(ptr, &[4, 3, 2, 1]).unwrap() };

        // the data was actually written
        assert_eq!(unsafe { slice::from_raw_parts(ptr, 4) }, [4, 3, 2, 1]);

        // the protection reverted once the guard released
        for found in region::query_range(ptr, 4).unwrap() {
            let found = found.unwrap();
            assert!(!found.is_guarded());
            assert_eq!(found.protection(), Protection::READ);
        }
    }

    #[test]
    /// Snapshot reads copy exactly the requested range
    fn test_read_bytes() {
        let data = [9u8, 8, 7, 6, 5];
        let snapshot = unsafe { read_bytes(data.as_ptr(), 3) };
        assert_eq!(snapshot, [9, 8, 7]);
    }

    #[test]
    /// Writes land only inside the requested range
    fn test_write_partial() {
        let alloc = region::alloc(region::page::size(), Protection::READ_WRITE).unwrap();
        let ptr = alloc.as_ptr::<u8>() as *mut u8;

        unsafe { write_protected(ptr.add(1), &[5, 5]).unwrap() };

        assert_eq!(unsafe { slice::from_raw_parts(ptr, 4) }, [0, 5, 5, 0]);
    }
}
