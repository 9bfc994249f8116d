//! This module decodes raw text buffers observed through call-through
//! arguments. It is a convenience for inspection, not part of the detouring
//! contract.

/// Reads an ASCII string terminated by two consecutive NUL bytes starting at
/// `ptr`.
///
/// Single NUL bytes inside the buffer are skipped rather than treated as a
/// terminator; reading stops only once two NULs in a row are observed. Bytes
/// outside the ASCII range are replaced with the Unicode replacement
/// character.
///
/// # Safety
///
/// `ptr` must be readable up to and including the double-NUL terminator.
pub unsafe fn read_ascii_double_nul(ptr: *const u8) -> String {
    let mut bytes = Vec::new();
    let mut offset = 0;

    loop {
        let cur = *ptr.add(offset);
        offset += 1;
        if cur != 0 {
            bytes.push(cur);
        }

        let next = *ptr.add(offset);
        if cur == 0 && next == 0 {
            break;
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}
