//! This module generates the jump stubs written over a hooked function.
//!
//! The caller must guarantee that the first [`FOOTPRINT_64`] (or
//! [`FOOTPRINT_32`]) bytes at the source form a self-contained instruction
//! run with no jumps landing inside that range; the codec has no way to
//! verify this.

use std::mem;

use super::PointerWidth;

/// Bytes overwritten at the source address on 8-byte-pointer processes
pub const FOOTPRINT_64: usize = 13;
/// Bytes overwritten at the source address on 4-byte-pointer processes
pub const FOOTPRINT_32: usize = 6;

#[repr(packed)]
/// Struct helper for generating an absolute jump through a scratch register
struct JmpAbs {
    /// `mov r11, imm64` opcode bytes
    mov: [u8; 2],
    /// Absolute address loaded into r11
    target: u64,
    /// `jmp r11`
    jmp: [u8; 3],
}

#[repr(packed)]
/// Struct helper for generating a near relative jump
struct JmpRel {
    /// `jmp rel32` opcode
    jmp: u8,
    /// Signed displacement from the end of the 5-byte jmp instruction
    displacement: i32,
    /// Unreachable `ret` so the stub fills the uniform capture footprint
    pad: u8,
}

/// Generates the redirect stub transferring control from `source` to `target`
/// for the given pointer width. The returned buffer is always exactly
/// [`PointerWidth::footprint`] bytes long.
pub fn encode(source: usize, target: usize, width: PointerWidth) -> Vec<u8> {
    match width {
        PointerWidth::Eight => jmp_abs(target).to_vec(),
        PointerWidth::Four => jmp_rel(source, target).to_vec(),
    }
}

/// Generates an absolute jump to `target` and returns bytecode.
///
/// The destination is embedded as an 8-byte immediate, so there is no
/// distance limit between the stub and `target`.
pub fn jmp_abs(target: usize) -> [u8; mem::size_of::<JmpAbs>()] {
    unsafe {
        mem::transmute(JmpAbs {
            mov: [0x49, 0xbb],
            target: target as u64,
            jmp: [0x41, 0xff, 0xe3],
        })
    }
}

/// Generates a near relative jump from `source` to `target` and returns
/// bytecode. The trailing `ret` byte is never executed; it pads the stub to
/// the uniform 6-byte footprint used by snapshots.
pub fn jmp_rel(source: usize, target: usize) -> [u8; mem::size_of::<JmpRel>()] {
    // Displacement is relative to the instruction following the 5-byte jmp.
    let displacement = (target as u32).wrapping_sub((source as u32).wrapping_add(5)) as i32;
    unsafe {
        mem::transmute(JmpRel {
            jmp: 0xe9,
            displacement,
            pad: 0xc3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{encode, jmp_abs, jmp_rel};
    use crate::code::PointerWidth;

    #[test]
    /// Stub length always matches the advertised footprint
    fn test_encode_len() {
        for width in [PointerWidth::Four, PointerWidth::Eight] {
            assert_eq!(
                encode(0x1000, 0x2000, width).len(),
                width.footprint(),
                "{width:?}"
            );
        }
    }

    #[test]
    /// The 8-byte-pointer stub is `mov r11, target; jmp r11`
    fn test_jmp_abs_encoding() {
        let stub = jmp_abs(0x1122_3344_5566_7788);
        assert_eq!(
            stub,
            [0x49, 0xbb, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x41, 0xff, 0xe3]
        );
    }

    #[test]
    /// Forward relative jump encodes `target - (source + 5)`
    fn test_jmp_rel_forward() {
        let stub = jmp_rel(0x1000, 0x2000);
        // 0x2000 - 0x1005 = 0xffb
        assert_eq!(stub, [0xe9, 0xfb, 0x0f, 0x00, 0x00, 0xc3]);
    }

    #[test]
    /// Backward relative jump encodes a negative displacement
    fn test_jmp_rel_backward() {
        let stub = jmp_rel(0x2000, 0x1000);
        // 0x1000 - 0x2005 = -0x1005
        let displacement = i32::from_le_bytes([stub[1], stub[2], stub[3], stub[4]]);
        assert_eq!(stub[0], 0xe9);
        assert_eq!(displacement, -0x1005);
        assert_eq!(stub[5], 0xc3);
    }
}
