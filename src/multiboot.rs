//! Multiboot2 header
//!
//! Six little-endian `u32` words the bootloader scans for in the first
//! 32 KiB of the image. The words must sum to zero over magic,
//! architecture, length and checksum.

/// Multiboot2 header magic.
pub const HEADER_MAGIC: u32 = 0xE852_50D6;
/// i386 protected mode.
pub const ARCHITECTURE_I386: u32 = 0;
/// Value of the header-length field.
pub const HEADER_LENGTH: u32 = 16;

/// Value making the first four words sum to zero.
pub const fn checksum(magic: u32, architecture: u32, length: u32) -> u32 {
    0u32.wrapping_sub(magic.wrapping_add(architecture).wrapping_add(length))
}

/// The header words. The kernel binary places a copy in `.multiboot`,
/// which the linker script puts first in the image.
pub const HEADER: [u32; 6] = [
    HEADER_MAGIC,
    ARCHITECTURE_I386,
    HEADER_LENGTH,
    checksum(HEADER_MAGIC, ARCHITECTURE_I386, HEADER_LENGTH),
    0,
    12,
];
