//! PS/2 keyboard poller
//!
//! Reads set-1 scancodes from the 8042 controller and translates key
//! presses on a US QWERTY layout. No interrupt handler is installed at
//! this stage of boot, so the kernel polls.

use crate::arch::PortIo;

/// 8042 data port.
pub const DATA_PORT: u16 = 0x60;
/// 8042 status port.
pub const STATUS_PORT: u16 = 0x64;
/// Status bit: output buffer holds a byte for us.
pub const STATUS_OUTPUT_FULL: u8 = 1 << 0;

/// Set by the controller on key release.
const RELEASE_BIT: u8 = 0x80;

/// Scancode set 1 to ASCII; 0 = no printable character.
#[rustfmt::skip]
static KEYMAP: [u8; 128] = [
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08,
    b'\t', b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0,
    b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\',
    b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ',
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0,
];

/// Translate a scancode. Releases and keys without a character yield `None`.
pub fn translate(scancode: u8) -> Option<u8> {
    if scancode & RELEASE_BIT != 0 {
        return None;
    }
    match KEYMAP[scancode as usize] {
        0 => None,
        ch => Some(ch),
    }
}

/// Read one pending scancode, if any, and translate it.
pub fn poll<P: PortIo>(io: &mut P) -> Option<u8> {
    // SAFETY: reading the 8042 status port has no side effects; the data
    // port is only read when the controller reports a byte waiting.
    unsafe {
        if io.inb(STATUS_PORT) & STATUS_OUTPUT_FULL == 0 {
            return None;
        }
        translate(io.inb(DATA_PORT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimulatedHardware;

    #[test]
    fn test_translate_presses() {
        assert_eq!(translate(0x1E), Some(b'a'));
        assert_eq!(translate(0x02), Some(b'1'));
        assert_eq!(translate(0x1C), Some(b'\n'));
        assert_eq!(translate(0x39), Some(b' '));
    }

    #[test]
    fn test_translate_ignores_releases_and_modifiers() {
        assert_eq!(translate(0x9E), None);
        assert_eq!(translate(0x2A), None); // left shift
        assert_eq!(translate(0x3B), None); // F1
    }

    #[test]
    fn test_poll_drains_controller() {
        let mut hw = SimulatedHardware::new();
        assert_eq!(poll(&mut hw), None);

        hw.push_scancode(0x23); // h
        hw.push_scancode(0xA3); // h released
        hw.push_scancode(0x17); // i
        assert_eq!(poll(&mut hw), Some(b'h'));
        assert_eq!(poll(&mut hw), None);
        assert_eq!(poll(&mut hw), Some(b'i'));
        assert_eq!(poll(&mut hw), None);
    }
}
