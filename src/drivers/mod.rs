//! Device drivers for Ferrite
//!
//! - `vga`: text-mode console, the kernel's diagnostic sink
//! - `keyboard`: polled PS/2 keyboard

pub mod keyboard;
pub mod vga;
