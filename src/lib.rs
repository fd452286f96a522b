//! Ferrite - minimal i386 kernel core
//!
//! Brings a 32-bit x86 machine from the bootloader hand-off to paging
//! enabled over an identity-mapped low 4MB.
//!
//! # Components
//! - `mm::frame`: bitmap physical frame allocator
//! - `mm::paging`: page directory / page table entry formats
//! - `mm::mapper`: the paging context (one directory, one low table)
//! - `boot`: the bootstrap sequence tying them together
//!
//! # Support
//! - `arch`: hardware access, real (`x86`) and simulated (`sim`)
//! - `drivers`: VGA text console, polled PS/2 keyboard
//! - `logger`: `log` backend on the console
//! - `multiboot`: the Multiboot2 header
//!
//! The crate is `no_std`; unit tests run on the host against the
//! simulated hardware.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arch;
pub mod boot;
pub mod drivers;
pub mod logger;
pub mod mm;
pub mod multiboot;

/// Kernel version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
