//! Hardware access layer
//!
//! Every privileged operation the kernel performs goes through one of two
//! traits:
//! - [`Hardware`]: paging control registers, interrupt flag and the
//!   registers the boot code inspects (stack/instruction pointer, CPL)
//! - [`PortIo`]: `in`/`out` on the I/O port space
//!
//! [`x86::X86`] issues the real instructions. [`sim::SimulatedHardware`]
//! models them in software so the allocator, mapper and boot sequence can
//! be exercised without a CPU in protected mode.

pub mod sim;
#[cfg(target_arch = "x86")]
pub mod x86;

use crate::mm::{PhysAddr, VirtAddr};

/// CR0 protection-enable bit.
pub const CR0_PE: u32 = 1 << 0;
/// CR0 paging-enable bit.
pub const CR0_PG: u32 = 1 << 31;

/// Paging and CPU-state control.
pub trait Hardware {
    /// Write `root` into the page-table root register (CR3).
    ///
    /// # Safety
    /// `root` must be the physical address of a valid page directory. Once
    /// paging is on, a bad value faults on the next memory access.
    unsafe fn load_page_directory(&mut self, root: PhysAddr);

    /// Set CR0.PG and CR0.PE.
    ///
    /// # Safety
    /// The code executing this call, its stack and everything touched
    /// afterwards must already be mapped by the loaded directory.
    unsafe fn enable_paging(&mut self);

    /// Whether CR0.PG is set.
    fn paging_enabled(&self) -> bool;

    /// Whether maskable interrupts are enabled (EFLAGS.IF).
    fn interrupts_enabled(&self) -> bool;

    /// Mask interrupts (`cli`).
    fn disable_interrupts(&mut self);

    /// Unmask interrupts (`sti`).
    ///
    /// # Safety
    /// An interrupt descriptor table able to handle whatever fires must be
    /// installed.
    unsafe fn enable_interrupts(&mut self);

    /// Current stack pointer.
    fn stack_pointer(&self) -> VirtAddr;

    /// Address of the code currently executing.
    fn instruction_pointer(&self) -> VirtAddr;

    /// Current privilege level (CS bits 1..0).
    fn privilege_level(&self) -> u8;
}

/// Byte-wide port I/O.
pub trait PortIo {
    /// Read a byte from `port`.
    ///
    /// # Safety
    /// Reading some ports has device side effects.
    unsafe fn inb(&mut self, port: u16) -> u8;

    /// Write a byte to `port`.
    ///
    /// # Safety
    /// Writing to ports can reconfigure hardware arbitrarily.
    unsafe fn outb(&mut self, port: u16, value: u8);
}

/// Run `f` with interrupts masked, restoring the previous state after.
pub fn without_interrupts<H, F, R>(hw: &mut H, f: F) -> R
where
    H: Hardware,
    F: FnOnce(&mut H) -> R,
{
    let was_enabled = hw.interrupts_enabled();
    if was_enabled {
        hw.disable_interrupts();
    }

    let result = f(hw);

    if was_enabled {
        // SAFETY: interrupts were enabled on entry, so whoever enabled them
        // had a handler table in place.
        unsafe { hw.enable_interrupts() };
    }
    result
}

#[cfg(test)]
mod tests {
    use super::sim::{HwEvent, SimulatedHardware};
    use super::*;

    #[test]
    fn test_without_interrupts_restores_state() {
        let mut hw = SimulatedHardware::new();
        unsafe { hw.enable_interrupts() };

        let seen = without_interrupts(&mut hw, |hw| hw.interrupts_enabled());
        assert!(!seen);
        assert!(hw.interrupts_enabled());
        assert_eq!(
            hw.events(),
            [
                HwEvent::InterruptsEnabled,
                HwEvent::InterruptsDisabled,
                HwEvent::InterruptsEnabled
            ]
        );
    }

    #[test]
    fn test_without_interrupts_leaves_masked_state() {
        let mut hw = SimulatedHardware::new();
        without_interrupts(&mut hw, |_| ());
        assert!(!hw.interrupts_enabled());
        assert!(hw.events().is_empty());
    }
}
