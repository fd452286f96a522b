//! Real 32-bit x86 implementation of the hardware traits.

use core::arch::asm;

use super::{Hardware, PortIo, CR0_PE, CR0_PG};
use crate::mm::{PhysAddr, VirtAddr};

/// EFLAGS interrupt-enable bit.
const EFLAGS_IF: u32 = 1 << 9;

/// The CPU we are running on.
///
/// Zero-sized; every method issues the instruction directly.
#[derive(Debug, Default)]
pub struct X86;

impl Hardware for X86 {
    unsafe fn load_page_directory(&mut self, root: PhysAddr) {
        // SAFETY: caller guarantees `root` is a valid page directory.
        unsafe {
            asm!("mov cr3, {}", in(reg) root.as_usize(), options(nostack, preserves_flags));
        }
    }

    unsafe fn enable_paging(&mut self) {
        // SAFETY: caller guarantees the executing code is identity-mapped.
        unsafe {
            asm!(
                "mov {tmp}, cr0",
                "or {tmp}, {bits}",
                "mov cr0, {tmp}",
                tmp = out(reg) _,
                bits = const CR0_PG | CR0_PE,
                options(nostack, preserves_flags),
            );
        }
    }

    fn paging_enabled(&self) -> bool {
        let cr0: u32;
        // SAFETY: reading CR0 has no side effects at CPL 0.
        unsafe {
            asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        cr0 & CR0_PG != 0
    }

    fn interrupts_enabled(&self) -> bool {
        let eflags: u32;
        // SAFETY: pushfd/pop only touches the stack slot it allocates.
        unsafe {
            asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags));
        }
        eflags & EFLAGS_IF != 0
    }

    fn disable_interrupts(&mut self) {
        // SAFETY: masking interrupts cannot violate memory safety.
        unsafe {
            asm!("cli", options(nomem, nostack));
        }
    }

    unsafe fn enable_interrupts(&mut self) {
        // SAFETY: caller guarantees an IDT is installed.
        unsafe {
            asm!("sti", options(nomem, nostack));
        }
    }

    fn stack_pointer(&self) -> VirtAddr {
        let esp: usize;
        // SAFETY: reads a register.
        unsafe {
            asm!("mov {}, esp", out(reg) esp, options(nomem, nostack, preserves_flags));
        }
        VirtAddr::new(esp)
    }

    fn instruction_pointer(&self) -> VirtAddr {
        let eip: usize;
        // SAFETY: the call pushes the address of the next instruction, which
        // is immediately popped again.
        unsafe {
            asm!("call 2f", "2:", "pop {}", out(reg) eip, options(preserves_flags));
        }
        VirtAddr::new(eip)
    }

    fn privilege_level(&self) -> u8 {
        let cs: u16;
        // SAFETY: reads a segment register.
        unsafe {
            asm!("mov {0:x}, cs", out(reg) cs, options(nomem, nostack, preserves_flags));
        }
        (cs & 0b11) as u8
    }
}

impl PortIo for X86 {
    unsafe fn inb(&mut self, port: u16) -> u8 {
        let value: u8;
        // SAFETY: caller accepts the device side effects of the read.
        unsafe {
            asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
        }
        value
    }

    unsafe fn outb(&mut self, port: u16, value: u8) {
        // SAFETY: caller accepts the device side effects of the write.
        unsafe {
            asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
        }
    }
}
