//! Ferrite kernel image
//!
//! Entry: `_start` in boot.S sets up the boot stack and calls
//! [`kernel_main`] with interrupts masked and paging off.
//!
//! Only meaningful for a bare-metal i386 target:
//! `cargo build -Z build-std=core --target i686-ferrite.json`

#![cfg_attr(all(target_arch = "x86", target_os = "none"), no_std, no_main)]

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod kernel {
    use core::arch::global_asm;
    use core::panic::PanicInfo;

    use ferrite::arch::x86::X86;
    use ferrite::arch::Hardware;
    use ferrite::boot::{self, BootLayout};
    use ferrite::drivers::{keyboard, vga::CONSOLE};
    use ferrite::{kprint, kprintln, logger, multiboot, VERSION};

    // Include boot assembly
    global_asm!(include_str!("boot.S"));

    #[used]
    #[link_section = ".multiboot"]
    static MULTIBOOT_HEADER: [u32; 6] = multiboot::HEADER;

    /// Kernel entry point called from boot.S
    #[no_mangle]
    pub extern "C" fn kernel_main() -> ! {
        // SAFETY: the VGA text buffer at 0xB8000 is always present in
        // text mode and nothing else writes to it.
        unsafe {
            CONSOLE.lock().init();
        }

        kprintln!("Ferrite v{} - i386 kernel", VERSION);
        kprintln!("=========================");

        if logger::init().is_err() {
            kprintln!("[BOOT] logger already installed");
        }

        let mut cpu = X86;
        kprintln!("[BOOT] CPL = {}", cpu.privilege_level());

        let layout = BootLayout::from_linker();
        match boot::init(&mut cpu, &layout) {
            Ok(report) => {
                kprintln!(
                    "[BOOT] Paging enabled: kernel {} frames, stack {} frames, CR3={}",
                    report.kernel_frames,
                    report.stack_frames,
                    report.page_directory
                );
                kprintln!(
                    "[BOOT] Frames: {} free of {}",
                    report.free_frames,
                    report.total_frames
                );
            }
            Err(err) => {
                kprintln!("[BOOT] Paging not enabled: {}", err);
                halt();
            }
        }

        kprintln!("[BOOT] Ready, echoing keyboard input");
        loop {
            if let Some(ch) = keyboard::poll(&mut cpu) {
                kprint!("{}", ch as char);
            }
            core::hint::spin_loop();
        }
    }

    /// Halt the CPU with interrupts masked.
    fn halt() -> ! {
        loop {
            // SAFETY: cli; hlt only stops this CPU.
            unsafe {
                core::arch::asm!("cli", "hlt", options(nomem, nostack));
            }
        }
    }

    /// Panic handler - called on unrecoverable errors
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        kprintln!();
        kprintln!("!!! KERNEL PANIC !!!");

        if let Some(location) = info.location() {
            kprintln!(
                "Location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }

        kprintln!("Message: {}", info.message());
        kprintln!("System halted.");

        halt();
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn main() {
    eprintln!("ferrite is a freestanding kernel; build it with --target i686-ferrite.json");
}
