//! Bootstrap sequencer
//!
//! Decides which physical ranges must be identity-mapped before paging is
//! turned on, maps them, and flips the switch.
//!
//! # Ordering
//! 1. Mask interrupts (restored at the end)
//! 2. Zero the page tables and initialize the frame allocator
//! 3. Map the kernel image, the boot stack window and the VGA page
//! 4. Check that the running code and stack translate to themselves
//! 5. Load CR3, then set CR0.PG
//!
//! If the instruction stream is not mapped when paging comes on, the next
//! fetch faults and the machine resets. Step 4 is the last point at which
//! the sequence can fail.

use core::fmt;

use crate::arch::{self, Hardware};
use crate::mm::address::{BOOT_STACK_SIZE, KERNEL_PHYS_BASE, VGA_TEXT_BUFFER};
use crate::mm::{
    FrameAllocator, FrameRange, MappingError, PagingContext, PagingState, PhysAddr, VirtAddr,
    FRAME_ALLOCATOR, PAGING,
};

/// Physical layout the boot code needs to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootLayout {
    /// Physical load address of the kernel image.
    pub kernel_start: PhysAddr,
    /// First byte past the kernel image (`_end_kernel`).
    pub kernel_end: PhysAddr,
    /// One past the highest byte of the boot stack (`boot_stack_top`).
    pub stack_top: PhysAddr,
    /// Size of the statically allocated boot stack.
    pub stack_size: usize,
    /// The VGA text buffer page.
    pub text_buffer: PhysAddr,
}

impl BootLayout {
    /// Layout of the running image, from the linker script.
    #[cfg(target_os = "none")]
    pub fn from_linker() -> Self {
        extern "C" {
            static _end_kernel: u8;
            static boot_stack_top: u8;
        }

        // SAFETY: only the addresses of the symbols are taken.
        let (kernel_end, stack_top) = unsafe {
            (
                core::ptr::addr_of!(_end_kernel) as usize,
                core::ptr::addr_of!(boot_stack_top) as usize,
            )
        };
        Self::new(PhysAddr::new(kernel_end), PhysAddr::new(stack_top))
    }

    /// Standard layout for a kernel image ending at `kernel_end`, with a
    /// `BOOT_STACK_SIZE` stack ending at `stack_top`.
    pub const fn new(kernel_end: PhysAddr, stack_top: PhysAddr) -> Self {
        Self {
            kernel_start: PhysAddr::new(KERNEL_PHYS_BASE),
            kernel_end,
            stack_top,
            stack_size: BOOT_STACK_SIZE,
            text_buffer: PhysAddr::new(VGA_TEXT_BUFFER),
        }
    }

    /// Frames of the kernel image, end rounded up.
    pub fn kernel_image(&self) -> FrameRange {
        FrameRange::covering(self.kernel_start, self.kernel_end)
    }

    /// Every frame the boot stack occupies, from `stack_top - stack_size`
    /// up to `stack_top`. Includes the live frames above the stack pointer
    /// as well as the unused ones below it.
    pub fn stack_window(&self) -> FrameRange {
        let top = self.stack_top.as_usize();
        let bottom = top.saturating_sub(self.stack_size);
        FrameRange::covering(PhysAddr::new(bottom), self.stack_top)
    }

    /// The single VGA text page.
    pub fn text_page(&self) -> FrameRange {
        FrameRange::new(self.text_buffer, 1)
    }
}

/// One of the ranges the boot code maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    KernelImage,
    Stack,
    TextBuffer,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelImage => write!(f, "kernel image"),
            Self::Stack => write!(f, "boot stack"),
            Self::TextBuffer => write!(f, "text buffer"),
        }
    }
}

/// Why the bootstrap stopped before enabling paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Mapping a required region failed.
    Map { region: Region, error: MappingError },
    /// An address the kernel is executing from would not be mapped.
    Unmapped(VirtAddr),
    /// Paging was already on when the bootstrap started.
    AlreadyActive,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map { region, error } => write!(f, "cannot map {}: {}", region, error),
            Self::Unmapped(virt) => write!(f, "{} would be unmapped after enabling paging", virt),
            Self::AlreadyActive => write!(f, "paging already enabled"),
        }
    }
}

/// What the bootstrap did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    pub kernel_frames: usize,
    pub stack_frames: usize,
    pub text_frames: usize,
    /// Distinct pages mapped (ranges may overlap).
    pub mapped_pages: usize,
    pub page_directory: PhysAddr,
    pub total_frames: usize,
    pub free_frames: usize,
    pub privilege_level: u8,
}

/// Build the identity map and enable paging.
///
/// Interrupts stay masked for the whole sequence. On error paging is left
/// off and the tables hold whatever was mapped so far.
pub fn bootstrap<H: Hardware>(
    hw: &mut H,
    layout: &BootLayout,
    frames: &mut FrameAllocator,
    paging: &mut PagingContext,
) -> Result<BootReport, BootError> {
    if hw.paging_enabled() || paging.state() == PagingState::Active {
        return Err(BootError::AlreadyActive);
    }

    arch::without_interrupts(hw, |hw| {
        paging.init().map_err(|_| BootError::AlreadyActive)?;
        frames.init(layout.kernel_end);

        let stack_pointer = hw.stack_pointer();
        let kernel = layout.kernel_image();
        let stack = layout.stack_window();
        let text = layout.text_page();

        for (region, range) in [
            (Region::KernelImage, kernel),
            (Region::Stack, stack),
            (Region::TextBuffer, text),
        ] {
            log::debug!(
                "boot: identity-mapping {} ({} frame(s) at {})",
                region,
                range.len(),
                range.start()
            );
            paging
                .map(VirtAddr::new(range.start().as_usize()), range)
                .map_err(|error| BootError::Map { region, error })?;
        }

        for addr in [stack_pointer, hw.instruction_pointer()] {
            if paging.translate(addr) != Some(addr.identity()) {
                return Err(BootError::Unmapped(addr));
            }
        }

        // SAFETY: `paging` outlives the boot session (it is the PAGING
        // static in the kernel), and the code and stack were just checked
        // to translate to themselves.
        unsafe {
            paging.load_directory(hw);
            paging.enable_paging(hw);
        }

        let report = BootReport {
            kernel_frames: kernel.len(),
            stack_frames: stack.len(),
            text_frames: text.len(),
            mapped_pages: paging.mapped_pages(),
            page_directory: paging.directory_phys(),
            total_frames: frames.total_count(),
            free_frames: frames.free_count(),
            privilege_level: hw.privilege_level(),
        };
        log::info!(
            "boot: paging enabled, {} page(s) identity-mapped, CR3={}",
            report.mapped_pages,
            report.page_directory
        );
        Ok(report)
    })
}

/// Run [`bootstrap`] against the global allocator and paging context.
pub fn init<H: Hardware>(hw: &mut H, layout: &BootLayout) -> Result<BootReport, BootError> {
    let mut frames = FRAME_ALLOCATOR.lock();
    let mut paging = PAGING.lock();
    bootstrap(hw, layout, &mut frames, &mut paging)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::{HwEvent, SimulatedHardware};
    use crate::mm::FRAME_SIZE;

    const KERNEL_END: usize = 0x0012_3456;
    const STACK_TOP: usize = 0x0011_9000;
    const STACK_POINTER: usize = 0x0011_8f20;
    const INSTRUCTION_POINTER: usize = 0x0010_2a40;

    struct Fixture {
        hw: SimulatedHardware,
        layout: BootLayout,
        frames: Box<FrameAllocator>,
        paging: Box<PagingContext>,
    }

    fn fixture() -> Fixture {
        Fixture {
            hw: SimulatedHardware::new().with_registers(STACK_POINTER, INSTRUCTION_POINTER),
            layout: BootLayout::new(PhysAddr::new(KERNEL_END), PhysAddr::new(STACK_TOP)),
            frames: Box::new(FrameAllocator::new()),
            paging: Box::new(PagingContext::new()),
        }
    }

    impl Fixture {
        fn run(&mut self) -> Result<BootReport, BootError> {
            bootstrap(&mut self.hw, &self.layout, &mut self.frames, &mut self.paging)
        }
    }

    fn assert_identity(paging: &PagingContext, addr: usize) {
        let virt = VirtAddr::new(addr);
        assert_eq!(paging.translate(virt), Some(PhysAddr::new(addr)), "{:#x}", addr);
    }

    #[test]
    fn test_layout_ranges() {
        let layout = BootLayout::new(PhysAddr::new(KERNEL_END), PhysAddr::new(STACK_TOP));

        let kernel = layout.kernel_image();
        assert_eq!(kernel.start(), PhysAddr::new(0x0010_0000));
        assert_eq!(kernel.len(), 0x24);

        let stack = layout.stack_window();
        assert_eq!(stack.len(), BOOT_STACK_SIZE / FRAME_SIZE);
        assert_eq!(stack.start(), PhysAddr::new(0x0011_5000));
        assert_eq!(stack.last(), Some(PhysAddr::new(0x0011_8000)));

        let text = layout.text_page();
        assert_eq!(text.collect::<Vec<_>>(), [PhysAddr::new(0x000B_8000)]);
    }

    #[test]
    fn test_stack_window_covers_unaligned_stack() {
        let layout = BootLayout::new(PhysAddr::new(KERNEL_END), PhysAddr::new(0x0011_9800));
        let stack = layout.stack_window();
        assert_eq!(stack.start(), PhysAddr::new(0x0011_5000));
        assert_eq!(stack.len(), 5);
    }

    #[test]
    fn test_stack_window_near_zero_is_clamped() {
        let layout = BootLayout::new(PhysAddr::new(KERNEL_END), PhysAddr::new(0x2000));
        let stack = layout.stack_window();
        assert_eq!(stack.start(), PhysAddr::new(0));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_bootstrap_maps_required_ranges() {
        let mut fx = fixture();
        let report = fx.run().unwrap();

        assert_identity(&fx.paging, 0x0010_0000);
        assert_identity(&fx.paging, 0x0012_3000);
        assert_identity(&fx.paging, STACK_POINTER);
        assert_identity(&fx.paging, 0x0011_5000);
        assert_identity(&fx.paging, 0x000B_8f9e);
        assert_eq!(fx.paging.translate(VirtAddr::new(0x0012_4000)), None);
        assert_eq!(fx.paging.translate(VirtAddr::new(0x000B_9000)), None);

        // The stack window lies inside the kernel image here.
        assert_eq!(report.kernel_frames, 0x24);
        assert_eq!(report.stack_frames, 4);
        assert_eq!(report.text_frames, 1);
        assert_eq!(report.mapped_pages, 0x24 + 1);
        assert_eq!(report.total_frames, 8192);
        assert_eq!(report.free_frames, 8192);
        assert_eq!(report.privilege_level, 0);
        assert_eq!(fx.frames.base(), PhysAddr::new(0x0012_4000));
    }

    #[test]
    fn test_bootstrap_activates_in_order() {
        let mut fx = fixture();
        unsafe { fx.hw.enable_interrupts() };
        let report = fx.run().unwrap();

        let directory = fx.paging.directory_phys();
        assert_eq!(report.page_directory, directory);
        assert_eq!(fx.hw.cr3(), Some(directory));
        assert_eq!(fx.hw.cr0(), 0x8000_0001);
        assert_eq!(fx.paging.state(), PagingState::Active);
        assert_eq!(
            fx.hw.events(),
            [
                HwEvent::InterruptsEnabled,
                HwEvent::InterruptsDisabled,
                HwEvent::DirectoryLoaded(directory),
                HwEvent::PagingEnabled,
                HwEvent::InterruptsEnabled,
            ]
        );
    }

    #[test]
    fn test_bootstrap_refuses_unmapped_code() {
        let mut fx = fixture();
        fx.hw = SimulatedHardware::new().with_registers(STACK_POINTER, 0x0030_0000);
        assert_eq!(fx.run(), Err(BootError::Unmapped(VirtAddr::new(0x0030_0000))));
        assert!(!fx.hw.paging_enabled());
        assert_eq!(fx.hw.cr3(), None);
        assert_ne!(fx.paging.state(), PagingState::Active);
    }

    #[test]
    fn test_bootstrap_rejects_kernel_beyond_low_table() {
        let mut fx = fixture();
        fx.layout = BootLayout::new(PhysAddr::new(0x0040_1000), PhysAddr::new(STACK_TOP));
        assert_eq!(
            fx.run(),
            Err(BootError::Map {
                region: Region::KernelImage,
                error: MappingError::OutsideLowTable(VirtAddr::new(0x0040_0000)),
            })
        );
        assert!(!fx.hw.paging_enabled());
    }

    #[test]
    fn test_bootstrap_runs_once() {
        let mut fx = fixture();
        fx.run().unwrap();
        assert_eq!(fx.run(), Err(BootError::AlreadyActive));
    }

    #[test]
    fn test_bootstrap_keeps_active_tables() {
        let mut fx = fixture();
        fx.run().unwrap();

        // Fresh CPU state, same live tables.
        fx.hw = SimulatedHardware::new().with_registers(STACK_POINTER, INSTRUCTION_POINTER);
        assert_eq!(fx.run(), Err(BootError::AlreadyActive));
        assert_eq!(fx.paging.state(), PagingState::Active);
        assert_identity(&fx.paging, 0x0010_0000);
        assert!(fx.hw.events().is_empty());
    }

    #[test]
    fn test_bootstrap_maps_stack_outside_kernel_image() {
        let mut fx = fixture();
        fx.layout = BootLayout::new(PhysAddr::new(0x0010_2000), PhysAddr::new(0x0030_4000));
        fx.hw = SimulatedHardware::new().with_registers(0x0030_2f00, 0x0010_0a40);
        let report = fx.run().unwrap();

        assert_eq!(report.stack_frames, 4);
        assert_eq!(report.mapped_pages, 2 + 4 + 1);
        // Live frames above the stack pointer are mapped, not just the
        // free ones below it.
        assert_identity(&fx.paging, 0x0030_3000);
        assert_identity(&fx.paging, 0x0030_3ffc);
        assert_identity(&fx.paging, 0x0030_0000);
        assert_eq!(fx.paging.translate(VirtAddr::new(0x0030_4000)), None);
        assert_eq!(fx.paging.translate(VirtAddr::new(0x002F_F000)), None);
    }

    #[test]
    fn test_global_init() {
        let mut hw = SimulatedHardware::new().with_registers(STACK_POINTER, INSTRUCTION_POINTER);
        let layout = BootLayout::new(PhysAddr::new(KERNEL_END), PhysAddr::new(STACK_TOP));
        let report = init(&mut hw, &layout).unwrap();
        assert_eq!(report.page_directory, PAGING.lock().directory_phys());
        assert_eq!(crate::mm::total_frame_count(), 8192);
        assert_eq!(crate::mm::free_frame_count(), 8192);
    }
}
