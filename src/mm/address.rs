//! Physical and Virtual Address Types
//!
//! Type-safe wrappers for 32-bit x86 memory addresses that prevent mixing
//! physical and virtual addresses at compile time.
//!
//! # Two-Level Paging Layout
//! - Bits [31:22]: page directory index (1024 entries, 4 MiB each)
//! - Bits [21:12]: page table index (1024 entries, 4 KiB each)
//! - Bits [11:0]: offset within the frame

use core::fmt;

/// Frame (and page) size (4 KiB)
pub const FRAME_SIZE: usize = 4096;
/// Frame size mask
pub const FRAME_MASK: usize = FRAME_SIZE - 1;
/// Bits to shift for the frame number
pub const FRAME_SHIFT: usize = 12;

/// Number of entries in the page directory and in a page table
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes of virtual space covered by one page table (4 MiB)
pub const TABLE_SPAN: usize = ENTRIES_PER_TABLE * FRAME_SIZE;

/// Physical load address of the kernel image (1 MiB)
pub const KERNEL_PHYS_BASE: usize = 0x0010_0000;

/// VGA text-mode buffer
pub const VGA_TEXT_BUFFER: usize = 0x000B_8000;

/// Size of the statically allocated boot stack. Must match `boot.S`.
pub const BOOT_STACK_SIZE: usize = 16 * 1024;

/// A physical memory address.
///
/// Physical addresses cannot be dereferenced directly. Before paging is
/// enabled every address is physical; afterwards only identity-mapped
/// ones remain usable as pointers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    /// Create a new physical address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if the address is frame-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & FRAME_MASK == 0
    }

    /// Align the address down to the nearest frame boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !FRAME_MASK)
    }

    /// Align the address up to the nearest frame boundary.
    #[inline]
    pub const fn align_up(self) -> Self {
        Self((self.0 + FRAME_MASK) & !FRAME_MASK)
    }

    /// Get the frame number (`addr >> 12`).
    #[inline]
    pub const fn frame_number(self) -> usize {
        self.0 >> FRAME_SHIFT
    }

    /// Create from a frame number.
    #[inline]
    pub const fn from_frame_number(pfn: usize) -> Self {
        Self(pfn << FRAME_SHIFT)
    }

    /// Add an offset to this address.
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A virtual memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & FRAME_MASK == 0
    }

    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !FRAME_MASK)
    }

    /// Page directory index (bits [31:22]).
    #[inline]
    pub const fn directory_index(self) -> usize {
        (self.0 >> 22) & 0x3FF
    }

    /// Page table index (bits [21:12]).
    #[inline]
    pub const fn table_index(self) -> usize {
        (self.0 >> FRAME_SHIFT) & 0x3FF
    }

    /// Offset within the page (bits [11:0]).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & FRAME_MASK
    }

    /// Add an offset, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, offset: usize) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// The physical address with the same numeric value.
    #[inline]
    pub const fn identity(self) -> PhysAddr {
        PhysAddr::new(self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A run of consecutive frames, yielded in ascending order.
///
/// This is how the boot code describes a physical range to the mapper
/// without materialising a descriptor list on the boot stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRange {
    next: usize,
    remaining: usize,
}

impl FrameRange {
    /// `count` frames starting at `start` (aligned down).
    pub const fn new(start: PhysAddr, count: usize) -> Self {
        Self {
            next: start.align_down().as_usize(),
            remaining: count,
        }
    }

    /// Every frame touched by `[start, end)`: start rounded down, end
    /// rounded up.
    pub const fn covering(start: PhysAddr, end: PhysAddr) -> Self {
        let first = start.align_down().as_usize();
        let last = end.align_up().as_usize();
        let count = if last > first {
            (last - first) / FRAME_SIZE
        } else {
            0
        };
        Self {
            next: first,
            remaining: count,
        }
    }

    /// First frame of the run.
    pub const fn start(&self) -> PhysAddr {
        PhysAddr::new(self.next)
    }

    /// Number of frames left in the run.
    pub const fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Iterator for FrameRange {
    type Item = PhysAddr;

    fn next(&mut self) -> Option<PhysAddr> {
        if self.remaining == 0 {
            return None;
        }
        let frame = PhysAddr::new(self.next);
        self.remaining -= 1;
        self.next = self.next.wrapping_add(FRAME_SIZE);
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for FrameRange {}
