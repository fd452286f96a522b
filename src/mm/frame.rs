//! Physical Frame Allocator
//!
//! Manages physical memory frames using a bitmap allocator.
//!
//! # Design
//! - Each bit in the bitmap represents one 4KB frame
//! - Bit = 0: frame is free
//! - Bit = 1: frame is allocated
//! - Slot `i` is the frame at `base + i * FRAME_SIZE`, where `base` is the
//!   end of the kernel image rounded up to a frame boundary
//!
//! # Allocation Policy
//! - First fit: the lowest free slot is always handed out first
//! - Freeing is idempotent and out-of-range frees are ignored
//! - Failure is `None`; address 0 is never part of the pool
//!
//! The global instance is protected by a spinlock.

use spin::Mutex;

use super::address::{PhysAddr, FRAME_SHIFT, FRAME_SIZE};

/// Number of frames we can track (32 MiB of physical memory).
pub const MAX_FRAMES: usize = 8192;

/// Bits per bitmap word.
const WORD_BITS: usize = u32::BITS as usize;

/// Size of the frame bitmap in words.
const BITMAP_WORDS: usize = MAX_FRAMES.div_ceil(WORD_BITS);

/// Bitmap frame allocator state.
pub struct FrameAllocator {
    /// Bitmap tracking allocated frames (1 = allocated, 0 = free).
    bitmap: [u32; BITMAP_WORDS],
    /// Physical address of slot 0.
    base: PhysAddr,
    /// Total frames under management.
    total_frames: usize,
}

impl FrameAllocator {
    /// Create an empty allocator. It manages no frames until [`init`](Self::init).
    pub const fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
            base: PhysAddr::new(0),
            total_frames: 0,
        }
    }

    /// Initialize the allocator to manage `MAX_FRAMES` frames starting at
    /// the first frame boundary at or after `kernel_end`.
    ///
    /// Every slot is marked free. Calling this again resets the pool.
    pub fn init(&mut self, kernel_end: PhysAddr) {
        // Keep frame 0 out of the pool so an allocated address is never 0.
        let base = kernel_end.align_up().as_usize().max(FRAME_SIZE);

        self.base = PhysAddr::new(base);
        self.total_frames = MAX_FRAMES;
        self.bitmap = [0; BITMAP_WORDS];

        log::info!(
            "PFA: base={}, frames={} ({} KiB)",
            self.base,
            self.total_frames,
            (self.total_frames * FRAME_SIZE) / 1024
        );
    }

    #[inline]
    fn set_bit(&mut self, slot: usize, allocated: bool) {
        let word = slot / WORD_BITS;
        let bit = slot % WORD_BITS;

        if allocated {
            self.bitmap[word] |= 1 << bit;
        } else {
            self.bitmap[word] &= !(1 << bit);
        }
    }

    #[inline]
    fn test_bit(&self, slot: usize) -> bool {
        (self.bitmap[slot / WORD_BITS] >> (slot % WORD_BITS)) & 1 == 1
    }

    /// Slot index for `addr`, or `None` if it lies outside the pool.
    fn slot_of(&self, addr: PhysAddr) -> Option<usize> {
        let offset = addr.as_usize().checked_sub(self.base.as_usize())?;
        let slot = offset >> FRAME_SHIFT;
        (slot < self.total_frames).then_some(slot)
    }

    /// Allocate the lowest free frame.
    ///
    /// Returns `None` when every slot is in use.
    pub fn alloc(&mut self) -> Option<PhysAddr> {
        for word_idx in 0..BITMAP_WORDS {
            let word = self.bitmap[word_idx];
            if word == u32::MAX {
                continue;
            }

            let slot = word_idx * WORD_BITS + (!word).trailing_zeros() as usize;
            if slot >= self.total_frames {
                break;
            }

            self.set_bit(slot, true);
            return Some(self.base.add(slot * FRAME_SIZE));
        }

        log::debug!("PFA: out of frames");
        None
    }

    /// Free a frame.
    ///
    /// Addresses below the pool base or past its end are ignored. Freeing a
    /// frame that is already free is a no-op.
    pub fn free(&mut self, addr: PhysAddr) {
        match self.slot_of(addr) {
            Some(slot) => self.set_bit(slot, false),
            None => log::trace!("PFA: ignoring free of {} outside pool", addr),
        }
    }

    /// Whether the frame containing `addr` is currently allocated.
    ///
    /// Addresses outside the pool report `false`.
    pub fn is_used(&self, addr: PhysAddr) -> bool {
        self.slot_of(addr).is_some_and(|slot| self.test_bit(slot))
    }

    /// Total number of frames under management.
    pub fn total_count(&self) -> usize {
        self.total_frames
    }

    /// Number of allocated frames.
    pub fn used_count(&self) -> usize {
        (0..self.total_frames).filter(|&slot| self.test_bit(slot)).count()
    }

    /// Number of free frames. Scans the whole bitmap.
    pub fn free_count(&self) -> usize {
        self.total_frames - self.used_count()
    }

    /// Physical address of slot 0.
    pub fn base(&self) -> PhysAddr {
        self.base
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Global frame allocator instance.
pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

/// Initialize the global frame allocator above the kernel image.
pub fn init_frame_allocator(kernel_end: PhysAddr) {
    FRAME_ALLOCATOR.lock().init(kernel_end);
}

/// Allocate a single physical frame.
///
/// Returns `None` if no frames are available.
pub fn alloc_frame() -> Option<PhysAddr> {
    FRAME_ALLOCATOR.lock().alloc()
}

/// Free a physical frame.
pub fn free_frame(addr: PhysAddr) {
    FRAME_ALLOCATOR.lock().free(addr);
}

/// Get the number of frames under management.
pub fn total_frame_count() -> usize {
    FRAME_ALLOCATOR.lock().total_count()
}

/// Get the number of free frames remaining.
pub fn free_frame_count() -> usize {
    FRAME_ALLOCATOR.lock().free_count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL_END: usize = 0x0012_3456;

    fn allocator() -> FrameAllocator {
        let mut frames = FrameAllocator::new();
        frames.init(PhysAddr::new(KERNEL_END));
        frames
    }

    fn assert_accounting(frames: &FrameAllocator) {
        assert_eq!(frames.free_count() + frames.used_count(), frames.total_count());
    }

    #[test]
    fn test_init_rounds_base_up() {
        let frames = allocator();
        assert_eq!(frames.base().as_usize(), 0x0012_4000);
        assert_eq!(frames.total_count(), MAX_FRAMES);
        assert_eq!(frames.free_count(), MAX_FRAMES);
    }

    #[test]
    fn test_uninitialized_allocator_is_empty() {
        let mut frames = FrameAllocator::new();
        assert_eq!(frames.total_count(), 0);
        assert_eq!(frames.alloc(), None);
    }

    #[test]
    fn test_first_fit_and_reuse() {
        let mut frames = allocator();
        let a0 = frames.alloc().unwrap();
        let a1 = frames.alloc().unwrap();
        let a2 = frames.alloc().unwrap();
        assert_eq!(a0, frames.base());
        assert_eq!(a1.as_usize(), a0.as_usize() + FRAME_SIZE);
        assert_eq!(a2.as_usize(), a0.as_usize() + 2 * FRAME_SIZE);

        frames.free(a1);
        assert_accounting(&frames);
        assert_eq!(frames.alloc(), Some(a1));
        assert_eq!(frames.free_count(), 8189);
        assert_accounting(&frames);
    }

    #[test]
    fn test_no_double_allocation() {
        let mut frames = allocator();
        let mut seen = std::collections::HashSet::new();
        for round in 0..64 {
            let addr = frames.alloc().unwrap();
            assert!(seen.insert(addr), "frame {:?} handed out twice", addr);
            assert!(frames.is_used(addr));
            if round % 3 == 0 {
                frames.free(addr);
                seen.remove(&addr);
            }
            assert_accounting(&frames);
        }
    }

    #[test]
    fn test_exhaustion() {
        let mut frames = allocator();
        for _ in 0..frames.total_count() {
            assert!(frames.alloc().is_some());
        }
        assert_eq!(frames.alloc(), None);
        assert_eq!(frames.free_count(), 0);
        assert_accounting(&frames);

        let last = frames.base().add((MAX_FRAMES - 1) * FRAME_SIZE);
        frames.free(last);
        assert_eq!(frames.alloc(), Some(last));
    }

    #[test]
    fn test_out_of_range_free_is_ignored() {
        let mut frames = allocator();
        let a0 = frames.alloc().unwrap();
        let before = frames.bitmap;

        frames.free(PhysAddr::new(0x1000));
        frames.free(PhysAddr::new(frames.base().as_usize() - 1));
        frames.free(frames.base().add(MAX_FRAMES * FRAME_SIZE));

        assert_eq!(frames.bitmap, before);
        assert!(frames.is_used(a0));
        assert_eq!(frames.used_count(), 1);
    }

    #[test]
    fn test_double_free_is_idempotent() {
        let mut frames = allocator();
        let a0 = frames.alloc().unwrap();
        frames.free(a0);
        frames.free(a0);
        assert_eq!(frames.free_count(), MAX_FRAMES);
        assert_eq!(frames.alloc(), Some(a0));
    }

    #[test]
    fn test_zero_is_never_allocated() {
        let mut frames = FrameAllocator::new();
        frames.init(PhysAddr::new(0));
        assert_eq!(frames.base().as_usize(), FRAME_SIZE);
        assert_ne!(frames.alloc().map(PhysAddr::as_usize), Some(0));
    }
}
