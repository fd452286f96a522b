//! Memory management for Ferrite
//!
//! Provides:
//! - Physical and virtual address types
//! - Bitmap physical frame allocator
//! - x86 page directory / page table formats
//! - The paging context that builds the identity map and turns paging on

pub mod address;
pub mod frame;
pub mod mapper;
pub mod paging;

pub use address::{FrameRange, PhysAddr, VirtAddr, FRAME_SIZE};
pub use frame::{
    alloc_frame, free_frame, free_frame_count, init_frame_allocator, total_frame_count,
    FrameAllocator, FRAME_ALLOCATOR, MAX_FRAMES,
};
pub use mapper::{PagingContext, PagingState, PAGING};
pub use paging::{EntryFlags, MappingError, PageDirectoryEntry, PageTableEntry};
