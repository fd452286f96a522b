//! x86 Page Table Entry Formats
//!
//! Implements the 32-bit two-level paging structures (no PAE).
//!
//! # Page Table Structure (4KB pages)
//! - Page directory: 1024 PDEs, each covers 4MB
//! - Page table: 1024 PTEs, each covers 4KB
//!
//! Both levels are plain `u32` records. Fields are read and written through
//! an explicit table of bit offsets and widths ([`PDE_LAYOUT`],
//! [`PTE_LAYOUT`]) rather than relying on compiler bit-field layout.

use core::ops::{Index, IndexMut};

use bitflags::bitflags;

use super::address::{PhysAddr, VirtAddr, ENTRIES_PER_TABLE, FRAME_SHIFT};

/// A named bit range inside a 32-bit entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub offset: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(name: &'static str, offset: u32, width: u32) -> Self {
        Self {
            name,
            offset,
            width,
        }
    }

    /// Mask of the field in place.
    #[inline]
    pub const fn mask(self) -> u32 {
        let low = if self.width >= 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        };
        low << self.offset
    }

    /// Extract the field from `raw`.
    #[inline]
    pub const fn get(self, raw: u32) -> u32 {
        (raw & self.mask()) >> self.offset
    }

    /// Return `raw` with the field replaced by `value` (truncated to width).
    #[inline]
    pub const fn set(self, raw: u32, value: u32) -> u32 {
        (raw & !self.mask()) | ((value << self.offset) & self.mask())
    }
}

/// Field definitions shared by both levels, plus the level-specific ones.
pub mod field {
    use super::BitField;

    pub const PRESENT: BitField = BitField::new("present", 0, 1);
    pub const WRITABLE: BitField = BitField::new("writable", 1, 1);
    pub const USER: BitField = BitField::new("user", 2, 1);
    pub const WRITE_THROUGH: BitField = BitField::new("write_through", 3, 1);
    pub const CACHE_DISABLE: BitField = BitField::new("cache_disable", 4, 1);
    pub const ACCESSED: BitField = BitField::new("accessed", 5, 1);
    /// PTE only.
    pub const DIRTY: BitField = BitField::new("dirty", 6, 1);
    /// PDE only. Must stay 0: 4 MiB pages are not used.
    pub const PAGE_SIZE: BitField = BitField::new("page_size", 7, 1);
    /// PTE only.
    pub const GLOBAL: BitField = BitField::new("global", 8, 1);
    pub const AVAILABLE: BitField = BitField::new("available", 9, 3);
    /// Physical address >> 12.
    pub const FRAME: BitField = BitField::new("frame", 12, 20);
}

/// Page directory entry layout, lowest bit first.
pub const PDE_LAYOUT: [BitField; 11] = [
    field::PRESENT,
    field::WRITABLE,
    field::USER,
    field::WRITE_THROUGH,
    field::CACHE_DISABLE,
    field::ACCESSED,
    BitField::new("ignored", 6, 1),
    field::PAGE_SIZE,
    BitField::new("ignored", 8, 1),
    field::AVAILABLE,
    field::FRAME,
];

/// Page table entry layout, lowest bit first.
pub const PTE_LAYOUT: [BitField; 11] = [
    field::PRESENT,
    field::WRITABLE,
    field::USER,
    field::WRITE_THROUGH,
    field::CACHE_DISABLE,
    field::ACCESSED,
    field::DIRTY,
    BitField::new("pat", 7, 1),
    field::GLOBAL,
    field::AVAILABLE,
    field::FRAME,
];

bitflags! {
    /// Single-bit flags common to PDEs and PTEs.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED = 1 << 5;
        /// PTE: written. PDE: ignored.
        const DIRTY = 1 << 6;
        /// PDE: maps a 4 MiB page. PTE: PAT.
        const PAGE_SIZE = 1 << 7;
        /// PTE only.
        const GLOBAL = 1 << 8;
    }
}

impl EntryFlags {
    /// Supervisor read/write, cached: used for every boot mapping.
    pub const KERNEL_RW: Self = Self::PRESENT.union(Self::WRITABLE);
}

/// Generates a getter/setter pair for a one-bit field.
macro_rules! flag_accessors {
    ($($(#[$doc:meta])* $get:ident, $set:ident => $field:expr;)*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub const fn $get(self) -> bool {
                $field.get(self.0) != 0
            }

            #[inline]
            pub fn $set(&mut self, value: bool) {
                self.0 = $field.set(self.0, value as u32);
            }
        )*
    };
}

/// A page directory entry.
///
/// Points at a page table (4 KiB pages only).
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageDirectoryEntry(u32);

impl PageDirectoryEntry {
    /// Create a non-present entry.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create an entry pointing to the page table at `table_phys`.
    #[inline]
    pub fn table(table_phys: PhysAddr, flags: EntryFlags) -> Self {
        debug_assert!(table_phys.is_aligned());
        let mut entry = Self(flags.difference(EntryFlags::PAGE_SIZE).bits());
        entry.set_frame(table_phys);
        entry
    }

    flag_accessors! {
        present, set_present => field::PRESENT;
        writable, set_writable => field::WRITABLE;
        /// `false` means supervisor-only.
        user, set_user => field::USER;
        write_through, set_write_through => field::WRITE_THROUGH;
        cache_disabled, set_cache_disabled => field::CACHE_DISABLE;
        accessed, set_accessed => field::ACCESSED;
        page_size, set_page_size => field::PAGE_SIZE;
    }

    /// Raw 20-bit frame number of the referenced table.
    #[inline]
    pub const fn frame(self) -> u32 {
        field::FRAME.get(self.0)
    }

    /// Store `table_phys >> 12` in the frame field.
    #[inline]
    pub fn set_frame(&mut self, table_phys: PhysAddr) {
        self.0 = field::FRAME.set(self.0, (table_phys.as_usize() >> FRAME_SHIFT) as u32);
    }

    /// Physical address of the referenced table.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr::new((self.frame() as usize) << FRAME_SHIFT)
    }

    #[inline]
    pub const fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// A page table entry.
///
/// Maps one 4 KiB virtual page to a physical frame.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create an entry mapping the frame at `phys`.
    #[inline]
    pub fn page(phys: PhysAddr, flags: EntryFlags) -> Self {
        debug_assert!(phys.is_aligned());
        let mut entry = Self(flags.bits());
        entry.set_frame(phys);
        entry
    }

    flag_accessors! {
        present, set_present => field::PRESENT;
        writable, set_writable => field::WRITABLE;
        /// `false` means supervisor-only.
        user, set_user => field::USER;
        write_through, set_write_through => field::WRITE_THROUGH;
        cache_disabled, set_cache_disabled => field::CACHE_DISABLE;
        accessed, set_accessed => field::ACCESSED;
        dirty, set_dirty => field::DIRTY;
        global, set_global => field::GLOBAL;
    }

    /// Raw 20-bit frame number.
    #[inline]
    pub const fn frame(self) -> u32 {
        field::FRAME.get(self.0)
    }

    /// Store `phys >> 12` in the frame field.
    #[inline]
    pub fn set_frame(&mut self, phys: PhysAddr) {
        self.0 = field::FRAME.set(self.0, (phys.as_usize() >> FRAME_SHIFT) as u32);
    }

    /// Physical address of the mapped frame.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr::new((self.frame() as usize) << FRAME_SHIFT)
    }

    #[inline]
    pub const fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl core::fmt::Debug for PageDirectoryEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.present() {
            write!(f, "PDE(table={}, flags={:?})", self.addr(), self.flags())
        } else {
            write!(f, "PDE(not present)")
        }
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.present() {
            write!(f, "PTE(frame={}, flags={:?})", self.addr(), self.flags())
        } else {
            write!(f, "PTE(not present)")
        }
    }
}

/// A 4KB-aligned array of 1024 entries.
///
/// The alignment is a hardware requirement: the table's physical address
/// goes into CR3 or a PDE frame field with the low 12 bits dropped.
#[repr(C, align(4096))]
pub struct Table<E> {
    entries: [E; ENTRIES_PER_TABLE],
}

/// The page directory.
pub type PageDirectory = Table<PageDirectoryEntry>;

/// A page table.
pub type PageTable = Table<PageTableEntry>;

impl PageDirectory {
    pub const fn new() -> Self {
        Self {
            entries: [PageDirectoryEntry::empty(); ENTRIES_PER_TABLE],
        }
    }
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::empty(); ENTRIES_PER_TABLE],
        }
    }

    /// The entry that translates `virt` (by table index).
    #[inline]
    pub fn entry_for(&self, virt: VirtAddr) -> &PageTableEntry {
        &self.entries[virt.table_index()]
    }
}

impl<E: Copy> Table<E> {
    #[inline]
    pub fn get(&self, index: usize) -> Option<&E> {
        self.entries.get(index)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entries.iter()
    }

    /// Overwrite every entry with `empty`.
    pub fn fill(&mut self, empty: E) {
        self.entries.fill(empty);
    }

    /// Physical address of this table, assuming it is identity-mapped.
    pub fn phys_addr(&self) -> PhysAddr {
        PhysAddr::new(self as *const Self as usize)
    }
}

impl<E> Index<usize> for Table<E> {
    type Output = E;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl<E> IndexMut<usize> for Table<E> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// `map` called before the tables were initialized.
    NotInitialized,
    /// Paging is already enabled; the tables are frozen.
    PagingActive,
    /// A virtual base or frame address is not 4KB aligned.
    MisalignedAddress(usize),
    /// The virtual page lies outside the first 4MB.
    OutsideLowTable(VirtAddr),
}

impl core::fmt::Display for MappingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "page tables not initialized"),
            Self::PagingActive => write!(f, "paging already enabled"),
            Self::MisalignedAddress(addr) => write!(f, "address {:#010x} not frame aligned", addr),
            Self::OutsideLowTable(virt) => {
                write!(f, "virtual address {} outside the low 4MB table", virt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts_are_contiguous() {
        for layout in [&PDE_LAYOUT[..], &PTE_LAYOUT[..]] {
            let mut next = 0;
            for f in layout {
                assert_eq!(f.offset, next, "gap before {}", f.name);
                next += f.width;
            }
            assert_eq!(next, 32);
        }
    }

    #[test]
    fn test_both_layouts_share_available_and_frame() {
        for layout in [&PDE_LAYOUT[..], &PTE_LAYOUT[..]] {
            let names: Vec<&str> = layout.iter().map(|f| f.name).collect();
            assert!(layout.contains(&field::AVAILABLE), "{:?}", names);
            assert!(layout.contains(&field::FRAME), "{:?}", names);
        }
        assert_eq!(PDE_LAYOUT[8], BitField::new("ignored", 8, 1));
        assert_eq!(PDE_LAYOUT[9], field::AVAILABLE);
    }

    #[test]
    fn test_bitfield_get_set() {
        let raw = field::FRAME.set(0xFFF, 0x12345);
        assert_eq!(raw, 0x1234_5FFF);
        assert_eq!(field::FRAME.get(raw), 0x12345);
        assert_eq!(field::AVAILABLE.get(raw), 0b111);
        // Out-of-width values are truncated, neighbours untouched.
        assert_eq!(field::AVAILABLE.set(0, 0xFF), 0b111 << 9);
    }

    #[test]
    fn test_page_entry_fields() {
        let pte = PageTableEntry::page(PhysAddr::new(0x0010_0000), EntryFlags::KERNEL_RW);
        assert!(pte.present());
        assert!(pte.writable());
        assert!(!pte.user());
        assert!(!pte.dirty());
        assert_eq!(pte.frame(), 0x100);
        assert_eq!(pte.as_u32(), 0x0010_0003);
        assert_eq!(pte.addr().as_usize(), 0x0010_0000);
    }

    #[test]
    fn test_directory_entry_flags() {
        let mut pde = PageDirectoryEntry::table(
            PhysAddr::new(0x0020_3000),
            EntryFlags::KERNEL_RW | EntryFlags::PAGE_SIZE,
        );
        assert!(!pde.page_size());
        assert_eq!(pde.frame(), 0x203);
        assert_eq!(pde.as_u32(), 0x0020_3003);

        pde.set_cache_disabled(true);
        pde.set_user(true);
        assert_eq!(pde.as_u32(), 0x0020_3017);
        pde.clear();
        assert!(!pde.present());
    }

    #[test]
    fn test_table_alignment() {
        assert_eq!(core::mem::size_of::<PageDirectory>(), 4096);
        assert_eq!(core::mem::align_of::<PageTable>(), 4096);
    }
}
