//! Page Table Mapper
//!
//! Owns the page directory and the single low page table, and is the only
//! code that writes entries into them.
//!
//! # Scope
//! Only directory slot 0 is ever populated, so every mapping must fall in
//! the first 4MB of virtual space. Requests outside it are rejected.
//!
//! # Lifecycle
//! `Uninitialized -> Zeroed -> PartiallyMapped -> Active`. There is no way
//! back: once paging is enabled the tables are frozen for the rest of the
//! boot session.

use spin::Mutex;

use super::address::{PhysAddr, VirtAddr, FRAME_SIZE};
use super::paging::{
    EntryFlags, MappingError, PageDirectory, PageDirectoryEntry, PageTable, PageTableEntry,
};
use crate::arch::Hardware;

/// Where the paging context is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PagingState {
    Uninitialized,
    Zeroed,
    PartiallyMapped,
    Active,
}

/// The page directory, its low page table, and their lifecycle state.
///
/// There is exactly one of these per boot session ([`PAGING`]). Tests build
/// their own on the heap.
#[repr(C)]
pub struct PagingContext {
    directory: PageDirectory,
    low_table: PageTable,
    state: PagingState,
}

impl PagingContext {
    pub const fn new() -> Self {
        Self {
            directory: PageDirectory::new(),
            low_table: PageTable::new(),
            state: PagingState::Uninitialized,
        }
    }

    /// Zero the directory and the low table.
    ///
    /// Refused once paging is on: the hardware is walking these tables.
    pub fn init(&mut self) -> Result<(), MappingError> {
        if self.state == PagingState::Active {
            return Err(MappingError::PagingActive);
        }
        self.directory.fill(PageDirectoryEntry::empty());
        self.low_table.fill(PageTableEntry::empty());
        self.state = PagingState::Zeroed;
        Ok(())
    }

    pub fn state(&self) -> PagingState {
        self.state
    }

    /// Point directory slot 0 at the low table if it is not present yet.
    fn ensure_low_table_present(&mut self) {
        if self.directory[0].present() {
            return;
        }
        let table = self.low_table.phys_addr();
        self.directory[0] = PageDirectoryEntry::table(table, EntryFlags::KERNEL_RW);
        log::trace!("paging: PDE[0] -> {}", table);
    }

    /// Map `frames` to consecutive pages starting at `virt`.
    ///
    /// The whole request is validated before any entry is written, so on
    /// error the tables are unchanged. Returns `virt`.
    pub fn map<I>(&mut self, virt: VirtAddr, frames: I) -> Result<VirtAddr, MappingError>
    where
        I: IntoIterator<Item = PhysAddr>,
        I::IntoIter: ExactSizeIterator + Clone,
    {
        match self.state {
            PagingState::Uninitialized => return Err(MappingError::NotInitialized),
            PagingState::Active => return Err(MappingError::PagingActive),
            PagingState::Zeroed | PagingState::PartiallyMapped => {}
        }
        if !virt.is_aligned() {
            return Err(MappingError::MisalignedAddress(virt.as_usize()));
        }

        let frames = frames.into_iter();
        let count = frames.len();
        if count == 0 {
            return Ok(virt);
        }

        let last = (count - 1)
            .checked_mul(FRAME_SIZE)
            .and_then(|offset| virt.checked_add(offset))
            .ok_or(MappingError::OutsideLowTable(virt))?;
        if last.directory_index() != 0 {
            return Err(MappingError::OutsideLowTable(last));
        }
        if let Some(bad) = frames.clone().find(|frame| !frame.is_aligned()) {
            return Err(MappingError::MisalignedAddress(bad.as_usize()));
        }

        self.ensure_low_table_present();

        let mut page = virt.as_usize();
        for frame in frames {
            let index = VirtAddr::new(page).table_index();
            self.low_table[index] = PageTableEntry::page(frame, EntryFlags::KERNEL_RW);
            page += FRAME_SIZE;
        }

        log::debug!("paging: mapped {} page(s) at {}", count, virt);
        self.state = PagingState::PartiallyMapped;
        Ok(virt)
    }

    /// Walk the tables in software: the physical address `virt` resolves
    /// to, or `None` if it is unmapped.
    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let pde = self.directory.get(virt.directory_index())?;
        if !pde.present() || virt.directory_index() != 0 {
            return None;
        }
        let pte = self.low_table.entry_for(virt);
        pte.present().then(|| pte.addr().add(virt.page_offset()))
    }

    /// The low-table entry that translates `virt`.
    pub fn entry(&self, virt: VirtAddr) -> PageTableEntry {
        *self.low_table.entry_for(virt)
    }

    pub fn directory_entry(&self, index: usize) -> Option<PageDirectoryEntry> {
        self.directory.get(index).copied()
    }

    /// Physical address of the page directory (what goes into CR3).
    pub fn directory_phys(&self) -> PhysAddr {
        self.directory.phys_addr()
    }

    /// Physical address of the low page table.
    pub fn low_table_phys(&self) -> PhysAddr {
        self.low_table.phys_addr()
    }

    /// Number of present entries in the low table.
    pub fn mapped_pages(&self) -> usize {
        self.low_table.iter().filter(|entry| entry.present()).count()
    }

    /// Load the page directory into CR3.
    ///
    /// # Safety
    /// `self` must not move for as long as the hardware uses it, and the
    /// directory's address must be its physical address (identity-mapped).
    pub unsafe fn load_directory<H: Hardware>(&self, hw: &mut H) {
        let root = self.directory_phys();
        log::debug!("paging: loading page directory {}", root);
        // SAFETY: forwarded to the caller.
        unsafe { hw.load_page_directory(root) };
    }

    /// Turn paging on. Irreversible.
    ///
    /// # Safety
    /// The directory must be loaded and every address touched from here on
    /// (the current instruction stream and stack included) must be mapped.
    pub unsafe fn enable_paging<H: Hardware>(&mut self, hw: &mut H) {
        // SAFETY: forwarded to the caller.
        unsafe { hw.enable_paging() };
        self.state = PagingState::Active;
    }
}

impl Default for PagingContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The page directory and low table for this boot session.
///
/// Lives in `.bss`, which the boot code identity-maps, so its virtual
/// address is also its physical address.
pub static PAGING: Mutex<PagingContext> = Mutex::new(PagingContext::new());
