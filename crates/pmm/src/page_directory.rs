//! Architecture-independent page table management.
//!
//! This module provides the `PageDirectory` type, which owns the root of a two-level page table
//! and provides high-level operations for mapping and unmapping virtual addresses. Every table,
//! the root included, lives in a frame taken from a [`PhysicalMemory`].

use core::fmt;

use crate::{
    FrameNumber, PhysicalMemory, VirtualAddress,
    arch::{self, PageEntry, PageFlags, PageTable},
};

/// Flags placed on directory entries. Permissions are enforced by the leaf entries.
const TABLE_FLAGS: PageFlags = PageFlags::USER_RW;

/// Errors that can occur while editing a page directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The target entry is already present.
    AlreadyMapped(VirtualAddress),
    /// A page table could not be allocated.
    OutOfMemory,
    /// The page table covering the address does not exist.
    MissingEntry(VirtualAddress),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::AlreadyMapped(va) => write!(f, "remap of present page {}", va),
            MapError::OutOfMemory => write!(f, "out of memory for page table"),
            MapError::MissingEntry(va) => write!(f, "no page table covers {}", va),
        }
    }
}

/// A two-level page table rooted in one directory frame.
///
/// The directory does not own the frames its leaf entries point at; freeing those is up to the
/// caller. It does own every intermediate table, which [`PageDirectory::release`] returns.
#[derive(Debug)]
pub struct PageDirectory {
    /// The root page table for this address space.
    root: PageTable,
}

impl PageDirectory {
    /// Creates a new page directory with an empty root page table.
    ///
    /// Returns None if no frame is available for the root.
    pub fn new<M: PhysicalMemory + ?Sized>(memory: &M) -> Option<Self> {
        let frame = memory.allocate_zeroed()?;
        Some(Self {
            root: PageTable::at(frame),
        })
    }

    /// Returns the root table, as loaded into the MMU.
    pub fn root(&self) -> PageTable {
        self.root
    }

    /// Returns the leaf entry for `virt`, or None if no page table covers it.
    pub fn entry<M: PhysicalMemory + ?Sized>(
        &self,
        memory: &M,
        virt: VirtualAddress,
    ) -> Option<PageEntry> {
        let table = self.walk(memory, virt)?;
        Some(table.entry(memory, virt.page_index(0)))
    }

    /// Returns whether a page table covering `virt` exists.
    pub fn has_table<M: PhysicalMemory + ?Sized>(&self, memory: &M, virt: VirtualAddress) -> bool {
        self.walk(memory, virt).is_some()
    }

    /// Maps a virtual page to a frame with the given flags.
    ///
    /// The entry is created present regardless of `flags`. Intermediate tables are allocated as
    /// needed. An existing non-present entry is overwritten; a present one is an error.
    ///
    /// # Panics
    /// Panics if the virtual address is not page-aligned.
    pub fn map<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        virt: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        assert!(
            virt.is_aligned(arch::PAGE_SIZE),
            "virtual address must be page-aligned"
        );

        let table = self.walk_or_create(memory, virt)?;
        let index = virt.page_index(0);
        if table.entry(memory, index).is_present() {
            return Err(MapError::AlreadyMapped(virt));
        }
        table.set_entry(memory, index, PageEntry::new(frame, flags));
        Ok(())
    }

    /// Stores `entry` for `virt` unconditionally, allocating intermediate tables as needed.
    pub fn set<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        virt: VirtualAddress,
        entry: PageEntry,
    ) -> Result<(), MapError> {
        let table = self.walk_or_create(memory, virt)?;
        table.set_entry(memory, virt.page_index(0), entry);
        Ok(())
    }

    /// Replaces the entry for `virt`, which must already be covered by a page table.
    pub fn update<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        virt: VirtualAddress,
        entry: PageEntry,
    ) -> Result<(), MapError> {
        let table = self.walk(memory, virt).ok_or(MapError::MissingEntry(virt))?;
        table.set_entry(memory, virt.page_index(0), entry);
        Ok(())
    }

    /// Unmaps a virtual address.
    ///
    /// Clears the entry for the given virtual address and returns the frame that was mapped, or
    /// None if the address was not present. A non-present entry is cleared too.
    ///
    /// # Panics
    /// Panics if the virtual address is not page-aligned.
    pub fn unmap<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        virt: VirtualAddress,
    ) -> Option<FrameNumber> {
        assert!(
            virt.is_aligned(arch::PAGE_SIZE),
            "virtual address must be page-aligned"
        );

        let table = self.walk(memory, virt)?;
        let index = virt.page_index(0);
        let entry = table.entry(memory, index);
        if !entry.is_unused() {
            table.set_entry(memory, index, PageEntry::default());
        }
        entry.frame()
    }

    /// Frees every page table and the directory itself.
    ///
    /// Frames mapped by leaf entries are left alone; unmap them first.
    pub fn release<M: PhysicalMemory + ?Sized>(self, memory: &M) {
        for index in 0..self.root.len() {
            if let Some(frame) = self.root.entry(memory, index).frame() {
                memory.deallocate(frame);
            }
        }
        memory.deallocate(self.root.frame());
    }

    /// Walks the page table hierarchy to find the table covering a virtual address.
    ///
    /// Returns None if any intermediate table is not present.
    fn walk<M: PhysicalMemory + ?Sized>(
        &self,
        memory: &M,
        virt: VirtualAddress,
    ) -> Option<PageTable> {
        let mut table = self.root;

        // Walk through all levels except the last
        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry(memory, virt.page_index(level));
            table = PageTable::at(entry.frame()?);
        }

        Some(table)
    }

    /// Walks the page table hierarchy, creating intermediate tables as needed.
    fn walk_or_create<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        virt: VirtualAddress,
    ) -> Result<PageTable, MapError> {
        let mut table = self.root;

        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            let index = virt.page_index(level);
            let entry = table.entry(memory, index);

            table = match entry.frame() {
                Some(frame) => PageTable::at(frame),
                None => {
                    let frame = memory.allocate_zeroed().ok_or(MapError::OutOfMemory)?;
                    table.set_entry(memory, index, PageEntry::new(frame, TABLE_FLAGS));
                    PageTable::at(frame)
                }
            };
        }

        Ok(table)
    }
}
