//! Page table structure.

use crate::{FrameNumber, PhysicalAddress, PhysicalMemory};

use super::{ENTRIES_PER_TABLE, ENTRY_SIZE, entry::PageEntry};

/// A page directory or page table occupying one physical frame.
///
/// The frame holds [`ENTRIES_PER_TABLE`] little-endian 32-bit entries. The handle itself is just
/// the frame number; entries are read and written through the physical memory that owns the
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTable {
    frame: FrameNumber,
}

impl PageTable {
    /// Refers to the table stored in `frame`.
    pub const fn at(frame: FrameNumber) -> Self {
        Self { frame }
    }

    /// Returns the frame this table lives in.
    pub const fn frame(self) -> FrameNumber {
        self.frame
    }

    /// Returns the physical address of this table, as stored in a parent entry.
    pub fn physical_address(self) -> PhysicalAddress {
        self.frame.start()
    }

    /// Reads the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry<M: PhysicalMemory + ?Sized>(self, memory: &M, index: usize) -> PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        let mut raw = [0u8; ENTRY_SIZE];
        memory.read(self.frame, index * ENTRY_SIZE, &mut raw);
        PageEntry::from_u32(u32::from_le_bytes(raw))
    }

    /// Writes the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn set_entry<M: PhysicalMemory + ?Sized>(self, memory: &M, index: usize, entry: PageEntry) {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        memory.write(self.frame, index * ENTRY_SIZE, &entry.as_u32().to_le_bytes());
    }

    /// Returns the number of entries in this page table.
    pub const fn len(self) -> usize {
        ENTRIES_PER_TABLE
    }
}
