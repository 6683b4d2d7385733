//! Page-table geometry and primitives for the two-level, 32-bit paging format.
//!
//! Every address space uses the same layout:
//! - 32-bit virtual and physical addresses
//! - 2 levels of page tables (level 1 is the directory, level 0 the table)
//! - 10-bit indexes (1024 entries per table)
//! - 12-bit page offset (4 KiB pages)
//!
//! Page tables live inside ordinary physical frames, so they are read and written through
//! [`PhysicalMemory`](crate::PhysicalMemory) like any other page.

mod entry;
mod flags;
mod table;

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use table::PageTable;

/// Maximum number of bits in a physical address.
pub const MAX_PHYSICAL_BITS: usize = 32;

/// Maximum number of bits in a virtual address.
pub const MAX_VIRTUAL_BITS: usize = 32;

/// Page size in bytes (4 KiB = 2^12).
pub const PAGE_SIZE: usize = 4096;

/// Number of page table levels (level 1: directory, level 0: table).
pub const PAGE_TABLE_LEVELS: usize = 2;

/// Number of entries in a directory or a table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Size in bytes of a single entry as stored in memory.
pub const ENTRY_SIZE: usize = 4;

/// Bytes of virtual address space covered by one directory entry (4 MiB).
pub const TABLE_SPAN: usize = PAGE_SIZE * ENTRIES_PER_TABLE;

const PAGE_SHIFT: usize = 12;
const INDEX_BITS: usize = 10;

/// Returns the page table index for a given virtual address at the specified level.
///
/// - Level 0: Bits 12-21 (page table)
/// - Level 1: Bits 22-31 (page directory)
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(
        level < PAGE_TABLE_LEVELS,
        "level out of range for two-level paging (0-1)"
    );
    let shift = PAGE_SHIFT + level * INDEX_BITS;
    (address >> shift) & (ENTRIES_PER_TABLE - 1)
}

/// Validates a physical address. Physical addresses must fit within 32 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    (addr as u64) >> MAX_PHYSICAL_BITS == 0
}

/// Validates a virtual address. Virtual addresses must fit within 32 bits.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    (addr as u64) >> MAX_VIRTUAL_BITS == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_address_into_indexes() {
        // 0x1234_5678 = directory 0x048, table 0x345, offset 0x678
        assert_eq!(page_index(0x1234_5678, 1), 0x048);
        assert_eq!(page_index(0x1234_5678, 0), 0x345);
    }

    #[test]
    fn last_page_of_address_space() {
        assert_eq!(page_index(0xFFFF_F000, 1), ENTRIES_PER_TABLE - 1);
        assert_eq!(page_index(0xFFFF_F000, 0), ENTRIES_PER_TABLE - 1);
    }

    #[test]
    #[should_panic(expected = "level out of range")]
    fn rejects_third_level() {
        page_index(0, 2);
    }

    #[test]
    fn validates_widths() {
        assert!(validate_virtual(0xFFFF_FFFF));
        assert!(validate_physical(0));
        #[cfg(target_pointer_width = "64")]
        {
            assert!(!validate_virtual(0x1_0000_0000));
            assert!(!validate_physical(0x1_0000_0000));
        }
    }
}
