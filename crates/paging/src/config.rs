//! Fixed geometry of the paging subsystem and its construction-time configuration.

use pmm::{PAGE_SIZE, PageFlags, PhysicalAddress, VirtualAddress};

use crate::AddressSpaceError;

/// Size of one block-device block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Number of consecutive device blocks holding one swapped page.
pub const BLOCKS_PER_SLOT: usize = PAGE_SIZE / BLOCK_SIZE;

/// First kernel virtual address. User space is `[0, KERNEL_BASE)`.
pub const KERNEL_BASE: usize = 0x8000_0000;

/// Highest replacement age a page can carry.
pub const MAX_AGE: u8 = 7;

/// Saturation point of the per-process age cursor.
pub const AGE_CURSOR_LIMIT: u8 = 8;

/// Maximum number of arguments accepted by exec.
pub const MAX_ARGS: usize = 32;

/// Physical end of the low I/O hole mapped for every kernel.
const IO_SPACE_END: usize = 0x10_0000;

/// Physical space set aside for kernel text and read-only data.
const KERNEL_TEXT_SIZE: usize = 0x10_0000;

/// Location and size of the swap arena on the block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapConfig {
    /// First device block of the arena.
    pub base_block: u64,
    /// Number of page-sized slots in the arena.
    pub slot_count: usize,
}

impl SwapConfig {
    pub const fn new(base_block: u64, slot_count: usize) -> Self {
        Self {
            base_block,
            slot_count,
        }
    }

    /// Number of device blocks the arena occupies.
    pub const fn blocks(&self) -> u64 {
        (self.slot_count * BLOCKS_PER_SLOT) as u64
    }

    /// First device block of `slot`.
    pub const fn slot_block(&self, slot: usize) -> u64 {
        self.base_block + (slot * BLOCKS_PER_SLOT) as u64
    }
}

/// One kernel range mapped identically into every address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelMapping {
    pub virt: VirtualAddress,
    pub phys: PhysicalAddress,
    pub len: usize,
    pub flags: PageFlags,
}

/// Physical layout of the kernel, as mirrored into the top half of every address space.
///
/// Three ranges are mapped at `KERNEL_BASE + phys`:
/// - `[0, io_end)`: I/O space, writable
/// - `[io_end, data_start)`: kernel text and read-only data
/// - `[data_start, phys_top)`: kernel data and free memory, writable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLayout {
    io_end: usize,
    data_start: usize,
    phys_top: usize,
}

impl KernelLayout {
    /// Creates a layout, checking that its ranges are page-aligned, ordered and fit into the
    /// kernel half of the address space.
    pub fn new(io_end: usize, data_start: usize, phys_top: usize) -> Result<Self, AddressSpaceError> {
        let aligned = [io_end, data_start, phys_top]
            .iter()
            .all(|addr| addr % PAGE_SIZE == 0);
        let ordered = io_end <= data_start && data_start <= phys_top;
        let fits = phys_top <= (u32::MAX as usize) - KERNEL_BASE + 1;

        if !(aligned && ordered && fits) {
            log::error!(
                "invalid kernel layout: io_end={:#x} data_start={:#x} phys_top={:#x}",
                io_end,
                data_start,
                phys_top
            );
            return Err(AddressSpaceError::InvalidLayout);
        }

        Ok(Self {
            io_end,
            data_start,
            phys_top,
        })
    }

    /// Derives a layout covering `memory_bytes` of physical memory.
    ///
    /// The I/O hole and kernel text always take the first 2 MiB, even when less memory exists.
    pub fn for_memory(memory_bytes: usize) -> Result<Self, AddressSpaceError> {
        let data_start = IO_SPACE_END + KERNEL_TEXT_SIZE;
        let phys_top = memory_bytes
            .checked_next_multiple_of(PAGE_SIZE)
            .ok_or(AddressSpaceError::InvalidLayout)?
            .max(data_start);
        Self::new(IO_SPACE_END, data_start, phys_top)
    }

    pub fn phys_top(&self) -> usize {
        self.phys_top
    }

    /// The ranges to map, lowest first.
    pub fn mappings(&self) -> [KernelMapping; 3] {
        let writable = PageFlags::WRITABLE;
        let range = |start: usize, end: usize, flags: PageFlags| KernelMapping {
            virt: VirtualAddress::new(KERNEL_BASE + start),
            phys: PhysicalAddress::new(start),
            len: end - start,
            flags,
        };

        [
            range(0, self.io_end, writable),
            range(self.io_end, self.data_start, PageFlags::empty()),
            range(self.data_start, self.phys_top, writable),
        ]
    }
}
