#![cfg_attr(not(test), no_std)]

//! # Polaris Memory Manager (PMM)
//!
//! The Polaris Memory Manager (PMM) is the hardware-facing half of the paging subsystem. It
//! provides:
//!
//! - Physical and virtual address types, frame and page numbers.
//! - The two-level, 32-bit page table format and a walker over it.
//! - The [`PhysicalMemory`] frame-allocation seam.
//! - Software emulation of physical memory for running outside a kernel.

extern crate alloc;

mod address;
pub mod arch;
mod frame;
mod human_size;
mod memory;
mod numbers;
mod page_directory;

pub use address::{PhysicalAddress, VirtualAddress};
pub use arch::{PageEntry, PageFlags, PageTable};
pub use frame::{Frame, FrameFlag, FrameFlags};
pub use human_size::HumanSize;
pub use memory::{EmulatedMemory, PhysicalMemory};
pub use numbers::{FrameNumber, PageNumber};
pub use page_directory::{MapError, PageDirectory};

pub use arch::{PAGE_SIZE, TABLE_SPAN};
