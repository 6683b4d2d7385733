#![cfg_attr(not(test), no_std)]

//! # Polaris Paging
//!
//! Demand paging and swap on top of [`pmm`]:
//!
//! - Per-process address spaces over the two-level page table, with lazily reserved ranges.
//! - A page fault handler that fills frames from swap, from the program image or with zeroes.
//! - Approximate-LRU replacement that only ever evicts pages of the faulting process.
//! - A backing store: a fixed arena of page-sized slots on a block device, threaded into one
//!   chain per process.
//!
//! [`Pager`] ties these together for process lifecycle code. Nothing here installs a logger or
//! touches real hardware; physical memory and the block device come in through
//! [`pmm::PhysicalMemory`] and [`BlockDevice`].

extern crate alloc;

mod address_space;
mod backing_store;
mod block;
pub mod config;
mod error;
pub mod fault;
mod image;
mod pager;
mod process;
mod replacement;

#[cfg(test)]
#[path = "../tests/common/elf.rs"]
mod elf_builder;

pub use address_space::{AddressSpace, PageMeta};
pub use backing_store::{BackingStore, SlotIndex, SwapChain};
pub use block::{BlockDevice, MemoryDisk};
pub use error::{
    AccessError, AddressSpaceError, BlockError, ExecError, FaultError, ForkError, ImageError,
    SwapError,
};
pub use fault::{FaultOutcome, KillReason, PageSource};
pub use image::{ElfImage, ProgramImage, Segment};
pub use pager::{ExecInfo, Pager};
pub use process::{PagingState, Process, on_exec_start, on_exit};
pub use replacement::{Age, evict, select_victim};
