//! Process state owned by the paging subsystem, and the lifecycle hooks around it.
//!
//! The scheduler and the rest of process management live elsewhere; [`Process`] carries only
//! what paging reads and writes.

use alloc::{boxed::Box, string::String, sync::Arc};

use pmm::{PAGE_SIZE, PhysicalMemory, VirtualAddress};

use crate::{
    AddressSpace, BackingStore, BlockDevice, ProgramImage, backing_store::SwapChain,
};

/// Per-process paging bookkeeping.
pub struct PagingState {
    /// Staging buffer for pages moving to or from swap.
    pub scratch: Box<[u8; PAGE_SIZE]>,
    /// Bytes of code, data and bss loaded from the program image.
    pub image_size: usize,
    /// Set once any page has been evicted; from then on faults below `image_size` try swap
    /// before the program image.
    pub image_evicted: bool,
    pub fault_count: usize,
    pub eviction_count: usize,
    /// Advanced on every fault, saturating at [`AGE_CURSOR_LIMIT`](crate::config::AGE_CURSOR_LIMIT).
    pub age_cursor: u8,
    /// This process's slots in the swap arena.
    pub chain: SwapChain,
}

impl PagingState {
    pub fn new() -> Self {
        Self {
            scratch: Box::new([0; PAGE_SIZE]),
            image_size: 0,
            image_evicted: false,
            fault_count: 0,
            eviction_count: 0,
            age_cursor: 0,
            chain: SwapChain::new(),
        }
    }

    /// The page just above the guard page, where the initial stack lives.
    pub fn stack_page(&self) -> VirtualAddress {
        VirtualAddress::new(self.image_size.next_multiple_of(PAGE_SIZE) + PAGE_SIZE)
    }

    /// The page between the image and the stack, never accessible to user code.
    pub fn guard_page(&self) -> VirtualAddress {
        VirtualAddress::new(self.image_size.next_multiple_of(PAGE_SIZE))
    }
}

impl Default for PagingState {
    fn default() -> Self {
        Self::new()
    }
}

/// A process as seen by the paging subsystem.
pub struct Process {
    pub pid: u32,
    pub name: String,
    pub address_space: Option<AddressSpace>,
    /// Size of the user region in bytes, `[0, size)`.
    pub size: usize,
    pub image: Option<Arc<dyn ProgramImage + Send + Sync>>,
    pub paging: PagingState,
    /// Set when the process must not return to user mode.
    pub killed: bool,
}

impl Process {
    /// Creates a process with no address space and no program.
    pub fn new(pid: u32, name: &str) -> Self {
        Self {
            pid,
            name: String::from(name),
            address_space: None,
            size: 0,
            image: None,
            paging: PagingState::new(),
            killed: false,
        }
    }
}

/// Called when a process starts replacing its program, before the new address space is built.
///
/// The old program's swapped pages are worthless to the new one, so its chain is released and
/// the per-program counters start over.
pub fn on_exec_start<D: BlockDevice>(swap: &BackingStore<D>, process: &mut Process) {
    swap.release_all(&mut process.paging.chain);
    process.paging.image_evicted = false;
    process.paging.fault_count = 0;
    process.paging.eviction_count = 0;
}

/// Called when a process exits: releases its swap chain, then its address space.
pub fn on_exit<M: PhysicalMemory + ?Sized, D: BlockDevice>(
    memory: &M,
    swap: &BackingStore<D>,
    process: &mut Process,
) {
    let freed = swap.release_all(&mut process.paging.chain);
    if let Some(space) = process.address_space.take() {
        space.destroy(memory);
    }
    process.size = 0;

    log::info!(
        "pid {} ({}) exited: {} faults, {} evictions, {} swap slots freed",
        process.pid,
        process.name,
        process.paging.fault_count,
        process.paging.eviction_count,
        freed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm::EmulatedMemory;

    use crate::{
        MemoryDisk,
        config::{KernelLayout, SwapConfig},
    };

    #[test]
    fn stack_sits_above_guard_page() {
        let mut state = PagingState::new();
        state.image_size = 0x1234;
        assert_eq!(state.guard_page(), VirtualAddress::new(0x2000));
        assert_eq!(state.stack_page(), VirtualAddress::new(0x3000));
    }

    #[test]
    fn exec_start_releases_chain_and_counters() {
        let swap = BackingStore::new(MemoryDisk::new(32), SwapConfig::new(0, 2)).unwrap();
        let mut process = Process::new(3, "sh");
        swap.store(&mut process.paging.chain, VirtualAddress::new(0), &[1; PAGE_SIZE])
            .unwrap();
        process.paging.image_evicted = true;
        process.paging.fault_count = 12;

        on_exec_start(&swap, &mut process);
        assert!(process.paging.chain.is_empty());
        assert!(!process.paging.image_evicted);
        assert_eq!(process.paging.fault_count, 0);
        assert_eq!(swap.free_slots(), 2);
    }

    #[test]
    fn exit_returns_frames_and_slots() {
        let memory = EmulatedMemory::new(32);
        let layout = KernelLayout::for_memory(32 * PAGE_SIZE).unwrap();
        let swap = BackingStore::new(MemoryDisk::new(32), SwapConfig::new(0, 2)).unwrap();

        let mut process = Process::new(4, "cat");
        let mut space = AddressSpace::new(&memory, &layout).unwrap();
        process.size = space.grow(&memory, 0, 3 * PAGE_SIZE).unwrap();
        process.address_space = Some(space);
        swap.store(&mut process.paging.chain, VirtualAddress::new(0x5000), &[2; PAGE_SIZE])
            .unwrap();

        on_exit(&memory, &swap, &mut process);
        assert!(process.address_space.is_none());
        assert_eq!(memory.free_frames(), 32);
        assert_eq!(swap.free_slots(), 2);

        // A second exit has nothing left to release.
        on_exit(&memory, &swap, &mut process);
        assert_eq!(memory.free_frames(), 32);
    }
}
