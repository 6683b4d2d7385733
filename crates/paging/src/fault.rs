//! Page fault handler.
//!
//! Entered once per hardware page fault with the faulting address. A fault on a user page that
//! is not present gets a fresh frame (evicting one of the process's own pages if memory is
//! full) whose contents come from swap, from the program image, or from zero-fill.
//!
//! Faults caused by the program itself (touching kernel space, the guard page or memory beyond
//! its size) are not errors: the process is marked killed and the fault reports
//! [`FaultOutcome::Killed`]. Everything that does come back as a [`FaultError`] is fatal.

use core::fmt;

use pmm::{FrameNumber, PAGE_SIZE, PageFlags, PhysicalMemory, VirtualAddress};

use crate::{
    BackingStore, BlockDevice, FaultError, Process, SwapError,
    config::{AGE_CURSOR_LIMIT, KERNEL_BASE},
    replacement::{self, Age},
};

/// Where the contents of a faulted-in page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    Swap,
    Image,
    ZeroFill,
}

/// Why a faulting process was killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// The address is in kernel space.
    KernelAddress(usize),
    /// The address is on the guard page below the stack.
    GuardPage(VirtualAddress),
    /// The address is past the end of the process.
    OutsideProcess(VirtualAddress),
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelAddress(addr) => write!(f, "access to kernel address {:#x}", addr),
            Self::GuardPage(va) => write!(f, "access to guard page {}", va),
            Self::OutsideProcess(va) => write!(f, "access to unmapped address {}", va),
        }
    }
}

/// Result of handling a fault that did not hit a fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The page is now mapped and the access can be retried.
    Resolved(PageSource),
    /// The process was killed.
    Killed(KillReason),
}

/// Handles a page fault at `addr` in `process`.
pub fn handle_page_fault<M: PhysicalMemory + ?Sized, D: BlockDevice>(
    memory: &M,
    swap: &BackingStore<D>,
    process: &mut Process,
    addr: usize,
) -> Result<FaultOutcome, FaultError> {
    if addr >= KERNEL_BASE {
        return Ok(kill(process, KillReason::KernelAddress(addr)));
    }
    let va = VirtualAddress::new(addr).align_down(PAGE_SIZE);

    match fault_in(memory, swap, process, va) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            log::error!("pid {}: fatal page fault at {}: {}", process.pid, va, err);
            Err(err)
        }
    }
}

fn kill(process: &mut Process, reason: KillReason) -> FaultOutcome {
    log::warn!("pid {} ({}) killed: {}", process.pid, process.name, reason);
    process.killed = true;
    FaultOutcome::Killed(reason)
}

fn fault_in<M: PhysicalMemory + ?Sized, D: BlockDevice>(
    memory: &M,
    swap: &BackingStore<D>,
    process: &mut Process,
    va: VirtualAddress,
) -> Result<FaultOutcome, FaultError> {
    let space = process
        .address_space
        .as_ref()
        .ok_or(FaultError::NoAddressSpace)?;
    let evicted = space.meta(va).is_some_and(|meta| !meta.resident);
    if let Some(entry) = space.entry(memory, va).filter(|entry| !entry.is_unused()) {
        if entry.is_present() {
            return Err(FaultError::Remap(va));
        }
        if !entry.flags().is_user() {
            return Ok(kill(process, KillReason::GuardPage(va)));
        }
    }
    if va.as_usize() >= process.size {
        return Ok(kill(process, KillReason::OutsideProcess(va)));
    }

    let frame = loop {
        if let Some(frame) = memory.allocate() {
            break frame;
        }
        replacement::evict(memory, swap, process)?;
    };

    let paging = &mut process.paging;
    paging.fault_count += 1;
    if paging.age_cursor < AGE_CURSOR_LIMIT {
        paging.age_cursor += 1;
    }
    let age = Age::new(paging.age_cursor - 1);

    let space = process
        .address_space
        .as_mut()
        .ok_or(FaultError::NoAddressSpace)?;
    if let Err(err) = space.map(memory, va, PAGE_SIZE, frame.start(), PageFlags::USER_RW, age) {
        memory.deallocate(frame);
        return Err(err.into());
    }

    let source = fill_frame(memory, swap, process, va, frame, evicted)?;

    #[cfg(feature = "detailed-logging")]
    log::trace!(
        "pid {}: fault at {} filled from {:?} into frame {}",
        process.pid,
        va,
        source,
        frame
    );

    Ok(FaultOutcome::Resolved(source))
}

/// Writes the contents of the page at `va` into its freshly mapped `frame`.
///
/// A page this process evicted must come back from swap; a miss is [`FaultError::LostPage`].
fn fill_frame<M: PhysicalMemory + ?Sized, D: BlockDevice>(
    memory: &M,
    swap: &BackingStore<D>,
    process: &mut Process,
    va: VirtualAddress,
    frame: FrameNumber,
    evicted: bool,
) -> Result<PageSource, FaultError> {
    let paging = &mut process.paging;

    if va.as_usize() >= paging.image_size || paging.image_evicted {
        match swap.load(&paging.chain, va, &mut paging.scratch) {
            Ok(_) => {
                memory.write(frame, 0, &paging.scratch[..]);
                return Ok(PageSource::Swap);
            }
            Err(SwapError::NotFound) if !evicted => {}
            Err(err) => return Err(err.into()),
        }
    }

    // Heap pages above the stack start out zeroed.
    if va > paging.stack_page() {
        memory.zero(frame);
        return Ok(PageSource::ZeroFill);
    }

    let image = process
        .image
        .as_deref()
        .ok_or(FaultError::NoSegment(va))?;
    let segment = image
        .segment_covering(va)
        .copied()
        .ok_or(FaultError::NoSegment(va))?;

    let within = va - segment.vaddr;
    let from_file = segment.file_size.saturating_sub(within).min(PAGE_SIZE);
    if from_file == 0 {
        memory.zero(frame);
        return Ok(PageSource::ZeroFill);
    }

    let buf = &mut paging.scratch[..from_file];
    image.read_bytes(segment.offset + within, buf)?;
    memory.write(frame, 0, buf);
    memory.fill(frame, from_file, PAGE_SIZE - from_file, 0);
    Ok(PageSource::Image)
}
