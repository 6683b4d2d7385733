//! Replacement policy.
//!
//! Approximate LRU over one process's resident pages. Each page carries an [`Age`]: the fault
//! handler sets it high when the page comes in, and every eviction pass decays all pages except
//! the victim. The victim is the page with the lowest age, lowest address first. Frames are never
//! taken from another process.

use pmm::{PageNumber, PhysicalMemory, VirtualAddress};

use crate::{AddressSpace, BackingStore, BlockDevice, FaultError, Process, config::MAX_AGE};

/// Recency estimate of a resident page, from 0 (cold) to [`MAX_AGE`] (just touched).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Age(u8);

impl Age {
    /// # Panics
    /// Panics if `age` is above [`MAX_AGE`].
    pub const fn new(age: u8) -> Self {
        assert!(age <= MAX_AGE, "age out of range");
        Self(age)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Cools the page down by one step, stopping at zero.
    pub fn decay(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }
}

/// Picks the page to evict below `size` and decays every other candidate.
///
/// The page at the rounded-up `image_size` is the guard page; it is never a candidate and is
/// never decayed. Returns None if no resident page qualifies.
pub fn select_victim(
    space: &mut AddressSpace,
    size: usize,
    image_size: usize,
) -> Option<VirtualAddress> {
    let guard = PageNumber::at_or_after(image_size);
    let limit = PageNumber::at_or_after(size);
    let mut victim: Option<(PageNumber, Age)> = None;
    for (&page, meta) in space.pages.range(..limit) {
        if !meta.resident || page == guard {
            continue;
        }
        if victim.is_none_or(|(_, age)| meta.age < age) {
            victim = Some((page, meta.age));
        }
    }
    let (victim, _) = victim?;

    for (&page, meta) in space.pages.range_mut(..limit) {
        if meta.resident && page != guard && page != victim {
            meta.age.decay();
        }
    }
    Some(victim.start())
}

/// Evicts one resident page of `process` to swap and frees its frame.
///
/// The page's entry stays behind non-present with its permissions, and the process is marked
/// as having evicted a page, so later faults look in swap first.
pub fn evict<M: PhysicalMemory + ?Sized, D: BlockDevice>(
    memory: &M,
    swap: &BackingStore<D>,
    process: &mut Process,
) -> Result<VirtualAddress, FaultError> {
    let space = process
        .address_space
        .as_mut()
        .ok_or(FaultError::NoAddressSpace)?;
    let paging = &mut process.paging;

    let Some(va) = select_victim(space, process.size, paging.image_size) else {
        log::error!("pid {}: no page to evict", process.pid);
        return Err(FaultError::NoVictim);
    };

    let frame = space
        .entry(memory, va)
        .and_then(|entry| entry.frame())
        .ok_or(FaultError::MissingEntry(va))?;
    memory.read(frame, 0, &mut paging.scratch[..]);

    let _slot = swap.store(&mut paging.chain, va, &paging.scratch).map_err(|err| {
        log::error!("pid {}: cannot evict {}: {}", process.pid, va, err);
        FaultError::from(err)
    })?;

    let frame = space.evict_entry(memory, va)?;
    memory.deallocate(frame);
    paging.image_evicted = true;
    paging.eviction_count += 1;

    #[cfg(feature = "detailed-logging")]
    log::trace!("pid {}: evicted {} to {}", process.pid, va, _slot);

    Ok(va)
}
