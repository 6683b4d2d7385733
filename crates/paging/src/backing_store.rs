//! Backing store manager.
//!
//! The swap arena is a fixed table of page-sized slots on a block device. Every process threads
//! its swapped pages through the table as a singly linked chain, identified by a [`SwapChain`]
//! head the process owns. Slot `i` lives at blocks `[base + 8i, base + 8i + 8)`.
//!
//! All operations take the arena lock once and do their whole chain walk and any linking
//! under it. Device transfers happen after the lock is dropped, on a slot the caller's chain
//! already owns, so they never race with another chain.

use alloc::{boxed::Box, vec};
use core::fmt;

use pmm::{HumanSize, PAGE_SIZE, VirtualAddress};
use spin::Mutex;

use crate::{BlockDevice, SwapError, config::SwapConfig};

/// Position of a slot in the arena. Positions never change for the arena's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(usize);

impl SlotIndex {
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// One arena entry. A slot with no owner is free.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    owner: Option<VirtualAddress>,
    next: Option<SlotIndex>,
}

/// Head of one process's chain of swap slots.
///
/// Only [`BackingStore`] edits a chain; the process just keeps the head.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SwapChain {
    head: Option<SlotIndex>,
}

impl SwapChain {
    pub const fn new() -> Self {
        Self { head: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// The swap arena and the device it lives on.
pub struct BackingStore<D> {
    device: D,
    config: SwapConfig,
    slots: Mutex<Box<[Slot]>>,
}

impl<D: BlockDevice> BackingStore<D> {
    /// Creates an arena with every slot free.
    ///
    /// Whatever the device holds in the arena's region is treated as garbage.
    pub fn new(device: D, config: SwapConfig) -> Result<Self, SwapError> {
        let end = config.base_block.checked_add(config.blocks());
        if end.is_none_or(|end| end > device.total_blocks()) {
            log::error!(
                "swap arena of {} slots at block {} does not fit a device of {} blocks",
                config.slot_count,
                config.base_block,
                device.total_blocks()
            );
            return Err(SwapError::DeviceTooSmall);
        }

        log::info!(
            "swap arena: {} slots ({}) at block {}",
            config.slot_count,
            HumanSize(config.slot_count * PAGE_SIZE),
            config.base_block
        );

        Ok(Self {
            device,
            config,
            slots: Mutex::new(vec![Slot::default(); config.slot_count].into_boxed_slice()),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> SwapConfig {
        self.config
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.config.slot_count
    }

    /// Number of slots not owned by any chain.
    pub fn free_slots(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|slot| slot.owner.is_none())
            .count()
    }

    /// Number of slots in `chain`.
    pub fn chain_len(&self, chain: &SwapChain) -> usize {
        let slots = self.slots.lock();
        let mut len = 0;
        let mut cursor = chain.head;
        while let Some(index) = cursor {
            len += 1;
            cursor = slots[index.0].next;
        }
        len
    }

    /// Returns the slot in `chain` holding `va`, if any.
    pub fn find(&self, chain: &SwapChain, va: VirtualAddress) -> Option<SlotIndex> {
        let slots = self.slots.lock();
        Self::lookup(&slots, chain, va)
    }

    /// Writes `page` to swap as the contents of `va`.
    ///
    /// A slot already holding `va` in this chain is overwritten in place. Otherwise the first
    /// free slot is appended to the chain's tail.
    pub fn store(
        &self,
        chain: &mut SwapChain,
        va: VirtualAddress,
        page: &[u8; PAGE_SIZE],
    ) -> Result<SlotIndex, SwapError> {
        debug_assert!(va.is_aligned(PAGE_SIZE));

        let slot = {
            let mut slots = self.slots.lock();
            match Self::lookup(&slots, chain, va) {
                Some(slot) => slot,
                None => Self::append(&mut slots, chain, va)?,
            }
        };

        self.device
            .write_blocks(self.config.slot_block(slot.0), page)?;

        #[cfg(feature = "detailed-logging")]
        log::trace!("swap: stored {} in {}", va, slot);

        Ok(slot)
    }

    /// Reads the page stored for `va` in `chain` into `page`.
    pub fn load(
        &self,
        chain: &SwapChain,
        va: VirtualAddress,
        page: &mut [u8; PAGE_SIZE],
    ) -> Result<SlotIndex, SwapError> {
        let slot = self.find(chain, va).ok_or(SwapError::NotFound)?;
        self.device
            .read_blocks(self.config.slot_block(slot.0), page)?;

        #[cfg(feature = "detailed-logging")]
        log::trace!("swap: loaded {} from {}", va, slot);

        Ok(slot)
    }

    /// Frees every slot in `chain` and empties it. Returns the number of slots freed.
    pub fn release_all(&self, chain: &mut SwapChain) -> usize {
        let mut freed = 0;
        {
            let mut slots = self.slots.lock();
            let mut cursor = chain.head.take();
            while let Some(index) = cursor {
                let slot = &mut slots[index.0];
                cursor = slot.next;
                *slot = Slot::default();
                freed += 1;
            }
        }

        if freed > 0 {
            log::debug!("swap: released {} slots", freed);
        }
        freed
    }

    /// Frees the slot holding `va` in `chain`, if any, and unlinks it.
    pub fn discard(&self, chain: &mut SwapChain, va: VirtualAddress) -> bool {
        let mut slots = self.slots.lock();
        let mut prev: Option<SlotIndex> = None;
        let mut cursor = chain.head;
        while let Some(index) = cursor {
            let next = slots[index.0].next;
            if slots[index.0].owner == Some(va) {
                match prev {
                    None => chain.head = next,
                    Some(prev) => slots[prev.0].next = next,
                }
                slots[index.0] = Slot::default();
                return true;
            }
            prev = cursor;
            cursor = next;
        }
        false
    }

    fn lookup(slots: &[Slot], chain: &SwapChain, va: VirtualAddress) -> Option<SlotIndex> {
        let mut cursor = chain.head;
        while let Some(index) = cursor {
            let slot = &slots[index.0];
            if slot.owner == Some(va) {
                return Some(index);
            }
            cursor = slot.next;
        }
        None
    }

    /// Claims the first free slot for `va` and links it at the tail of `chain`.
    fn append(
        slots: &mut [Slot],
        chain: &mut SwapChain,
        va: VirtualAddress,
    ) -> Result<SlotIndex, SwapError> {
        let Some(free) = slots.iter().position(|slot| slot.owner.is_none()) else {
            log::warn!("swap: arena exhausted storing {}", va);
            return Err(SwapError::Exhausted);
        };
        let new = SlotIndex(free);
        slots[free] = Slot {
            owner: Some(va),
            next: None,
        };

        match chain.head {
            None => chain.head = Some(new),
            Some(head) => {
                let mut tail = head;
                while let Some(next) = slots[tail.0].next {
                    tail = next;
                }
                slots[tail.0].next = Some(new);
            }
        }
        Ok(new)
    }
}
