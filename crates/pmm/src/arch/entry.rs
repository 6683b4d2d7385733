//! Page table entry for the two-level paging format.

use crate::FrameNumber;

use super::flags::PageFlags;

/// A single page table entry.
///
/// The entry format:
/// - Bits 0-11: Flags (see [`PageFlags`])
/// - Bits 12-31: Physical frame address
///
/// A non-present entry never carries a frame: reserved and evicted user pages keep only their
/// permission bits, so "present" is the single source of truth for whether a frame is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Physical address mask (bits 12-31).
    const ADDRESS_MASK: u32 = 0xFFFF_F000;

    /// Flag bits mask (bits 0-11).
    const FLAGS_MASK: u32 = 0x0000_0FFF;

    /// Creates a present entry mapping `frame` with the given flags.
    pub fn new(frame: FrameNumber, mut flags: PageFlags) -> Self {
        flags.set_present(true);
        let addr_bits = frame.start().as_usize() as u32 & Self::ADDRESS_MASK;
        Self(addr_bits | (flags.bits() & Self::FLAGS_MASK))
    }

    /// Creates a non-present entry that only records permissions.
    pub fn absent(mut flags: PageFlags) -> Self {
        flags.set_present(false);
        Self(flags.bits() & Self::FLAGS_MASK)
    }

    /// Returns the frame mapped by this entry, or None if the entry is not present.
    pub fn frame(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new(
                ((self.0 & Self::ADDRESS_MASK) >> 12) as usize,
            ))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & Self::FLAGS_MASK)
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Returns whether this entry has never been written (all bits zero).
    pub fn is_unused(self) -> bool {
        self.0 == 0
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw value of this entry as stored in a table.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Creates an entry from its raw stored value.
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }
}
