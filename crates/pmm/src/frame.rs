use core::sync::atomic::{AtomicU32, Ordering};

/// Holds metadata for a physical memory frame.
///
/// Modeled after Linux's `struct page`, but only tracks what the paging subsystem needs to catch
/// bookkeeping bugs: whether the frame is handed out and whether it may be handed out at all.
#[derive(Default)]
pub struct Frame {
    /// Flags identifying the state of this frame.
    pub flags: FrameFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFlag {
    /// Frame is allocated.
    Allocated = 1 << 0,
    /// Frame is reserved and should not be allocated.
    Reserved = 1 << 1,
}

/// Atomic flags for a physical memory frame.
#[derive(Default)]
pub struct FrameFlags(AtomicU32);

impl FrameFlags {
    /// Creates a new `FrameFlags` instance with all flags cleared.
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Sets the given flag atomically.
    pub fn atomic_set(&self, flag: FrameFlag) {
        self.0.fetch_or(flag as u32, Ordering::AcqRel);
    }

    /// Tests if the given flag is set, atomically.
    pub fn atomic_test(&self, flag: FrameFlag) -> bool {
        self.0.load(Ordering::Acquire) & flag as u32 != 0
    }

    /// Tests the given flag and sets it atomically, returning the previous value.
    pub fn atomic_test_and_set(&self, flag: FrameFlag) -> bool {
        let mask = flag as u32;
        self.0.fetch_or(mask, Ordering::AcqRel) & mask != 0
    }

    /// Tests the given flag and clears it atomically, returning the previous value.
    pub fn atomic_test_and_clear(&self, flag: FrameFlag) -> bool {
        let mask = flag as u32;
        self.0.fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }
}
