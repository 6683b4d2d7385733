//! Page table entry flags.

bitflags::bitflags! {
    /// Permission and state bits of a page table entry (bits 0-11 of the raw entry).
    ///
    /// Only the bits the paging subsystem relies on are named; any other bits read back from a
    /// table are dropped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// The entry maps a frame.
        const PRESENT = 1 << 0;
        /// Writes are permitted.
        const WRITABLE = 1 << 1;
        /// User mode may access the page.
        const USER = 1 << 2;
    }
}

impl PageFlags {
    /// Flags of an ordinary resident user page.
    pub const USER_RW: Self = Self::PRESENT.union(Self::WRITABLE).union(Self::USER);

    /// Flags of a user page that has been reserved or evicted and is waiting for a fault.
    pub const USER_RW_ABSENT: Self = Self::WRITABLE.union(Self::USER);

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        self.set(Self::PRESENT, present);
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    /// Sets or clears the user-accessible bit.
    pub fn set_user(&mut self, user: bool) {
        self.set(Self::USER, user);
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
