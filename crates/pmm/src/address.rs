//! Physical and virtual address newtypes.
//!
//! Both are 32 bits wide. Arithmetic with `usize` offsets stays within the type; subtracting two
//! addresses of the same kind yields a byte distance.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PageNumber, arch};

macro_rules! address_type {
    ($name:ident, $valid:path, $what:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// # Panics
            ///
            /// Panics if `addr` does not fit in 32 bits.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                assert!($valid(addr), concat!($what, " address exceeds maximum width"));
                Self(addr)
            }

            /// Returns None if `addr` does not fit in 32 bits.
            #[inline]
            pub const fn try_new(addr: usize) -> Option<Self> {
                if $valid(addr) { Some(Self(addr)) } else { None }
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Byte offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (arch::PAGE_SIZE - 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: Self) -> usize {
                self.0 - rhs.0
            }
        }
    };
}

address_type!(PhysicalAddress, arch::validate_physical, "physical");
address_type!(VirtualAddress, arch::validate_virtual, "virtual");

impl PhysicalAddress {
    /// The frame containing this address.
    #[inline]
    pub fn frame_number(self) -> FrameNumber {
        FrameNumber::from(self)
    }
}

impl VirtualAddress {
    /// Index into the table at `level` (0 for the page table, 1 for the directory).
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        arch::page_index(self.0, level)
    }

    /// The page containing this address.
    #[inline]
    pub fn page_number(self) -> PageNumber {
        PageNumber::from(self)
    }
}
