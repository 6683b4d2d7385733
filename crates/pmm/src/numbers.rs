//! Frame and page numbers.
//!
//! A [`FrameNumber`] indexes physical memory in page-sized steps, a [`PageNumber`] indexes a
//! virtual address space the same way. Ranges of either iterate half-open.

use core::{
    fmt,
    ops::{Add, Range, Sub},
};

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    arch::PAGE_SIZE,
};

macro_rules! number_type {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            pub fn range(range: Range<Self>) -> impl Iterator<Item = Self> {
                (range.start.0..range.end.0).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
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

number_type!(FrameNumber);
number_type!(PageNumber);

impl FrameNumber {
    /// Physical address of the first byte of the frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        Self(addr.as_usize() / PAGE_SIZE)
    }
}

impl PageNumber {
    /// The page holding byte `addr` of an address space.
    #[inline]
    pub const fn containing(addr: usize) -> Self {
        Self(addr / PAGE_SIZE)
    }

    /// The first page starting at or above `addr`. A size of `addr` bytes covers the pages
    /// below this one.
    #[inline]
    pub const fn at_or_after(addr: usize) -> Self {
        Self(addr.div_ceil(PAGE_SIZE))
    }

    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * PAGE_SIZE)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self(addr.as_usize() / PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_map_to_physical_addresses() {
        let frame = FrameNumber::new(42);
        assert_eq!(frame.start(), PhysicalAddress::new(42 * PAGE_SIZE));
        assert_eq!(FrameNumber::from(frame.start() + 100), frame);
        assert_eq!((frame + 3) - frame, 3);
    }

    #[test]
    fn sizes_round_up_to_pages() {
        assert_eq!(PageNumber::at_or_after(0), PageNumber::new(0));
        assert_eq!(PageNumber::at_or_after(PAGE_SIZE), PageNumber::new(1));
        assert_eq!(PageNumber::at_or_after(PAGE_SIZE + 1), PageNumber::new(2));
        assert_eq!(PageNumber::containing(PAGE_SIZE + 1), PageNumber::new(1));
    }

    #[test]
    fn page_ranges_are_half_open() {
        let pages: Vec<_> =
            PageNumber::range(PageNumber::at_or_after(0x1800)..PageNumber::at_or_after(0x5000))
                .map(|page| page.start().as_usize())
                .collect();
        assert_eq!(pages, vec![0x2000, 0x3000, 0x4000]);
    }

    #[test]
    fn page_of_virtual_address() {
        let addr = VirtualAddress::new(PAGE_SIZE * 3 + 10);
        assert_eq!(addr.page_number(), PageNumber::new(3));
        assert_eq!(format!("{:?}", addr.page_number()), "PageNumber(3)");
    }
}
