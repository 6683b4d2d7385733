//! Error types of the paging subsystem.
//!
//! Operations whose failures a caller can react to (out of memory while growing, out of swap,
//! lookup misses) return the specific error of their component. The fault handler and the
//! replacement policy return [`FaultError`], which is always fatal to the caller.

use core::fmt;

use pmm::{MapError, VirtualAddress};

use crate::fault::KillReason;

/// Errors from editing an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpaceError {
    /// A present entry already maps the address.
    AlreadyMapped(VirtualAddress),
    /// No frame was available for a page or a page table.
    OutOfMemory,
    /// The range would reach into kernel space.
    KernelBoundary,
    /// No page table entry exists where one is required.
    MissingEntry(VirtualAddress),
    /// The kernel layout is malformed.
    InvalidLayout,
    /// The process has no address space to edit.
    NoAddressSpace,
}

impl fmt::Display for AddressSpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyMapped(va) => write!(f, "page {} is already mapped", va),
            Self::OutOfMemory => write!(f, "out of physical frames"),
            Self::KernelBoundary => write!(f, "range crosses into kernel space"),
            Self::MissingEntry(va) => write!(f, "no page table entry for {}", va),
            Self::InvalidLayout => write!(f, "invalid kernel layout"),
            Self::NoAddressSpace => write!(f, "no address space"),
        }
    }
}

impl From<MapError> for AddressSpaceError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::AlreadyMapped(va) => Self::AlreadyMapped(va),
            MapError::OutOfMemory => Self::OutOfMemory,
            MapError::MissingEntry(va) => Self::MissingEntry(va),
        }
    }
}

/// Errors reported by block devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The block number is past the end of the device.
    OutOfRange,
    /// The buffer is not a whole number of blocks.
    InvalidBuffer,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "block out of range"),
            Self::InvalidBuffer => write!(f, "buffer is not a whole number of blocks"),
        }
    }
}

/// Errors from the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// Every slot of the arena is in use.
    Exhausted,
    /// The process's chain holds no slot for the address.
    NotFound,
    /// The device cannot hold the configured arena.
    DeviceTooSmall,
    /// The block device failed.
    Device(BlockError),
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "swap arena exhausted"),
            Self::NotFound => write!(f, "page not in swap"),
            Self::DeviceTooSmall => write!(f, "device too small for swap arena"),
            Self::Device(err) => write!(f, "swap device: {}", err),
        }
    }
}

impl From<BlockError> for SwapError {
    fn from(err: BlockError) -> Self {
        Self::Device(err)
    }
}

/// Errors from reading a program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    /// The file is not a well-formed executable.
    Malformed,
    /// A loadable segment cannot be placed in user space.
    NotLoadable,
    /// The file ended before the requested bytes.
    ShortRead,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed program image"),
            Self::NotLoadable => write!(f, "segment cannot be loaded"),
            Self::ShortRead => write!(f, "short read from program image"),
        }
    }
}

/// Unrecoverable failures of the fault handler and the replacement policy.
///
/// None of these can be retried: either a resource ran out while a fault had to make progress,
/// or a bookkeeping invariant does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// No frame could be freed for the fault.
    OutOfFrames,
    /// An evicted page had nowhere to go.
    SwapExhausted,
    /// The faulting page was already present.
    Remap(VirtualAddress),
    /// A page table entry that must exist was missing.
    MissingEntry(VirtualAddress),
    /// The process has no page that could be evicted.
    NoVictim,
    /// No segment of the program image covers the address.
    NoSegment(VirtualAddress),
    /// The program image could not be read.
    Image(ImageError),
    /// The swap device failed.
    Device(BlockError),
    /// A page known to be in swap was not found in the process's chain.
    LostPage,
    /// The process has no address space.
    NoAddressSpace,
    /// Any other failure editing the address space.
    AddressSpace(AddressSpaceError),
}

impl FaultError {
    /// Returns whether this is resource exhaustion rather than a broken invariant.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::OutOfFrames | Self::SwapExhausted)
    }
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFrames => write!(f, "out of physical frames"),
            Self::SwapExhausted => write!(f, "swap arena exhausted"),
            Self::Remap(va) => write!(f, "remap of present page {}", va),
            Self::MissingEntry(va) => write!(f, "missing page table entry for {}", va),
            Self::NoVictim => write!(f, "no page to evict"),
            Self::NoSegment(va) => write!(f, "no segment covers {}", va),
            Self::Image(err) => write!(f, "program image: {}", err),
            Self::Device(err) => write!(f, "swap device: {}", err),
            Self::LostPage => write!(f, "swapped page missing from chain"),
            Self::NoAddressSpace => write!(f, "process has no address space"),
            Self::AddressSpace(err) => write!(f, "address space: {}", err),
        }
    }
}

impl From<SwapError> for FaultError {
    fn from(err: SwapError) -> Self {
        match err {
            SwapError::Exhausted | SwapError::DeviceTooSmall => Self::SwapExhausted,
            SwapError::Device(err) => Self::Device(err),
            SwapError::NotFound => Self::LostPage,
        }
    }
}

impl From<ImageError> for FaultError {
    fn from(err: ImageError) -> Self {
        Self::Image(err)
    }
}

impl From<AddressSpaceError> for FaultError {
    fn from(err: AddressSpaceError) -> Self {
        match err {
            AddressSpaceError::AlreadyMapped(va) => Self::Remap(va),
            AddressSpaceError::MissingEntry(va) => Self::MissingEntry(va),
            AddressSpaceError::OutOfMemory => Self::OutOfFrames,
            AddressSpaceError::NoAddressSpace => Self::NoAddressSpace,
            AddressSpaceError::KernelBoundary | AddressSpaceError::InvalidLayout => {
                Self::AddressSpace(err)
            }
        }
    }
}

/// Errors from replacing a process's program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// More than [`MAX_ARGS`](crate::config::MAX_ARGS) arguments.
    TooManyArgs,
    /// The arguments do not fit into the initial stack page.
    ArgsTooLarge,
    Image(ImageError),
    AddressSpace(AddressSpaceError),
    Swap(SwapError),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyArgs => write!(f, "too many arguments"),
            Self::ArgsTooLarge => write!(f, "arguments do not fit on the stack"),
            Self::Image(err) => write!(f, "{}", err),
            Self::AddressSpace(err) => write!(f, "{}", err),
            Self::Swap(err) => write!(f, "{}", err),
        }
    }
}

impl From<ImageError> for ExecError {
    fn from(err: ImageError) -> Self {
        Self::Image(err)
    }
}

impl From<AddressSpaceError> for ExecError {
    fn from(err: AddressSpaceError) -> Self {
        Self::AddressSpace(err)
    }
}

impl From<SwapError> for ExecError {
    fn from(err: SwapError) -> Self {
        Self::Swap(err)
    }
}

/// Errors from duplicating a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    AddressSpace(AddressSpaceError),
    Swap(SwapError),
    /// The parent's stack page is swapped out but missing from its chain.
    LostPage(VirtualAddress),
    /// The parent has no address space to copy.
    NoAddressSpace,
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressSpace(err) => write!(f, "{}", err),
            Self::Swap(err) => write!(f, "{}", err),
            Self::LostPage(va) => write!(f, "swapped page {} missing from chain", va),
            Self::NoAddressSpace => write!(f, "parent has no address space"),
        }
    }
}

impl From<AddressSpaceError> for ForkError {
    fn from(err: AddressSpaceError) -> Self {
        Self::AddressSpace(err)
    }
}

impl From<SwapError> for ForkError {
    fn from(err: SwapError) -> Self {
        Self::Swap(err)
    }
}

/// Errors from copying to or from user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The access faulted and the process was killed.
    Killed(KillReason),
    Fault(FaultError),
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed(reason) => write!(f, "process killed: {}", reason),
            Self::Fault(err) => write!(f, "{}", err),
        }
    }
}

impl From<FaultError> for AccessError {
    fn from(err: FaultError) -> Self {
        Self::Fault(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_errors_are_distinguished() {
        assert!(FaultError::OutOfFrames.is_capacity());
        assert!(FaultError::from(SwapError::Exhausted).is_capacity());
        assert!(!FaultError::NoVictim.is_capacity());
        assert!(!FaultError::Remap(VirtualAddress::new(0x1000)).is_capacity());
    }

    #[test]
    fn map_errors_convert() {
        let va = VirtualAddress::new(0x2000);
        assert_eq!(
            AddressSpaceError::from(MapError::AlreadyMapped(va)),
            AddressSpaceError::AlreadyMapped(va)
        );
        assert_eq!(
            FaultError::from(AddressSpaceError::from(MapError::AlreadyMapped(va))),
            FaultError::Remap(va)
        );
    }

    #[test]
    fn address_space_errors_keep_their_cause() {
        assert_eq!(
            FaultError::from(AddressSpaceError::KernelBoundary),
            FaultError::AddressSpace(AddressSpaceError::KernelBoundary)
        );
        assert_eq!(
            FaultError::from(AddressSpaceError::NoAddressSpace),
            FaultError::NoAddressSpace
        );
        assert_eq!(
            format!("{}", FaultError::from(AddressSpaceError::InvalidLayout)),
            "address space: invalid kernel layout"
        );
        assert_eq!(FaultError::from(SwapError::NotFound), FaultError::LostPage);
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            format!("{}", FaultError::NoSegment(VirtualAddress::new(0x3000))),
            "no segment covers 0x3000"
        );
        assert_eq!(
            format!("{}", SwapError::Device(BlockError::OutOfRange)),
            "swap device: block out of range"
        );
    }
}
