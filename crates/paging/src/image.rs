//! Program images.
//!
//! The fault handler derives code and data pages from the image a process was started from. It
//! sees the image only through [`ProgramImage`]: a table of loadable segments and a way to read
//! bytes of the backing file. [`ElfImage`] provides both for ELF executables.

use alloc::vec::Vec;

use elf::{ElfBytes, abi::PT_LOAD, endian::AnyEndian};
use pmm::{PAGE_SIZE, VirtualAddress};

use crate::{ImageError, config::KERNEL_BASE};

/// A loadable segment of a program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Virtual address of the first byte. Always page-aligned.
    pub vaddr: VirtualAddress,
    /// Offset of the segment's bytes in the file.
    pub offset: usize,
    /// Number of bytes backed by the file.
    pub file_size: usize,
    /// Number of bytes in memory; the tail past `file_size` is zero-filled.
    pub mem_size: usize,
}

impl Segment {
    /// First address past the segment in memory.
    pub fn end(&self) -> usize {
        self.vaddr.as_usize() + self.mem_size
    }

    pub fn contains(&self, va: VirtualAddress) -> bool {
        (self.vaddr.as_usize()..self.end()).contains(&va.as_usize())
    }
}

/// An executable the fault handler can page code and data in from.
pub trait ProgramImage {
    /// Address execution starts at.
    fn entry(&self) -> VirtualAddress;

    /// The loadable segments, in file order.
    fn segments(&self) -> &[Segment];

    /// Reads `buf.len()` bytes of the file starting at `offset`.
    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), ImageError>;

    /// Returns the segment whose memory extent covers `va`.
    fn segment_covering(&self, va: VirtualAddress) -> Option<&Segment> {
        self.segments().iter().find(|segment| segment.contains(va))
    }

    /// End of the highest segment: the image size of a process running this program.
    fn image_end(&self) -> usize {
        self.segments()
            .iter()
            .map(Segment::end)
            .max()
            .unwrap_or(0)
    }
}

/// An ELF executable held in memory.
pub struct ElfImage {
    data: Vec<u8>,
    entry: VirtualAddress,
    segments: Vec<Segment>,
}

impl ElfImage {
    /// Parses the program headers of an ELF file.
    ///
    /// Every `PT_LOAD` segment must start on a page boundary, fit in user space, have at least as
    /// many bytes in memory as in the file and have its file bytes inside `data`.
    pub fn parse(data: Vec<u8>) -> Result<Self, ImageError> {
        let (entry, segments) = {
            let file = ElfBytes::<AnyEndian>::minimal_parse(&data).map_err(|err| {
                log::error!("image: {}", err);
                ImageError::Malformed
            })?;
            let table = file.segments().ok_or(ImageError::Malformed)?;

            let mut segments = Vec::new();
            for header in table.iter().filter(|header| header.p_type == PT_LOAD) {
                segments.push(Self::segment(&header, data.len())?);
            }

            let entry = usize::try_from(file.ehdr.e_entry)
                .ok()
                .and_then(VirtualAddress::try_new)
                .ok_or(ImageError::Malformed)?;
            (entry, segments)
        };

        Ok(Self {
            data,
            entry,
            segments,
        })
    }

    fn segment(header: &elf::segment::ProgramHeader, file_len: usize) -> Result<Segment, ImageError> {
        let field = |value: u64| usize::try_from(value).map_err(|_| ImageError::Malformed);
        let vaddr = field(header.p_vaddr)?;
        let offset = field(header.p_offset)?;
        let file_size = field(header.p_filesz)?;
        let mem_size = field(header.p_memsz)?;

        if mem_size < file_size {
            return Err(ImageError::Malformed);
        }
        if offset.checked_add(file_size).is_none_or(|end| end > file_len) {
            return Err(ImageError::Malformed);
        }
        if vaddr % PAGE_SIZE != 0 || vaddr.checked_add(mem_size).is_none_or(|end| end > KERNEL_BASE) {
            return Err(ImageError::NotLoadable);
        }

        Ok(Segment {
            vaddr: VirtualAddress::new(vaddr),
            offset,
            file_size,
            mem_size,
        })
    }
}

impl ProgramImage for ElfImage {
    fn entry(&self) -> VirtualAddress {
        self.entry
    }

    fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), ImageError> {
        let bytes = offset
            .checked_add(buf.len())
            .and_then(|end| self.data.get(offset..end))
            .ok_or(ImageError::ShortRead)?;
        buf.copy_from_slice(bytes);
        Ok(())
    }
}
