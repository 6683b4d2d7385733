//! Block device seam used by the backing store.
//!
//! The swap arena talks to storage only through [`BlockDevice`]. A kernel plugs in its disk
//! driver; [`MemoryDisk`] keeps the blocks in RAM for running on a host.

use alloc::{vec, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{BlockError, config::BLOCK_SIZE};

/// A device that reads and writes fixed-size blocks.
///
/// Calls block the caller until the transfer completes.
pub trait BlockDevice: Send + Sync {
    /// Reads one block into `buf`, which must be exactly one block long.
    fn read_block(&self, block: u64, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Writes one block from `buf`, which must be exactly one block long.
    fn write_block(&self, block: u64, buf: &[u8]) -> Result<(), BlockError>;

    /// Returns the block size in bytes.
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Returns the number of blocks on the device.
    fn total_blocks(&self) -> u64;

    /// Reads consecutive blocks starting at `start`.
    fn read_blocks(&self, start: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let block_size = self.block_size();
        if buf.len() % block_size != 0 {
            return Err(BlockError::InvalidBuffer);
        }

        for (i, chunk) in buf.chunks_exact_mut(block_size).enumerate() {
            self.read_block(start + i as u64, chunk)?;
        }
        Ok(())
    }

    /// Writes consecutive blocks starting at `start`.
    fn write_blocks(&self, start: u64, buf: &[u8]) -> Result<(), BlockError> {
        let block_size = self.block_size();
        if buf.len() % block_size != 0 {
            return Err(BlockError::InvalidBuffer);
        }

        for (i, chunk) in buf.chunks_exact(block_size).enumerate() {
            self.write_block(start + i as u64, chunk)?;
        }
        Ok(())
    }
}

/// A block device held entirely in memory.
pub struct MemoryDisk {
    blocks: Mutex<Vec<u8>>,
    block_count: u64,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryDisk {
    /// Creates a zero-filled disk of `block_count` blocks.
    pub fn new(block_count: u64) -> Self {
        Self {
            blocks: Mutex::new(vec![0; block_count as usize * BLOCK_SIZE]),
            block_count,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of blocks read since creation.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of blocks written since creation.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn span(&self, block: u64, len: usize) -> Result<core::ops::Range<usize>, BlockError> {
        if len != BLOCK_SIZE {
            return Err(BlockError::InvalidBuffer);
        }
        if block >= self.block_count {
            return Err(BlockError::OutOfRange);
        }
        let start = block as usize * BLOCK_SIZE;
        Ok(start..start + BLOCK_SIZE)
    }
}

impl BlockDevice for MemoryDisk {
    fn read_block(&self, block: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let span = self.span(block, buf.len())?;
        buf.copy_from_slice(&self.blocks.lock()[span]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, block: u64, buf: &[u8]) -> Result<(), BlockError> {
        let span = self.span(block, buf.len())?;
        self.blocks.lock()[span].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn total_blocks(&self) -> u64 {
        self.block_count
    }
}
