//! Physical frame allocation and access.
//!
//! [`PhysicalMemory`] is the seam between the paging subsystem and whatever hands out page frames.
//! The kernel backs it with its own frame allocator; [`EmulatedMemory`] backs it with a host
//! buffer so page tables, faults and eviction can be exercised without hardware.

use alloc::{boxed::Box, vec, vec::Vec};

use spin::Mutex;

use crate::{Frame, FrameFlag, FrameNumber, arch::PAGE_SIZE};

/// Byte written over every freed frame, so stale references read obvious garbage.
const JUNK: u8 = 0x01;

/// A pool of fixed-size physical frames.
///
/// All offsets are relative to the start of a frame; an access must stay within one frame.
pub trait PhysicalMemory {
    /// Takes one free frame out of the pool, or returns None if the pool is exhausted.
    fn allocate(&self) -> Option<FrameNumber>;

    /// Returns a frame to the pool.
    fn deallocate(&self, frame: FrameNumber);

    /// Copies bytes out of a frame.
    fn read(&self, frame: FrameNumber, offset: usize, buf: &mut [u8]);

    /// Copies bytes into a frame.
    fn write(&self, frame: FrameNumber, offset: usize, data: &[u8]);

    /// Sets `len` bytes of a frame, starting at `offset`, to `value`.
    fn fill(&self, frame: FrameNumber, offset: usize, len: usize, value: u8);

    /// Returns the number of frames currently free.
    fn free_frames(&self) -> usize;

    /// Returns the number of frames managed by this pool, free or not.
    fn total_frames(&self) -> usize;

    /// Zeroes a whole frame.
    fn zero(&self, frame: FrameNumber) {
        self.fill(frame, 0, PAGE_SIZE, 0);
    }

    /// Allocates a frame and zeroes it.
    fn allocate_zeroed(&self) -> Option<FrameNumber> {
        let frame = self.allocate()?;
        self.zero(frame);
        Some(frame)
    }

    /// Copies the whole contents of `src` into `dst`.
    fn copy_frame(&self, dst: FrameNumber, src: FrameNumber) {
        let mut page = [0u8; PAGE_SIZE];
        self.read(src, 0, &mut page);
        self.write(dst, 0, &page);
    }
}

/// Emulated physical memory for running the paging subsystem on a host.
///
/// Frames are carved out of a single heap buffer. Free frames are kept on a LIFO free list, so the
/// most recently freed frame is handed out next.
pub struct EmulatedMemory {
    /// Per-frame metadata, used to catch double allocation and double free.
    frames: Box<[Frame]>,
    inner: Mutex<Inner>,
}

struct Inner {
    bytes: Box<[u8]>,
    free: Vec<FrameNumber>,
}

impl EmulatedMemory {
    /// Creates an emulated memory with `frame_count` frames, all free.
    pub fn new(frame_count: usize) -> Self {
        Self::with_reserved(frame_count, 0)
    }

    /// Creates an emulated memory with `frame_count` frames where the first `reserved` frames are
    /// never handed out (as low memory holding the kernel image would be).
    pub fn with_reserved(frame_count: usize, reserved: usize) -> Self {
        assert!(reserved <= frame_count, "more frames reserved than exist");

        let frames: Box<[Frame]> = (0..frame_count).map(|_| Frame::default()).collect();
        for frame in &frames[..reserved] {
            frame.flags.atomic_set(FrameFlag::Reserved);
        }

        // Pushed in reverse so the lowest free frame is allocated first.
        let free = (reserved..frame_count).rev().map(FrameNumber::new).collect();

        log::debug!(
            "emulated memory: {} frames ({}), {} reserved",
            frame_count,
            crate::HumanSize(frame_count * PAGE_SIZE),
            reserved
        );

        Self {
            frames,
            inner: Mutex::new(Inner {
                bytes: vec![JUNK; frame_count * PAGE_SIZE].into_boxed_slice(),
                free,
            }),
        }
    }

    /// Returns whether `frame` is currently handed out.
    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        self.frame(frame).flags.atomic_test(FrameFlag::Allocated)
    }

    fn frame(&self, frame: FrameNumber) -> &Frame {
        self.frames
            .get(frame.as_usize())
            .unwrap_or_else(|| panic!("frame {} out of range", frame))
    }

    fn span(frame: FrameNumber, offset: usize, len: usize) -> core::ops::Range<usize> {
        assert!(
            offset + len <= PAGE_SIZE,
            "access crosses the end of frame {}",
            frame
        );
        let start = frame.as_usize() * PAGE_SIZE + offset;
        start..start + len
    }
}

impl PhysicalMemory for EmulatedMemory {
    fn allocate(&self) -> Option<FrameNumber> {
        let frame = self.inner.lock().free.pop()?;
        let was_allocated = self
            .frame(frame)
            .flags
            .atomic_test_and_set(FrameFlag::Allocated);
        assert!(!was_allocated, "frame {} handed out twice", frame);
        Some(frame)
    }

    fn deallocate(&self, frame: FrameNumber) {
        let meta = self.frame(frame);
        assert!(
            !meta.flags.atomic_test(FrameFlag::Reserved),
            "freeing reserved frame {}",
            frame
        );
        assert!(
            meta.flags.atomic_test_and_clear(FrameFlag::Allocated),
            "freeing frame {} that is not allocated",
            frame
        );

        let mut inner = self.inner.lock();
        inner.bytes[Self::span(frame, 0, PAGE_SIZE)].fill(JUNK);
        inner.free.push(frame);
    }

    fn read(&self, frame: FrameNumber, offset: usize, buf: &mut [u8]) {
        let span = Self::span(frame, offset, buf.len());
        buf.copy_from_slice(&self.inner.lock().bytes[span]);
    }

    fn write(&self, frame: FrameNumber, offset: usize, data: &[u8]) {
        let span = Self::span(frame, offset, data.len());
        self.inner.lock().bytes[span].copy_from_slice(data);
    }

    fn fill(&self, frame: FrameNumber, offset: usize, len: usize, value: u8) {
        let span = Self::span(frame, offset, len);
        self.inner.lock().bytes[span].fill(value);
    }

    fn free_frames(&self) -> usize {
        self.inner.lock().free.len()
    }

    fn total_frames(&self) -> usize {
        self.frames.len()
    }
}
