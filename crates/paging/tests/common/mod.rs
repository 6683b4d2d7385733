#![allow(dead_code)]

mod elf;

use std::sync::Arc;

use log::{Level, LevelFilter};
use paging::{
    BackingStore, ElfImage, MemoryDisk, Pager, ProgramImage,
    config::{KernelLayout, SwapConfig},
};
use pmm::{EmulatedMemory, PAGE_SIZE};
use spin::{Mutex, Once};

pub use elf::ElfBuilder;

/// Frames taken by an address space before any user page: directory, kernel table, user table.
pub const OVERHEAD_FRAMES: usize = 3;

pub type TestPager = Pager<EmulatedMemory, MemoryDisk>;

pub fn pager(frames: usize, slots: usize) -> TestPager {
    let swap = BackingStore::new(
        MemoryDisk::new(slots as u64 * 8),
        SwapConfig::new(0, slots),
    )
    .unwrap();
    Pager::new(
        EmulatedMemory::new(frames),
        swap,
        KernelLayout::for_memory(frames * PAGE_SIZE).unwrap(),
    )
}

/// Parses the executable `builder` describes.
pub fn image(builder: &ElfBuilder) -> Arc<dyn ProgramImage + Send + Sync> {
    Arc::new(ElfImage::parse(builder.build()).unwrap())
}

/// A program of `text_pages` pages of code, each filled with its page number, plus `data` and
/// `bss` bytes of zeroes in a second segment.
pub fn program(text_pages: usize, data: &[u8], bss: usize) -> Arc<dyn ProgramImage + Send + Sync> {
    let text: Vec<u8> = (0..text_pages * PAGE_SIZE)
        .map(|i| (i / PAGE_SIZE) as u8)
        .collect();
    let data_start = (text_pages * PAGE_SIZE) as u32;
    image(
        &ElfBuilder::new(0)
            .segment(0, &text, text.len() as u32)
            .segment(data_start, data, (data.len() + bss) as u32),
    )
}

/// Logger that records every message, so tests can check what the subsystem reported.
pub struct Capture {
    records: Mutex<Vec<(Level, String)>>,
}

static CAPTURE: Once<Capture> = Once::new();

impl Capture {
    pub fn init() -> &'static Self {
        let mut fresh = false;
        let capture = CAPTURE.call_once(|| {
            fresh = true;
            Capture {
                records: Mutex::new(Vec::new()),
            }
        });
        if fresh {
            log::set_logger(capture).unwrap();
            log::set_max_level(LevelFilter::Trace);
        }
        capture
    }

    /// Returns whether a message at `level` containing `needle` was logged.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl log::Log for Capture {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.records
            .lock()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}
