//! Little-endian ELF32 executables for tests, one `PT_LOAD` per segment.
//!
//! Shared by the unit tests of the crate and the integration tests.

use pmm::PAGE_SIZE;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const PT_LOAD: u32 = 1;

pub struct ElfBuilder {
    entry: u32,
    segments: Vec<(u32, Vec<u8>, u32)>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// Adds a segment at `vaddr` holding `bytes` from the file and `mem_size` bytes in memory.
    pub fn segment(mut self, vaddr: u32, bytes: &[u8], mem_size: u32) -> Self {
        self.segments.push((vaddr, bytes.to_vec(), mem_size));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let half = |out: &mut Vec<u8>, v: u16| out.extend_from_slice(&v.to_le_bytes());
        let word = |out: &mut Vec<u8>, v: u32| out.extend_from_slice(&v.to_le_bytes());

        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        half(&mut out, 2); // ET_EXEC
        half(&mut out, 3); // EM_386
        word(&mut out, 1);
        word(&mut out, self.entry);
        word(&mut out, EHDR_SIZE as u32);
        word(&mut out, 0);
        word(&mut out, 0);
        half(&mut out, EHDR_SIZE as u16);
        half(&mut out, PHDR_SIZE as u16);
        half(&mut out, self.segments.len() as u16);
        half(&mut out, 40);
        half(&mut out, 0);
        half(&mut out, 0);

        let mut offset = EHDR_SIZE + PHDR_SIZE * self.segments.len();
        for (vaddr, bytes, mem_size) in &self.segments {
            word(&mut out, PT_LOAD);
            word(&mut out, offset as u32);
            word(&mut out, *vaddr);
            word(&mut out, *vaddr);
            word(&mut out, bytes.len() as u32);
            word(&mut out, *mem_size);
            word(&mut out, 7);
            word(&mut out, PAGE_SIZE as u32);
            offset += bytes.len();
        }
        for (_, bytes, _) in &self.segments {
            out.extend_from_slice(bytes);
        }
        out
    }
}
