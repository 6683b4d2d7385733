//! The paging subsystem as the rest of the kernel sees it.
//!
//! A [`Pager`] owns the frame allocator, the swap arena and the kernel layout shared by every
//! address space. Process lifecycle code calls [`exec`](Pager::exec), [`fork`](Pager::fork),
//! [`grow`](Pager::grow) and [`exit`](Pager::exit); the trap handler calls
//! [`handle_page_fault`](Pager::handle_page_fault).

use alloc::{sync::Arc, vec::Vec};

use pmm::{PAGE_SIZE, PageNumber, PhysicalMemory, VirtualAddress};

use crate::{
    AccessError, AddressSpace, AddressSpaceError, BackingStore, BlockDevice, ExecError, ForkError,
    FaultError, Process, ProgramImage,
    config::{KERNEL_BASE, KernelLayout, MAX_ARGS},
    fault::{self, FaultOutcome},
    process::{on_exec_start, on_exit},
};

/// Return address pushed below `argc`. Returning from `main` faults on it.
const FAKE_RETURN: u32 = 0xffff_ffff;

/// Where a freshly exec'd program starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecInfo {
    pub entry: VirtualAddress,
    pub stack_pointer: VirtualAddress,
}

pub struct Pager<M, D> {
    memory: M,
    swap: BackingStore<D>,
    layout: KernelLayout,
}

impl<M: PhysicalMemory, D: BlockDevice> Pager<M, D> {
    pub fn new(memory: M, swap: BackingStore<D>, layout: KernelLayout) -> Self {
        Self {
            memory,
            swap,
            layout,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn swap(&self) -> &BackingStore<D> {
        &self.swap
    }

    pub fn layout(&self) -> &KernelLayout {
        &self.layout
    }

    /// Replaces the program of `process` with `image`, passing `args`.
    ///
    /// Nothing of the image is loaded: its segments are reserved and fault in on first touch.
    /// Only the initial stack is written, straight to swap. If this fails after the old program's
    /// swap chain was released, the process is marked killed.
    pub fn exec(
        &self,
        process: &mut Process,
        image: Arc<dyn ProgramImage + Send + Sync>,
        args: &[&str],
    ) -> Result<ExecInfo, ExecError> {
        if args.len() > MAX_ARGS {
            return Err(ExecError::TooManyArgs);
        }

        on_exec_start(&self.swap, process);
        let mut space = match AddressSpace::new(&self.memory, &self.layout) {
            Ok(space) => space,
            Err(err) => return Err(self.exec_failed(process, err.into())),
        };

        let stack_pointer = match self.load(&mut space, process, image.as_ref(), args) {
            Ok(sp) => sp,
            Err(err) => {
                self.swap.release_all(&mut process.paging.chain);
                space.destroy(&self.memory);
                return Err(self.exec_failed(process, err));
            }
        };

        if let Some(name) = args.first() {
            process.name = name.rsplit('/').next().unwrap_or(*name).into();
        }
        let image_size = image.image_end();
        let info = ExecInfo {
            entry: image.entry(),
            stack_pointer,
        };

        process.paging.image_size = image_size;
        process.paging.age_cursor = 0;
        process.size = process.paging.stack_page().as_usize() + PAGE_SIZE;
        process.image = Some(image);
        if let Some(old) = process.address_space.replace(space) {
            old.destroy(&self.memory);
        }

        log::info!(
            "pid {}: exec {} ({} image bytes, entry {})",
            process.pid,
            process.name,
            image_size,
            info.entry
        );
        Ok(info)
    }

    /// Lays out `image` in `space` and stores the initial stack. Returns the stack pointer.
    fn load(
        &self,
        space: &mut AddressSpace,
        process: &mut Process,
        image: &dyn ProgramImage,
        args: &[&str],
    ) -> Result<VirtualAddress, ExecError> {
        let mut size = 0;
        for segment in image.segments() {
            size = space.reserve(&self.memory, size, segment.end())?;
        }

        let guard = image.image_end().next_multiple_of(PAGE_SIZE);
        let stack = VirtualAddress::new(guard + PAGE_SIZE);
        if stack.as_usize() + PAGE_SIZE >= KERNEL_BASE {
            return Err(AddressSpaceError::KernelBoundary.into());
        }
        space.reserve(&self.memory, guard, guard + 2 * PAGE_SIZE)?;
        space.clear_user(&self.memory, VirtualAddress::new(guard))?;

        let paging = &mut process.paging;
        let sp = build_stack(&mut paging.scratch, stack, args)?;
        self.swap.store(&mut paging.chain, stack, &paging.scratch)?;
        Ok(sp)
    }

    fn exec_failed(&self, process: &mut Process, err: ExecError) -> ExecError {
        log::error!("pid {}: exec failed: {}", process.pid, err);
        process.killed = true;
        err
    }

    /// Creates a child of `parent` with a copy of its address space.
    pub fn fork(&self, parent: &Process, child_pid: u32) -> Result<Process, ForkError> {
        let space = parent
            .address_space
            .as_ref()
            .ok_or(ForkError::NoAddressSpace)?;

        let mut child = Process::new(child_pid, &parent.name);
        let copy = space.duplicate(
            &self.memory,
            &self.layout,
            &self.swap,
            parent.size,
            &parent.paging,
            &mut child.paging,
        )?;

        child.address_space = Some(copy);
        child.size = parent.size;
        child.image = parent.image.clone();
        child.paging.image_size = parent.paging.image_size;
        child.paging.image_evicted = parent.paging.image_evicted;
        child.paging.age_cursor = parent.paging.age_cursor;

        log::debug!(
            "pid {}: forked pid {} with {} swapped pages",
            parent.pid,
            child_pid,
            self.swap.chain_len(&child.paging.chain)
        );
        Ok(child)
    }

    /// Changes the size of `process` by `delta` bytes and returns the previous size.
    ///
    /// New pages are reserved and fault in zeroed. Removed pages lose their frames and swap
    /// slots. A size below zero is treated like one past the kernel boundary.
    pub fn grow(&self, process: &mut Process, delta: isize) -> Result<usize, AddressSpaceError> {
        let space = process
            .address_space
            .as_mut()
            .ok_or(AddressSpaceError::NoAddressSpace)?;
        let old = process.size;
        let new = old
            .checked_add_signed(delta)
            .filter(|&size| size < KERNEL_BASE)
            .ok_or(AddressSpaceError::KernelBoundary)?;

        if new > old {
            if let Err(err) = space.reserve(&self.memory, old, new) {
                log::warn!("pid {}: cannot grow to {:#x}: {}", process.pid, new, err);
                space.shrink(&self.memory, new, old);
                return Err(err);
            }
        } else if new < old {
            space.shrink(&self.memory, old, new);
            for page in PageNumber::range(PageNumber::at_or_after(new)..PageNumber::at_or_after(old))
            {
                self.swap.discard(&mut process.paging.chain, page.start());
            }
        }
        process.size = new;
        Ok(old)
    }

    /// Tears down `process`'s paging state. Safe to call more than once.
    pub fn exit(&self, process: &mut Process) {
        on_exit(&self.memory, &self.swap, process);
    }

    /// Handles a page fault at `addr` in `process`. See [`fault::handle_page_fault`].
    pub fn handle_page_fault(
        &self,
        process: &mut Process,
        addr: usize,
    ) -> Result<FaultOutcome, FaultError> {
        fault::handle_page_fault(&self.memory, &self.swap, process, addr)
    }

    /// Copies user memory at `va` into `buf`, faulting pages in as the hardware would.
    pub fn read_user(
        &self,
        process: &mut Process,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), AccessError> {
        let mut done = 0;
        while done < buf.len() {
            let at = va + done;
            let chunk = (PAGE_SIZE - at.page_offset()).min(buf.len() - done);
            let space = self.touch(process, at)?;
            space
                .copy_in(&self.memory, at, &mut buf[done..done + chunk])
                .map_err(FaultError::from)?;
            done += chunk;
        }
        Ok(())
    }

    /// Copies `data` to user memory at `va`, faulting pages in as the hardware would.
    pub fn write_user(
        &self,
        process: &mut Process,
        va: VirtualAddress,
        data: &[u8],
    ) -> Result<(), AccessError> {
        let mut done = 0;
        while done < data.len() {
            let at = va + done;
            let chunk = (PAGE_SIZE - at.page_offset()).min(data.len() - done);
            let space = self.touch(process, at)?;
            space
                .copy_out(&self.memory, at, &data[done..done + chunk])
                .map_err(FaultError::from)?;
            done += chunk;
        }
        Ok(())
    }

    /// Makes the page holding `va` resident, faulting if it is not.
    fn touch<'p>(
        &self,
        process: &'p mut Process,
        va: VirtualAddress,
    ) -> Result<&'p AddressSpace, AccessError> {
        let resident = process
            .address_space
            .as_ref()
            .ok_or(FaultError::NoAddressSpace)?
            .resolve(&self.memory, va)
            .is_some();
        if !resident {
            if let FaultOutcome::Killed(reason) = self.handle_page_fault(process, va.as_usize())? {
                return Err(AccessError::Killed(reason));
            }
        }
        Ok(process
            .address_space
            .as_ref()
            .ok_or(FaultError::NoAddressSpace)?)
    }
}

/// Writes the initial stack for `args` into the stack page image `page`, which will live at
/// `base`. Returns the stack pointer.
///
/// From the top of the page down: the argument strings, then the argv array ending in a null
/// pointer, then the argv pointer, argc and a fake return address.
fn build_stack(
    page: &mut [u8; PAGE_SIZE],
    base: VirtualAddress,
    args: &[&str],
) -> Result<VirtualAddress, ExecError> {
    page.fill(0);
    let mut sp = PAGE_SIZE;
    let mut argv = Vec::with_capacity(args.len() + 1);

    for arg in args {
        sp = sp
            .checked_sub(arg.len() + 1)
            .ok_or(ExecError::ArgsTooLarge)?
            & !3;
        page[sp..sp + arg.len()].copy_from_slice(arg.as_bytes());
        page[sp + arg.len()] = 0;
        argv.push((base + sp).as_usize() as u32);
    }
    argv.push(0);

    let words = 3 + argv.len();
    sp = sp.checked_sub(words * 4).ok_or(ExecError::ArgsTooLarge)?;
    let argv_ptr = (base + sp + 3 * 4).as_usize() as u32;

    let header = [FAKE_RETURN, args.len() as u32, argv_ptr];
    for (i, word) in header.iter().chain(argv.iter()).enumerate() {
        let at = sp + i * 4;
        page[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }
    Ok(base + sp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm::EmulatedMemory;

    use crate::{
        ElfImage, MemoryDisk,
        config::SwapConfig,
        fault::{KillReason, PageSource},
        elf_builder::ElfBuilder,
    };

    fn pager(frames: usize, slots: usize) -> Pager<EmulatedMemory, MemoryDisk> {
        let swap = BackingStore::new(MemoryDisk::new(slots as u64 * 8), SwapConfig::new(0, slots)).unwrap();
        Pager::new(
            EmulatedMemory::new(frames),
            swap,
            KernelLayout::for_memory(frames * PAGE_SIZE).unwrap(),
        )
    }

    fn program() -> Arc<dyn ProgramImage + Send + Sync> {
        let text: Vec<u8> = (0..PAGE_SIZE).map(|i| i as u8).collect();
        Arc::new(
            ElfImage::parse(
                ElfBuilder::new(0x24)
                    .segment(0, &text, PAGE_SIZE as u32)
                    .segment(0x1000, b"hello", 0x1000)
                    .build(),
            )
            .unwrap(),
        )
    }

    fn word(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn stack_layout() {
        let mut page = [0xffu8; PAGE_SIZE];
        let base = VirtualAddress::new(0x3000);
        let sp = build_stack(&mut page, base, &["echo", "hi"]).unwrap();

        // "echo\0" at 0xff8, "hi\0" at 0xff4, argv at 0xfe8, header at 0xfdc.
        assert_eq!(sp, VirtualAddress::new(0x3fdc));
        let off = sp - base;
        assert_eq!(word(&page, off), FAKE_RETURN);
        assert_eq!(word(&page, off + 4), 2);
        assert_eq!(word(&page, off + 8), 0x3fe8);
        assert_eq!(word(&page, off + 12), 0x3ff8);
        assert_eq!(word(&page, off + 16), 0x3ff4);
        assert_eq!(word(&page, off + 20), 0);
        assert_eq!(&page[0xff8..0xffd], b"echo\0");
        assert_eq!(&page[0xff4..0xff7], b"hi\0");
    }

    #[test]
    fn oversized_args_are_rejected() {
        let mut page = [0u8; PAGE_SIZE];
        let big = "x".repeat(PAGE_SIZE);
        assert_eq!(
            build_stack(&mut page, VirtualAddress::new(0), &[&big]),
            Err(ExecError::ArgsTooLarge)
        );
    }

    #[test]
    fn exec_reserves_and_stores_stack() {
        let pager = pager(64, 16);
        let mut process = Process::new(1, "init");
        let free = pager.memory().free_frames();

        let info = pager.exec(&mut process, program(), &["/bin/echo", "hi"]).unwrap();
        assert_eq!(info.entry, VirtualAddress::new(0x24));
        assert_eq!(process.name, "echo");
        assert_eq!(process.paging.image_size, 0x2000);
        assert_eq!(process.size, 0x4000);
        assert_eq!(pager.swap().chain_len(&process.paging.chain), 1);
        // Directory, kernel table and one user table; no page yet.
        assert_eq!(pager.memory().free_frames(), free - 3);

        let mut argc = [0u8; 4];
        pager
            .read_user(&mut process, info.stack_pointer + 4, &mut argc)
            .unwrap();
        assert_eq!(u32::from_le_bytes(argc), 2);
        assert_eq!(process.paging.fault_count, 1);
    }

    #[test]
    fn exec_replaces_previous_program() {
        let pager = pager(64, 16);
        let mut process = Process::new(1, "init");
        pager.exec(&mut process, program(), &["a"]).unwrap();
        pager.write_user(&mut process, VirtualAddress::new(0x1000), b"x").unwrap();
        let after_first = pager.memory().free_frames();

        pager.exec(&mut process, program(), &["b"]).unwrap();
        assert_eq!(process.paging.fault_count, 0);
        assert_eq!(pager.swap().chain_len(&process.paging.chain), 1);
        assert_eq!(pager.memory().free_frames(), after_first + 1);

        let mut buf = [0u8; 5];
        pager
            .read_user(&mut process, VirtualAddress::new(0x1000), &mut buf)
            .unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn failed_exec_kills() {
        let pager = pager(64, 0);
        let mut process = Process::new(1, "init");
        let free = pager.memory().free_frames();
        let err = pager.exec(&mut process, program(), &["a"]).unwrap_err();
        assert_eq!(err, ExecError::Swap(crate::SwapError::Exhausted));
        assert!(process.killed);
        assert_eq!(pager.memory().free_frames(), free);

        let mut process = Process::new(2, "init");
        let args = ["a"; MAX_ARGS + 1];
        assert_eq!(
            pager.exec(&mut process, program(), &args),
            Err(ExecError::TooManyArgs)
        );
        assert!(!process.killed);
    }

    #[test]
    fn user_access_faults_pages_in() {
        let pager = pager(64, 16);
        let mut process = Process::new(1, "init");
        pager.exec(&mut process, program(), &["a"]).unwrap();

        let mut buf = [0u8; 8];
        pager
            .read_user(&mut process, VirtualAddress::new(PAGE_SIZE - 4), &mut buf)
            .unwrap();
        assert_eq!(buf, [0xfc, 0xfd, 0xfe, 0xff, b'h', b'e', b'l', b'l']);
        assert_eq!(process.paging.fault_count, 2);

        let guard = process.paging.guard_page();
        assert_eq!(
            pager.read_user(&mut process, guard, &mut buf),
            Err(AccessError::Killed(KillReason::GuardPage(guard)))
        );
        assert!(process.killed);
    }

    #[test]
    fn grow_is_lazy_and_shrink_discards_swap() {
        let pager = pager(64, 16);
        let mut process = Process::new(1, "init");
        pager.exec(&mut process, program(), &["a"]).unwrap();
        let free = pager.memory().free_frames();

        let old = pager.grow(&mut process, 2 * PAGE_SIZE as isize).unwrap();
        assert_eq!(old, 0x4000);
        assert_eq!(process.size, 0x6000);
        assert_eq!(pager.memory().free_frames(), free);

        let heap = VirtualAddress::new(0x5000);
        pager.write_user(&mut process, heap, b"data").unwrap();
        assert_eq!(
            pager.handle_page_fault(&mut process, 0x4000),
            Ok(FaultOutcome::Resolved(PageSource::ZeroFill))
        );
        pager
            .swap()
            .store(&mut process.paging.chain, heap, &[7; PAGE_SIZE])
            .unwrap();

        pager.grow(&mut process, -(PAGE_SIZE as isize)).unwrap();
        assert_eq!(process.size, 0x5000);
        assert!(pager.swap().find(&process.paging.chain, heap).is_none());

        pager.grow(&mut process, PAGE_SIZE as isize).unwrap();
        let mut buf = [1u8; 4];
        pager.read_user(&mut process, heap, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn grow_rejects_bad_sizes() {
        let pager = pager(64, 16);
        let mut process = Process::new(1, "init");
        assert_eq!(
            pager.grow(&mut process, 1),
            Err(AddressSpaceError::NoAddressSpace)
        );

        pager.exec(&mut process, program(), &["a"]).unwrap();
        assert_eq!(
            pager.grow(&mut process, -0x10000),
            Err(AddressSpaceError::KernelBoundary)
        );
        assert_eq!(
            pager.grow(&mut process, KERNEL_BASE as isize),
            Err(AddressSpaceError::KernelBoundary)
        );
        assert_eq!(
            pager.grow(&mut process, (KERNEL_BASE - 0x4000) as isize),
            Err(AddressSpaceError::KernelBoundary)
        );
        assert_eq!(process.size, 0x4000);
    }

    #[test]
    fn fork_copies_and_exit_releases() {
        let pager = pager(64, 16);
        let mut parent = Process::new(1, "init");
        pager.exec(&mut parent, program(), &["sh"]).unwrap();
        pager.write_user(&mut parent, VirtualAddress::new(0x1000), b"J").unwrap();

        let mut child = pager.fork(&parent, 2).unwrap();
        assert_eq!(child.size, parent.size);
        assert_eq!(child.name, "sh");
        pager.write_user(&mut child, VirtualAddress::new(0x1000), b"K").unwrap();

        let mut byte = [0u8; 1];
        pager
            .read_user(&mut parent, VirtualAddress::new(0x1000), &mut byte)
            .unwrap();
        assert_eq!(&byte, b"J");

        let free_slots = pager.swap().free_slots();
        pager.exit(&mut child);
        assert_eq!(pager.swap().free_slots(), free_slots + 1);
        assert!(child.address_space.is_none());
    }
}
