//! Address space manager.
//!
//! An [`AddressSpace`] owns one process's page directory. The kernel half is mapped identically
//! into every address space when it is created; the user half `[0, KERNEL_BASE)` is edited by
//! growing, reserving, shrinking and by the fault handler.
//!
//! Replacement state does not live in the page table entries. Every user page mapped through
//! [`AddressSpace::map`] gets a [`PageMeta`] record keyed by page number, holding its age and
//! whether it is currently resident.

use alloc::collections::BTreeMap;

use pmm::{
    FrameNumber, PAGE_SIZE, PageDirectory, PageEntry, PageFlags, PageNumber, PhysicalAddress,
    PhysicalMemory, TABLE_SPAN, VirtualAddress,
};

use crate::{
    AddressSpaceError, BackingStore, BlockDevice, ForkError, SwapError,
    config::{KERNEL_BASE, KernelLayout},
    process::PagingState,
    replacement::Age,
};

/// Replacement bookkeeping for one mapped user page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub age: Age,
    /// The page's entry is present. Cleared on eviction.
    pub resident: bool,
}

/// A process's virtual address space.
#[derive(Debug)]
pub struct AddressSpace {
    directory: PageDirectory,
    pub(crate) pages: BTreeMap<PageNumber, PageMeta>,
}

impl AddressSpace {
    /// Creates an address space holding only the kernel mappings of `layout`.
    pub fn new<M: PhysicalMemory + ?Sized>(
        memory: &M,
        layout: &KernelLayout,
    ) -> Result<Self, AddressSpaceError> {
        let directory = PageDirectory::new(memory).ok_or(AddressSpaceError::OutOfMemory)?;
        let mut space = Self {
            directory,
            pages: BTreeMap::new(),
        };

        for range in layout.mappings() {
            if let Err(err) = space.map_kernel(memory, range.virt, range.len, range.phys, range.flags)
            {
                log::warn!("address space: kernel mapping failed: {}", err);
                space.destroy(memory);
                return Err(err);
            }
        }

        log::debug!(
            "address space: created with root in frame {}",
            space.directory.root().frame()
        );
        Ok(space)
    }

    /// Maps `[virt, virt + len)` to consecutive frames starting at `phys`.
    ///
    /// Every page gets a present entry with `flags` and a metadata record with `age`. Fails on
    /// the first page whose entry is already present; pages mapped before it stay mapped.
    pub fn map<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        virt: VirtualAddress,
        len: usize,
        phys: PhysicalAddress,
        flags: PageFlags,
        age: Age,
    ) -> Result<(), AddressSpaceError> {
        for (page, frame) in Self::pages_of(virt, len, phys) {
            self.directory.map(memory, page.start(), frame, flags)?;
            self.pages.insert(
                page,
                PageMeta {
                    age,
                    resident: true,
                },
            );
        }
        Ok(())
    }

    fn map_kernel<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        virt: VirtualAddress,
        len: usize,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), AddressSpaceError> {
        for (page, frame) in Self::pages_of(virt, len, phys) {
            self.directory.map(memory, page.start(), frame, flags)?;
        }
        Ok(())
    }

    /// Pairs every page overlapping `[virt, virt + len)` with its frame.
    fn pages_of(
        virt: VirtualAddress,
        len: usize,
        phys: PhysicalAddress,
    ) -> impl Iterator<Item = (PageNumber, FrameNumber)> {
        let first = virt.page_number();
        let count = if len == 0 {
            0
        } else {
            PageNumber::containing(virt.as_usize() + len - 1) - first + 1
        };
        let frame = phys.frame_number();
        (0..count).map(move |i| (first + i, frame + i))
    }

    /// Grows the user region from `old_size` to `new_size` with zeroed, resident pages.
    ///
    /// Returns the new size. On failure the pages mapped so far stay mapped; the caller rolls
    /// back with [`shrink`](Self::shrink).
    pub fn grow<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        old_size: usize,
        new_size: usize,
    ) -> Result<usize, AddressSpaceError> {
        if new_size >= KERNEL_BASE {
            return Err(AddressSpaceError::KernelBoundary);
        }
        if new_size < old_size {
            return Ok(old_size);
        }

        for page in PageNumber::range(PageNumber::at_or_after(old_size)..PageNumber::at_or_after(new_size)) {
            let Some(frame) = memory.allocate_zeroed() else {
                log::warn!("address space: out of frames growing to {:#x}", new_size);
                return Err(AddressSpaceError::OutOfMemory);
            };
            if let Err(err) = self.map(
                memory,
                page.start(),
                PAGE_SIZE,
                frame.start(),
                PageFlags::USER_RW,
                Age::default(),
            ) {
                memory.deallocate(frame);
                return Err(err);
            }
        }
        Ok(new_size)
    }

    /// Reserves `[old_size, new_size)` for demand paging: user entries are created non-present
    /// and no frame is allocated until the first fault.
    pub fn reserve<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        old_size: usize,
        new_size: usize,
    ) -> Result<usize, AddressSpaceError> {
        if new_size >= KERNEL_BASE {
            return Err(AddressSpaceError::KernelBoundary);
        }
        if new_size < old_size {
            return Ok(old_size);
        }

        for page in PageNumber::range(PageNumber::at_or_after(old_size)..PageNumber::at_or_after(new_size)) {
            let va = page.start();
            if self.entry(memory, va).is_some_and(PageEntry::is_present) {
                return Err(AddressSpaceError::AlreadyMapped(va));
            }
            self.directory
                .set(memory, va, PageEntry::absent(PageFlags::USER_RW))?;
        }
        Ok(new_size)
    }

    /// Shrinks the user region from `old_size` to `new_size`, freeing the frames of every
    /// resident page in between and clearing every entry.
    ///
    /// Pages that were never mapped are skipped, as are whole directory slots with no table.
    /// Returns the new size, or `old_size` if `new_size` is not smaller.
    pub fn shrink<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        old_size: usize,
        new_size: usize,
    ) -> usize {
        if new_size >= old_size {
            return old_size;
        }

        let mut addr = new_size.next_multiple_of(PAGE_SIZE);
        while addr < old_size {
            let va = VirtualAddress::new(addr);
            if !self.directory.has_table(memory, va) {
                addr = va.align_down(TABLE_SPAN).as_usize() + TABLE_SPAN;
                continue;
            }
            if let Some(frame) = self.directory.unmap(memory, va) {
                memory.deallocate(frame);
            }
            self.pages.remove(&va.page_number());
            addr += PAGE_SIZE;
        }
        new_size
    }

    /// Frees every user page, every page table and the directory.
    pub fn destroy<M: PhysicalMemory + ?Sized>(mut self, memory: &M) {
        self.shrink(memory, KERNEL_BASE, 0);
        let root = self.directory.root().frame();
        self.directory.release(memory);
        log::debug!("address space: destroyed, root was frame {}", root);
    }

    /// Translates a user address to its physical address, if the page is present and
    /// user-accessible.
    pub fn resolve<M: PhysicalMemory + ?Sized>(
        &self,
        memory: &M,
        va: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        let entry = self.entry(memory, va.align_down(PAGE_SIZE))?;
        if !entry.flags().is_user() {
            return None;
        }
        Some(entry.frame()?.start() + va.page_offset())
    }

    /// Returns the entry for the page containing `va`, or None if no page table covers it.
    pub fn entry<M: PhysicalMemory + ?Sized>(
        &self,
        memory: &M,
        va: VirtualAddress,
    ) -> Option<PageEntry> {
        self.directory.entry(memory, va.align_down(PAGE_SIZE))
    }

    /// Returns the replacement record of the page containing `va`.
    pub fn meta(&self, va: VirtualAddress) -> Option<PageMeta> {
        self.pages.get(&va.page_number()).copied()
    }

    /// Removes user access from the page at `va`, which must have an entry.
    ///
    /// Used for the guard page below the stack: a later fault there kills the process.
    pub fn clear_user<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        va: VirtualAddress,
    ) -> Result<(), AddressSpaceError> {
        let entry = self
            .entry(memory, va)
            .filter(|entry| !entry.is_unused())
            .ok_or(AddressSpaceError::MissingEntry(va))?;

        let mut flags = entry.flags();
        flags.set_user(false);
        let updated = match entry.frame() {
            Some(frame) => PageEntry::new(frame, flags),
            None => PageEntry::absent(flags),
        };
        self.directory.update(memory, va.align_down(PAGE_SIZE), updated)?;
        Ok(())
    }

    /// Marks the present page at `va` as evicted and returns its frame, which the caller frees.
    ///
    /// The entry keeps its permission bits so a later fault can tell an evicted page from an
    /// unmapped one.
    pub fn evict_entry<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        va: VirtualAddress,
    ) -> Result<FrameNumber, AddressSpaceError> {
        let entry = self
            .entry(memory, va)
            .ok_or(AddressSpaceError::MissingEntry(va))?;
        let frame = entry.frame().ok_or(AddressSpaceError::MissingEntry(va))?;

        self.directory
            .update(memory, va, PageEntry::absent(entry.flags()))?;
        if let Some(meta) = self.pages.get_mut(&va.page_number()) {
            meta.resident = false;
        }
        Ok(frame)
    }

    /// Writes `data` to user memory at `va`. Every page touched must be resident.
    pub fn copy_out<M: PhysicalMemory + ?Sized>(
        &self,
        memory: &M,
        va: VirtualAddress,
        data: &[u8],
    ) -> Result<(), AddressSpaceError> {
        let mut done = 0;
        while done < data.len() {
            let at = va + done;
            let phys = self
                .resolve(memory, at)
                .ok_or(AddressSpaceError::MissingEntry(at.align_down(PAGE_SIZE)))?;
            let chunk = (PAGE_SIZE - at.page_offset()).min(data.len() - done);
            memory.write(phys.frame_number(), phys.page_offset(), &data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Reads user memory at `va` into `buf`. Every page touched must be resident.
    pub fn copy_in<M: PhysicalMemory + ?Sized>(
        &self,
        memory: &M,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), AddressSpaceError> {
        let mut done = 0;
        while done < buf.len() {
            let at = va + done;
            let phys = self
                .resolve(memory, at)
                .ok_or(AddressSpaceError::MissingEntry(at.align_down(PAGE_SIZE)))?;
            let chunk = (PAGE_SIZE - at.page_offset()).min(buf.len() - done);
            memory.read(phys.frame_number(), phys.page_offset(), &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn set_absent<M: PhysicalMemory + ?Sized>(
        &mut self,
        memory: &M,
        va: VirtualAddress,
        flags: PageFlags,
    ) -> Result<(), AddressSpaceError> {
        self.directory.set(memory, va, PageEntry::absent(flags))?;
        Ok(())
    }

    /// Copies this address space for a forked child.
    ///
    /// Resident pages are deep-copied with their permissions and age. Pages swapped out by the
    /// parent are copied into the child's own swap chain and stay non-present in the child. The
    /// stack page, one page above the rounded-up image, always ends up in the child's swap chain
    /// and never resident. Reserved entries and the guard page are carried over as they are.
    ///
    /// On failure everything done for the child is undone: its frames, tables and swap slots.
    pub fn duplicate<M: PhysicalMemory + ?Sized, D: BlockDevice>(
        &self,
        memory: &M,
        layout: &KernelLayout,
        swap: &BackingStore<D>,
        size: usize,
        parent: &PagingState,
        child: &mut PagingState,
    ) -> Result<Self, ForkError> {
        let mut copy = Self::new(memory, layout)?;
        match copy.copy_user_pages(memory, swap, self, size, parent, child) {
            Ok(()) => Ok(copy),
            Err(err) => {
                log::warn!("address space: duplicate failed: {}", err);
                swap.release_all(&mut child.chain);
                copy.destroy(memory);
                Err(err)
            }
        }
    }

    fn copy_user_pages<M: PhysicalMemory + ?Sized, D: BlockDevice>(
        &mut self,
        memory: &M,
        swap: &BackingStore<D>,
        source: &Self,
        size: usize,
        parent: &PagingState,
        child: &mut PagingState,
    ) -> Result<(), ForkError> {
        let stack = parent.stack_page();

        for page in PageNumber::range(PageNumber::new(0)..PageNumber::at_or_after(size)) {
            let va = page.start();
            let Some(entry) = source.entry(memory, va).filter(|entry| !entry.is_unused()) else {
                continue;
            };

            if va == stack {
                match entry.frame() {
                    Some(frame) => memory.read(frame, 0, &mut child.scratch[..]),
                    None => match swap.load(&parent.chain, va, &mut child.scratch) {
                        Ok(_) => {}
                        Err(SwapError::NotFound) => return Err(ForkError::LostPage(va)),
                        Err(err) => return Err(err.into()),
                    },
                }
                swap.store(&mut child.chain, va, &child.scratch)?;
                self.set_absent(memory, va, entry.flags())?;
                continue;
            }

            match entry.frame() {
                Some(frame) => {
                    let age = source.meta(va).map(|meta| meta.age).unwrap_or_default();
                    let copied = memory
                        .allocate()
                        .ok_or(AddressSpaceError::OutOfMemory)?;
                    memory.copy_frame(copied, frame);
                    if let Err(err) =
                        self.map(memory, va, PAGE_SIZE, copied.start(), entry.flags(), age)
                    {
                        memory.deallocate(copied);
                        return Err(err.into());
                    }
                }
                None => {
                    match swap.load(&parent.chain, va, &mut child.scratch) {
                        Ok(_) => {
                            swap.store(&mut child.chain, va, &child.scratch)?;
                        }
                        Err(SwapError::NotFound) => {}
                        Err(err) => return Err(err.into()),
                    }
                    self.set_absent(memory, va, entry.flags())?;
                }
            }
        }
        Ok(())
    }
}
