//! Physical memory allocator, for user processes,
//! kernel stacks, page-table pages,
//! and pipe buffers. Allocates whole 4096-byte pages.
//!
//! Every CPU owns a free list. Pages are freed onto the list of the CPU
//! doing the freeing and allocated from it; a CPU whose list is empty
//! steals a page from its neighbours, starting with the next one up.

use crate::{
    arch::{
        mem::{is_page_aligned, round_up_page, PAGE_SIZE},
        trap::InterruptBlocker,
    },
    hal::Cpu,
    param::NCPU,
    sync::spinmutex::SpinMutex,
};
use arrayvec::ArrayVec;
use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};
use log::{debug, info, trace};

/// Written over every freed page to catch dangling references.
pub const FREE_JUNK: u8 = 1;
/// Written over every allocated page to catch reads of uninitialized memory.
pub const ALLOC_JUNK: u8 = 5;

/// Header stored at the start of each free page.
#[repr(C)]
struct Run {
    next: Option<NonNull<Run>>,
}

/// A singly linked list threaded through free pages.
///
/// This is the only place that reinterprets page memory as list nodes.
struct FreeList {
    head: Option<NonNull<Run>>,
    len: usize,
}
impl FreeList {
    const fn new() -> FreeList {
        FreeList { head: None, len: 0 }
    }
    /// # Safety
    /// `page` must be a page-aligned, `PAGE_SIZE`-byte block of memory
    /// that nothing else uses until it is popped again.
    unsafe fn push(&mut self, page: NonNull<u8>) {
        let run = page.cast::<Run>();
        run.as_ptr().write(Run { next: self.head });
        self.head = Some(run);
        self.len += 1;
    }
    fn pop(&mut self) -> Option<NonNull<u8>> {
        let run = self.head?;
        // SAFETY: every node on the list was written by `push`.
        self.head = unsafe { run.as_ptr().read().next };
        self.len -= 1;
        Some(run.cast())
    }
}
// The list owns the pages it points to.
unsafe impl Send for FreeList {}

pub struct KernelMemory<C: Cpu> {
    cpu: C,
    /// First managed page.
    start: usize,
    /// First address after managed memory.
    end: usize,
    freelists: [SpinMutex<FreeList>; NCPU],
}
impl<C: Cpu> KernelMemory<C> {
    /// Create an allocator for `[pa_start, pa_end)` with every free list empty.
    ///
    /// # Safety
    /// The range must be memory that belongs to the allocator for as
    /// long as it exists.
    pub unsafe fn new(cpu: C, pa_start: *mut u8, pa_end: *mut u8) -> KernelMemory<C> {
        KernelMemory {
            cpu,
            start: round_up_page(pa_start as usize),
            end: pa_end as usize,
            freelists: core::array::from_fn(|_| SpinMutex::new(FreeList::new())),
        }
    }

    /// Create an allocator and free every whole page in `[pa_start, pa_end)`
    /// onto the current CPU's list.
    ///
    /// # Safety
    /// Same as `new`.
    pub unsafe fn kinit(cpu: C, pa_start: *mut u8, pa_end: *mut u8) -> KernelMemory<C> {
        let kmem = KernelMemory::new(cpu, pa_start, pa_end);
        kmem.freerange();
        info!(
            "kinit: {} pages from {:#x} to {:#x}",
            kmem.total_free(),
            kmem.start,
            kmem.end
        );
        kmem
    }

    unsafe fn freerange(&self) {
        let mut p = self.start;

        while p + PAGE_SIZE <= self.end {
            self.kfree(p as *mut u8);
            p += PAGE_SIZE;
        }
    }

    fn contains(&self, pa: usize) -> bool {
        pa >= self.start && pa < self.end && self.end - pa >= PAGE_SIZE
    }

    /// Free the page of physical memory pointed at by pa,
    /// which normally should have been returned by a call
    /// to kalloc(). The exception is when initializing the
    /// allocator - see kinit above.
    ///
    /// # Safety
    /// The page must not be used by anyone after this call.
    pub unsafe fn kfree(&self, pa: *mut u8) {
        let addr = pa as usize;
        let page = match NonNull::new(pa) {
            Some(page) if is_page_aligned(addr) && self.contains(addr) => page,
            _ => panic!("kfree"),
        };

        let _blocker = InterruptBlocker::new(&self.cpu);
        let id = self.current_cpu();

        // Fill with junk to catch dangling refs.
        ptr::write_bytes(pa, FREE_JUNK, PAGE_SIZE);

        self.freelists[id].lock(&self.cpu).push(page);
    }

    /// Allocate one 4096-byte page of physical memory.
    ///
    /// Returns a pointer that the kernel can use,
    /// or `None` if every CPU is out of pages.
    pub fn kalloc(&self) -> Option<NonNull<u8>> {
        let _blocker = InterruptBlocker::new(&self.cpu);
        let id = self.current_cpu();

        let local = self.freelists[id].lock(&self.cpu).pop();
        let page = match local.or_else(|| self.steal(id)) {
            Some(page) => page,
            None => {
                debug!("kalloc: out of memory on cpu {}", id);
                return None;
            }
        };

        unsafe {
            ptr::write_bytes(page.as_ptr(), ALLOC_JUNK, PAGE_SIZE);
        }
        Some(page)
    }

    /// Take a page from another CPU's list. Locks one list at a time.
    fn steal(&self, thief: usize) -> Option<NonNull<u8>> {
        steal_order(thief).into_iter().find_map(|victim| {
            let page = self.freelists[victim].lock(&self.cpu).pop()?;
            trace!(
                "kalloc: cpu {} stole {:p} from cpu {}",
                thief,
                page.as_ptr(),
                victim
            );
            Some(page)
        })
    }

    fn current_cpu(&self) -> usize {
        let id = self.cpu.current_id();
        if id >= NCPU {
            panic!("cpuid {}", id);
        }
        id
    }

    /// Number of free pages on one CPU's list.
    pub fn free_pages(&self, cpu: usize) -> usize {
        self.freelists[cpu].lock(&self.cpu).len
    }

    /// Free page counts of every CPU, indexed by CPU.
    pub fn free_counts(&self) -> ArrayVec<usize, NCPU> {
        (0..NCPU).map(|cpu| self.free_pages(cpu)).collect()
    }

    pub fn total_free(&self) -> usize {
        self.free_counts().iter().sum()
    }

    /// Bounds of the managed memory, `(first page, end)`.
    pub fn range(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

/// CPUs to steal from, nearest neighbour first.
fn steal_order(thief: usize) -> ArrayVec<usize, NCPU> {
    (1..NCPU).map(|i| (thief + i) % NCPU).collect()
}

/// Page allocator for `alloc`, one page per allocation.
pub struct KernelAllocator<'k, C: Cpu>(pub &'k KernelMemory<C>);

unsafe impl<'k, C: Cpu> GlobalAlloc for KernelAllocator<'k, C> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() > PAGE_SIZE || layout.align() > PAGE_SIZE {
            return ptr::null_mut();
        }
        self.0.kalloc().map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.kfree(ptr);
    }
}
