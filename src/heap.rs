//! Entry-point policies: how the four classic operations compose the
//! engine.
//!
//! Every path follows the same skeleton: align the request, make sure the
//! one-time preallocation happened when it applies, coalesce the list,
//! look for the best fit, and only then fall back to growing the tail or
//! asking the kernel for fresh memory.

use std::ptr::{self, NonNull};

use crate::block::{BlockHeader, BlockStatus};
use crate::error::AllocError;
use crate::kernel;
use crate::list::{self, HeapList, Link};

/// The allocator: the break-region block list plus its accounting.
///
/// One `Heap` owns one logical break region. The struct is deliberately
/// not `Send`/`Sync`: the design is single-threaded and every entry point
/// mutates process-wide state (the program break) without locks.
pub struct Heap {
    /// Blocks carved out of the break region, in address order.
    list: HeapList,
    /// Total bytes obtained through break extension since construction.
    /// Break memory is never returned, so this only grows.
    break_bytes: usize,
}

/// Point-in-time snapshot of the break-region bookkeeping.
///
/// Pure reads, no allocation: this is the crate's diagnostics surface.
/// Mapped blocks are standalone and intentionally invisible here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes obtained via break extension since the heap was created.
    pub break_bytes: usize,
    /// Blocks currently threaded on the break-region list.
    pub blocks: usize,
    /// How many of those blocks are free.
    pub free_blocks: usize,
    /// Sum of all listed block sizes. Equals `break_bytes` whenever the
    /// bookkeeping is intact.
    pub listed_bytes: usize,
    /// Sum of the free block sizes.
    pub free_bytes: usize,
    /// Largest single free block.
    pub largest_free: usize,
}

impl Heap {
    pub const fn new() -> Self {
        Self {
            list: HeapList::new(),
            break_bytes: 0,
        }
    }

    /// Allocates `size` bytes and returns a word-aligned pointer to them,
    /// or `None` for a zero-size request or when the kernel refuses to
    /// provide memory.
    ///
    /// Requests below the map threshold are served from the break region:
    /// best fit over the free blocks, splitting off any remainder that can
    /// stand alone, growing the last block in place when it is free, and
    /// extending the break as the last resort. Requests at or above the
    /// threshold get a standalone anonymous mapping.
    ///
    /// **SAFETY**: the heap must be the only code manipulating its blocks;
    /// see the crate-level notes on the single-threaded model.
    pub unsafe fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let aligned = BlockHeader::aligned_request(size)?;
        unsafe { self.place_request(aligned, kernel::MAP_THRESHOLD) }
    }

    /// Allocates room for `nmemb` elements of `size` bytes each and zeroes
    /// exactly that many bytes. Returns `None` when either operand is
    /// zero, when the product overflows, or on kernel refusal.
    ///
    /// The break/map decision uses the page size instead of the map
    /// threshold: mapped pages arrive zero-filled from the kernel, so this
    /// path maps much more aggressively. The requested bytes are zeroed
    /// explicitly either way; block reuse means break memory is dirty, and
    /// relying on the mapping's fill would make the two paths diverge.
    pub unsafe fn allocate_zeroed(&mut self, nmemb: usize, size: usize) -> Option<NonNull<u8>> {
        if nmemb == 0 || size == 0 {
            return None;
        }

        let total = nmemb.checked_mul(size)?;
        let aligned = BlockHeader::aligned_request(total)?;

        unsafe {
            let user = self.place_request(aligned, kernel::page_size())?;
            // Only the requested bytes: the aligned remainder is either
            // trailing padding or a separate block.
            ptr::write_bytes(user.as_ptr(), 0, total);
            Some(user)
        }
    }

    /// Releases an allocation. `None` is a no-op.
    ///
    /// Break-backed blocks are only marked free; merging with neighbors is
    /// deferred to the coalescing pass of the next placement. Mapped
    /// blocks go back to the kernel immediately.
    ///
    /// **SAFETY**: `ptr` must have come from this heap and must not be
    /// used again afterwards.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(user) = ptr else { return };

        unsafe {
            let mut block = BlockHeader::from_user_ptr(user);
            match block.as_ref().status {
                BlockStatus::Alloc => block.as_mut().status = BlockStatus::Free,
                BlockStatus::Mapped => kernel::unmap_region(block.cast(), block.as_ref().size),
                // Releasing an already-free block is a defined no-op.
                BlockStatus::Free => {}
            }
        }
    }

    /// Resizes an allocation, preserving its surviving bytes.
    ///
    /// `None` as the pointer delegates to [`Heap::allocate`]; a zero size
    /// behaves as [`Heap::free`] and returns `None`; resizing a block that
    /// is already free returns `None`. A block that already has the right
    /// aligned size is returned unchanged. Break-backed blocks shrink in
    /// place and grow in place when the following free run suffices;
    /// everything else moves to a fresh allocation.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Option<NonNull<u8>> {
        let Some(user) = ptr else {
            return unsafe { self.allocate(size) };
        };

        if size == 0 {
            unsafe { self.free(Some(user)) };
            return None;
        }

        unsafe {
            let block = BlockHeader::from_user_ptr(user);
            let aligned = BlockHeader::aligned_request(size)?;

            if block.as_ref().status == BlockStatus::Free {
                return None;
            }

            if block.as_ref().size == aligned {
                return Some(user);
            }

            // A mapping never grows or shrinks in place.
            if block.as_ref().status == BlockStatus::Mapped {
                return self.relocate(user, size);
            }

            if block.as_ref().size >= aligned {
                BlockHeader::try_split(block, aligned);
                return Some(user);
            }

            // Merge the free runs first so the expansion walk sees the
            // largest possible successors.
            self.list.coalesce();
            if list::absorb_following(block, aligned) {
                BlockHeader::try_split(block, aligned);
                return Some(user);
            }

            self.relocate(user, size)
        }
    }

    /// Snapshot of the break-region bookkeeping.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            break_bytes: self.break_bytes,
            ..HeapStats::default()
        };

        for block in self.list.iter() {
            let (size, status) = unsafe { ((*block.as_ptr()).size, (*block.as_ptr()).status) };
            stats.blocks += 1;
            stats.listed_bytes += size;
            if status == BlockStatus::Free {
                stats.free_blocks += 1;
                stats.free_bytes += size;
                stats.largest_free = stats.largest_free.max(size);
            }
        }

        stats
    }

    /// The shared allocate-path engine. `break_limit` is the caller's map
    /// threshold: the map threshold itself for plain allocation, the page
    /// size for the zeroed path.
    unsafe fn place_request(&mut self, aligned: usize, break_limit: usize) -> Option<NonNull<u8>> {
        unsafe {
            if self.list.is_empty() && aligned < break_limit {
                self.prealloc().ok()?;
            }

            let tail = self.list.coalesce();

            if let Some(block) = self.list.best_fit(aligned) {
                return Some(Self::place(block, aligned));
            }

            // Best fit failed. A free tail that still ends at the break
            // can be grown in place, which spares the tail from becoming
            // an unusable stub.
            if let Some(mut t) = tail {
                if t.as_ref().status == BlockStatus::Free
                    && BlockHeader::end_addr(t) == kernel::current_break()
                {
                    let grow = aligned - t.as_ref().size;
                    kernel::extend_break(grow).ok()?;
                    self.break_bytes += grow;
                    t.as_mut().size = aligned;
                    return Some(Self::place(t, aligned));
                }
            }

            if aligned < break_limit {
                let block = self.acquire_break(aligned).ok()?;
                self.attach(tail, block, aligned)
            } else {
                let addr = kernel::map_region(aligned).ok()?;
                let block = BlockHeader::init(addr, aligned, BlockStatus::Mapped, None);
                Some(BlockHeader::user_ptr(block))
            }
        }
    }

    /// One-time reservation of the whole map threshold via the break, so
    /// the first pool of small allocations costs a single kernel call.
    unsafe fn prealloc(&mut self) -> Result<(), AllocError> {
        unsafe {
            let addr = kernel::extend_break(kernel::MAP_THRESHOLD)?;
            self.break_bytes += kernel::MAP_THRESHOLD;

            let block =
                BlockHeader::init(addr, kernel::MAP_THRESHOLD, BlockStatus::Free, None);
            self.list.set_root(block);
            Ok(())
        }
    }

    /// Fresh break-backed block of exactly `size` bytes.
    unsafe fn acquire_break(&mut self, size: usize) -> Result<NonNull<BlockHeader>, AllocError> {
        unsafe {
            let addr = kernel::extend_break(size)?;
            self.break_bytes += size;
            Ok(BlockHeader::init(addr, size, BlockStatus::Alloc, None))
        }
    }

    /// Puts a fresh break-backed block on the list. When the coalesced
    /// tail is free and touches the newcomer, the two merge and the merged
    /// block serves the request instead.
    unsafe fn attach(
        &mut self,
        tail: Link,
        block: NonNull<BlockHeader>,
        aligned: usize,
    ) -> Option<NonNull<u8>> {
        unsafe {
            if let Some(mut t) = tail {
                if t.as_ref().status == BlockStatus::Free && list::adjacent(t, block) {
                    t.as_mut().size += block.as_ref().size;
                    t.as_mut().next = block.as_ref().next;
                    return Some(Self::place(t, aligned));
                }
            }

            self.list.append(tail, block);
            Some(BlockHeader::user_ptr(block))
        }
    }

    /// Commits `block` to a request of `aligned` bytes: split off any
    /// remainder that can stand alone, mark the block used, hand out the
    /// user pointer.
    unsafe fn place(block: NonNull<BlockHeader>, aligned: usize) -> NonNull<u8> {
        unsafe {
            BlockHeader::try_split(block, aligned);
            let mut block = block;
            block.as_mut().status = BlockStatus::Alloc;
            BlockHeader::user_ptr(block)
        }
    }

    /// Moves an allocation to a fresh block: allocate, copy the surviving
    /// bytes, release the old block.
    unsafe fn relocate(&mut self, user: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        unsafe {
            let old = BlockHeader::from_user_ptr(user);
            let old_user = old.as_ref().user_size();

            let new_user = self.allocate(new_size)?;
            ptr::copy_nonoverlapping(user.as_ptr(), new_user.as_ptr(), old_user.min(new_size));
            self.free(Some(user));

            Some(new_user)
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
