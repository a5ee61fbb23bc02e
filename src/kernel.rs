//! The allocator's view of the kernel: the two primitives memory actually
//! comes from, wrapped so that nothing above this module touches `libc`.
//!
//! Small requests live in the contiguous break region grown with
//! [`sbrk`](https://man7.org/linux/man-pages/man2/sbrk.2.html); large
//! requests get a standalone anonymous
//! [`mmap`](https://man7.org/linux/man-pages/man2/mmap.2.html) returned to
//! the kernel on free. The break region is never handed back.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_int, c_void, off_t, size_t};

use crate::error::AllocError;

/// Requests at or above this many bytes (header included) bypass the break
/// region and get a standalone anonymous mapping. The one-time break
/// preallocation reserves exactly this much.
pub(crate) const MAP_THRESHOLD: usize = 128 * 1024;

/// Cached result of the page-size query. Zero means not asked yet.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Virtual memory page size of the machine, usually 4096. Queried from the
/// kernel once and cached for the life of the process.
pub(crate) fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Current position of the program break.
pub(crate) fn current_break() -> usize {
    unsafe { libc::sbrk(0) as usize }
}

/// Moves the program break forward by `size` bytes and returns the start
/// of the fresh region (the old break). Fails if the kernel refuses.
pub(crate) unsafe fn extend_break(size: usize) -> Result<NonNull<u8>, AllocError> {
    // sbrk takes a signed increment; a request this large cannot be
    // expressed and must not wrap into a break shrink.
    if size > isize::MAX as usize {
        return Err(AllocError::OutOfMemory);
    }

    unsafe {
        let addr = libc::sbrk(size as libc::intptr_t);
        if addr == usize::MAX as *mut c_void {
            return Err(AllocError::OutOfMemory);
        }

        Ok(NonNull::new_unchecked(addr).cast::<u8>())
    }
}

/// Maps `size` bytes of private, zero-filled, read-write pages.
pub(crate) unsafe fn map_region(size: usize) -> Result<NonNull<u8>, AllocError> {
    const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
    const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
    const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    const FD: c_int = -1;
    const OFFSET: off_t = 0;

    unsafe {
        let addr = libc::mmap(ADDR, size as size_t, PROT, FLAGS, FD, OFFSET);
        if addr == libc::MAP_FAILED {
            return Err(AllocError::OutOfMemory);
        }

        Ok(NonNull::new_unchecked(addr).cast::<u8>())
    }
}

/// Returns a mapped region to the kernel.
pub(crate) unsafe fn unmap_region(addr: NonNull<u8>, size: usize) {
    unsafe {
        libc::munmap(addr.as_ptr().cast::<c_void>(), size as size_t);
    }
}
