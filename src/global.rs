//! Installing the allocator as the Rust global allocator.
//!
//! ```rust,ignore
//! use brkalloc::BrkAlloc;
//!
//! #[global_allocator]
//! static ALLOCATOR: BrkAlloc = BrkAlloc::new();
//! ```

use std::alloc::{GlobalAlloc, Layout};
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};

use crate::heap::{Heap, HeapStats};
use crate::utils::WORD;

/// [`GlobalAlloc`] adapter over a [`Heap`].
///
/// The heap lives in an `UnsafeCell` so the adapter can be a `static`;
/// there is no lock in front of it, because the allocator's design is
/// single-threaded end to end.
///
/// # Safety
///
/// Installing this in a program that allocates from more than one thread
/// is undefined behavior. The `Sync` assertion below exists only so the
/// `static` compiles; it does not make the allocator thread-safe.
///
/// Alignment support stops at the machine word: layouts that ask for more
/// fail with null instead of returning a misaligned pointer.
pub struct BrkAlloc {
    heap: UnsafeCell<Heap>,
}

impl BrkAlloc {
    pub const fn new() -> Self {
        Self {
            heap: UnsafeCell::new(Heap::new()),
        }
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn heap(&self) -> &mut Heap {
        unsafe { &mut *self.heap.get() }
    }

    /// Snapshot of the underlying heap's bookkeeping.
    ///
    /// **SAFETY**: must not race with allocation on another thread, which
    /// the single-threaded contract already forbids.
    pub unsafe fn stats(&self) -> HeapStats {
        unsafe { self.heap().stats() }
    }
}

impl Default for BrkAlloc {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: required for `static` installation. The single-threaded contract
// is documented on the type; nothing here synchronizes.
unsafe impl Sync for BrkAlloc {}

unsafe impl GlobalAlloc for BrkAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Zero-size types get a well-aligned dangling pointer, the
        // standard library's own convention.
        if layout.size() == 0 {
            return layout.align() as *mut u8;
        }
        if layout.align() > WORD {
            return ptr::null_mut();
        }

        unsafe {
            match self.heap().allocate(layout.size()) {
                Some(p) => p.as_ptr(),
                None => ptr::null_mut(),
            }
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return layout.align() as *mut u8;
        }
        if layout.align() > WORD {
            return ptr::null_mut();
        }

        unsafe {
            match self.heap().allocate_zeroed(1, layout.size()) {
                Some(p) => p.as_ptr(),
                None => ptr::null_mut(),
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // Zero-size pointers were never allocated.
        if layout.size() == 0 {
            return;
        }

        unsafe {
            self.heap().free(NonNull::new(ptr));
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.size() == 0 {
            return unsafe { self.alloc(Layout::from_size_align_unchecked(new_size, layout.align())) };
        }
        if layout.align() > WORD {
            return ptr::null_mut();
        }
        // The GlobalAlloc contract promises new_size > 0 here.
        debug_assert!(new_size > 0);

        unsafe {
            match self.heap().reallocate(NonNull::new(ptr), new_size) {
                Some(p) => p.as_ptr(),
                None => ptr::null_mut(),
            }
        }
    }
}
