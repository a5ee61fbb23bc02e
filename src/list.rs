//! The break-region block list.
//!
//! A single forward-linked list, rooted at the heap base, threads every
//! block carved out of the break region in address order. The nodes ARE
//! the blocks themselves: no side storage exists, because this list
//! belongs to the component that would have to allocate it.
//!
//! ```text
//!  heap base
//!     |
//! +---|---------------------- break region ------------------------+
//! |   v                                                            |
//! | +-------+      +-------+      +-------+      +--------------+  |
//! | | Alloc |  ->  | Free  |  ->  | Alloc |  ->  |     Free     |  |
//! | +-------+      +-------+      +-------+      +--------------+  |
//! +----------------------------------------------------------------+
//! ```
//!
//! Mapped blocks are standalone and never appear here.

use std::ptr::NonNull;

use crate::block::{BlockHeader, BlockStatus};

/// Nullable pointer to a block.
pub(crate) type Link = Option<NonNull<BlockHeader>>;

/// Whether `left` ends exactly where `right` begins.
///
/// List neighbors are normally memory neighbors too; a foreign break
/// movement can leave a gap between them, and merging across a gap would
/// corrupt both sides. Every size-merge checks this first.
pub(crate) unsafe fn adjacent(left: NonNull<BlockHeader>, right: NonNull<BlockHeader>) -> bool {
    unsafe { BlockHeader::end_addr(left) == right.as_ptr() as usize }
}

/// Grows `block` in place by absorbing every directly adjacent free
/// successor, regardless of `block`'s own status. Returns whether the
/// block reached `want` bytes; the absorbed space stays with the block
/// either way.
pub(crate) unsafe fn absorb_following(mut block: NonNull<BlockHeader>, want: usize) -> bool {
    unsafe {
        while let Some(succ) = block.as_ref().next {
            if succ.as_ref().status != BlockStatus::Free || !adjacent(block, succ) {
                break;
            }

            block.as_mut().size += succ.as_ref().size;
            block.as_mut().next = succ.as_ref().next;
        }

        block.as_ref().size >= want
    }
}

/// The intra-break list of blocks, rooted at the heap base.
pub(crate) struct HeapList {
    head: Link,
}

impl HeapList {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Installs the first block of the break region as the list root.
    pub(crate) fn set_root(&mut self, block: NonNull<BlockHeader>) {
        debug_assert!(self.head.is_none());
        self.head = Some(block);
    }

    /// Appends `block` after `tail` (the result of the latest coalescing
    /// pass), or installs it as the root of an empty list.
    pub(crate) unsafe fn append(&mut self, tail: Link, block: NonNull<BlockHeader>) {
        match tail {
            Some(mut t) => unsafe { t.as_mut().next = Some(block) },
            None => self.head = Some(block),
        }
    }

    /// Single left-to-right merge pass over the list.
    ///
    /// For each free block: merge it backward into a free predecessor,
    /// then absorb a free successor, exactly the discipline a trailing
    /// local makes possible on a forward-linked list. A run of any length
    /// collapses into one block in one pass. Returns the list tail, which
    /// the placement code needs for last-block expansion.
    pub(crate) unsafe fn coalesce(&mut self) -> Link {
        unsafe {
            let mut prev: Link = None;
            let mut current = self.head;

            while let Some(mut block) = current {
                if block.as_ref().status == BlockStatus::Free {
                    if let Some(mut before) = prev {
                        if before.as_ref().status == BlockStatus::Free && adjacent(before, block) {
                            before.as_mut().size += block.as_ref().size;
                            before.as_mut().next = block.as_ref().next;
                            block = before;
                        }
                    }

                    if let Some(succ) = block.as_ref().next {
                        if succ.as_ref().status == BlockStatus::Free && adjacent(block, succ) {
                            block.as_mut().size += succ.as_ref().size;
                            block.as_mut().next = succ.as_ref().next;
                        }
                    }
                }

                prev = Some(block);
                current = block.as_ref().next;
            }

            prev
        }
    }

    /// Smallest free block holding at least `size` bytes; ties go to the
    /// earliest block in address order.
    pub(crate) unsafe fn best_fit(&self, size: usize) -> Link {
        unsafe {
            let mut best: Link = None;
            let mut best_size = usize::MAX;

            for block in self.iter() {
                let candidate = block.as_ref();
                if candidate.status == BlockStatus::Free
                    && candidate.size >= size
                    && candidate.size < best_size
                {
                    best = Some(block);
                    best_size = candidate.size;
                }
            }

            best
        }
    }

    /// Walks the blocks in address order. Callers must not mutate the list
    /// while an iterator is live.
    pub(crate) fn iter(&self) -> Blocks {
        Blocks { current: self.head }
    }
}

pub(crate) struct Blocks {
    current: Link,
}

impl Iterator for Blocks {
    type Item = NonNull<BlockHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        unsafe {
            self.current = block.as_ref().next;
        }
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Arena([u8; 4096]);

    impl Arena {
        fn new() -> Self {
            Arena([0; 4096])
        }
    }

    /// Carves consecutive blocks with the given total sizes and statuses
    /// out of `arena` and threads them on a fresh list.
    unsafe fn carve(arena: &mut Arena, blocks: &[(usize, BlockStatus)]) -> HeapList {
        let mut list = HeapList::new();
        let mut addr = arena.0.as_mut_ptr();
        let mut prev: Link = None;

        unsafe {
            for &(size, status) in blocks {
                let block = BlockHeader::init(NonNull::new(addr).unwrap(), size, status, None);
                match prev {
                    Some(mut p) => p.as_mut().next = Some(block),
                    None => list.set_root(block),
                }
                prev = Some(block);
                addr = addr.add(size);
            }
        }

        list
    }

    fn shape(list: &HeapList) -> Vec<(usize, BlockStatus)> {
        list.iter()
            .map(|b| unsafe { (b.as_ref().size, b.as_ref().status) })
            .collect()
    }

    #[test]
    fn empty_list_has_no_tail_and_no_fit() {
        let mut list = HeapList::new();
        assert!(list.is_empty());

        unsafe {
            assert!(list.coalesce().is_none());
            assert!(list.best_fit(8).is_none());
        }
    }

    #[test]
    fn coalesce_merges_a_free_pair() {
        let mut arena = Arena::new();

        unsafe {
            let mut list = carve(
                &mut arena,
                &[
                    (64, BlockStatus::Alloc),
                    (64, BlockStatus::Free),
                    (96, BlockStatus::Free),
                    (64, BlockStatus::Alloc),
                ],
            );

            let tail = list.coalesce().expect("tail");

            assert_eq!(
                shape(&list),
                vec![
                    (64, BlockStatus::Alloc),
                    (160, BlockStatus::Free),
                    (64, BlockStatus::Alloc),
                ]
            );
            assert_eq!(tail.as_ref().size, 64);
            assert!(tail.as_ref().next.is_none());
        }
    }

    #[test]
    fn coalesce_collapses_a_whole_free_run() {
        let mut arena = Arena::new();

        unsafe {
            let mut list = carve(
                &mut arena,
                &[
                    (48, BlockStatus::Free),
                    (48, BlockStatus::Free),
                    (48, BlockStatus::Free),
                    (48, BlockStatus::Free),
                ],
            );

            let tail = list.coalesce().expect("tail");

            assert_eq!(shape(&list), vec![(192, BlockStatus::Free)]);
            assert_eq!(tail.as_ref().size, 192);
        }
    }

    #[test]
    fn coalesce_refuses_to_merge_across_a_gap() {
        let mut arena = Arena::new();

        unsafe {
            // Two free blocks with a 64-byte hole between them, as a
            // foreign break movement would leave behind.
            let base = arena.0.as_mut_ptr();
            let first = BlockHeader::init(NonNull::new(base).unwrap(), 64, BlockStatus::Free, None);
            let second = BlockHeader::init(
                NonNull::new(base.add(128)).unwrap(),
                64,
                BlockStatus::Free,
                None,
            );

            let mut list = HeapList::new();
            list.set_root(first);
            (*first.as_ptr()).next = Some(second);

            list.coalesce();

            assert_eq!(
                shape(&list),
                vec![(64, BlockStatus::Free), (64, BlockStatus::Free)]
            );
        }
    }

    #[test]
    fn best_fit_prefers_the_tightest_block() {
        let mut arena = Arena::new();

        unsafe {
            let list = carve(
                &mut arena,
                &[
                    (128, BlockStatus::Free),
                    (64, BlockStatus::Alloc),
                    (96, BlockStatus::Free),
                ],
            );

            let found = list.best_fit(80).expect("fit");
            assert_eq!(found.as_ref().size, 96);
        }
    }

    #[test]
    fn best_fit_breaks_ties_toward_the_first_block() {
        let mut arena = Arena::new();

        unsafe {
            let list = carve(
                &mut arena,
                &[
                    (96, BlockStatus::Free),
                    (64, BlockStatus::Alloc),
                    (96, BlockStatus::Free),
                ],
            );

            let found = list.best_fit(80).expect("fit");
            assert_eq!(found, list.iter().next().unwrap());
        }
    }

    #[test]
    fn best_fit_ignores_blocks_in_use() {
        let mut arena = Arena::new();

        unsafe {
            let list = carve(
                &mut arena,
                &[(256, BlockStatus::Alloc), (64, BlockStatus::Free)],
            );

            assert!(list.best_fit(128).is_none());
            assert!(list.best_fit(64).is_some());
        }
    }

    #[test]
    fn absorb_following_eats_the_free_run_and_stops_at_use() {
        let mut arena = Arena::new();

        unsafe {
            let list = carve(
                &mut arena,
                &[
                    (64, BlockStatus::Alloc),
                    (64, BlockStatus::Free),
                    (64, BlockStatus::Free),
                    (64, BlockStatus::Alloc),
                ],
            );

            let first = list.iter().next().unwrap();
            assert!(absorb_following(first, 192));

            assert_eq!(
                shape(&list),
                vec![(192, BlockStatus::Alloc), (64, BlockStatus::Alloc)]
            );
        }
    }

    #[test]
    fn absorb_following_reports_an_insufficient_run() {
        let mut arena = Arena::new();

        unsafe {
            let list = carve(
                &mut arena,
                &[
                    (64, BlockStatus::Alloc),
                    (64, BlockStatus::Free),
                    (64, BlockStatus::Alloc),
                ],
            );

            let first = list.iter().next().unwrap();
            assert!(!absorb_following(first, 256));

            // The absorbed space stays with the block.
            assert_eq!(first.as_ref().size, 128);
        }
    }

    #[test]
    fn append_links_after_the_tail() {
        let mut arena = Arena::new();

        unsafe {
            let mut list = carve(&mut arena, &[(64, BlockStatus::Alloc)]);
            let tail = list.coalesce();

            let extra = BlockHeader::init(
                NonNull::new(arena.0.as_mut_ptr().add(64)).unwrap(),
                96,
                BlockStatus::Alloc,
                None,
            );
            list.append(tail, extra);

            assert_eq!(
                shape(&list),
                vec![(64, BlockStatus::Alloc), (96, BlockStatus::Alloc)]
            );
        }
    }
}
