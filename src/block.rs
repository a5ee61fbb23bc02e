use std::{mem, ptr::NonNull};

use crate::list::Link;
use crate::utils::{align, WORD};

/// Raw size of the metadata record that precedes every allocation.
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Distance from the start of a block to its user pointer. The header is
/// padded out to the word alignment so the user pointer is always aligned.
pub(crate) const ALIGNED_HEADER_SIZE: usize = align(BLOCK_HEADER_SIZE, WORD);

/// Smallest block that can exist on the heap list: a header plus one
/// aligned word of payload. The splitting rule refuses to create anything
/// smaller.
pub(crate) const MIN_BLOCK_SIZE: usize = ALIGNED_HEADER_SIZE + WORD;

/// Where a block's backing bytes came from, and whether they are in use.
///
/// `Free` and `Alloc` apply to blocks inside the break region, which are
/// threaded on the heap list. `Mapped` blocks are standalone anonymous
/// mappings; they never appear on the list, never split, never merge.
///
/// One byte, pinned: the header's layout is part of the block format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum BlockStatus {
    Free,
    Alloc,
    Mapped,
}

/// In-band block metadata. The header sits at the start of the block and
/// the user's bytes follow it:
///
/// ```text
/// +----------------+        +
/// |      size      |        |
/// +----------------+        |
/// |     status     |        | -> Header (padded to the word alignment)
/// +----------------+        |
/// |      next      |        |
/// +----------------+        +
/// |     Content    |  <- user pointer
/// |                |
/// +----------------+
/// ```
///
/// `size` is the total block size *including* the header, always a multiple
/// of the word alignment. The status field is the sole truth of ownership.
#[repr(C)]
pub(crate) struct BlockHeader {
    /// Total size of the block, header included.
    pub size: usize,
    /// Ownership state of the block.
    pub status: BlockStatus,
    /// Successor on the heap list. Always `None` for mapped blocks.
    pub next: Link,
}

impl BlockHeader {
    /// Total block size for a user request of `user_size` bytes: the
    /// aligned header plus the word-aligned payload. Checked so absurd
    /// requests fail as `None` instead of wrapping into a tiny block.
    pub(crate) fn aligned_request(user_size: usize) -> Option<usize> {
        let payload = user_size.checked_add(WORD - 1)? & !(WORD - 1);
        payload.checked_add(ALIGNED_HEADER_SIZE)
    }

    /// Bytes available to the user inside this block.
    pub(crate) fn user_size(&self) -> usize {
        self.size - ALIGNED_HEADER_SIZE
    }

    /// Writes a fresh header at `addr` and returns it as a block.
    ///
    /// **SAFETY**: `addr` must be word-aligned and back at least `size`
    /// bytes of memory owned by the allocator.
    pub(crate) unsafe fn init(
        addr: NonNull<u8>,
        size: usize,
        status: BlockStatus,
        next: Link,
    ) -> NonNull<BlockHeader> {
        let block = addr.cast::<BlockHeader>();
        unsafe {
            block.as_ptr().write(BlockHeader { size, status, next });
        }
        block
    }

    /// Pointer handed to the user for `block`.
    pub(crate) unsafe fn user_ptr(block: NonNull<BlockHeader>) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(ALIGNED_HEADER_SIZE)) }
    }

    /// Recovers the header from a pointer previously returned by
    /// [`BlockHeader::user_ptr`].
    ///
    /// **SAFETY**: `ptr` must have been issued by this allocator; anything
    /// else reads foreign memory as a header.
    pub(crate) unsafe fn from_user_ptr(ptr: NonNull<u8>) -> NonNull<BlockHeader> {
        unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(ALIGNED_HEADER_SIZE)).cast() }
    }

    /// Address one past the end of `block`.
    pub(crate) unsafe fn end_addr(block: NonNull<BlockHeader>) -> usize {
        unsafe { block.as_ptr() as usize + block.as_ref().size }
    }

    /// Splits `block` into a used prefix of `size` bytes and a free suffix,
    /// but only when the remainder can stand as a minimum-size block of its
    /// own. The suffix inherits the successor; `block` keeps the prefix.
    pub(crate) unsafe fn try_split(mut block: NonNull<BlockHeader>, size: usize) {
        unsafe {
            let total = block.as_ref().size;
            if total < size + MIN_BLOCK_SIZE {
                return;
            }

            let suffix_addr = NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(size));
            let suffix =
                BlockHeader::init(suffix_addr, total - size, BlockStatus::Free, block.as_ref().next);

            block.as_mut().size = size;
            block.as_mut().next = Some(suffix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_stays_word_aligned() {
        assert_eq!(ALIGNED_HEADER_SIZE % WORD, 0);
        assert!(ALIGNED_HEADER_SIZE >= BLOCK_HEADER_SIZE);
        assert_eq!(MIN_BLOCK_SIZE, ALIGNED_HEADER_SIZE + WORD);
    }

    #[test]
    fn aligned_request_rounds_up() {
        assert_eq!(
            BlockHeader::aligned_request(1),
            Some(ALIGNED_HEADER_SIZE + WORD)
        );
        assert_eq!(
            BlockHeader::aligned_request(WORD),
            Some(ALIGNED_HEADER_SIZE + WORD)
        );
        assert_eq!(
            BlockHeader::aligned_request(100),
            Some(ALIGNED_HEADER_SIZE + 104)
        );
    }

    #[test]
    fn aligned_request_refuses_overflow() {
        assert_eq!(BlockHeader::aligned_request(usize::MAX), None);
        assert_eq!(BlockHeader::aligned_request(usize::MAX - WORD), None);
    }

    #[test]
    fn user_ptr_round_trip() {
        let mut buf = [0usize; 32];
        let addr = NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap();

        unsafe {
            let block = BlockHeader::init(addr, 64, BlockStatus::Alloc, None);
            let user = BlockHeader::user_ptr(block);

            assert_eq!(user.as_ptr() as usize % WORD, 0);
            assert_eq!(
                user.as_ptr() as usize - block.as_ptr() as usize,
                ALIGNED_HEADER_SIZE
            );
            assert_eq!(BlockHeader::from_user_ptr(user), block);
            assert_eq!(block.as_ref().user_size(), 64 - ALIGNED_HEADER_SIZE);
        }
    }

    #[test]
    fn split_carves_a_free_suffix() {
        let mut buf = [0usize; 32];
        let addr = NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap();

        unsafe {
            let block = BlockHeader::init(addr, 128, BlockStatus::Free, None);
            BlockHeader::try_split(block, 64);

            assert_eq!(block.as_ref().size, 64);
            let suffix = block.as_ref().next.expect("split must link a suffix");
            assert_eq!(suffix.as_ref().size, 64);
            assert_eq!(suffix.as_ref().status, BlockStatus::Free);
            assert_eq!(suffix.as_ptr() as usize, BlockHeader::end_addr(block));
        }
    }

    #[test]
    fn split_refuses_a_suffix_too_small_to_stand() {
        let mut buf = [0usize; 32];
        let addr = NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap();

        unsafe {
            // Remainder would be MIN_BLOCK_SIZE - WORD: not a valid block.
            let block = BlockHeader::init(addr, 64 + MIN_BLOCK_SIZE - WORD, BlockStatus::Free, None);
            BlockHeader::try_split(block, 64);

            assert_eq!(block.as_ref().size, 64 + MIN_BLOCK_SIZE - WORD);
            assert!(block.as_ref().next.is_none());
        }
    }
}
