use thiserror::Error;

/// Failure reported by the backing-store layer.
///
/// The four entry points never surface this directly; they flatten it to
/// `None`, which is the contract a drop-in allocator has to honor. The
/// typed form exists so the syscall wrappers and the placement code can
/// talk about the failure without stringly errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The kernel refused to extend the program break or to map pages.
    #[error("kernel refused to provide backing memory")]
    OutOfMemory,
}
