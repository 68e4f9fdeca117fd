//! Error taxonomy.
//!
//! [`AllocError`] is the normal failure surface of the allocate/deallocate
//! handlers. [`InvariantViolation`] is only produced by structural audits of a
//! free list and never occurs in correct operation.

use thiserror::Error;

/// Failure reported to an allocate or deallocate caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The growth primitive could not extend the segment.
    #[error("heap exhausted: requested {requested} bytes, {available} bytes of address space left")]
    Exhausted { requested: usize, available: usize },
    /// Payload size plus header does not fit in `usize`.
    #[error("request of {0} bytes overflows the block size")]
    SizeOverflow(usize),
    /// Freed pointer does not name a block inside the managed segment.
    #[error("pointer {addr:#x} is not a block payload inside the managed heap")]
    InvalidPointer { addr: usize },
    /// Freed block is already linked into the free list.
    #[error("block {addr:#x} is already on the free list")]
    DoubleFree { addr: usize },
}

/// Structural defect found while auditing a free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("free list holds {actual} blocks but records length {recorded}")]
    LengthMismatch { recorded: usize, actual: usize },
    #[error("free list walk did not terminate after {steps} steps")]
    Cycle { steps: usize },
    #[error("block {addr:#x} back link is {found:?}, expected {expected:?}")]
    BrokenBackLink {
        addr: usize,
        expected: Option<usize>,
        found: Option<usize>,
    },
    #[error("block {next:#x} follows {addr:#x} out of address order")]
    Unsorted { addr: usize, next: usize },
    #[error("block {addr:#x} of {size} bytes overlaps block {next:#x}")]
    Overlap { addr: usize, size: usize, next: usize },
    #[error("free blocks {addr:#x} and {next:#x} are adjacent but not coalesced")]
    Uncoalesced { addr: usize, next: usize },
    #[error("block {addr:#x} has size {size}, smaller than a header")]
    Undersized { addr: usize, size: usize },
    #[error("block {addr:#x} of {size} bytes lies outside the grown segment")]
    OutOfSegment { addr: usize, size: usize },
    #[error("list tail is {recorded:?} but the walk ended at {actual:?}")]
    TailMismatch {
        recorded: Option<usize>,
        actual: Option<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_names_both_sizes() {
        let err = AllocError::Exhausted {
            requested: 4096,
            available: 128,
        };
        let text = err.to_string();
        assert!(text.contains("4096"));
        assert!(text.contains("128"));
    }

    #[test]
    fn pointer_errors_render_hex_addresses() {
        assert_eq!(
            AllocError::InvalidPointer { addr: 0x1018 }.to_string(),
            "pointer 0x1018 is not a block payload inside the managed heap"
        );
        assert_eq!(
            AllocError::DoubleFree { addr: 0x2000 }.to_string(),
            "block 0x2000 is already on the free list"
        );
    }
}
