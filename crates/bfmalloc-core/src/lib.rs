//! # bfmalloc-core
//!
//! Best-fit free-list allocator built on a single heap-growth primitive.
//!
//! The heap is a contiguous, monotonically growing segment. Every extent
//! carries a three-word header; free extents are threaded onto an
//! address-ordered doubly-linked list that supports best-fit search,
//! splitting and coalescing. The same list engine runs behind two handles:
//!
//! - [`LockedHeap`]: one free list shared by every thread, guarded by a mutex.
//! - [`ThreadHeap`]: one free list per owning thread, no list locking at all.
//!
//! Both variants obtain fresh address space from one [`HeapSegment`], whose
//! break is serialized by its own growth lock. The two locks are never held
//! at the same time.
//!
//! No `unsafe` code is permitted in this crate: "pointers" are byte addresses
//! inside the segment's logical address range, and header/payload words are
//! stored in the segment's committed pages.

#![deny(unsafe_code)]

pub mod block;
pub mod config;
pub mod error;
pub mod freelist;
pub mod handle;
pub mod heap;
pub mod log;
pub mod process;
pub mod segment;

pub use block::{HEADER_SIZE, WORD};
pub use config::{HeapConfig, PointerCheck};
pub use error::{AllocError, InvariantViolation};
pub use freelist::{Coalesced, FreeBlock, FreeList};
pub use handle::{ListHandle, PrivateList, SharedList};
pub use heap::{BestFitHeap, LockedHeap, ThreadHeap};
pub use log::{HeapLogLevel, HeapLogRecord};
pub use segment::{HeapSegment, MAX_SEGMENT_LIMIT, PAGE_SIZE, SEGMENT_BASE};
