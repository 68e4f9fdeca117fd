//! Process-wide heaps with a C-style surface.
//!
//! One [`HeapSegment`] backs the whole process. The locked heap is a lazily
//! created singleton; every thread gets its own [`ThreadHeap`] on first use.
//! Configuration is read from the environment once (see [`HeapConfig`]).
//!
//! Allocation failure is reported as `0`; frees report nothing. A thread's
//! private free list is dropped with the thread, and its blocks stay in the
//! segment unreachable.

use std::sync::{Arc, OnceLock};

use crate::config::HeapConfig;
use crate::heap::{LockedHeap, ThreadHeap};
use crate::segment::HeapSegment;

static CONFIG: OnceLock<HeapConfig> = OnceLock::new();
static SEGMENT: OnceLock<Arc<HeapSegment>> = OnceLock::new();
static LOCKED: OnceLock<LockedHeap> = OnceLock::new();

thread_local! {
    static THREAD_HEAP: ThreadHeap =
        ThreadHeap::new(Arc::clone(process_segment()), process_config().clone());
}

/// Configuration the process heaps were built with.
pub fn process_config() -> &'static HeapConfig {
    CONFIG.get_or_init(HeapConfig::from_env)
}

/// Segment shared by the locked heap and every thread heap.
pub fn process_segment() -> &'static Arc<HeapSegment> {
    SEGMENT.get_or_init(|| Arc::new(HeapSegment::with_capacity(process_config().heap_limit)))
}

/// The shared, lock-protected heap.
pub fn locked_heap() -> &'static LockedHeap {
    LOCKED.get_or_init(|| {
        LockedHeap::new(Arc::clone(process_segment()), process_config().clone())
    })
}

/// Runs `f` against the calling thread's heap. Returns `None` once the
/// thread-local has been torn down.
pub fn with_thread_heap<R>(f: impl FnOnce(&ThreadHeap) -> R) -> Option<R> {
    THREAD_HEAP.try_with(f).ok()
}

/// Allocates `size` bytes from the shared heap; `0` on failure.
pub fn malloc_locked(size: usize) -> usize {
    locked_heap().allocate(size).unwrap_or(0)
}

/// Frees a pointer obtained from [`malloc_locked`]. Rejected pointers are
/// ignored; the rejection is visible in the heap's lifecycle log.
pub fn free_locked(ptr: usize) {
    let _ = locked_heap().deallocate(ptr);
}

/// Allocates `size` bytes from the calling thread's heap; `0` on failure.
pub fn malloc_unlocked(size: usize) -> usize {
    with_thread_heap(|heap| heap.allocate(size).unwrap_or(0)).unwrap_or(0)
}

/// Frees a pointer obtained from [`malloc_unlocked`] on the same thread.
pub fn free_unlocked(ptr: usize) {
    let _ = with_thread_heap(|heap| heap.deallocate(ptr));
}

/// Total bytes grown in the process segment.
pub fn data_segment_size() -> usize {
    process_segment().total_size()
}

/// Bytes on the shared heap's free list.
pub fn data_segment_free_space_size() -> usize {
    locked_heap().free_space()
}

/// Bytes on the calling thread's free list.
pub fn thread_data_segment_free_space_size() -> usize {
    with_thread_heap(ThreadHeap::free_space).unwrap_or(0)
}
