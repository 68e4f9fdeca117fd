//! Best-fit heap: the allocate and deallocate handlers.
//!
//! [`BestFitHeap`] pairs a shared [`HeapSegment`] with one free list reached
//! through a [`ListHandle`]. The handlers are written once; the handle picks
//! the concurrency discipline:
//!
//! - [`LockedHeap`]: one list shared by every thread behind the list lock.
//! - [`ThreadHeap`]: one list per owner, no list lock, no cross-thread reuse.
//!
//! The list lock and the segment's growth lock are never held together:
//! the list critical section ends before growth starts, and the bookkeeping
//! after growth takes the list again.

use std::sync::Arc;

use crate::block::{BlockRef, HEADER_SIZE, WORD, block_size_for, header_of, payload_of};
use crate::config::HeapConfig;
use crate::error::{AllocError, InvariantViolation};
use crate::freelist::FreeBlock;
use crate::handle::{ListHandle, ListState, PrivateList, SharedList};
use crate::log::{Event, HeapLogLevel, HeapLogRecord};
use crate::segment::HeapSegment;

/// Best-fit free-list heap over a shared segment.
pub struct BestFitHeap<H: ListHandle> {
    segment: Arc<HeapSegment>,
    list: H,
    config: HeapConfig,
}

/// Heap whose free list is shared across threads under a lock.
pub type LockedHeap = BestFitHeap<SharedList>;

/// Heap whose free list belongs to a single thread.
pub type ThreadHeap = BestFitHeap<PrivateList>;

impl<H: ListHandle> BestFitHeap<H> {
    /// Creates a heap drawing fresh extents from `segment`.
    #[must_use]
    pub fn new(segment: Arc<HeapSegment>, config: HeapConfig) -> Self {
        let config = config.normalized();
        let list = H::from_state(ListState::new(H::SCOPE, &config));
        Self {
            segment,
            list,
            config,
        }
    }

    /// Creates a heap with a private segment of `config.heap_limit` bytes.
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        let segment = Arc::new(HeapSegment::with_capacity(config.heap_limit));
        Self::new(segment, config)
    }

    /// Returns a payload address of at least `size` bytes, word aligned.
    ///
    /// The first request of a heap always grows the segment. Later requests
    /// reuse the best-fitting free block and grow only when none fits. A
    /// failed growth leaves the free list untouched.
    pub fn allocate(&self, size: usize) -> Result<usize, AllocError> {
        let Some(needed) = block_size_for(size) else {
            self.list.with_list(|state| {
                state.record(Event {
                    level: HeapLogLevel::Warn,
                    symbol: "allocate",
                    event: "size_overflow",
                    addr: None,
                    size: Some(size),
                    outcome: "rejected",
                    details: "payload_plus_header_overflows",
                });
            });
            return Err(AllocError::SizeOverflow(size));
        };

        let mem = &*self.segment;
        let reused = self.list.with_list(|state| {
            state.origin?;
            let addr = state.list.find_best_fit(mem, needed)?;
            if let Some(rest) = state.list.split(mem, addr, needed) {
                let rest_size = BlockRef::new(mem, rest).size();
                state.record(Event {
                    level: HeapLogLevel::Debug,
                    symbol: "allocate",
                    event: "split",
                    addr: Some(rest),
                    size: Some(rest_size),
                    outcome: "success",
                    details: "remainder_relinked",
                });
            }
            state.list.remove(mem, addr);
            state.record(Event {
                level: HeapLogLevel::Trace,
                symbol: "allocate",
                event: "reuse",
                addr: Some(addr),
                size: Some(BlockRef::new(mem, addr).size()),
                outcome: "success",
                details: "path=best_fit",
            });
            Some(addr)
        });
        if let Some(addr) = reused {
            return Ok(payload_of(addr));
        }

        match self.segment.grow(needed) {
            Ok(addr) => {
                self.list.with_list(|state| {
                    let first = state.origin.is_none();
                    if first {
                        state.origin = Some(addr);
                    }
                    state.record(Event {
                        level: if first {
                            HeapLogLevel::Info
                        } else {
                            HeapLogLevel::Trace
                        },
                        symbol: "allocate",
                        event: if first { "first_extent" } else { "grow" },
                        addr: Some(addr),
                        size: Some(needed),
                        outcome: "success",
                        details: "path=segment_grow",
                    });
                });
                Ok(payload_of(addr))
            }
            Err(err) => {
                self.list.with_list(|state| {
                    state.record(Event {
                        level: HeapLogLevel::Warn,
                        symbol: "allocate",
                        event: "grow_failed",
                        addr: None,
                        size: Some(needed),
                        outcome: "oom",
                        details: "segment_exhausted",
                    });
                });
                Err(err)
            }
        }
    }

    /// Returns the block owning `ptr` to this heap's free list.
    ///
    /// `0` is a no-op. The block is linked in address order and merged with
    /// physically adjacent free neighbours in the same critical section.
    pub fn deallocate(&self, ptr: usize) -> Result<(), AllocError> {
        if ptr == 0 {
            return Ok(());
        }
        let valid = if self.config.pointer_check.enabled() {
            self.is_valid_pointer(ptr)
        } else {
            ptr >= HEADER_SIZE
        };
        if !valid {
            self.list.with_list(|state| {
                state.record(Event {
                    level: HeapLogLevel::Warn,
                    symbol: "deallocate",
                    event: "invalid_pointer",
                    addr: Some(ptr),
                    size: None,
                    outcome: "rejected",
                    details: "header_outside_segment_or_malformed",
                });
            });
            return Err(AllocError::InvalidPointer { addr: ptr });
        }

        let mem = &*self.segment;
        let addr = header_of(ptr);
        self.list.with_list(|state| {
            let size = BlockRef::new(mem, addr).size();
            if let Err(err) = state.list.insert_sorted(mem, addr) {
                state.record(Event {
                    level: HeapLogLevel::Warn,
                    symbol: "deallocate",
                    event: "double_free",
                    addr: Some(addr),
                    size: Some(size),
                    outcome: "rejected",
                    details: "block_already_listed",
                });
                return Err(err);
            }
            let merged = state.list.coalesce(mem, addr);
            if merged.merged_next || merged.merged_prev {
                let details = match (merged.merged_prev, merged.merged_next) {
                    (true, true) => "merged=both",
                    (true, false) => "merged=prev",
                    _ => "merged=next",
                };
                state.record(Event {
                    level: HeapLogLevel::Debug,
                    symbol: "deallocate",
                    event: "coalesce",
                    addr: Some(merged.block),
                    size: Some(BlockRef::new(mem, merged.block).size()),
                    outcome: "success",
                    details,
                });
            }
            state.record(Event {
                level: HeapLogLevel::Trace,
                symbol: "deallocate",
                event: "free",
                addr: Some(addr),
                size: Some(size),
                outcome: "success",
                details: "",
            });
            Ok(())
        })
    }

    /// Whether `ptr` could be a payload handed out from this heap's segment:
    /// word aligned, header inside `[origin, brk)`, sane size that ends at or
    /// before the break.
    #[must_use]
    pub fn is_valid_pointer(&self, ptr: usize) -> bool {
        if ptr % WORD != 0 {
            return false;
        }
        let Some(addr) = ptr.checked_sub(HEADER_SIZE) else {
            return false;
        };
        if !self.segment.contains(addr) {
            return false;
        }
        let size = BlockRef::new(&self.segment, addr).size();
        size >= HEADER_SIZE
            && size % WORD == 0
            && addr
                .checked_add(size)
                .is_some_and(|end| end <= self.segment.brk())
    }

    /// Total bytes ever grown in the underlying segment.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.segment.total_size()
    }

    /// Bytes currently on this heap's free list, headers included.
    #[must_use]
    pub fn free_space(&self) -> usize {
        let mem = &*self.segment;
        self.list.with_list(|state| state.list.free_bytes(mem))
    }

    /// Snapshot of the free list in address order.
    #[must_use]
    pub fn free_blocks(&self) -> Vec<FreeBlock> {
        let mem = &*self.segment;
        self.list.with_list(|state| state.list.iter(mem).collect())
    }

    /// Structural audit of the free list.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mem = &*self.segment;
        self.list.with_list(|state| state.list.check_invariants(mem))
    }

    /// First extent this heap obtained, if it has allocated yet.
    #[must_use]
    pub fn origin(&self) -> Option<usize> {
        self.list.with_list(|state| state.origin)
    }

    #[must_use]
    pub fn segment(&self) -> &Arc<HeapSegment> {
        &self.segment
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Drains this heap's lifecycle records.
    pub fn drain_logs(&self) -> Vec<HeapLogRecord> {
        self.list.with_list(|state| state.log.drain())
    }
}

impl<H: ListHandle> Default for BestFitHeap<H> {
    fn default() -> Self {
        Self::with_config(HeapConfig::default())
    }
}

impl<H: ListHandle> std::fmt::Debug for BestFitHeap<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BestFitHeap")
            .field("scope", &H::SCOPE)
            .field("segment", &self.segment)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointerCheck;
    use crate::segment::{MAX_SEGMENT_LIMIT, PAGE_SIZE};

    fn small_heap() -> LockedHeap {
        LockedHeap::with_config(HeapConfig::default().with_heap_limit(4 * PAGE_SIZE))
    }

    #[test]
    fn first_allocation_grows_and_sets_origin() {
        let heap = small_heap();
        assert_eq!(heap.origin(), None);
        let p = heap.allocate(10).unwrap();
        assert_eq!(p % WORD, 0);
        assert_eq!(heap.origin(), Some(header_of(p)));
        assert_eq!(heap.heap_size(), block_size_for(10).unwrap());
        assert_eq!(heap.free_space(), 0);
    }

    #[test]
    fn free_then_allocate_same_size_returns_same_address() {
        let heap = small_heap();
        let _first = heap.allocate(8).unwrap();
        let p = heap.allocate(200).unwrap();
        let _guard = heap.allocate(8).unwrap();
        heap.deallocate(p).unwrap();
        assert_eq!(heap.allocate(200).unwrap(), p);
        assert!(heap.free_blocks().is_empty());
    }

    #[test]
    fn zero_sized_request_yields_a_usable_block() {
        let heap = small_heap();
        let p = heap.allocate(0).unwrap();
        assert_eq!(BlockRef::new(heap.segment(), header_of(p)).size(), HEADER_SIZE);
        heap.deallocate(p).unwrap();
        assert_eq!(heap.free_space(), HEADER_SIZE);
    }

    #[test]
    fn best_fit_picks_the_smallest_sufficient_block() {
        let heap = small_heap();
        let a = heap.allocate(40).unwrap();
        let _g1 = heap.allocate(8).unwrap();
        let b = heap.allocate(100).unwrap();
        let _g2 = heap.allocate(8).unwrap();
        let c = heap.allocate(24).unwrap();
        let _g3 = heap.allocate(8).unwrap();
        for p in [a, b, c] {
            heap.deallocate(p).unwrap();
        }
        assert_eq!(heap.free_blocks().len(), 3);
        assert_eq!(heap.allocate(24).unwrap(), c);
        assert_eq!(heap.allocate(30).unwrap(), a);
        assert_eq!(heap.allocate(41).unwrap(), b);
        assert!(heap.free_blocks().is_empty());
    }

    #[test]
    fn small_remainder_is_handed_out_whole() {
        let heap = small_heap();
        let _first = heap.allocate(8).unwrap();
        let block = 400;
        let p = heap.allocate(block - HEADER_SIZE).unwrap();
        let _guard = heap.allocate(8).unwrap();
        heap.deallocate(p).unwrap();

        assert_eq!(heap.allocate(300).unwrap(), p);
        assert_eq!(BlockRef::new(heap.segment(), header_of(p)).size(), block);
        assert!(heap.free_blocks().is_empty());
    }

    #[test]
    fn ample_remainder_is_split_off() {
        let heap = small_heap();
        let _first = heap.allocate(8).unwrap();
        let block = 1000;
        let p = heap.allocate(block - HEADER_SIZE).unwrap();
        let _guard = heap.allocate(8).unwrap();
        heap.deallocate(p).unwrap();

        let needed = block_size_for(100).unwrap();
        assert_eq!(heap.allocate(100).unwrap(), p);
        assert_eq!(
            heap.free_blocks(),
            vec![FreeBlock {
                addr: header_of(p) + needed,
                size: block - needed,
            }]
        );
        heap.check_invariants().unwrap();
    }

    #[test]
    fn freeing_the_middle_block_merges_three_ways() {
        let heap = small_heap();
        let _first = heap.allocate(8).unwrap();
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let c = heap.allocate(64).unwrap();
        let _guard = heap.allocate(8).unwrap();
        heap.deallocate(a).unwrap();
        heap.deallocate(c).unwrap();
        assert_eq!(heap.free_blocks().len(), 2);
        heap.deallocate(b).unwrap();

        let each = block_size_for(64).unwrap();
        assert_eq!(
            heap.free_blocks(),
            vec![FreeBlock {
                addr: header_of(a),
                size: 3 * each,
            }]
        );
        heap.check_invariants().unwrap();
    }

    #[test]
    fn exhaustion_leaves_the_list_intact() {
        let heap = LockedHeap::with_config(HeapConfig::default().with_heap_limit(1024));
        let a = heap.allocate(200).unwrap();
        let b = heap.allocate(200).unwrap();
        let c = heap.allocate(200).unwrap();
        heap.deallocate(b).unwrap();
        let before = heap.free_blocks();

        let err = heap.allocate(600).unwrap_err();
        assert!(matches!(err, AllocError::Exhausted { .. }));
        assert_eq!(heap.free_blocks(), before);
        heap.check_invariants().unwrap();

        heap.deallocate(a).unwrap();
        heap.deallocate(c).unwrap();
        assert_eq!(heap.free_blocks().len(), 1);
        assert_eq!(heap.allocate(200).unwrap(), a);
    }

    #[test]
    fn huge_heap_limit_builds_and_reports_exhaustion() {
        let heap = LockedHeap::with_config(HeapConfig::default().with_heap_limit(usize::MAX));
        assert_eq!(heap.config().heap_limit, MAX_SEGMENT_LIMIT);
        assert!(matches!(heap.allocate(usize::MAX / 4), Err(AllocError::Exhausted { .. })));
        assert_eq!(heap.heap_size(), 0);
        let p = heap.allocate(64).unwrap();
        heap.deallocate(p).unwrap();
    }

    #[test]
    fn oversized_request_reports_overflow() {
        let heap = small_heap();
        assert_eq!(
            heap.allocate(usize::MAX),
            Err(AllocError::SizeOverflow(usize::MAX))
        );
        let logs = heap.drain_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event, "size_overflow");
    }

    #[test]
    fn checked_heap_rejects_foreign_pointers() {
        let heap = small_heap();
        let p = heap.allocate(32).unwrap();
        assert!(heap.is_valid_pointer(p));
        assert_eq!(
            heap.deallocate(p + 1),
            Err(AllocError::InvalidPointer { addr: p + 1 })
        );
        assert_eq!(
            heap.deallocate(0x10),
            Err(AllocError::InvalidPointer { addr: 0x10 })
        );
        let beyond = heap.segment().brk() + HEADER_SIZE;
        assert_eq!(
            heap.deallocate(beyond),
            Err(AllocError::InvalidPointer { addr: beyond })
        );
        assert!(heap.free_blocks().is_empty());
        heap.deallocate(p).unwrap();
    }

    #[test]
    fn duplicate_free_is_rejected() {
        let heap = small_heap();
        let _first = heap.allocate(8).unwrap();
        let p = heap.allocate(32).unwrap();
        let _guard = heap.allocate(8).unwrap();
        heap.deallocate(p).unwrap();
        assert_eq!(
            heap.deallocate(p),
            Err(AllocError::DoubleFree { addr: header_of(p) })
        );
        assert_eq!(heap.free_blocks().len(), 1);
    }

    #[test]
    fn freeing_a_block_already_merged_left_is_rejected() {
        let heap = small_heap();
        let _first = heap.allocate(8).unwrap();
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let _guard = heap.allocate(8).unwrap();
        heap.deallocate(a).unwrap();
        heap.deallocate(b).unwrap();
        let before = heap.free_blocks();
        assert_eq!(before.len(), 1);

        assert_eq!(
            heap.deallocate(b),
            Err(AllocError::DoubleFree { addr: header_of(b) })
        );
        assert_eq!(heap.free_blocks(), before);
        heap.check_invariants().unwrap();
    }

    #[test]
    fn null_free_is_a_no_op() {
        let heap = ThreadHeap::with_config(
            HeapConfig::default()
                .with_heap_limit(PAGE_SIZE)
                .with_pointer_check(PointerCheck::Trusted),
        );
        heap.deallocate(0).unwrap();
        assert!(heap.free_blocks().is_empty());
        assert!(heap.drain_logs().is_empty());
    }

    #[test]
    fn heaps_sharing_a_segment_keep_separate_lists() {
        let segment = Arc::new(HeapSegment::with_capacity(4 * PAGE_SIZE));
        let left = ThreadHeap::new(Arc::clone(&segment), HeapConfig::default());
        let right = ThreadHeap::new(Arc::clone(&segment), HeapConfig::default());

        let l = left.allocate(64).unwrap();
        let r = right.allocate(64).unwrap();
        assert_ne!(left.origin(), right.origin());
        left.deallocate(l).unwrap();

        assert_eq!(left.free_blocks().len(), 1);
        assert!(right.free_blocks().is_empty());
        assert_ne!(right.allocate(64).unwrap(), l);
        assert_eq!(left.heap_size(), right.heap_size());
        right.deallocate(r).unwrap();
    }

    #[test]
    fn lifecycle_records_follow_the_handlers() {
        let heap = LockedHeap::with_config(
            HeapConfig::default()
                .with_heap_limit(PAGE_SIZE)
                .with_log_level(Some(HeapLogLevel::Trace)),
        );
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.deallocate(a).unwrap();
        heap.deallocate(b).unwrap();
        let _again = heap.allocate(16).unwrap();

        let logs = heap.drain_logs();
        let events: Vec<_> = logs.iter().map(|r| r.event).collect();
        assert_eq!(
            events,
            [
                "first_extent",
                "grow",
                "grow",
                "free",
                "coalesce",
                "free",
                "reuse"
            ]
        );
        assert!(logs[0].trace_id.starts_with("bfmalloc::locked::allocate::"));
        assert_eq!(logs[4].details, "merged=prev");
        assert_eq!(logs[6].free_blocks, 0);
        assert!(heap.drain_logs().is_empty());
    }
}
