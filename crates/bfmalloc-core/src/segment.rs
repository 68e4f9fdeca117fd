//! Heap growth primitive.
//!
//! A [`HeapSegment`] stands in for the process data segment: a reserved,
//! contiguous logical address range that only ever grows at its end. Pages
//! of backing words are committed lazily as the break crosses them. The
//! page table is two-level: a small directory sized by the reservation, each
//! slot allocated the first time the break reaches it. Reservations are
//! clamped to [`MAX_SEGMENT_LIMIT`].
//!
//! Every growth request, from either heap variant, goes through one
//! `parking_lot::Mutex` guarding the break. Word loads and stores are
//! relaxed atomics; ordering between threads comes from the list locks and
//! from whatever the caller used to hand a pointer across threads.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::block::{self, WORD};
use crate::error::AllocError;

/// First address of every segment. Address `0` stays free to mean null.
pub const SEGMENT_BASE: usize = 0x1000;

/// Commit granularity of the backing store.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Largest reservation a segment accepts; larger limits are clamped.
pub const MAX_SEGMENT_LIMIT: usize = if usize::BITS >= 64 {
    (1_u64 << 40) as usize
} else {
    1 << 30
};

const PAGE_WORDS: usize = PAGE_SIZE / WORD;

/// Pages per directory slot.
const CHUNK_PAGES: usize = 1024;

type Page = Box<[AtomicUsize]>;
type Chunk = Box<[OnceLock<Page>]>;

/// Contiguous, monotonically growing address space.
pub struct HeapSegment {
    /// Page directory; chunks and pages are committed under the growth lock.
    directory: Box<[OnceLock<Chunk>]>,
    /// One past the last reservable address.
    limit: usize,
    /// Current break. The mutex is the growth lock.
    brk: Mutex<usize>,
    /// Break mirror readable without taking the growth lock.
    published_brk: AtomicUsize,
    /// Address of the first extent ever handed out.
    origin: OnceLock<usize>,
}

impl HeapSegment {
    /// Reserves `limit` bytes of address space, rounded down to a word and
    /// clamped to [`MAX_SEGMENT_LIMIT`].
    #[must_use]
    pub fn with_capacity(limit: usize) -> Self {
        let limit = limit.min(MAX_SEGMENT_LIMIT) & !(WORD - 1);
        let chunk_count = limit.div_ceil(PAGE_SIZE * CHUNK_PAGES);
        let directory: Vec<OnceLock<Chunk>> = (0..chunk_count).map(|_| OnceLock::new()).collect();
        Self {
            directory: directory.into_boxed_slice(),
            limit: SEGMENT_BASE.saturating_add(limit),
            brk: Mutex::new(SEGMENT_BASE),
            published_brk: AtomicUsize::new(SEGMENT_BASE),
            origin: OnceLock::new(),
        }
    }

    /// Extends the segment by `n` bytes.
    ///
    /// Returns the address of the new extent with its header `size` word set
    /// to `n`. The rest of the header is left as whatever the page held.
    /// Fails with [`AllocError::Exhausted`] when the reservation is used up
    /// or backing pages cannot be allocated; the break is unchanged then.
    pub fn grow(&self, n: usize) -> Result<usize, AllocError> {
        debug_assert!(n % WORD == 0, "growth of {n} bytes is not word aligned");
        let start = {
            let mut brk = self.brk.lock();
            let start = *brk;
            let available = self.limit - start;
            if n > available {
                return Err(AllocError::Exhausted {
                    requested: n,
                    available,
                });
            }
            let end = start + n;
            if !self.commit(start, end) {
                return Err(AllocError::Exhausted {
                    requested: n,
                    available,
                });
            }
            *brk = end;
            self.published_brk.store(end, Ordering::Release);
            let _ = self.origin.set(start);
            start
        };
        if n >= WORD {
            block::BlockRef::new(self, start).set_size(n);
        }
        Ok(start)
    }

    /// Commits every page overlapping `[start, end)`. Caller holds the
    /// growth lock. Returns false if backing memory could not be allocated.
    fn commit(&self, start: usize, end: usize) -> bool {
        if start == end {
            return true;
        }
        let first = (start - SEGMENT_BASE) / PAGE_SIZE;
        let last = (end - 1 - SEGMENT_BASE) / PAGE_SIZE;
        for page_index in first..=last {
            let Some(slot) = self.directory.get(page_index / CHUNK_PAGES) else {
                return false;
            };
            if slot.get().is_none() {
                let Some(chunk) = try_boxed(CHUNK_PAGES, OnceLock::new) else {
                    return false;
                };
                let _ = slot.set(chunk);
            }
            let Some(page) = slot.get().map(|chunk| &chunk[page_index % CHUNK_PAGES]) else {
                return false;
            };
            if page.get().is_none() {
                let Some(words) = try_boxed(PAGE_WORDS, || AtomicUsize::new(0)) else {
                    return false;
                };
                let _ = page.set(words);
            }
        }
        true
    }

    /// Address of the first extent ever grown, if any.
    #[must_use]
    pub fn origin(&self) -> Option<usize> {
        self.origin.get().copied()
    }

    /// Current break: one past the last grown byte.
    #[must_use]
    pub fn brk(&self) -> usize {
        self.published_brk.load(Ordering::Acquire)
    }

    /// Cumulative bytes obtained through [`HeapSegment::grow`].
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.brk() - SEGMENT_BASE
    }

    /// Bytes of address space reserved for this segment.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.limit - SEGMENT_BASE
    }

    /// Bytes that can still be grown.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit - self.brk()
    }

    /// Returns true if `addr` lies in `[origin, brk)`.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.origin().is_some_and(|origin| addr >= origin && addr < self.brk())
    }

    /// Loads the word at `addr`.
    #[must_use]
    pub fn load(&self, addr: usize) -> usize {
        self.word(addr).load(Ordering::Relaxed)
    }

    /// Stores `value` into the word at `addr`.
    pub fn store(&self, addr: usize, value: usize) {
        self.word(addr).store(value, Ordering::Relaxed);
    }

    fn word(&self, addr: usize) -> &AtomicUsize {
        assert!(
            addr >= SEGMENT_BASE && addr % WORD == 0,
            "segment access at {addr:#x} is below the base or misaligned"
        );
        let index = (addr - SEGMENT_BASE) / WORD;
        let page_index = index / PAGE_WORDS;
        let page = self
            .directory
            .get(page_index / CHUNK_PAGES)
            .and_then(OnceLock::get)
            .and_then(|chunk| chunk[page_index % CHUNK_PAGES].get());
        match page {
            Some(page) => &page[index % PAGE_WORDS],
            None => panic!("segment access at {addr:#x} touches uncommitted memory"),
        }
    }
}

/// Allocates a boxed slice of `len` items, or `None` if the allocator refuses.
fn try_boxed<T>(len: usize, init: impl FnMut() -> T) -> Option<Box<[T]>> {
    let mut items = Vec::new();
    items.try_reserve_exact(len).ok()?;
    items.extend(std::iter::repeat_with(init).take(len));
    Some(items.into_boxed_slice())
}

impl std::fmt::Debug for HeapSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapSegment")
            .field("origin", &self.origin())
            .field("brk", &self.brk())
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
