//! Address-ordered free list.
//!
//! Free blocks are threaded through the `next`/`prev` words of their own
//! headers, in strictly ascending address order. Keeping the order is what
//! makes coalescing cheap: two physically adjacent free blocks are always
//! list neighbours, so a freed block only has to be compared with its two
//! list neighbours.
//!
//! The list itself holds only head, tail, length and the split threshold;
//! all node state lives in the [`HeapSegment`] passed to each operation.

use crate::block::{BlockRef, HEADER_SIZE};
use crate::error::{AllocError, InvariantViolation};
use crate::segment::HeapSegment;

/// Snapshot of one free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeBlock {
    pub addr: usize,
    pub size: usize,
}

/// Outcome of [`FreeList::coalesce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coalesced {
    /// Block that survived the merges.
    pub block: usize,
    /// The following free block was absorbed.
    pub merged_next: bool,
    /// The block was absorbed into the preceding free block.
    pub merged_prev: bool,
}

/// Intrusive, address-ordered, doubly-linked list of free blocks.
#[derive(Debug)]
pub struct FreeList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    min_split: usize,
}

impl FreeList {
    /// Creates an empty list that splits off remainders of at least
    /// `min_split` bytes.
    #[must_use]
    pub fn new(min_split: usize) -> Self {
        debug_assert!(
            min_split >= HEADER_SIZE,
            "split threshold {min_split} cannot hold a header"
        );
        Self {
            head: None,
            tail: None,
            len: 0,
            min_split,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    #[must_use]
    pub fn tail(&self) -> Option<usize> {
        self.tail
    }

    #[must_use]
    pub fn min_split(&self) -> usize {
        self.min_split
    }

    /// Smallest block of at least `needed` bytes; lowest address on ties.
    #[must_use]
    pub fn find_best_fit(&self, mem: &HeapSegment, needed: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        let mut cursor = self.head;
        while let Some(addr) = cursor {
            let block = BlockRef::new(mem, addr);
            let size = block.size();
            if size >= needed {
                let slack = size - needed;
                if best.is_none_or(|(_, best_slack)| slack < best_slack) {
                    if slack == 0 {
                        return Some(addr);
                    }
                    best = Some((addr, slack));
                }
            }
            cursor = block.next();
        }
        best.map(|(addr, _)| addr)
    }

    /// Carves the tail of the free block at `addr` into a new free block if
    /// the remainder after `needed` bytes reaches the split threshold.
    ///
    /// The remainder takes the block's place after it in the list. Returns
    /// the remainder's address, or `None` if the block stays whole.
    pub fn split(&mut self, mem: &HeapSegment, addr: usize, needed: usize) -> Option<usize> {
        let block = BlockRef::new(mem, addr);
        let size = block.size();
        debug_assert!(size >= needed, "split of {size} bytes for {needed}");
        let rest = size.checked_sub(needed)?;
        if rest < self.min_split {
            return None;
        }

        let remainder = BlockRef::new(mem, addr + needed);
        let next = block.next();
        remainder.set_size(rest);
        remainder.set_next(next);
        remainder.set_prev(Some(addr));
        match next {
            Some(next) => BlockRef::new(mem, next).set_prev(Some(remainder.addr())),
            None => self.tail = Some(remainder.addr()),
        }
        block.set_next(Some(remainder.addr()));
        block.set_size(needed);
        self.len += 1;
        Some(remainder.addr())
    }

    /// Links the block at `addr` in ascending address order.
    ///
    /// Head and tail insertions are constant time; anything else walks from
    /// the head. A block that is already listed, or that overlaps the free
    /// neighbours it would sit between, is rejected untouched.
    pub fn insert_sorted(&mut self, mem: &HeapSegment, addr: usize) -> Result<(), AllocError> {
        let block = BlockRef::new(mem, addr);
        let (Some(head), Some(tail)) = (self.head, self.tail) else {
            block.unlink();
            self.head = Some(addr);
            self.tail = Some(addr);
            self.len = 1;
            return Ok(());
        };
        if addr == head || addr == tail {
            return Err(AllocError::DoubleFree { addr });
        }

        let (prev, next) = if addr < head {
            (None, Some(head))
        } else if addr > tail {
            (Some(tail), None)
        } else {
            let mut current = head;
            let mut next = BlockRef::new(mem, current).next();
            while let Some(candidate) = next {
                if candidate >= addr {
                    break;
                }
                current = candidate;
                next = BlockRef::new(mem, candidate).next();
            }
            if next == Some(addr) {
                return Err(AllocError::DoubleFree { addr });
            }
            (Some(current), next)
        };

        let end = addr.saturating_add(block.size());
        let inside_prev = prev.is_some_and(|prev| addr < BlockRef::new(mem, prev).end());
        let over_next = next.is_some_and(|next| end > next);
        if inside_prev || over_next {
            return Err(AllocError::DoubleFree { addr });
        }

        block.set_prev(prev);
        block.set_next(next);
        match prev {
            Some(prev) => BlockRef::new(mem, prev).set_next(Some(addr)),
            None => self.head = Some(addr),
        }
        match next {
            Some(next) => BlockRef::new(mem, next).set_prev(Some(addr)),
            None => self.tail = Some(addr),
        }
        self.len += 1;
        Ok(())
    }

    /// Unlinks the block at `addr` and clears its links.
    pub fn remove(&mut self, mem: &HeapSegment, addr: usize) {
        debug_assert!(self.len > 0, "remove of {addr:#x} from an empty free list");
        if self.len == 0 {
            return;
        }
        let block = BlockRef::new(mem, addr);
        let next = block.next();
        let prev = block.prev();

        match prev {
            Some(prev) => BlockRef::new(mem, prev).set_next(next),
            None => {
                debug_assert_eq!(self.head, Some(addr), "{addr:#x} has no prev but is not head");
                self.head = next;
            }
        }
        match next {
            Some(next) => BlockRef::new(mem, next).set_prev(prev),
            None => {
                debug_assert_eq!(self.tail, Some(addr), "{addr:#x} has no next but is not tail");
                self.tail = prev;
            }
        }
        self.len -= 1;
        block.unlink();
    }

    /// Merges the listed block at `addr` with physically adjacent list
    /// neighbours: first the following block, then the preceding one.
    pub fn coalesce(&mut self, mem: &HeapSegment, addr: usize) -> Coalesced {
        let block = BlockRef::new(mem, addr);
        let mut merged_next = false;

        if let Some(next) = block.next() {
            if block.end() == next {
                let absorbed = BlockRef::new(mem, next).size();
                self.remove(mem, next);
                block.set_size(block.size() + absorbed);
                merged_next = true;
            }
        }

        if let Some(prev) = block.prev() {
            let prev_block = BlockRef::new(mem, prev);
            if prev_block.end() == addr {
                let absorbed = block.size();
                self.remove(mem, addr);
                prev_block.set_size(prev_block.size() + absorbed);
                return Coalesced {
                    block: prev,
                    merged_next,
                    merged_prev: true,
                };
            }
        }

        Coalesced {
            block: addr,
            merged_next,
            merged_prev: false,
        }
    }

    /// Sum of `size` over every listed block.
    #[must_use]
    pub fn free_bytes(&self, mem: &HeapSegment) -> usize {
        self.iter(mem).map(|block| block.size).sum()
    }

    /// Walks the list in address order. Stops after `len` blocks.
    #[must_use]
    pub fn iter<'a>(&self, mem: &'a HeapSegment) -> FreeBlocks<'a> {
        FreeBlocks {
            mem,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Audits every structural invariant of the list.
    pub fn check_invariants(&self, mem: &HeapSegment) -> Result<(), InvariantViolation> {
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        let mut steps = 0usize;

        while let Some(addr) = cursor {
            if steps == self.len {
                return Err(InvariantViolation::Cycle { steps: steps + 1 });
            }
            steps += 1;

            if !mem.contains(addr) {
                return Err(InvariantViolation::OutOfSegment { addr, size: 0 });
            }
            let block = BlockRef::new(mem, addr);
            let size = block.size();
            if size < HEADER_SIZE {
                return Err(InvariantViolation::Undersized { addr, size });
            }
            if addr.checked_add(size).is_none_or(|end| end > mem.brk()) {
                return Err(InvariantViolation::OutOfSegment { addr, size });
            }
            if block.prev() != prev {
                return Err(InvariantViolation::BrokenBackLink {
                    addr,
                    expected: prev,
                    found: block.prev(),
                });
            }
            if let Some(next) = block.next() {
                if next <= addr {
                    return Err(InvariantViolation::Unsorted { addr, next });
                }
                let end = addr + size;
                if end > next {
                    return Err(InvariantViolation::Overlap { addr, size, next });
                }
                if end == next {
                    return Err(InvariantViolation::Uncoalesced { addr, next });
                }
            }
            prev = Some(addr);
            cursor = block.next();
        }

        if steps != self.len {
            return Err(InvariantViolation::LengthMismatch {
                recorded: self.len,
                actual: steps,
            });
        }
        if self.tail != prev {
            return Err(InvariantViolation::TailMismatch {
                recorded: self.tail,
                actual: prev,
            });
        }
        Ok(())
    }
}

/// Iterator over a free list's blocks.
pub struct FreeBlocks<'a> {
    mem: &'a HeapSegment,
    cursor: Option<usize>,
    remaining: usize,
}

impl Iterator for FreeBlocks<'_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<FreeBlock> {
        if self.remaining == 0 {
            return None;
        }
        let addr = self.cursor?;
        let block = BlockRef::new(self.mem, addr);
        self.remaining -= 1;
        self.cursor = block.next();
        Some(FreeBlock {
            addr,
            size: block.size(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
