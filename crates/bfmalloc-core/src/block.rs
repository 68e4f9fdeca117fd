//! Block header layout.
//!
//! Every extent, free or allocated, starts with three words:
//!
//! ```text
//! addr + 0 * WORD   size   total extent size, header included
//! addr + 1 * WORD   next   next free block (0 = none), free blocks only
//! addr + 2 * WORD   prev   previous free block (0 = none), free blocks only
//! addr + HEADER     payload handed to the caller
//! ```
//!
//! `next`/`prev` are meaningless while a block is allocated; the caller's
//! payload begins right after them.

use crate::segment::HeapSegment;

/// Machine word size; the natural alignment of every block.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Bytes of metadata in front of every payload.
pub const HEADER_SIZE: usize = 3 * WORD;

const SIZE_OFFSET: usize = 0;
const NEXT_OFFSET: usize = WORD;
const PREV_OFFSET: usize = 2 * WORD;

/// Rounds `value` up to a multiple of `align` (a power of two).
#[must_use]
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Total block size for a payload of `payload` bytes, or `None` on overflow.
#[must_use]
pub const fn block_size_for(payload: usize) -> Option<usize> {
    match payload.checked_add(HEADER_SIZE) {
        Some(total) => align_up(total, WORD),
        None => None,
    }
}

/// Payload address of the block at `addr`.
#[must_use]
pub const fn payload_of(addr: usize) -> usize {
    addr + HEADER_SIZE
}

/// Block address owning the payload at `ptr`.
#[must_use]
pub const fn header_of(ptr: usize) -> usize {
    ptr - HEADER_SIZE
}

/// Typed view of the header at `addr` inside a segment.
#[derive(Clone, Copy)]
pub struct BlockRef<'a> {
    mem: &'a HeapSegment,
    addr: usize,
}

impl<'a> BlockRef<'a> {
    #[must_use]
    pub fn new(mem: &'a HeapSegment, addr: usize) -> Self {
        Self { mem, addr }
    }

    #[must_use]
    pub fn addr(self) -> usize {
        self.addr
    }

    /// One past the last byte of this block.
    #[must_use]
    pub fn end(self) -> usize {
        self.addr + self.size()
    }

    #[must_use]
    pub fn size(self) -> usize {
        self.mem.load(self.addr + SIZE_OFFSET)
    }

    pub fn set_size(self, size: usize) {
        self.mem.store(self.addr + SIZE_OFFSET, size);
    }

    #[must_use]
    pub fn next(self) -> Option<usize> {
        decode(self.mem.load(self.addr + NEXT_OFFSET))
    }

    pub fn set_next(self, next: Option<usize>) {
        self.mem.store(self.addr + NEXT_OFFSET, next.unwrap_or(0));
    }

    #[must_use]
    pub fn prev(self) -> Option<usize> {
        decode(self.mem.load(self.addr + PREV_OFFSET))
    }

    pub fn set_prev(self, prev: Option<usize>) {
        self.mem.store(self.addr + PREV_OFFSET, prev.unwrap_or(0));
    }

    /// Clears both links.
    pub fn unlink(self) {
        self.set_next(None);
        self.set_prev(None);
    }
}

impl std::fmt::Debug for BlockRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("size", &self.size())
            .field("next", &self.next())
            .field("prev", &self.prev())
            .finish()
    }
}

fn decode(raw: usize) -> Option<usize> {
    (raw != 0).then_some(raw)
}
