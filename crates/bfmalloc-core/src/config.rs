//! Heap configuration.
//!
//! Process-wide heaps read their configuration from the environment once:
//! - `BFMALLOC_HEAP_LIMIT`: bytes of address space reserved for the segment.
//!   Accepts `k`, `m` and `g` suffixes. Default 256 MiB, clamped to
//!   [`MAX_SEGMENT_LIMIT`].
//! - `BFMALLOC_MIN_SPLIT`: smallest remainder worth splitting off a reused
//!   block. Default `HEADER_SIZE + 128`; never below `HEADER_SIZE`.
//! - `BFMALLOC_POINTER_CHECK`: `checked` (default) validates freed pointers
//!   against the grown segment; `trusted` skips the check.
//! - `BFMALLOC_LOG`: minimum lifecycle log level
//!   (`trace|debug|info|warn|error|off`, default `warn`).
//! - `BFMALLOC_LOG_CAPACITY`: records kept per free list. Default 4096.
//!
//! Unparseable values fall back to the default for that field.

use crate::block::{HEADER_SIZE, WORD, align_up};
use crate::log::HeapLogLevel;
use crate::segment::MAX_SEGMENT_LIMIT;

/// Default reserved address space.
pub const DEFAULT_HEAP_LIMIT: usize = 256 * 1024 * 1024;

/// Default minimum split remainder.
pub const DEFAULT_MIN_SPLIT: usize = HEADER_SIZE + 128;

/// Default lifecycle ring size per free list.
pub const DEFAULT_LOG_CAPACITY: usize = 4096;

/// How much a deallocation trusts the pointer it is given.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerCheck {
    /// Reject pointers whose header is misaligned, outside the grown
    /// segment, or carries an impossible size.
    #[default]
    Checked,
    /// Trust the caller; no range validation.
    Trusted,
}

impl PointerCheck {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trusted" | "off" | "none" | "unchecked" => Self::Trusted,
            _ => Self::Checked,
        }
    }

    #[must_use]
    pub const fn enabled(self) -> bool {
        matches!(self, Self::Checked)
    }
}

/// Heap tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Bytes of address space a fresh segment reserves.
    pub heap_limit: usize,
    /// Smallest remainder split off a reused block.
    pub min_split: usize,
    pub pointer_check: PointerCheck,
    /// `None` disables lifecycle logging.
    pub log_level: Option<HeapLogLevel>,
    pub log_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            heap_limit: DEFAULT_HEAP_LIMIT,
            min_split: DEFAULT_MIN_SPLIT,
            pointer_check: PointerCheck::default(),
            log_level: Some(HeapLogLevel::Warn),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl HeapConfig {
    /// Reads the `BFMALLOC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let heap_limit = lookup("BFMALLOC_HEAP_LIMIT")
            .and_then(|v| parse_size(&v))
            .unwrap_or(defaults.heap_limit);
        let min_split = lookup("BFMALLOC_MIN_SPLIT")
            .and_then(|v| parse_size(&v))
            .unwrap_or(defaults.min_split);
        let pointer_check = lookup("BFMALLOC_POINTER_CHECK")
            .map(|v| PointerCheck::from_str_loose(&v))
            .unwrap_or(defaults.pointer_check);
        let log_level = match lookup("BFMALLOC_LOG") {
            Some(v) => HeapLogLevel::parse_filter(&v, defaults.log_level),
            None => defaults.log_level,
        };
        let log_capacity = lookup("BFMALLOC_LOG_CAPACITY")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.log_capacity);
        Self {
            heap_limit,
            min_split,
            pointer_check,
            log_level,
            log_capacity,
        }
        .normalized()
    }

    #[must_use]
    pub fn with_heap_limit(mut self, heap_limit: usize) -> Self {
        self.heap_limit = heap_limit;
        self.normalized()
    }

    #[must_use]
    pub fn with_min_split(mut self, min_split: usize) -> Self {
        self.min_split = min_split;
        self.normalized()
    }

    #[must_use]
    pub fn with_pointer_check(mut self, pointer_check: PointerCheck) -> Self {
        self.pointer_check = pointer_check;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: Option<HeapLogLevel>) -> Self {
        self.log_level = log_level;
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, log_capacity: usize) -> Self {
        self.log_capacity = log_capacity;
        self
    }

    /// Clamps `heap_limit` to the largest reservation a segment accepts,
    /// and `min_split` to hold at least a header, word aligned.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.heap_limit = self.heap_limit.min(MAX_SEGMENT_LIMIT);
        self.min_split = align_up(self.min_split.max(HEADER_SIZE), WORD)
            .unwrap_or(usize::MAX & !(WORD - 1));
        self
    }
}

/// Parses `4096`, `64k`, `16M`, `1g` into bytes.
fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim().to_ascii_lowercase();
    let (digits, shift) = match raw.strip_suffix(['k', 'm', 'g']) {
        Some(digits) => {
            let shift = match raw.as_bytes()[raw.len() - 1] {
                b'k' => 10,
                b'm' => 20,
                _ => 30,
            };
            (digits, shift)
        }
        None => (raw.as_str(), 0),
    };
    let value: usize = digits.trim().parse().ok()?;
    value.checked_mul(1usize << shift)
}
