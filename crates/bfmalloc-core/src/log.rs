//! Structured heap lifecycle records.
//!
//! Each free list keeps a bounded ring of [`HeapLogRecord`]s describing what
//! the handlers decided (reuse, split, coalesce, growth, rejected frees).
//! Records below the configured level are dropped before formatting cost is
//! paid by the log itself. Harnesses drain the ring and serialize it.

use std::collections::VecDeque;

use serde::Serialize;

/// Heap lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl HeapLogLevel {
    /// Parse a level filter (case-insensitive). `off` and unknown input
    /// yield `None` and `Some(default)` respectively.
    #[must_use]
    pub fn parse_filter(s: &str, default: Option<Self>) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "off" | "none" | "disabled" => None,
            _ => default,
        }
    }
}

/// One structured lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id within one list.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: HeapLogLevel,
    /// API symbol (`allocate`, `deallocate`).
    pub symbol: &'static str,
    /// Event kind (`reuse`, `split`, `coalesce`, `grow`, ...).
    pub event: &'static str,
    /// Block address involved in the event.
    pub addr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: number of blocks on the free list.
    pub free_blocks: usize,
}

/// Bounded ring of lifecycle records.
#[derive(Debug)]
pub struct EventLog {
    scope: &'static str,
    min_level: Option<HeapLogLevel>,
    capacity: usize,
    next_decision_id: u64,
    records: VecDeque<HeapLogRecord>,
}

/// Fields of a record supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    pub level: HeapLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub addr: Option<usize>,
    pub size: Option<usize>,
    pub outcome: &'static str,
    pub details: &'a str,
}

impl EventLog {
    #[must_use]
    pub fn new(scope: &'static str, min_level: Option<HeapLogLevel>, capacity: usize) -> Self {
        Self {
            scope,
            min_level,
            capacity,
            next_decision_id: 1,
            records: VecDeque::new(),
        }
    }

    /// Returns true if a record at `level` would be kept.
    #[must_use]
    pub fn enabled(&self, level: HeapLogLevel) -> bool {
        self.capacity > 0 && self.min_level.is_some_and(|min| level >= min)
    }

    pub fn record(&mut self, event: Event<'_>, free_blocks: usize) {
        if !self.enabled(event.level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(HeapLogRecord {
            decision_id,
            trace_id: format!(
                "bfmalloc::{}::{}::{:016x}",
                self.scope, event.symbol, decision_id
            ),
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            addr: event.addr,
            size: event.size,
            outcome: event.outcome,
            details: event.details.to_owned(),
            free_blocks,
        });
    }

    #[must_use]
    pub fn records(&self) -> &VecDeque<HeapLogRecord> {
        &self.records
    }

    /// Drains all stored records.
    pub fn drain(&mut self) -> Vec<HeapLogRecord> {
        self.records.drain(..).collect()
    }
}
