//! List handles: how a heap reaches its free list.
//!
//! The allocation and deallocation handlers are written once against
//! [`ListHandle`]. A handle decides the concurrency discipline:
//! [`SharedList`] serializes every list critical section through a
//! `parking_lot::Mutex`, [`PrivateList`] hands out the list through a
//! `RefCell` and is therefore usable from its owning thread only.

use std::cell::RefCell;

use parking_lot::Mutex;

use crate::config::HeapConfig;
use crate::freelist::FreeList;
use crate::log::{Event, EventLog};

/// Everything a heap variant keeps next to its free list.
///
/// Only the heap handlers build or touch a list state, so no handle can be
/// obtained outside this crate:
///
/// ```compile_fail
/// use bfmalloc_core::HeapConfig;
/// use bfmalloc_core::handle::ListState;
///
/// let _state = ListState::new("locked", &HeapConfig::default());
/// ```
#[derive(Debug)]
pub struct ListState {
    pub(crate) list: FreeList,
    /// First extent this context obtained from the segment.
    pub(crate) origin: Option<usize>,
    pub(crate) log: EventLog,
}

impl ListState {
    #[must_use]
    pub(crate) fn new(scope: &'static str, config: &HeapConfig) -> Self {
        Self {
            list: FreeList::new(config.min_split),
            origin: None,
            log: EventLog::new(scope, config.log_level, config.log_capacity),
        }
    }

    /// Appends a lifecycle record stamped with the current list length.
    pub(crate) fn record(&mut self, event: Event<'_>) {
        let free_blocks = self.list.len();
        self.log.record(event, free_blocks);
    }
}

/// Access path from a heap to its list state.
pub trait ListHandle {
    /// Scope tag used in lifecycle trace ids.
    const SCOPE: &'static str;

    fn from_state(state: ListState) -> Self;

    /// Runs `f` inside one list critical section.
    fn with_list<R>(&self, f: impl FnOnce(&mut ListState) -> R) -> R;
}

/// Free list shared by all threads, guarded by the list lock.
#[derive(Debug)]
pub struct SharedList(Mutex<ListState>);

impl ListHandle for SharedList {
    const SCOPE: &'static str = "locked";

    fn from_state(state: ListState) -> Self {
        Self(Mutex::new(state))
    }

    fn with_list<R>(&self, f: impl FnOnce(&mut ListState) -> R) -> R {
        let mut state = self.0.lock();
        f(&mut state)
    }
}

/// Free list owned by a single thread; no locking.
#[derive(Debug)]
pub struct PrivateList(RefCell<ListState>);

impl ListHandle for PrivateList {
    const SCOPE: &'static str = "thread";

    fn from_state(state: ListState) -> Self {
        Self(RefCell::new(state))
    }

    fn with_list<R>(&self, f: impl FnOnce(&mut ListState) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}
