//! Minimal tracker collaborators fed by the parse phase.
//!
//! The real column store is out of scope; these are append-only row sinks
//! with the insert APIs the bundled modules need, plus the `V8Tracker`
//! consumed as a custom-state constructor argument.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// A named slice row produced by the track-event parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRow {
    pub timestamp: i64,
    pub name: String,
    pub pid: Option<i64>,
    pub tid: Option<i64>,
    pub thread_timestamp: Option<i64>,
}

/// Append-only sink for named slices.
#[derive(Debug, Default)]
pub struct SliceTracker {
    rows: Vec<SliceRow>,
}

impl SliceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row: SliceRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[SliceRow] {
        &self.rows
    }
}

/// A context-switch row produced by the scheduler parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedRow {
    pub timestamp: i64,
    pub cpu: u32,
    pub prev_pid: i64,
    pub next_pid: i64,
    pub next_comm: Option<String>,
}

/// Append-only sink for scheduler switches.
#[derive(Debug, Default)]
pub struct SchedTracker {
    rows: Vec<SchedRow>,
}

impl SchedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row: SchedRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[SchedRow] {
        &self.rows
    }
}

/// A log row produced by the log parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub timestamp: i64,
    pub severity: u32,
    pub message: String,
}

/// Append-only sink for log events.
#[derive(Debug, Default)]
pub struct LogTracker {
    rows: Vec<LogRow>,
}

impl LogTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row: LogRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }
}

/// Row allocator for V8 isolates. Passed to the V8 custom-state extension
/// at construction so isolate caches on different sequences share one row
/// space.
#[derive(Debug, Default)]
pub struct V8Tracker {
    next_row: Cell<u32>,
    isolate_rows: RefCell<HashMap<u64, u32>>,
}

impl V8Tracker {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Row for an isolate id, allocating one on first sight.
    pub fn row_for_isolate(&self, isolate_id: u64) -> u32 {
        let mut rows = self.isolate_rows.borrow_mut();
        *rows.entry(isolate_id).or_insert_with(|| {
            let row = self.next_row.get();
            self.next_row.set(row + 1);
            row
        })
    }

    pub fn isolate_count(&self) -> usize {
        self.isolate_rows.borrow().len()
    }
}

/// All tracker handles a pipeline hands to its modules. The `V8Tracker` is
/// not held here: it belongs to whichever caller registers a module that
/// consumes the V8 custom state, and is passed to the generation accessor
/// directly.
#[derive(Debug, Clone)]
pub struct Trackers {
    pub slices: Rc<RefCell<SliceTracker>>,
    pub sched: Rc<RefCell<SchedTracker>>,
    pub logs: Rc<RefCell<LogTracker>>,
}

impl Trackers {
    pub fn new() -> Self {
        Self {
            slices: Rc::new(RefCell::new(SliceTracker::new())),
            sched: Rc::new(RefCell::new(SchedTracker::new())),
            logs: Rc::new(RefCell::new(LogTracker::new())),
        }
    }
}

impl Default for Trackers {
    fn default() -> Self {
        Self::new()
    }
}
