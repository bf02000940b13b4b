//! # Shared Event Model (producers ↔ analyzers)
//!
//! Defines the event representation shared between trace producers (file
//! loaders, replay tools) and the analysis engines. Every analyzer in the
//! workspace consumes this model and nothing else, so a new trace format
//! only needs a loader that emits [`Event`] values.
//!
//! ## Key Types
//!
//! - [`Event`] - A single timestamped observation on one lane
//! - [`FieldValue`] - Typed payload field (integer or string)
//! - [`Timestamp`] / [`Duration`] - Nanosecond time newtypes
//! - [`Tid`] / [`LaneId`] - Identity newtypes
//! - [`TimeRange`] - Inclusive query interval
//!
//! Enable the `serde` feature to (de)serialize all of these.

use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Well-Known Event Names and Fields
// ============================================================================

/// Scheduler context-switch event.
///
/// Carries [`FIELD_PREV_TID`]/[`FIELD_NEXT_TID`] (and usually the comm
/// fields). These events drive the per-lane running-thread table, so a
/// trace without them cannot attribute other events to threads.
pub const SCHED_SWITCH: &str = "sched_switch";

/// Scheduler wakeup event. Carries [`FIELD_TID`] for the woken thread.
pub const SCHED_WAKEUP: &str = "sched_wakeup";

/// Thread being switched out (integer).
pub const FIELD_PREV_TID: &str = "prev_tid";

/// Thread being switched in (integer).
pub const FIELD_NEXT_TID: &str = "next_tid";

/// Command name of the thread being switched out (string).
pub const FIELD_PREV_COMM: &str = "prev_comm";

/// Command name of the thread being switched in (string).
pub const FIELD_NEXT_COMM: &str = "next_comm";

/// Subject thread of a non-switch event (integer).
pub const FIELD_TID: &str = "tid";

/// Command name of the subject thread (string).
pub const FIELD_COMM: &str = "comm";

// ============================================================================
// Identity and Time Newtypes
// ============================================================================

/// Thread ID
///
/// Kernel-assigned thread identity. Distinct from [`LaneId`]: many threads
/// take turns on one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

impl From<u32> for Tid {
    fn from(tid: u32) -> Self {
        Tid(tid)
    }
}

/// Lane ID
///
/// The execution slot an event was observed on, typically a CPU core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneId(pub u32);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lane:{}", self.0)
    }
}

/// Timestamp in nanoseconds
///
/// Absolute point in time, relative to the trace's own clock origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Convert to seconds (f64)
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Convert to microseconds (f64, Chrome trace unit)
    pub fn as_micros_f64(self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    /// Nanoseconds elapsed since `earlier`, saturating at zero.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

/// Duration in nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Duration(pub u64);

impl Duration {
    /// Convert to milliseconds (f64)
    pub fn as_millis(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Convert to seconds (f64)
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Saturating addition.
    #[must_use]
    pub fn saturating_add(self, other: Duration) -> Duration {
        Duration(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.as_millis();
        if ms >= 1000.0 {
            write!(f, "{:.2}s", self.as_seconds())
        } else {
            write!(f, "{ms:.2}ms")
        }
    }
}

/// Inclusive time interval `[begin, end]`
///
/// Both endpoints are part of the range, so boundary events of an
/// execution fall inside the execution's own range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeRange {
    pub begin: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a range. `begin` must not exceed `end`.
    pub fn new(begin: Timestamp, end: Timestamp) -> Self {
        debug_assert!(begin <= end, "TimeRange begin after end");
        Self { begin, end }
    }

    /// Range covering every representable timestamp.
    pub fn unbounded() -> Self {
        Self { begin: Timestamp(0), end: Timestamp(u64::MAX) }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.begin <= ts && ts <= self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.begin.0, self.end.0)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Typed payload field of an [`Event`]
///
/// Traces carry either integer fields (tids, priorities, byte counts) or
/// string fields (command names, labels). Analyzers ask for the type they
/// need via [`FieldValue::as_int`] / [`FieldValue::as_str`] and treat a
/// type mismatch as "field absent".
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Int(_) => None,
            FieldValue::Str(s) => Some(s.as_str()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

/// A single timestamped observation
///
/// The unit every analyzer consumes. An event belongs to a lane, not a
/// thread; which thread it describes is recovered either from its own
/// fields (`prev_tid`, `tid`, ...) or from the per-lane running-thread
/// table the matching engine maintains.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    pub timestamp: Timestamp,
    pub lane: LaneId,
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub fields: HashMap<String, FieldValue>,
}

impl Event {
    pub fn new(timestamp: Timestamp, lane: LaneId, name: impl Into<String>) -> Self {
        Self { timestamp, lane, name: name.into(), fields: HashMap::new() }
    }

    /// Builder-style field attachment, mostly for tests and replay tools.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Integer view of a field. `None` if absent or a string.
    pub fn int_field(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(FieldValue::as_int)
    }

    /// String view of a field. `None` if absent or an integer.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_str)
    }

    /// Thread id carried by an integer field, if in `u32` range.
    pub fn tid_field(&self, name: &str) -> Option<Tid> {
        let raw = self.int_field(name)?;
        u32::try_from(raw).ok().map(Tid)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} on {}", self.name, self.timestamp.0, self.lane)
    }
}
