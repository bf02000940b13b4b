//! # Event Sources
//!
//! An [`EventSource`] hands analyzers a timestamp-ordered stream of events
//! for any requested time range. The engines never hold the whole trace
//! themselves; they pull one event at a time, which keeps a detection pass
//! at O(events) and lets the same engine run over a loaded file today and
//! a live session buffer later.
//!
//! [`RecordedTrace`] is the in-memory implementation every loader produces.

pub mod json_trace;

pub use json_trace::load_chrome_trace;

use carve_common::{Event, TimeRange};

/// Ordered event supplier for a recorded or buffered trace.
pub trait EventSource {
    /// Events with timestamps inside `range` (inclusive), in non-decreasing
    /// timestamp order. Events sharing a timestamp keep arrival order.
    fn iter_range(&self, range: TimeRange) -> Box<dyn Iterator<Item = Event> + '_>;

    /// Full extent of the recorded data, if any events exist.
    fn span(&self) -> Option<TimeRange>;
}

/// A fully loaded trace, sorted once at construction.
#[derive(Debug, Clone, Default)]
pub struct RecordedTrace {
    events: Vec<Event>,
}

impl RecordedTrace {
    /// Build from events in any order. Sorting is stable, so events with
    /// equal timestamps keep the order the producer emitted them in.
    pub fn from_events(mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl EventSource for RecordedTrace {
    fn iter_range(&self, range: TimeRange) -> Box<dyn Iterator<Item = Event> + '_> {
        let lo = self.events.partition_point(|e| e.timestamp < range.begin);
        let hi = self.events.partition_point(|e| e.timestamp <= range.end);
        Box::new(self.events[lo..hi].iter().cloned())
    }

    fn span(&self) -> Option<TimeRange> {
        let first = self.events.first()?;
        let last = self.events.last()?;
        Some(TimeRange::new(first.timestamp, last.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_common::{LaneId, Timestamp};

    fn ev(ts: u64, name: &str) -> Event {
        Event::new(Timestamp(ts), LaneId(0), name)
    }

    #[test]
    fn test_events_sorted_at_construction() {
        let trace = RecordedTrace::from_events(vec![ev(30, "c"), ev(10, "a"), ev(20, "b")]);
        let names: Vec<&str> = trace.events().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let trace = RecordedTrace::from_events(vec![ev(10, "first"), ev(10, "second")]);
        let names: Vec<&str> = trace.events().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn test_iter_range_is_inclusive() {
        let trace = RecordedTrace::from_events(vec![ev(10, "a"), ev(20, "b"), ev(30, "c")]);
        let got: Vec<String> = trace
            .iter_range(TimeRange::new(Timestamp(10), Timestamp(20)))
            .map(|e| e.name)
            .collect();
        assert_eq!(got, ["a", "b"]);
    }

    #[test]
    fn test_span() {
        let trace = RecordedTrace::from_events(vec![ev(20, "b"), ev(10, "a")]);
        assert_eq!(trace.span(), Some(TimeRange::new(Timestamp(10), Timestamp(20))));
        assert_eq!(RecordedTrace::default().span(), None);
    }
}
