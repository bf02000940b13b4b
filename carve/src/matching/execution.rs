//! Execution spans and the tree a detection pass produces.

use carve_common::{Duration, Tid, TimeRange, Timestamp};
use serde::Serialize;

/// Name used when the end of the stream seals an execution.
pub const END_OF_STREAM: &str = "end_of_stream";

/// One span of interest carved out of the stream.
///
/// `end_time` is `None` while the span is still open inside the engine;
/// trees handed back to callers contain only sealed executions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub start_tid: Tid,
    pub end_tid: Tid,
    /// Name of the event that opened the span.
    pub start_label: String,
    /// Name of the event that sealed it, or [`END_OF_STREAM`].
    pub end_label: String,
    /// Time the owning thread spent on a lane within the span.
    pub running_time: Duration,
    /// Time the owning thread spent off-lane within the span.
    pub preempted_time: Duration,
    pub children: Vec<Execution>,
}

impl Execution {
    pub(crate) fn open(start_time: Timestamp, tid: Tid, label: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time: None,
            start_tid: tid,
            end_tid: tid,
            start_label: label.into(),
            end_label: String::new(),
            running_time: Duration(0),
            preempted_time: Duration(0),
            children: Vec::new(),
        }
    }

    pub(crate) fn seal(&mut self, end_time: Timestamp, end_tid: Tid, end_label: impl Into<String>) {
        debug_assert!(self.end_time.is_none(), "execution sealed twice");
        debug_assert!(end_time >= self.start_time, "seal before open");
        self.end_time = Some(end_time);
        self.end_tid = end_tid;
        self.end_label = end_label.into();
    }

    pub fn is_sealed(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end.since(self.start_time))
    }

    /// Span of the execution, once sealed.
    pub fn range(&self) -> Option<TimeRange> {
        self.end_time.map(|end| TimeRange::new(self.start_time, end))
    }

    /// This execution plus all descendants, sealed only.
    pub fn sealed_count(&self) -> usize {
        let own = usize::from(self.is_sealed());
        own + self.children.iter().map(Execution::sealed_count).sum::<usize>()
    }
}

/// All sealed executions of one pass under a synthetic root.
///
/// The root spans the analyzed range and carries no thread identity of
/// its own; depth-0 executions are its direct children, in seal order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionTree {
    pub root: Execution,
}

impl ExecutionTree {
    /// Sealed executions in the tree, the synthetic root excluded.
    pub fn sealed_count(&self) -> usize {
        self.root.children.iter().map(Execution::sealed_count).sum()
    }

    /// Depth-0 executions in seal order.
    pub fn top_level(&self) -> &[Execution] {
        &self.root.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_then_seal() {
        let mut exec = Execution::open(Timestamp(10), Tid(7), "sched_wakeup");
        assert!(!exec.is_sealed());
        assert_eq!(exec.duration(), None);

        exec.seal(Timestamp(50), Tid(7), "sched_switch");
        assert!(exec.is_sealed());
        assert_eq!(exec.duration(), Some(Duration(40)));
        assert_eq!(exec.range(), Some(TimeRange::new(Timestamp(10), Timestamp(50))));
        assert_eq!(exec.end_label, "sched_switch");
    }

    #[test]
    fn test_sealed_count_skips_root_and_open() {
        let mut child = Execution::open(Timestamp(12), Tid(7), "a");
        child.seal(Timestamp(20), Tid(7), "b");
        let mut top = Execution::open(Timestamp(10), Tid(7), "a");
        top.children.push(child);
        top.seal(Timestamp(50), Tid(7), "b");

        let mut root = Execution::open(Timestamp(0), Tid(0), "trace");
        root.children.push(top);
        root.seal(Timestamp(100), Tid(0), END_OF_STREAM);

        let tree = ExecutionTree { root };
        assert_eq!(tree.sealed_count(), 2);
        assert_eq!(tree.top_level().len(), 1);
    }
}
