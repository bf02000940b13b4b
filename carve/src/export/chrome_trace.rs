use carve_common::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;

use crate::domain::ExportError;
use crate::matching::{Execution, ExecutionTree};

/// All rows share one synthetic process; lanes live in `args`.
const EXPORT_PID: u32 = 1;

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChromeTraceEvent {
    /// Event name (the label of the opening boundary event)
    name: String,
    /// Category for filtering/coloring
    cat: String,
    /// Phase: "B" = begin, "E" = end, "M" = metadata
    ph: String,
    /// Timestamp in microseconds
    ts: f64,
    /// Process ID
    pid: u32,
    /// Thread ID
    tid: u32,
    /// Optional arguments (metadata)
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// Renders execution trees as nested begin/end pairs on the timeline of
/// the thread that opened each span.
pub struct ExecutionTraceExporter {
    events: Vec<ChromeTraceEvent>,
    /// Start timestamp for relative timing (in nanoseconds)
    start_timestamp: Option<Timestamp>,
}

impl Default for ExecutionTraceExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTraceExporter {
    pub fn new() -> Self {
        Self { events: Vec::new(), start_timestamp: None }
    }

    /// Add every sealed execution of a tree. The synthetic root is not
    /// rendered; its span only anchors relative timestamps.
    pub fn add_tree(&mut self, tree: &ExecutionTree) {
        if self.start_timestamp.is_none() {
            self.start_timestamp = Some(tree.root.start_time);
        }
        for execution in tree.top_level() {
            self.add_execution(execution, 0);
        }
    }

    fn add_execution(&mut self, execution: &Execution, depth: usize) {
        // Trees handed back by the engine hold sealed executions only.
        let Some(end_time) = execution.end_time else { return };

        let tid = execution.start_tid.0;
        let mut args = HashMap::new();
        args.insert("depth".to_string(), serde_json::json!(depth));
        args.insert("start_tid".to_string(), serde_json::json!(execution.start_tid.0));
        args.insert("end_tid".to_string(), serde_json::json!(execution.end_tid.0));
        args.insert("end_label".to_string(), serde_json::json!(execution.end_label));
        args.insert("running_ns".to_string(), serde_json::json!(execution.running_time.0));
        args.insert("preempted_ns".to_string(), serde_json::json!(execution.preempted_time.0));

        self.events.push(ChromeTraceEvent {
            name: execution.start_label.clone(),
            cat: "execution".to_string(),
            ph: "B".to_string(),
            ts: self.relative_us(execution.start_time),
            pid: EXPORT_PID,
            tid,
            args: Some(args),
        });

        for child in &execution.children {
            self.add_execution(child, depth + 1);
        }

        // The viewer pairs this with the Begin above by per-thread nesting.
        self.events.push(ChromeTraceEvent {
            name: execution.start_label.clone(),
            cat: "execution".to_string(),
            ph: "E".to_string(),
            ts: self.relative_us(end_time),
            pid: EXPORT_PID,
            tid,
            args: None,
        });
    }

    #[allow(clippy::cast_precision_loss)]
    fn relative_us(&self, timestamp: Timestamp) -> f64 {
        let base = self.start_timestamp.unwrap_or(Timestamp(0));
        if timestamp.0 >= base.0 {
            (timestamp.0 - base.0) as f64 / 1000.0
        } else {
            0.0
        }
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.).
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let mut all_events = self.events.clone();

        // Name each thread row after its tid so the viewer shows more
        // than bare numbers.
        let tids: BTreeSet<u32> = self.events.iter().map(|e| e.tid).collect();
        for tid in tids {
            let mut args = HashMap::new();
            args.insert("name".to_string(), serde_json::json!(format!("TID {tid}")));
            all_events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M".to_string(),
                ts: 0.0,
                pid: EXPORT_PID,
                tid,
                args: Some(args),
            });
        }

        let trace =
            ChromeTrace { trace_events: all_events, display_time_unit: "ms".to_string() };
        serde_json::to_writer_pretty(writer, &trace)?;
        Ok(())
    }

    /// Get the number of events collected
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
