//! Trace export functionality
//!
//! Exports detection results to the Chrome Trace Event Format so execution
//! trees can be inspected on a timeline in chrome://tracing or Perfetto.

pub mod chrome_trace;

pub use chrome_trace::ExecutionTraceExporter;
