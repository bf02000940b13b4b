//! # Carve - Execution Pattern Detection for Tracer Logs
//!
//! Carve scans recorded tracer event streams (scheduler switches, wakeups,
//! IRQ handlers, custom tracepoints) and carves out *executions*: spans of
//! interest delimited by configurable boundary events. A pattern
//! specification describes the boundaries once; the engine then finds
//! every occurrence, nests sub-executions under their parents, accounts
//! running versus preempted time, and enforces filters on what a valid
//! occurrence may contain.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Recorded Trace (trace.json)                  │
//! │                 Chrome Trace Event Format, one                  │
//! │                 timestamped event per tracepoint                │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ source::load_chrome_trace
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Carve (This Crate)                         │
//! │                                                                 │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐      │
//! │  │   Pattern    │───▶│   Matching   │───▶│    Export    │      │
//! │  │ (spec +      │    │   Engine     │    │ (trace.json) │      │
//! │  │  filters)    │    │ (exec trees) │    └──────────────┘      │
//! │  └──────────────┘    └──────────────┘                          │
//! │         ▲                    │                                  │
//! │         │                    ▼                                  │
//! │  ┌──────────────┐    ┌──────────────┐                          │
//! │  │  Inference   │    │    Mining    │                          │
//! │  │ (suggest     │    │ (episode     │                          │
//! │  │  filters)    │    │  discovery)  │                          │
//! │  └──────────────┘    └──────────────┘                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`source`]: Trace loading and the [`source::EventSource`] seam
//!   - `json_trace`: Chrome Trace Event JSON parsing (lenient; skips
//!     rows it cannot use)
//!
//! - [`pattern`]: Pattern specifications
//!   - Matching rules per nesting depth, field predicates, tid bindings
//!   - Thread scopes: fixed tid lists or comm-prefix grown sets
//!
//! - [`matching`]: The detection engine
//!   - Streaming single pass, per-lane running-thread attribution
//!   - Three matching modes per depth (all-in-one, continuous, disjoint)
//!   - Produces an [`matching::ExecutionTree`] plus pass counters
//!
//! - [`filters`]: Occurrence filters (event counts, field values, start
//!   times) shared by the engine and the inference layer
//!
//! - [`inference`]: Differential filter suggestion from valid/invalid
//!   example spans
//!
//! - [`mining`]: Frequent-episode discovery over one thread's history
//!
//! - [`export`]: Chrome Trace Event JSON out of execution trees, for
//!   chrome://tracing or Perfetto
//!
//! - [`worker`]: Background job plumbing with cooperative cancellation
//!
//! - [`cli`]: Command-line argument parsing
//!
//! - [`domain`]: Error types and the [`domain::Outcome`] wrapper
//!
//! ## Typical Usage
//!
//! ```bash
//! # Carve executions matching a pattern out of a recorded trace
//! carve detect --trace run.json --pattern span.json --export spans.json
//!
//! # Let the tool propose filters from examples you point at
//! carve suggest --trace run.json --valid 100:900 --invalid 3100:4000
//!
//! # Discover what a thread keeps doing
//! carve mine --trace run.json --tid 1042 --top 5
//! ```

// Expose modules for testing
pub mod cli;
pub mod domain;
pub mod export;
pub mod filters;
pub mod inference;
pub mod matching;
pub mod mining;
pub mod pattern;
pub mod source;
pub mod worker;
