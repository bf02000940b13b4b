//! # Boundary Matching Engine
//!
//! Streams events through per-depth state machines and carves the stream
//! into a tree of executions:
//!
//! ```text
//!            ┌──────────────┐   sched_switch    ┌───────────────────┐
//!  events ──▶│  lane table  │──────────────────▶│ running-thread map │
//!            └──────┬───────┘                   └───────────────────┘
//!                   │ attribute / broadcast
//!                   ▼
//!            ┌──────────────┐  depth 0 seals   ┌───────────────────┐
//!            │ chains (tid) │─────────────────▶│  synthetic root    │
//!            │ depth 0→1→…  │                  │  ExecutionTree     │
//!            └──────────────┘                  └───────────────────┘
//! ```
//!
//! One pass is a single forward sweep: O(events) with no lookahead. The
//! pass owns all mutable state, so cancelling a run drops its partial
//! tree without touching the engine, and two passes over the same input
//! produce identical trees.

mod execution;
mod pass;
mod scope;

pub use execution::{Execution, ExecutionTree, END_OF_STREAM};
pub use pass::PassStats;
pub use scope::TidScope;

use carve_common::{Tid, TimeRange};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::domain::{Outcome, SpecError};
use crate::pattern::{parse_tid_list, PatternSpecification, ScopeSpec};
use crate::source::EventSource;

use pass::{DetectionPass, ScopeSetup};

/// Tree plus the pass counters that produced it.
#[derive(Debug)]
pub struct DetectionResult {
    pub tree: ExecutionTree,
    pub stats: PassStats,
}

/// A validated pattern bound to a resolved thread scope. Construction
/// applies the degradation policy; [`MatchingEngine::detect`] then runs
/// any number of passes.
pub struct MatchingEngine {
    spec: PatternSpecification,
    setup: ScopeSetup,
}

impl MatchingEngine {
    /// Validate `spec` and resolve its thread scope.
    ///
    /// Setup degrades rather than aborts where it can: an empty
    /// specification becomes whole-thread tracking of `focus`, and an
    /// empty or unparsable tid list falls back to `focus` alone. Without
    /// a focus thread those cases are [`SpecError::NoFallbackTid`].
    pub fn new(spec: PatternSpecification, focus: Option<Tid>) -> Result<Self, SpecError> {
        let spec = match spec.validate() {
            Ok(()) => spec,
            Err(SpecError::EmptySpecification) => {
                let Some(tid) = focus else {
                    return Err(SpecError::NoFallbackTid);
                };
                warn!("empty pattern specification; tracking the whole of {tid} instead");
                PatternSpecification::whole_thread(tid)
            }
            Err(other) => return Err(other),
        };

        let setup = match &spec.thread_scope {
            ScopeSpec::SameTid { tids } => {
                let mut configured = match parse_tid_list(tids) {
                    Ok(list) => list,
                    Err(err) => {
                        let Some(tid) = focus else {
                            return Err(SpecError::NoFallbackTid);
                        };
                        warn!("{err}; falling back to current thread {tid}");
                        vec![tid]
                    }
                };
                if configured.is_empty() {
                    let Some(tid) = focus else {
                        return Err(SpecError::NoFallbackTid);
                    };
                    warn!("thread scope lists no tids; falling back to current thread {tid}");
                    configured = vec![tid];
                }
                ScopeSetup::PerThread(configured)
            }
            ScopeSpec::DifferentTids { start_comm, end_comm } => {
                ScopeSetup::Global { start_comm: start_comm.clone(), end_comm: end_comm.clone() }
            }
        };

        Ok(Self { spec, setup })
    }

    pub fn spec(&self) -> &PatternSpecification {
        &self.spec
    }

    /// Run one detection pass over `range`.
    ///
    /// The token is polled once per event; a cancelled pass returns
    /// [`Outcome::Cancelled`] and its partial tree is dropped.
    pub fn detect(
        &self,
        source: &dyn EventSource,
        range: TimeRange,
        token: &CancellationToken,
    ) -> Outcome<DetectionResult> {
        let mut pass = DetectionPass::new(&self.spec, &self.setup, range);
        for event in source.iter_range(range) {
            if token.is_cancelled() {
                debug!("detection cancelled after {} events", pass.stats.events);
                return Outcome::Cancelled;
            }
            pass.process_event(&event);
        }
        let (tree, stats) = pass.finish();
        Outcome::Complete(DetectionResult { tree, stats })
    }
}
