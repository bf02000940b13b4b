//! # Pattern Specifications
//!
//! A [`PatternSpecification`] declares what the matching engine looks for:
//! an ordered list of depths, each with boundary rules and a matching
//! mode, plus a thread scope that says which threads may carry the
//! boundaries. Specifications are plain data, loaded from JSON:
//!
//! ```json
//! {
//!   "thread_scope": { "mode": "same_tid", "tids": "7" },
//!   "depths": [{
//!     "mode": "disjoint",
//!     "rules": [
//!       { "names": ["sched_wakeup"], "predicates": [{ "type": "tid_binding", "field": "tid" }] },
//!       { "names": ["sched_switch"], "predicates": [{ "type": "tid_binding", "field": "prev_tid" }] }
//!     ],
//!     "filters": [
//!       { "kind": "less_than", "target": { "names": ["sched_wakeup"] }, "threshold": 6 }
//!     ]
//!   }]
//! }
//! ```
//!
//! Depth `d + 1` only matches inside an open depth-`d` execution, which is
//! what turns a flat event stream into a tree.

use std::path::Path;

use carve_common::{Event, FieldValue, Tid};
use serde::{Deserialize, Serialize};

use crate::domain::SpecError;
use crate::filters::Filter;

/// How one depth opens and seals executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMode {
    /// First qualifying event opens; sealed only at the end of the pass.
    AllInOne,
    /// A single rule both seals the open execution and opens the next one
    /// at the same timestamp, tiling the stream.
    Continuous,
    /// Rules must match strictly in order; filters can reject early.
    Disjoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
}

/// Per-field condition on a candidate boundary event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldPredicate {
    /// Compare a field against a constant, optionally masking integer
    /// fields first.
    Value {
        field: String,
        op: CompareOp,
        value: FieldValue,
        #[serde(default)]
        mask: Option<i64>,
    },
    /// The field must equal a thread id the scope considers a candidate.
    /// Which id gets bound is resolved by the engine at match time.
    TidBinding { field: String },
}

impl FieldPredicate {
    pub fn is_binding(&self) -> bool {
        matches!(self, FieldPredicate::TidBinding { .. })
    }

    /// Evaluate a value predicate against an event. Binding predicates are
    /// resolved by the engine and never match here. A missing field or a
    /// type mismatch is a non-match regardless of the operator.
    pub fn matches_plain(&self, event: &Event) -> bool {
        match self {
            FieldPredicate::Value { field, op, value, mask } => {
                let Some(actual) = event.fields.get(field) else {
                    return false;
                };
                let equal = match (actual, value) {
                    (FieldValue::Int(have), FieldValue::Int(want)) => {
                        let have = mask.map_or(*have, |m| *have & m);
                        have == *want
                    }
                    (FieldValue::Str(have), FieldValue::Str(want)) => have == want,
                    _ => return false,
                };
                match op {
                    CompareOp::Eq => equal,
                    CompareOp::Ne => !equal,
                }
            }
            FieldPredicate::TidBinding { .. } => false,
        }
    }
}

/// One boundary rule: a name alternative plus predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingEvent {
    /// Accepted event names, OR-combined. Empty matches every name.
    pub names: Vec<String>,
    #[serde(default)]
    pub predicates: Vec<FieldPredicate>,
}

impl MatchingEvent {
    pub fn matches_name(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == name)
    }

    pub fn has_tid_binding(&self) -> bool {
        self.predicates.iter().any(FieldPredicate::is_binding)
    }

    /// Fields named by tid-binding predicates.
    pub fn binding_fields(&self) -> impl Iterator<Item = &str> {
        self.predicates.iter().filter_map(|p| match p {
            FieldPredicate::TidBinding { field } => Some(field.as_str()),
            FieldPredicate::Value { .. } => None,
        })
    }

    /// Name and value-predicate check. Binding predicates are excluded;
    /// the engine resolves those against scope candidates.
    pub fn plain_match(&self, event: &Event) -> bool {
        self.matches_name(&event.name)
            && self
                .predicates
                .iter()
                .filter(|p| !p.is_binding())
                .all(|p| p.matches_plain(event))
    }
}

/// One nesting level of the pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSpec {
    pub mode: MatchingMode,
    pub rules: Vec<MatchingEvent>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// Which threads may carry execution boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScopeSpec {
    /// Start and end must land on the same thread; the engine keeps one
    /// machine chain per listed tid.
    SameTid {
        /// Comma-separated thread ids, e.g. `"7,9"`. Empty or unparsable
        /// falls back to the focus thread.
        #[serde(default)]
        tids: String,
    },
    /// Start and end may land on different threads. The candidate sets
    /// grow during the pass from threads whose comm matches a prefix.
    DifferentTids {
        #[serde(default)]
        start_comm: Vec<String>,
        #[serde(default)]
        end_comm: Vec<String>,
    },
}

/// Parse a comma-separated tid list. Empty input is an empty list, not an
/// error; the caller decides whether a fallback applies.
pub fn parse_tid_list(raw: &str) -> Result<Vec<Tid>, SpecError> {
    let mut tids = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let value: u32 = part.parse().map_err(|e: std::num::ParseIntError| {
            SpecError::InvalidTidList { list: raw.to_string(), reason: e.to_string() }
        })?;
        tids.push(Tid(value));
    }
    tids.sort_unstable();
    tids.dedup();
    Ok(tids)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpecification {
    pub depths: Vec<DepthSpec>,
    pub thread_scope: ScopeSpec,
}

impl PatternSpecification {
    pub fn from_json_str(json: &str) -> Result<Self, SpecError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.depths.is_empty() {
            return Err(SpecError::EmptySpecification);
        }
        for (depth, spec) in self.depths.iter().enumerate() {
            if spec.rules.is_empty() {
                return Err(SpecError::DepthWithoutRules(depth));
            }
        }
        Ok(())
    }

    /// Degraded specification used when the configured one is unusable:
    /// a single always-open execution covering the focus thread's span.
    pub fn whole_thread(tid: Tid) -> Self {
        Self {
            depths: vec![DepthSpec {
                mode: MatchingMode::AllInOne,
                rules: vec![MatchingEvent { names: vec![], predicates: vec![] }],
                filters: vec![],
            }],
            thread_scope: ScopeSpec::SameTid { tids: tid.0.to_string() },
        }
    }
}
