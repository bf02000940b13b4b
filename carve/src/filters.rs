//! Execution filters
//!
//! A [`Filter`] accepts or rejects a whole execution. Count filters bound
//! how often a target event occurs inside the execution's span, value
//! filters bound an integer field of every target occurrence, and
//! start-time filters gate when an execution may open at all.
//!
//! Filters appear in two places: attached to a pattern depth, where the
//! matching engine enforces them while executions are open, and as the
//! output of filter inference, which proposes them from labeled examples.

use std::fmt;

use carve_common::{Event, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Count or field value must exceed the threshold.
    MoreThan,
    /// Count or field value must stay under the threshold.
    LessThan,
    /// Execution may only open at or after the threshold timestamp.
    MinStartTime,
    /// Execution may only open at or before the threshold timestamp.
    MaxStartTime,
}

/// Which events a count or value filter applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterTarget {
    /// Event names, OR-combined. Empty matches every name.
    pub names: Vec<String>,
    /// Field inspected by value filters. `None` makes this a count filter.
    #[serde(default)]
    pub field: Option<String>,
}

impl FilterTarget {
    pub fn matches(&self, event: &Event) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == &event.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub kind: FilterKind,
    /// Absent for start-time filters; a missing target on a count filter
    /// counts every event.
    #[serde(default)]
    pub target: Option<FilterTarget>,
    pub threshold: i64,
}

impl Filter {
    pub fn count_more_than(names: Vec<String>, threshold: i64) -> Self {
        Self {
            kind: FilterKind::MoreThan,
            target: Some(FilterTarget { names, field: None }),
            threshold,
        }
    }

    pub fn count_less_than(names: Vec<String>, threshold: i64) -> Self {
        Self {
            kind: FilterKind::LessThan,
            target: Some(FilterTarget { names, field: None }),
            threshold,
        }
    }

    pub fn value_more_than(names: Vec<String>, field: impl Into<String>, threshold: i64) -> Self {
        Self {
            kind: FilterKind::MoreThan,
            target: Some(FilterTarget { names, field: Some(field.into()) }),
            threshold,
        }
    }

    pub fn value_less_than(names: Vec<String>, field: impl Into<String>, threshold: i64) -> Self {
        Self {
            kind: FilterKind::LessThan,
            target: Some(FilterTarget { names, field: Some(field.into()) }),
            threshold,
        }
    }

    pub fn min_start_time(ts: Timestamp) -> Self {
        Self {
            kind: FilterKind::MinStartTime,
            target: None,
            threshold: i64::try_from(ts.0).unwrap_or(i64::MAX),
        }
    }

    pub fn max_start_time(ts: Timestamp) -> Self {
        Self {
            kind: FilterKind::MaxStartTime,
            target: None,
            threshold: i64::try_from(ts.0).unwrap_or(i64::MAX),
        }
    }

    fn field(&self) -> Option<&str> {
        self.target.as_ref().and_then(|t| t.field.as_deref())
    }

    fn target_matches(&self, event: &Event) -> bool {
        self.target.as_ref().map_or(true, |t| t.matches(event))
    }

    pub fn is_start_time(&self) -> bool {
        matches!(self.kind, FilterKind::MinStartTime | FilterKind::MaxStartTime)
    }

    pub fn is_count(&self) -> bool {
        !self.is_start_time() && self.field().is_none()
    }

    pub fn is_value(&self) -> bool {
        !self.is_start_time() && self.field().is_some()
    }

    /// Start-time gate. Count and value filters never block an open.
    pub fn admits_start(&self, start: Timestamp) -> bool {
        let ts = i64::try_from(start.0).unwrap_or(i64::MAX);
        match self.kind {
            FilterKind::MinStartTime => ts >= self.threshold,
            FilterKind::MaxStartTime => ts <= self.threshold,
            FilterKind::MoreThan | FilterKind::LessThan => true,
        }
    }

    /// Whether a count filter's occurrence counter advances on `event`.
    pub fn counts_event(&self, event: &Event) -> bool {
        self.is_count() && self.target_matches(event)
    }

    /// Whether `event` breaks a value filter. Occurrences missing the
    /// field (or carrying a string) are treated as absent, not violating.
    pub fn value_violation(&self, event: &Event) -> bool {
        if !self.is_value() || !self.target_matches(event) {
            return false;
        }
        let Some(field) = self.field() else { return false };
        let Some(value) = event.int_field(field) else { return false };
        match self.kind {
            FilterKind::MoreThan => value <= self.threshold,
            FilterKind::LessThan => value >= self.threshold,
            FilterKind::MinStartTime | FilterKind::MaxStartTime => false,
        }
    }

    /// Final verdict for a count filter once the execution seals.
    pub fn count_satisfied(&self, count: u64) -> bool {
        if !self.is_count() {
            return true;
        }
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        match self.kind {
            FilterKind::MoreThan => count > self.threshold,
            FilterKind::LessThan => count < self.threshold,
            FilterKind::MinStartTime | FilterKind::MaxStartTime => true,
        }
    }

    /// A `LessThan` count that already reached its threshold can never
    /// recover; the engine rejects the execution without waiting for the
    /// end boundary.
    pub fn count_unsatisfiable(&self, count: u64) -> bool {
        self.is_count()
            && self.kind == FilterKind::LessThan
            && i64::try_from(count).unwrap_or(i64::MAX) >= self.threshold
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.target.as_ref().map_or_else(
            || "*".to_string(),
            |t| {
                if t.names.is_empty() {
                    "*".to_string()
                } else {
                    t.names.join("|")
                }
            },
        );
        match (self.kind, self.field()) {
            (FilterKind::MoreThan, None) => write!(f, "count({names}) > {}", self.threshold),
            (FilterKind::LessThan, None) => write!(f, "count({names}) < {}", self.threshold),
            (FilterKind::MoreThan, Some(field)) => {
                write!(f, "{names}.{field} > {}", self.threshold)
            }
            (FilterKind::LessThan, Some(field)) => {
                write!(f, "{names}.{field} < {}", self.threshold)
            }
            (FilterKind::MinStartTime, _) => write!(f, "start >= {}ns", self.threshold),
            (FilterKind::MaxStartTime, _) => write!(f, "start <= {}ns", self.threshold),
        }
    }
}
