//! # Filter Inference
//!
//! Differential comparison of labeled execution examples. Given spans the
//! analyst accepted as valid and one span flagged invalid, profile each
//! span (event-name counts, integer-field ranges, start time) and emit
//! candidate [`Filter`]s that separate the invalid span from every valid
//! one.
//!
//! Each separating difference is bracketed by two thresholds: a tight one
//! hugging the valid envelope and a loose one hugging the invalid value.
//! Both are sound for the given examples; the analyst picks how much
//! slack future executions get. Candidates are ranked count differences
//! first, then value ranges, then start times.

use std::collections::{BTreeMap, BTreeSet};

use carve_common::{TimeRange, Timestamp};
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::domain::Outcome;
use crate::filters::Filter;
use crate::source::EventSource;

/// What one example span looks like, reduced to the features the
/// comparison understands.
#[derive(Debug, Default)]
struct ExampleProfile {
    start: Timestamp,
    counts: BTreeMap<String, u64>,
    /// (event name, field) → (min, max) over integer occurrences.
    values: BTreeMap<(String, String), (i64, i64)>,
}

fn profile(
    source: &dyn EventSource,
    range: TimeRange,
    token: &CancellationToken,
) -> Option<ExampleProfile> {
    let mut profile = ExampleProfile { start: range.begin, ..ExampleProfile::default() };
    for event in source.iter_range(range) {
        if token.is_cancelled() {
            return None;
        }
        *profile.counts.entry(event.name.clone()).or_insert(0) += 1;
        for (field, value) in &event.fields {
            let Some(value) = value.as_int() else { continue };
            profile
                .values
                .entry((event.name.clone(), field.clone()))
                .and_modify(|(lo, hi)| {
                    *lo = (*lo).min(value);
                    *hi = (*hi).max(value);
                })
                .or_insert((value, value));
        }
    }
    Some(profile)
}

/// Compare valid example spans against one invalid span and propose
/// filters that accept every valid span while rejecting the invalid one.
///
/// With no valid examples there is nothing to bracket and the result is
/// empty. The token is polled once per scanned event.
pub fn infer_filters(
    source: &dyn EventSource,
    valid: &[TimeRange],
    invalid: TimeRange,
    token: &CancellationToken,
) -> Outcome<Vec<Filter>> {
    let mut valid_profiles = Vec::with_capacity(valid.len());
    for range in valid {
        match profile(source, *range, token) {
            Some(p) => valid_profiles.push(p),
            None => return Outcome::Cancelled,
        }
    }
    let Some(invalid_profile) = profile(source, invalid, token) else {
        return Outcome::Cancelled;
    };
    if valid_profiles.is_empty() {
        return Outcome::Complete(vec![]);
    }

    let mut filters = Vec::new();

    // Count differences. The name universe is every name any example saw;
    // absence counts as zero occurrences.
    let names: BTreeSet<&String> = valid_profiles
        .iter()
        .flat_map(|p| p.counts.keys())
        .chain(invalid_profile.counts.keys())
        .collect();
    for name in names {
        let count_of = |p: &ExampleProfile| p.counts.get(name).copied().unwrap_or(0) as i64;
        let invalid_count = count_of(&invalid_profile);
        let valid_max = valid_profiles.iter().map(&count_of).max().unwrap_or(0);
        let valid_min = valid_profiles.iter().map(&count_of).min().unwrap_or(0);

        if invalid_count > valid_max {
            filters.push(Filter::count_less_than(vec![name.clone()], valid_max + 1));
            if invalid_count > valid_max + 1 {
                filters.push(Filter::count_less_than(vec![name.clone()], invalid_count));
            }
        } else if invalid_count < valid_min {
            filters.push(Filter::count_more_than(vec![name.clone()], valid_min - 1));
            if invalid_count < valid_min - 1 {
                filters.push(Filter::count_more_than(vec![name.clone()], invalid_count));
            }
        }
    }

    // Value-range differences, only where a valid example observed the
    // field. A field the invalid span never carries offers no evidence.
    let keys: BTreeSet<&(String, String)> =
        valid_profiles.iter().flat_map(|p| p.values.keys()).collect();
    for key in keys {
        let Some(&(invalid_min, invalid_max)) = invalid_profile.values.get(key) else {
            continue;
        };
        let mut valid_min = i64::MAX;
        let mut valid_max = i64::MIN;
        for p in &valid_profiles {
            if let Some(&(lo, hi)) = p.values.get(key) {
                valid_min = valid_min.min(lo);
                valid_max = valid_max.max(hi);
            }
        }
        let (name, field) = key;
        if invalid_max > valid_max {
            filters.push(Filter::value_less_than(vec![name.clone()], field, valid_max + 1));
            if invalid_max > valid_max + 1 {
                filters.push(Filter::value_less_than(vec![name.clone()], field, invalid_max));
            }
        }
        if invalid_min < valid_min {
            filters.push(Filter::value_more_than(vec![name.clone()], field, valid_min - 1));
            if invalid_min < valid_min - 1 {
                filters.push(Filter::value_more_than(vec![name.clone()], field, invalid_min));
            }
        }
    }

    // Start-time brackets.
    let invalid_start = invalid_profile.start;
    let starts = || valid_profiles.iter().map(|p| p.start);
    if let (Some(min_start), Some(max_start)) = (starts().min(), starts().max()) {
        if invalid_start > max_start {
            filters.push(Filter::max_start_time(max_start));
            if invalid_start.0 > max_start.0 + 1 {
                filters.push(Filter::max_start_time(Timestamp(invalid_start.0 - 1)));
            }
        } else if invalid_start < min_start {
            filters.push(Filter::min_start_time(min_start));
            if invalid_start.0 + 1 < min_start.0 {
                filters.push(Filter::min_start_time(Timestamp(invalid_start.0 + 1)));
            }
        }
    }

    debug!(
        "inferred {} candidate filters from {} valid examples",
        filters.len(),
        valid_profiles.len()
    );
    Outcome::Complete(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterKind;
    use crate::source::RecordedTrace;
    use carve_common::{Event, LaneId};

    fn ev(ts: u64, name: &str) -> Event {
        Event::new(Timestamp(ts), LaneId(0), name)
    }

    #[test]
    fn test_count_difference_brackets() {
        // Valid spans see X twice, the invalid span sees it five times.
        let mut events = vec![ev(10, "X"), ev(20, "X")];
        events.extend([ev(110, "X"), ev(120, "X")]);
        events.extend((0..5).map(|i| ev(210 + i, "X")));
        let trace = RecordedTrace::from_events(events);

        let valid = [
            TimeRange::new(Timestamp(0), Timestamp(99)),
            TimeRange::new(Timestamp(100), Timestamp(199)),
        ];
        let invalid = TimeRange::new(Timestamp(200), Timestamp(299));

        let token = CancellationToken::new();
        let filters = infer_filters(&trace, &valid, invalid, &token).into_complete().unwrap();

        // Tight bracket first, loose second.
        assert_eq!(filters[0], Filter::count_less_than(vec!["X".to_string()], 3));
        assert_eq!(filters[1], Filter::count_less_than(vec!["X".to_string()], 5));
    }

    #[test]
    fn test_missing_events_suggest_more_than() {
        let events = vec![ev(10, "io_done"), ev(20, "io_done")];
        let trace = RecordedTrace::from_events(events);

        let valid = [TimeRange::new(Timestamp(0), Timestamp(99))];
        let invalid = TimeRange::new(Timestamp(100), Timestamp(199));

        let token = CancellationToken::new();
        let filters = infer_filters(&trace, &valid, invalid, &token).into_complete().unwrap();
        assert_eq!(filters[0], Filter::count_more_than(vec!["io_done".to_string()], 1));
        assert_eq!(filters[1], Filter::count_more_than(vec!["io_done".to_string()], 0));

        // Re-applied, both brackets keep the valid example and drop the
        // invalid one.
        for filter in filters.iter().filter(|f| f.is_count()) {
            assert!(filter.count_satisfied(2));
            assert!(!filter.count_satisfied(0));
        }
    }

    #[test]
    fn test_value_range_difference() {
        let events = vec![
            ev(10, "rx").with_field("len", 100i64),
            ev(110, "rx").with_field("len", 900i64),
        ];
        let trace = RecordedTrace::from_events(events);

        let valid = [TimeRange::new(Timestamp(0), Timestamp(99))];
        let invalid = TimeRange::new(Timestamp(100), Timestamp(199));

        let token = CancellationToken::new();
        let filters = infer_filters(&trace, &valid, invalid, &token).into_complete().unwrap();
        assert!(filters
            .iter()
            .any(|f| *f == Filter::value_less_than(vec!["rx".to_string()], "len", 101)));
        assert!(filters
            .iter()
            .any(|f| *f == Filter::value_less_than(vec!["rx".to_string()], "len", 900)));
    }

    #[test]
    fn test_start_time_bracket_ranks_last() {
        // Identical content, the invalid span just starts later.
        let events = vec![ev(10, "X"), ev(5_010, "X")];
        let trace = RecordedTrace::from_events(events);

        let valid = [TimeRange::new(Timestamp(0), Timestamp(99))];
        let invalid = TimeRange::new(Timestamp(5_000), Timestamp(5_099));

        let token = CancellationToken::new();
        let filters = infer_filters(&trace, &valid, invalid, &token).into_complete().unwrap();
        assert!(!filters.is_empty());
        assert!(filters.iter().all(|f| f.is_start_time()));
        assert_eq!(filters[0].kind, FilterKind::MaxStartTime);
        assert_eq!(filters[0].threshold, 0);
        assert_eq!(filters.last().unwrap().threshold, 4_999);
    }

    #[test]
    fn test_identical_examples_yield_nothing() {
        // Valid spans straddle the invalid one, so the start does not
        // separate either.
        let events = vec![ev(10, "X"), ev(110, "X"), ev(310, "X")];
        let trace = RecordedTrace::from_events(events);

        let valid = [
            TimeRange::new(Timestamp(0), Timestamp(99)),
            TimeRange::new(Timestamp(300), Timestamp(399)),
        ];
        let invalid = TimeRange::new(Timestamp(100), Timestamp(199));

        let token = CancellationToken::new();
        let filters = infer_filters(&trace, &valid, invalid, &token).into_complete().unwrap();
        assert!(filters.is_empty());
    }

    #[test]
    fn test_cancellation_short_circuits() {
        let trace = RecordedTrace::from_events(vec![ev(10, "X")]);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = infer_filters(
            &trace,
            &[TimeRange::new(Timestamp(0), Timestamp(99))],
            TimeRange::new(Timestamp(0), Timestamp(99)),
            &token,
        );
        assert!(outcome.is_cancelled());
    }
}
