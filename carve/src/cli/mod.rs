//! Command-line argument parsing and small input helpers.

pub mod args;

pub use args::{Args, Command};

use anyhow::{bail, Context, Result};
use carve_common::{TimeRange, Timestamp};

/// Parse a `START:END` span given in nanoseconds.
pub fn parse_time_range(text: &str) -> Result<TimeRange> {
    let (begin, end) = text
        .split_once(':')
        .with_context(|| format!("expected START:END, got {text:?}"))?;
    let begin: u64 =
        begin.trim().parse().with_context(|| format!("bad start timestamp {begin:?}"))?;
    let end: u64 = end.trim().parse().with_context(|| format!("bad end timestamp {end:?}"))?;
    if end < begin {
        bail!("span end {end} precedes start {begin}");
    }
    Ok(TimeRange::new(Timestamp(begin), Timestamp(end)))
}

/// Build the analyzed range from optional begin/end bounds.
pub fn bounded_range(begin: Option<u64>, end: Option<u64>) -> TimeRange {
    let full = TimeRange::unbounded();
    TimeRange::new(
        begin.map_or(full.begin, Timestamp),
        end.map_or(full.end, Timestamp),
    )
}
