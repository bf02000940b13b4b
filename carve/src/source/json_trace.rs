//! Chrome trace JSON loader
//!
//! Reads the Trace Event Format (`{"traceEvents": [...]}`) emitted by our
//! own exporter and by common tracers. Parsing is lenient: entries without
//! a usable name or timestamp are skipped and counted, not fatal.

use std::path::Path;

use carve_common::{Event, FieldValue, LaneId, Timestamp, FIELD_TID};
use log::{debug, warn};
use serde_json::Value;

use crate::domain::TraceError;
use crate::source::RecordedTrace;

/// Load a Chrome trace file into a [`RecordedTrace`].
///
/// Timestamps are converted from microseconds (the format's unit) to
/// nanoseconds. The lane comes from `args.cpu_id`, `args.cpu` or
/// `args.lane`; remaining `args` entries become event fields.
pub fn load_chrome_trace(path: impl AsRef<Path>) -> Result<RecordedTrace, TraceError> {
    let content = std::fs::read_to_string(&path)?;
    let json: Value = serde_json::from_str(&content)?;

    let Some(entries) = json["traceEvents"].as_array() else {
        return Err(TraceError::TraceParseFailed(
            "missing traceEvents array".to_string(),
        ));
    };

    let mut events = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for entry in entries {
        match parse_entry(entry) {
            Some(event) => events.push(event),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(
            "Skipped {} of {} trace entries (metadata rows or missing name/ts)",
            skipped,
            entries.len()
        );
    }
    if events.is_empty() {
        return Err(TraceError::EmptyTrace);
    }
    debug!("Loaded {} events from {}", events.len(), path.as_ref().display());

    Ok(RecordedTrace::from_events(events))
}

fn parse_entry(entry: &Value) -> Option<Event> {
    // Metadata ("M") and counter ("C") rows carry no point-in-time
    // semantics for us. A missing phase means a raw tracer dump; keep it.
    let ph = entry["ph"].as_str().unwrap_or("i");
    if !matches!(ph, "B" | "E" | "X" | "i" | "I") {
        return None;
    }

    let name = entry["name"].as_str()?;
    let ts_us = entry["ts"].as_f64()?;
    if ts_us < 0.0 {
        return None;
    }
    let timestamp = Timestamp((ts_us * 1_000.0) as u64);

    let args = &entry["args"];
    let lane = args["cpu_id"]
        .as_u64()
        .or_else(|| args["cpu"].as_u64())
        .or_else(|| args["lane"].as_u64())
        .unwrap_or(0) as u32;

    let mut event = Event::new(timestamp, LaneId(lane), name);
    if let Some(tid) = entry["tid"].as_i64() {
        event.fields.insert(FIELD_TID.to_string(), FieldValue::Int(tid));
    }
    if let Some(map) = args.as_object() {
        for (key, value) in map {
            if matches!(key.as_str(), "cpu_id" | "cpu" | "lane") {
                continue;
            }
            match value {
                Value::Number(n) => {
                    if let Some(v) = n.as_i64() {
                        event.fields.insert(key.clone(), FieldValue::Int(v));
                    }
                }
                Value::String(s) => {
                    event.fields.insert(key.clone(), FieldValue::Str(s.clone()));
                }
                _ => {}
            }
        }
    }
    Some(event)
}
