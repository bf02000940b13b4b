//! Domain model for carve
//!
//! Core error types and the cancellation-aware result wrapper shared by
//! every analysis engine.

pub mod errors;
pub mod outcome;

pub use errors::{ExportError, SpecError, TraceError};
pub use outcome::Outcome;
