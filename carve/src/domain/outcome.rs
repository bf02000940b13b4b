//! Result wrapper for cancellable analyses
//!
//! Every engine checks its cancellation token while iterating and returns
//! [`Outcome::Cancelled`] instead of a half-built result when the token
//! fires. Partial state is dropped, never surfaced.

/// What a cancellable analysis produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The analysis ran to the end of its input.
    Complete(T),
    /// The cancellation token fired mid-run; partial state was discarded.
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The completed value, or `None` if the run was cancelled.
    pub fn into_complete(self) -> Option<T> {
        match self {
            Outcome::Complete(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Complete(value) => Outcome::Complete(f(value)),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}
