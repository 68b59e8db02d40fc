//! Common types shared across the Delve crates.
//!
//! This crate holds the research data model (plans, evidence, reports), the
//! session state machine, chain-of-thought trace records and the error
//! taxonomy that every other crate builds on.

pub mod error;
pub mod jsonl;
pub mod research;
pub mod session;
pub mod trace;

pub use error::{DelveError, Result};
pub use research::{Evidence, Plan, Report, ReportSection, ResearchResult, Section};
pub use session::{FailureReason, Session, SessionFailure, SessionStatus};
pub use trace::{ChainOfThoughtEntry, StepTrace, ToolCallOutcome, ToolCallRecord};

/// Current wall-clock time as Unix milliseconds.
///
/// A clock set before the epoch reads as zero rather than panicking.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Truncate `s` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll...");
    }

    #[test]
    fn now_millis_is_positive() {
        assert!(now_millis() > 0);
    }
}
