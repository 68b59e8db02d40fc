//! Session lifecycle types.

use crate::research::{Plan, Report, ResearchResult};
use crate::{now_millis, DelveError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Current status of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Planning,
    Researching,
    Writing,
    Done,
    Failed,
}

impl SessionStatus {
    /// Whether the session has stopped moving.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// The happy path is strictly `planning -> researching -> writing -> done`;
    /// `failed` is reachable from every non-terminal state.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Planning, Researching)
                | (Researching, Writing)
                | (Writing, Done)
                | (Planning | Researching | Writing, Failed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Planning => "planning",
            SessionStatus::Researching => "researching",
            SessionStatus::Writing => "writing",
            SessionStatus::Done => "done",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Reason code attached to a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    InvalidTopic,
    PlanningError,
    EmptyPlan,
    AllSectionsFailed,
    WriteFailed,
    Cancelled,
    /// The session task itself terminated abnormally.
    Internal,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Terminal failure of a session.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("session {session_id} failed ({reason}): {message}")]
pub struct SessionFailure {
    pub session_id: String,
    pub reason: FailureReason,
    pub message: String,
}

impl SessionFailure {
    pub fn new(
        session_id: impl Into<String>,
        reason: FailureReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            reason,
            message: message.into(),
        }
    }
}

/// One end-to-end research run for a single topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: String,

    /// The research topic; immutable once accepted
    pub topic: String,

    /// Creation timestamp (Unix millis)
    pub created_at: u64,

    /// Current status
    pub status: SessionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,

    #[serde(default)]
    pub results: Vec<ResearchResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<SessionFailure>,
}

impl Session {
    /// Accept a topic and open a session in `planning`.
    pub fn new(topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();
        let trimmed = topic.trim();
        if trimmed.is_empty() {
            return Err(DelveError::InvalidTopic("topic must not be empty".into()));
        }

        Ok(Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            topic: trimmed.to_string(),
            created_at: now_millis(),
            status: SessionStatus::Planning,
            plan: None,
            results: Vec::new(),
            report: None,
            failure: None,
        })
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DelveError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the session failed and return the failure record.
    pub fn fail(&mut self, reason: FailureReason, message: impl Into<String>) -> SessionFailure {
        let failure = SessionFailure::new(&self.id, reason, message);
        if !self.status.is_terminal() {
            self.status = SessionStatus::Failed;
        }
        self.failure = Some(failure.clone());
        failure
    }
}
