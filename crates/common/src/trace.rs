//! Chain-of-thought records.

use crate::now_millis;
use serde::{Deserialize, Serialize};

/// Result of one tool invocation as it appears in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallOutcome {
    Ok { payload: serde_json::Value },
    Err { error: String, retryable: bool },
}

/// A tool call made by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub query: String,
    #[serde(flatten)]
    pub outcome: ToolCallOutcome,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ToolCallRecord {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ToolCallOutcome::Ok { .. })
    }
}

/// What an agent reports about one step, before the recorder sequences it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepTrace {
    pub agent: String,
    pub input_prompt: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub model_output: String,
    pub decision: String,
}

impl StepTrace {
    pub fn new(agent: impl Into<String>, input_prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            input_prompt: input_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, model_output: impl Into<String>) -> Self {
        self.model_output = model_output.into();
        self
    }

    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = decision.into();
        self
    }
}

/// One immutable audit record of an agent's reasoning step.
///
/// Persisted layout: `{session_id, sequence_no, agent, input_prompt,
/// tool_calls[], model_output, decision, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOfThoughtEntry {
    pub session_id: String,
    pub sequence_no: u64,
    pub agent: String,
    pub input_prompt: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub model_output: String,
    pub decision: String,
    /// Unix millis
    pub timestamp: u64,
}

impl ChainOfThoughtEntry {
    /// Seal a step into an entry at the given position in the session log.
    pub fn seal(session_id: impl Into<String>, sequence_no: u64, step: StepTrace) -> Self {
        Self {
            session_id: session_id.into(),
            sequence_no,
            agent: step.agent,
            input_prompt: step.input_prompt,
            tool_calls: step.tool_calls,
            model_output: step.model_output,
            decision: step.decision,
            timestamp: now_millis(),
        }
    }
}
