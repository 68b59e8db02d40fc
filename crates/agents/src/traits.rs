//! Core agent contract.

use async_trait::async_trait;
use delve_common::{Plan, Report, ResearchResult, Section, StepTrace};
use delve_memory::{RetrievedMemory, Turn};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The closed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Researcher,
    Writer,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Researcher => "researcher",
            AgentRole::Writer => "writer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent is asked to do.
#[derive(Debug, Clone)]
pub enum AgentTask {
    Plan,
    Research { section: Section },
    Write { plan: Plan, results: Vec<ResearchResult> },
}

impl AgentTask {
    /// The role that handles this task.
    pub fn role(&self) -> AgentRole {
        match self {
            AgentTask::Plan => AgentRole::Planner,
            AgentTask::Research { .. } => AgentRole::Researcher,
            AgentTask::Write { .. } => AgentRole::Writer,
        }
    }

    /// Text used to query long-term memory for this task.
    pub fn memory_query(&self, topic: &str) -> String {
        match self {
            AgentTask::Plan | AgentTask::Write { .. } => topic.to_string(),
            AgentTask::Research { section } => {
                format!("{topic} {} {}", section.title, section.objective)
            }
        }
    }
}

/// Read-only memory handed to an agent.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    /// Short-term buffer at invocation time, oldest first
    pub short_term: Vec<Turn>,
    /// Top-k long-term hits, best first
    pub long_term: Vec<RetrievedMemory>,
    /// Both tiers rendered as prompt context
    pub rendered: String,
}

/// Everything an agent sees for one invocation.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub session_id: String,
    pub topic: String,
    pub task: AgentTask,
    pub memory: MemoryContext,
}

impl AgentContext {
    pub fn new(session_id: impl Into<String>, topic: impl Into<String>, task: AgentTask) -> Self {
        Self {
            session_id: session_id.into(),
            topic: topic.into(),
            task,
            memory: MemoryContext::default(),
        }
    }

    pub fn with_memory(mut self, memory: MemoryContext) -> Self {
        self.memory = memory;
        self
    }
}

#[derive(Debug, Clone)]
pub enum AgentOutput {
    Plan(Plan),
    Research(ResearchResult),
    Report(Report),
}

impl AgentOutput {
    /// One-line rendering appended to short-term memory as the agent's turn.
    pub fn user_facing(&self) -> String {
        match self {
            AgentOutput::Plan(plan) => {
                let titles: Vec<String> = plan
                    .sections()
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("{}. {}", i + 1, s.title))
                    .collect();
                format!("Research plan for '{}': {}", plan.topic, titles.join("; "))
            }
            AgentOutput::Research(result) => {
                let marker = if result.degraded { " (degraded)" } else { "" };
                format!("[{}{}] {}", result.section_id, marker, result.summary)
            }
            AgentOutput::Report(report) => format!(
                "{} ({} sections, {} degraded)",
                report.title,
                report.sections.len(),
                report.degraded_count()
            ),
        }
    }
}

/// Successful invocation: the output and the step that produced it.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub output: AgentOutput,
    pub trace: StepTrace,
}

/// Failed invocation. Still carries the trace so the step is recorded.
#[derive(Debug, Clone, Error)]
#[error("{agent} failed: {message}")]
pub struct AgentError {
    pub agent: String,
    pub message: String,
    pub trace: StepTrace,
}

impl AgentError {
    pub fn new(agent: impl Into<String>, message: impl Into<String>, trace: StepTrace) -> Self {
        let message = message.into();
        let trace = trace.with_decision(format!("failed: {message}"));
        Self {
            agent: agent.into(),
            message,
            trace,
        }
    }
}

/// A specialist agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// The orchestrator only hands this agent tasks of this role.
    fn role(&self) -> AgentRole;

    async fn invoke(&self, ctx: AgentContext) -> Result<AgentOutcome, AgentError>;
}
