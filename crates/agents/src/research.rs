//! Researcher agent: one plan section in, one research result out.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use delve_common::{
    now_millis, Evidence, ResearchResult, Section, StepTrace, ToolCallOutcome, ToolCallRecord,
};
use delve_llm::ModelClient;
use tracing::{info, instrument, warn};

use crate::gateway::ToolGateway;
use crate::prompts;
use crate::traits::{Agent, AgentContext, AgentError, AgentOutcome, AgentOutput, AgentRole, AgentTask};

/// Gathers evidence for one section and summarizes it.
///
/// Tool and model failures never escape: they degrade the section's result
/// to an evidence-less explanation instead.
pub struct ResearcherAgent {
    model: Arc<dyn ModelClient>,
    gateway: Arc<dyn ToolGateway>,
    tools: Vec<String>,
    evidence_per_tool: usize,
}

impl ResearcherAgent {
    pub fn new(model: Arc<dyn ModelClient>, gateway: Arc<dyn ToolGateway>) -> Self {
        Self {
            model,
            gateway,
            tools: vec!["web_search".into(), "academic_search".into()],
            evidence_per_tool: 5,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_evidence_per_tool(mut self, evidence_per_tool: usize) -> Self {
        self.evidence_per_tool = evidence_per_tool;
        self
    }

    /// Query every tool in order. Failures are recorded and skipped.
    async fn gather(
        &self,
        query: &str,
        trace: &mut StepTrace,
    ) -> (Vec<Evidence>, Vec<String>) {
        let mut evidence = Vec::new();
        let mut failures = Vec::new();

        for tool in &self.tools {
            let started = Instant::now();
            let result = self.gateway.invoke(tool, query).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(output) => {
                    let payload = serde_json::to_value(&output.hits).unwrap_or_default();
                    evidence.extend(output.hits.into_iter().take(self.evidence_per_tool).map(
                        |hit| Evidence {
                            source: hit.source,
                            snippet: hit.snippet,
                            tool: tool.clone(),
                            retrieved_at: now_millis(),
                        },
                    ));
                    ToolCallOutcome::Ok { payload }
                }
                Err(e) => {
                    warn!(tool = %tool, error = %e, retryable = e.retryable, "Tool call failed");
                    failures.push(e.to_string());
                    ToolCallOutcome::Err {
                        error: e.message,
                        retryable: e.retryable,
                    }
                }
            };

            trace.tool_calls.push(ToolCallRecord {
                tool: tool.clone(),
                query: query.to_string(),
                outcome,
                elapsed_ms,
            });
        }

        (evidence, failures)
    }

    fn degrade(section: &Section, reason: String, trace: StepTrace) -> AgentOutcome {
        warn!(section_id = %section.id, reason = %reason, "Section degraded");
        let result = ResearchResult::degraded(section, &reason);
        AgentOutcome {
            trace: trace
                .with_output(result.summary.clone())
                .with_decision(format!("degraded: {reason}")),
            output: AgentOutput::Research(result),
        }
    }
}

#[async_trait]
impl Agent for ResearcherAgent {
    fn name(&self) -> &str {
        "researcher"
    }

    fn role(&self) -> AgentRole {
        AgentRole::Researcher
    }

    #[instrument(skip(self, ctx), fields(session_id = %ctx.session_id))]
    async fn invoke(&self, ctx: AgentContext) -> Result<AgentOutcome, AgentError> {
        let section = match ctx.task {
            AgentTask::Research { section } => section,
            _ => {
                return Err(AgentError::new(
                    self.name(),
                    "researcher only handles research tasks",
                    StepTrace::new(self.name(), ""),
                ))
            }
        };

        let query = prompts::tool_query(&ctx.topic, &section);
        let mut trace = StepTrace::new(self.name(), query.clone());
        let (evidence, failures) = self.gather(&query, &mut trace).await;

        if !self.tools.is_empty() && failures.len() == self.tools.len() {
            return Ok(Self::degrade(&section, failures.join("; "), trace));
        }

        let answered = self.tools.len() - failures.len();
        if evidence.is_empty() {
            info!(agent = %self.name(), section_id = %section.id, "No evidence found");
            let summary = format!("No evidence was found for '{}'.", section.title);
            let result = ResearchResult::new(&section.id, Vec::new(), summary.clone());
            return Ok(AgentOutcome {
                output: AgentOutput::Research(result),
                trace: trace.with_output(summary).with_decision(format!(
                    "no evidence found by {answered} of {} tools",
                    self.tools.len()
                )),
            });
        }

        let prompt = prompts::researcher(&ctx.topic, &section, &evidence);
        trace.input_prompt = prompt.clone();

        let summary = match self.model.complete(&prompt, &ctx.memory.rendered).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => return Ok(Self::degrade(&section, format!("model error: {e}"), trace)),
        };

        info!(
            agent = %self.name(),
            section_id = %section.id,
            evidence = evidence.len(),
            failed_tools = failures.len(),
            "Section researched"
        );

        let decision = format!(
            "collected {} evidence items from {} of {} tools",
            evidence.len(),
            answered,
            self.tools.len()
        );
        let result = ResearchResult::new(&section.id, evidence, summary.clone());
        Ok(AgentOutcome {
            output: AgentOutput::Research(result),
            trace: trace.with_output(summary).with_decision(decision),
        })
    }
}
