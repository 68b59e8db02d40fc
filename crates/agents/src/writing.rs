//! Writer agent: research results in, sectioned report out.

use std::sync::Arc;

use async_trait::async_trait;
use delve_common::{Plan, Report, ReportSection, ResearchResult, Section, StepTrace};
use delve_llm::ModelClient;
use tracing::{debug, info, instrument};

use crate::prompts;
use crate::traits::{Agent, AgentContext, AgentError, AgentOutcome, AgentOutput, AgentRole, AgentTask};

const NOTABLE_PREFIX: &str = "NOTABLE:";

/// Writes one report section per plan section, in plan order.
///
/// Degraded sections are carried through with their explanation and no
/// model call. Any model failure fails the whole report.
pub struct WriterAgent {
    model: Arc<dyn ModelClient>,
}

impl WriterAgent {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    async fn write_section(
        &self,
        topic: &str,
        context: &str,
        section: &Section,
        result: Option<&ResearchResult>,
        trace: &mut StepTrace,
        notable: &mut Vec<String>,
    ) -> Result<ReportSection, String> {
        let result = match result {
            Some(result) if !result.degraded => result,
            Some(result) => return Ok(degraded_section(section, &result.summary)),
            None => return Ok(degraded_section(section, "No research result was produced.")),
        };

        let prompt = prompts::writer_section(topic, section, result);
        trace.input_prompt.push_str(&format!("\n---\n{prompt}"));
        let raw = self
            .model
            .complete(&prompt, context)
            .await
            .map_err(|e| format!("model error writing '{}': {e}", section.title))?;
        trace.model_output.push_str(&format!("\n---\n{raw}"));

        let (body, excerpts) = split_notable(&raw);
        notable.extend(excerpts);

        let mut sources: Vec<String> = Vec::new();
        for evidence in &result.evidence {
            if !sources.contains(&evidence.source) {
                sources.push(evidence.source.clone());
            }
        }

        Ok(ReportSection {
            section_id: section.id.clone(),
            title: section.title.clone(),
            body,
            sources,
            degraded: false,
        })
    }

    async fn write(
        &self,
        ctx: &AgentContext,
        plan: &Plan,
        results: &[ResearchResult],
        trace: &mut StepTrace,
    ) -> Result<Report, String> {
        if results.is_empty() {
            return Err("no research results to write from".to_string());
        }

        let mut sections = Vec::with_capacity(plan.len());
        let mut notable = Vec::new();
        for section in plan.sections() {
            let result = results.iter().find(|r| r.section_id == section.id);
            let written = self
                .write_section(
                    &ctx.topic,
                    &ctx.memory.rendered,
                    section,
                    result,
                    trace,
                    &mut notable,
                )
                .await?;
            debug!(section_id = %section.id, degraded = written.degraded, "Section written");
            sections.push(written);
        }

        Ok(Report::new(
            format!("Research Report: {}", ctx.topic),
            sections,
            notable,
        ))
    }
}

fn degraded_section(section: &Section, explanation: &str) -> ReportSection {
    ReportSection {
        section_id: section.id.clone(),
        title: section.title.clone(),
        body: explanation.to_string(),
        sources: Vec::new(),
        degraded: true,
    }
}

/// Split `NOTABLE:` lines out of a section draft.
fn split_notable(raw: &str) -> (String, Vec<String>) {
    let mut body = Vec::new();
    let mut notable = Vec::new();
    for line in raw.lines() {
        match line.trim().strip_prefix(NOTABLE_PREFIX) {
            Some(excerpt) if !excerpt.trim().is_empty() => notable.push(excerpt.trim().to_string()),
            Some(_) => {}
            None => body.push(line),
        }
    }
    (body.join("\n").trim().to_string(), notable)
}

#[async_trait]
impl Agent for WriterAgent {
    fn name(&self) -> &str {
        "writer"
    }

    fn role(&self) -> AgentRole {
        AgentRole::Writer
    }

    #[instrument(skip(self, ctx), fields(session_id = %ctx.session_id))]
    async fn invoke(&self, ctx: AgentContext) -> Result<AgentOutcome, AgentError> {
        let (plan, results) = match &ctx.task {
            AgentTask::Write { plan, results } => (plan, results),
            _ => {
                return Err(AgentError::new(
                    self.name(),
                    "writer only handles write tasks",
                    StepTrace::new(self.name(), ""),
                ))
            }
        };

        let mut trace = StepTrace::new(
            self.name(),
            format!("Write report on '{}' from {} results", ctx.topic, results.len()),
        );

        let report = match self.write(&ctx, plan, results, &mut trace).await {
            Ok(report) => report,
            Err(message) => return Err(AgentError::new(self.name(), message, trace)),
        };

        info!(
            agent = %self.name(),
            session_id = %ctx.session_id,
            sections = report.sections.len(),
            degraded = report.degraded_count(),
            notable = report.notable.len(),
            "Report written"
        );

        let decision = format!(
            "wrote {} sections ({} degraded), {} notable excerpts",
            report.sections.len(),
            report.degraded_count(),
            report.notable.len()
        );
        Ok(AgentOutcome {
            output: AgentOutput::Report(report),
            trace: trace.with_decision(decision),
        })
    }
}
