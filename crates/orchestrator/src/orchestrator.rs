//! The session state machine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use delve_agents::{
    Agent, AgentOutput, AgentTask, HttpToolGateway, PlannerAgent, ResearcherAgent,
    RetryingGateway, ToolGateway, WriterAgent,
};
use delve_common::{FailureReason, Plan, Report, ResearchResult, Session, SessionFailure, SessionStatus};
use delve_llm::build_model_client;
use delve_memory::{ContextBuilder, LongTermMemory, MemoryKind, ShortTermMemory, TurnRole};
use delve_recorder::{CotSink, JsonlSink, MemorySink, Recorder};
use tracing::{debug, info, instrument, warn};

use crate::config::DelveConfig;
use crate::fanout::{self, Cancelled};
use crate::session::{SessionHandle, SessionRun, StepError};

/// Per-session tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub short_term_capacity: usize,
    pub summary_max_chars: usize,
    /// Long-term hits retrieved for each agent invocation
    pub top_k: usize,
    pub max_context_tokens: usize,
    pub max_concurrent_researchers: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            short_term_capacity: 20,
            summary_max_chars: 400,
            top_k: 5,
            max_context_tokens: 2000,
            max_concurrent_researchers: 4,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &DelveConfig) -> Self {
        Self {
            short_term_capacity: config.memory.short_term_capacity,
            summary_max_chars: config.memory.summary_max_chars,
            top_k: config.memory.top_k,
            max_context_tokens: config.memory.max_context_tokens,
            max_concurrent_researchers: config.research.max_concurrent_researchers,
        }
    }
}

/// Sequences planner, researchers and writer for each research session.
///
/// Cheap to clone. The long-term store and the chain-of-thought sink are
/// shared by every session started from the same orchestrator; short-term
/// memory and the recorder are per session.
#[derive(Clone)]
pub struct Orchestrator {
    planner: Arc<dyn Agent>,
    researcher: Arc<dyn Agent>,
    writer: Arc<dyn Agent>,
    long_term: Arc<LongTermMemory>,
    sink: Arc<dyn CotSink>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Agent>,
        researcher: Arc<dyn Agent>,
        writer: Arc<dyn Agent>,
        long_term: Arc<LongTermMemory>,
        sink: Arc<dyn CotSink>,
    ) -> Self {
        Self {
            planner,
            researcher,
            writer,
            long_term,
            sink,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wire the production stack: model client, HTTP tool gateway, memory and sink.
    pub fn from_config(config: &DelveConfig) -> anyhow::Result<Self> {
        let mut llm = config.llm.clone();
        llm.api_key = config.resolve_api_key();
        let model = build_model_client(&llm).context("building model client")?;

        let endpoint = config
            .gateway
            .endpoint
            .clone()
            .context("gateway.endpoint must be set")?;
        let http = HttpToolGateway::new(endpoint, Duration::from_millis(config.gateway.timeout_ms));
        let gateway: Arc<dyn ToolGateway> =
            Arc::new(RetryingGateway::new(http, config.gateway.retry.clone()));

        let planner = PlannerAgent::new(model.clone()).with_max_sections(config.research.max_sections);
        let researcher = ResearcherAgent::new(model.clone(), gateway)
            .with_tools(config.gateway.tools.clone())
            .with_evidence_per_tool(config.research.evidence_per_tool);
        let writer = WriterAgent::new(model);

        let long_term =
            LongTermMemory::from_config(&config.memory).context("opening long-term memory")?;

        let sink: Arc<dyn CotSink> = match &config.recorder.log_path {
            Some(path) => Arc::new(
                JsonlSink::open(path)
                    .with_context(|| format!("opening chain-of-thought log {}", path.display()))?,
            ),
            None => Arc::new(MemorySink::new()),
        };

        info!(
            provider = %config.llm.provider,
            model = %config.llm.model,
            tools = ?config.gateway.tools,
            "Orchestrator configured"
        );

        Ok(Self::new(
            Arc::new(planner),
            Arc::new(researcher),
            Arc::new(writer),
            Arc::new(long_term),
            sink,
        )
        .with_settings(OrchestratorSettings::from_config(config)))
    }

    pub fn long_term(&self) -> &Arc<LongTermMemory> {
        &self.long_term
    }

    pub fn sink(&self) -> &Arc<dyn CotSink> {
        &self.sink
    }

    /// Run one session to completion.
    pub async fn run(&self, topic: &str) -> Result<Report, SessionFailure> {
        self.start(topic)?.join().await
    }

    /// Accept `topic` and start a session in the background.
    ///
    /// Blank topics are rejected with `InvalidTopic` before any session
    /// exists, so that failure carries an empty `session_id`.
    pub fn start(&self, topic: &str) -> Result<SessionHandle, SessionFailure> {
        let session = Session::new(topic)
            .map_err(|e| SessionFailure::new("", FailureReason::InvalidTopic, e.to_string()))?;

        info!(session_id = %session.id, topic = %session.topic, "Session started");

        let recorder = Arc::new(Recorder::new(&session.id, self.sink.clone()));
        let short_term = Arc::new(ShortTermMemory::new(
            self.settings.short_term_capacity,
            self.settings.summary_max_chars,
        ));
        let run = Arc::new(SessionRun::new(
            session,
            short_term,
            recorder,
            self.long_term.clone(),
            ContextBuilder::new(self.settings.max_context_tokens),
            self.settings.top_k,
        ));

        let orchestrator = self.clone();
        let task_run = run.clone();
        let task = tokio::spawn(async move {
            let outcome = orchestrator.drive(task_run.clone()).await;
            if let Err(e) = task_run.recorder.flush() {
                warn!(
                    session_id = %task_run.session_id(),
                    error = %e,
                    pending = task_run.recorder.pending(),
                    "Chain-of-thought entries could not be flushed"
                );
            }
            outcome
        });

        Ok(SessionHandle::new(run, task))
    }

    #[instrument(skip_all, fields(session_id = %run.session_id()))]
    async fn drive(&self, run: Arc<SessionRun>) -> Result<Report, SessionFailure> {
        run.short_term.append(TurnRole::User, run.topic());

        let plan = self.plan(&run).await?;
        run.session.lock().plan = Some(plan.clone());
        run.advance(SessionStatus::Researching)?;

        let results = self.research(&run, &plan).await?;
        run.session.lock().results = results.clone();
        run.advance(SessionStatus::Writing)?;

        let report = self.write(&run, plan, results.clone()).await?;
        run.session.lock().report = Some(report.clone());
        run.advance(SessionStatus::Done)?;

        info!(
            session_id = %run.session_id(),
            sections = report.sections.len(),
            degraded = report.degraded_count(),
            "Session done"
        );

        self.commit(&run, &report, &results).await;
        Ok(report)
    }

    async fn plan(&self, run: &SessionRun) -> Result<Plan, SessionFailure> {
        match run.step(self.planner.as_ref(), AgentTask::Plan).await {
            Ok(AgentOutput::Plan(plan)) if plan.is_empty() => Err(run.fail(
                FailureReason::EmptyPlan,
                "planner returned no sections",
            )),
            Ok(AgentOutput::Plan(plan)) => Ok(plan),
            Ok(_) => Err(run.fail(
                FailureReason::PlanningError,
                "planner returned something other than a plan",
            )),
            Err(StepError::Agent(e)) => Err(run.fail(FailureReason::PlanningError, e.to_string())),
            Err(StepError::Cancelled) => Err(cancelled(run, "planning")),
        }
    }

    async fn research(
        &self,
        run: &Arc<SessionRun>,
        plan: &Plan,
    ) -> Result<Vec<ResearchResult>, SessionFailure> {
        let results = match fanout::research_sections(
            run.clone(),
            self.researcher.clone(),
            plan,
            self.settings.max_concurrent_researchers,
        )
        .await
        {
            Ok(results) => results,
            Err(Cancelled) => return Err(cancelled(run, "researching")),
        };

        let degraded = results.iter().filter(|r| r.degraded).count();
        if degraded == results.len() {
            return Err(run.fail(
                FailureReason::AllSectionsFailed,
                format!("all {degraded} sections failed"),
            ));
        }

        debug!(
            session_id = %run.session_id(),
            sections = results.len(),
            degraded,
            "Research complete"
        );
        Ok(results)
    }

    async fn write(
        &self,
        run: &SessionRun,
        plan: Plan,
        results: Vec<ResearchResult>,
    ) -> Result<Report, SessionFailure> {
        match run
            .step(self.writer.as_ref(), AgentTask::Write { plan, results })
            .await
        {
            Ok(AgentOutput::Report(report)) => Ok(report),
            Ok(_) => Err(run.fail(
                FailureReason::WriteFailed,
                "writer returned something other than a report",
            )),
            Err(StepError::Agent(e)) => Err(run.fail(FailureReason::WriteFailed, e.to_string())),
            Err(StepError::Cancelled) => Err(cancelled(run, "writing")),
        }
    }

    /// Save durable facts from a finished report into long-term memory.
    ///
    /// Notable excerpts are preferred; without any, non-degraded section
    /// summaries are stored at lower importance. Failures are logged only.
    async fn commit(&self, run: &SessionRun, report: &Report, results: &[ResearchResult]) {
        let (kind, importance) = if report.notable.is_empty() {
            (MemoryKind::SectionSummary, SECTION_SUMMARY_IMPORTANCE)
        } else {
            (MemoryKind::Notable, 1.0)
        };
        let facts: Vec<&str> = match kind {
            MemoryKind::Notable => report.notable.iter().map(String::as_str).collect(),
            _ => results
                .iter()
                .filter(|r| !r.degraded)
                .map(|r| r.summary.as_str())
                .collect(),
        };

        let mut stored = 0;
        for fact in facts.iter().filter(|f| !f.trim().is_empty()) {
            match self
                .long_term
                .remember_as(fact, run.session_id(), kind, importance)
                .await
            {
                Ok(_) => stored += 1,
                Err(e) => warn!(
                    session_id = %run.session_id(),
                    error = %e,
                    "Failed to commit fact to long-term memory"
                ),
            }
        }

        info!(
            session_id = %run.session_id(),
            stored,
            kind = %kind,
            candidates = facts.len(),
            "Committed facts to long-term memory"
        );
    }
}

const SECTION_SUMMARY_IMPORTANCE: f32 = 0.5;

fn cancelled(run: &SessionRun, phase: &str) -> SessionFailure {
    run.fail(FailureReason::Cancelled, format!("cancelled while {phase}"))
}
