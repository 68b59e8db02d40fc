//! Per-session runtime state and the handle exposed to callers.

use std::sync::Arc;

use delve_agents::{Agent, AgentContext, AgentError, AgentOutput, AgentTask, MemoryContext};
use delve_common::{
    ChainOfThoughtEntry, FailureReason, Report, Session, SessionFailure, SessionStatus, StepTrace,
};
use delve_memory::{
    ContextBuilder, ConversationSummary, LongTermMemory, ShortTermMemory, Turn, TurnRole,
};
use delve_recorder::{Recorder, RecorderError};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why an agent step produced no output.
#[derive(Debug)]
pub(crate) enum StepError {
    Agent(AgentError),
    Cancelled,
}

/// Everything one running session shares between its phases and researcher tasks.
pub(crate) struct SessionRun {
    pub session: Mutex<Session>,
    pub short_term: Arc<ShortTermMemory>,
    pub recorder: Arc<Recorder>,
    pub long_term: Arc<LongTermMemory>,
    pub status: Arc<watch::Sender<SessionStatus>>,
    pub cancel: CancellationToken,
    pub context: ContextBuilder,
    pub top_k: usize,
    session_id: String,
    topic: String,
}

impl SessionRun {
    pub fn new(
        session: Session,
        short_term: Arc<ShortTermMemory>,
        recorder: Arc<Recorder>,
        long_term: Arc<LongTermMemory>,
        context: ContextBuilder,
        top_k: usize,
    ) -> Self {
        let (status, _) = watch::channel(session.status);
        Self {
            session_id: session.id.clone(),
            topic: session.topic.clone(),
            session: Mutex::new(session),
            short_term,
            recorder,
            long_term,
            status: Arc::new(status),
            cancel: CancellationToken::new(),
            context,
            top_k,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Move the session to `next` and publish it.
    pub fn advance(&self, next: SessionStatus) -> Result<(), SessionFailure> {
        let result = self.session.lock().transition(next);
        match result {
            Ok(()) => {
                self.status.send_replace(next);
                info!(session_id = %self.session_id, status = %next, "Session status changed");
                Ok(())
            }
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "Illegal session transition");
                Err(self.fail(FailureReason::Internal, e.to_string()))
            }
        }
    }

    /// Mark the session failed and publish it.
    pub fn fail(&self, reason: FailureReason, message: impl Into<String>) -> SessionFailure {
        let failure = self.session.lock().fail(reason, message);
        self.status.send_replace(SessionStatus::Failed);
        warn!(
            session_id = %self.session_id,
            reason = %failure.reason,
            message = %failure.message,
            "Session failed"
        );
        failure
    }

    /// Read-only memory for one agent invocation.
    async fn memory_for(&self, task: &AgentTask) -> MemoryContext {
        let short_term = self.short_term.snapshot();
        let long_term = self
            .long_term
            .retrieve_or_empty(&task.memory_query(&self.topic), self.top_k)
            .await;
        let rendered = self.context.build(&short_term, &long_term);
        MemoryContext {
            short_term,
            long_term,
            rendered,
        }
    }

    /// Invoke `agent` with memory context, then record the step.
    ///
    /// Successful output is also appended to short-term memory as an agent
    /// turn. A step abandoned by cancellation is not recorded.
    pub async fn step(&self, agent: &dyn Agent, task: AgentTask) -> Result<AgentOutput, StepError> {
        if self.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        let role = agent.role();
        if role != task.role() {
            let e = AgentError::new(
                agent.name(),
                format!("a {role} agent cannot handle a {} task", task.role()),
                StepTrace::new(agent.name(), ""),
            );
            self.recorder.record(e.trace.clone());
            return Err(StepError::Agent(e));
        }

        let memory = self.memory_for(&task).await;
        let ctx = AgentContext::new(&self.session_id, &self.topic, task).with_memory(memory);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
            result = agent.invoke(ctx) => result,
        };

        match result {
            Ok(outcome) => {
                let entry = self.recorder.record(outcome.trace);
                debug!(
                    session_id = %self.session_id,
                    agent = %agent.name(),
                    role = %role,
                    seq = entry.sequence_no,
                    "Step recorded"
                );
                self.short_term
                    .append(TurnRole::Agent, outcome.output.user_facing());
                Ok(outcome.output)
            }
            Err(e) => {
                debug!(session_id = %self.session_id, role = %role, error = %e, "Step failed");
                self.recorder.record(e.trace.clone());
                Err(StepError::Agent(e))
            }
        }
    }

    /// Record a step that never reached the agent's own trace.
    pub fn record_synthetic(&self, trace: StepTrace, user_facing: String) {
        self.recorder.record(trace);
        self.short_term.append(TurnRole::Agent, user_facing);
    }
}

/// A running research session.
///
/// Exposes live status, the chain-of-thought stream, the short-term buffer
/// and cancellation. [`join`](Self::join) yields the terminal outcome.
pub struct SessionHandle {
    run: Arc<SessionRun>,
    task: JoinHandle<Result<Report, SessionFailure>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.run.session_id())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub(crate) fn new(run: Arc<SessionRun>, task: JoinHandle<Result<Report, SessionFailure>>) -> Self {
        Self { run, task }
    }

    pub fn id(&self) -> &str {
        self.run.session_id()
    }

    pub fn topic(&self) -> &str {
        self.run.topic()
    }

    pub fn status(&self) -> SessionStatus {
        *self.run.status.borrow()
    }

    /// Watch status changes.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.run.status.subscribe()
    }

    /// Live stream of entries recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainOfThoughtEntry> {
        self.run.recorder.subscribe()
    }

    pub fn short_term_snapshot(&self) -> Vec<Turn> {
        self.run.short_term.snapshot()
    }

    /// Role counts and key topics of the short-term buffer.
    pub fn conversation_summary(&self) -> ConversationSummary {
        self.run.short_term.summary()
    }

    /// Snapshot of the session record: plan, results and report so far.
    pub fn session(&self) -> Session {
        self.run.session.lock().clone()
    }

    /// Every entry recorded for this session so far, in order.
    pub fn trace(&self) -> Result<Vec<ChainOfThoughtEntry>, RecorderError> {
        self.run.recorder.entries()
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.run.recorder
    }

    /// Stop the session. It fails with `Cancelled` unless already terminal.
    pub fn cancel(&self) {
        info!(session_id = %self.id(), "Session cancellation requested");
        self.run.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.cancel.is_cancelled()
    }

    /// Token that cancels this session, usable after the handle is joined.
    pub fn cancel_token(&self) -> CancellationToken {
        self.run.cancel.clone()
    }

    /// Wait for the session to finish.
    pub async fn join(self) -> Result<Report, SessionFailure> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session_id = %self.run.session_id(), error = %e, "Session task aborted");
                Err(self.run.fail(FailureReason::Internal, format!("session task ended abnormally: {e}")))
            }
        }
    }
}
