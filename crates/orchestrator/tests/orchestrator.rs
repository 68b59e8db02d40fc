//! Integration tests for the session state machine.
//!
//! Simulated agents with configurable failures, delays and panics stand in
//! for the model-backed ones.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use delve_agents::{
    Agent, AgentContext, AgentError, AgentOutcome, AgentOutput, AgentRole, AgentTask, MemoryContext,
};
use delve_common::{
    FailureReason, Plan, Report, ReportSection, ResearchResult, SessionStatus, StepTrace,
    ToolCallOutcome, ToolCallRecord,
};
use delve_memory::{
    HashEmbedder, LongTermEntry, LongTermMemory, MemoryError, MemoryFilter, MemoryKind,
    RetrievedMemory, TurnRole, VectorIndex,
};
use delve_orchestrator::{Orchestrator, OrchestratorSettings, SessionHandle};
use delve_recorder::{CotSink, MemorySink};
use parking_lot::Mutex;

const CAFFEINE: &str = "Effects of caffeine on sleep";

// ============================================================================
// Simulated agents
// ============================================================================

struct SimulatedPlanner {
    sections: Result<Vec<(String, String)>, String>,
    seen: Mutex<Vec<MemoryContext>>,
}

impl SimulatedPlanner {
    fn with_titles(titles: &[&str]) -> Self {
        Self {
            sections: Ok(titles
                .iter()
                .map(|t| (t.to_string(), format!("Investigate {t}")))
                .collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            sections: Err(message.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Agent for SimulatedPlanner {
    fn name(&self) -> &str {
        "planner"
    }

    fn role(&self) -> AgentRole {
        AgentRole::Planner
    }

    async fn invoke(&self, ctx: AgentContext) -> Result<AgentOutcome, AgentError> {
        self.seen.lock().push(ctx.memory.clone());
        let trace = StepTrace::new(self.name(), format!("plan {}", ctx.topic));
        match &self.sections {
            Ok(sections) => {
                let plan = Plan::new(&ctx.topic, sections.clone());
                let decision = format!("planned {} sections", plan.len());
                Ok(AgentOutcome {
                    output: AgentOutput::Plan(plan),
                    trace: trace.with_decision(decision),
                })
            }
            Err(message) => Err(AgentError::new(self.name(), message.clone(), trace)),
        }
    }
}

#[derive(Default)]
struct SimulatedResearcher {
    /// Sections whose every tool call fails
    tool_failures: HashSet<String>,
    /// Sections whose invocation returns an agent error
    errors: HashSet<String>,
    panics: HashSet<String>,
    delays_ms: HashMap<String, u64>,
    default_delay_ms: u64,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<MemoryContext>>,
}

impl SimulatedResearcher {
    fn failing_tools_for(titles: &[&str]) -> Self {
        Self {
            tool_failures: titles.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Agent for SimulatedResearcher {
    fn name(&self) -> &str {
        "researcher"
    }

    fn role(&self) -> AgentRole {
        AgentRole::Researcher
    }

    async fn invoke(&self, ctx: AgentContext) -> Result<AgentOutcome, AgentError> {
        let AgentTask::Research { section } = ctx.task else {
            panic!("researcher received a non-research task");
        };
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(ctx.memory.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays_ms
            .get(&section.title)
            .copied()
            .unwrap_or(self.default_delay_ms);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panics.contains(&section.title) {
            panic!("simulated researcher crash");
        }

        let mut trace = StepTrace::new(self.name(), format!("{}: {}", ctx.topic, section.title));

        if self.errors.contains(&section.title) {
            return Err(AgentError::new(self.name(), "simulated agent error", trace));
        }

        if self.tool_failures.contains(&section.title) {
            trace.tool_calls.push(ToolCallRecord {
                tool: "web_search".into(),
                query: section.title.clone(),
                outcome: ToolCallOutcome::Err {
                    error: "connection refused".into(),
                    retryable: true,
                },
                elapsed_ms: 1,
            });
            let result = ResearchResult::degraded(&section, "tool 'web_search' failed");
            return Ok(AgentOutcome {
                output: AgentOutput::Research(result),
                trace: trace.with_decision("degraded"),
            });
        }

        trace.tool_calls.push(ToolCallRecord {
            tool: "web_search".into(),
            query: section.title.clone(),
            outcome: ToolCallOutcome::Ok {
                payload: serde_json::json!([]),
            },
            elapsed_ms: 1,
        });
        let result = ResearchResult::new(
            &section.id,
            vec![delve_common::Evidence {
                source: format!("https://example.org/{}", section.id),
                snippet: format!("finding about {}", section.title),
                tool: "web_search".into(),
                retrieved_at: 0,
            }],
            format!("Summary of {}", section.title),
        );
        Ok(AgentOutcome {
            output: AgentOutput::Research(result),
            trace: trace.with_decision("collected 1 evidence item"),
        })
    }
}

#[derive(Default)]
struct SimulatedWriter {
    fail: bool,
    notable: Vec<String>,
    delay_ms: u64,
    calls: AtomicUsize,
}

#[async_trait]
impl Agent for SimulatedWriter {
    fn name(&self) -> &str {
        "writer"
    }

    fn role(&self) -> AgentRole {
        AgentRole::Writer
    }

    async fn invoke(&self, ctx: AgentContext) -> Result<AgentOutcome, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let AgentTask::Write { plan, results } = ctx.task else {
            panic!("writer received a non-write task");
        };
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let trace = StepTrace::new(self.name(), format!("write {} results", results.len()));
        if self.fail {
            return Err(AgentError::new(self.name(), "model unavailable", trace));
        }

        let sections = plan
            .sections()
            .iter()
            .map(|section| {
                let result = results.iter().find(|r| r.section_id == section.id);
                ReportSection {
                    section_id: section.id.clone(),
                    title: section.title.clone(),
                    body: result.map(|r| r.summary.clone()).unwrap_or_default(),
                    sources: Vec::new(),
                    degraded: result.map_or(true, |r| r.degraded),
                }
            })
            .collect();
        let report = Report::new(format!("Research Report: {}", ctx.topic), sections, self.notable.clone());
        Ok(AgentOutcome {
            output: AgentOutput::Report(report),
            trace: trace.with_decision("wrote report"),
        })
    }
}

/// Index that is never reachable.
struct UnreachableIndex;

#[async_trait]
impl VectorIndex for UnreachableIndex {
    async fn insert(&self, _entry: LongTermEntry) -> Result<bool, MemoryError> {
        Err(MemoryError::StoreUnavailable("index offline".into()))
    }

    async fn search(
        &self,
        _query: &[f32],
        _k: usize,
        _filter: &MemoryFilter,
    ) -> Result<Vec<RetrievedMemory>, MemoryError> {
        Err(MemoryError::StoreUnavailable("index offline".into()))
    }

    async fn len(&self) -> Result<usize, MemoryError> {
        Err(MemoryError::StoreUnavailable("index offline".into()))
    }

    async fn kind_counts(&self) -> Result<BTreeMap<MemoryKind, usize>, MemoryError> {
        Err(MemoryError::StoreUnavailable("index offline".into()))
    }

    fn backend(&self) -> &str {
        "unreachable"
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn long_term() -> Arc<LongTermMemory> {
    Arc::new(LongTermMemory::in_memory(Arc::new(HashEmbedder::new(64))))
}

fn orchestrator(
    planner: Arc<SimulatedPlanner>,
    researcher: Arc<SimulatedResearcher>,
    writer: Arc<SimulatedWriter>,
) -> Orchestrator {
    Orchestrator::new(planner, researcher, writer, long_term(), Arc::new(MemorySink::new()))
}

fn three_sections() -> Arc<SimulatedPlanner> {
    Arc::new(SimulatedPlanner::with_titles(&[
        "Background",
        "Sleep Latency",
        "Dosage",
    ]))
}

async fn wait_for(handle: &SessionHandle, status: SessionStatus) {
    let mut rx = handle.watch_status();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == status))
        .await
        .expect("status not reached in time")
        .expect("status channel closed");
}

// ============================================================================
// Outcomes
// ============================================================================

#[tokio::test]
async fn test_partial_failure_degrades_sections() {
    let researcher = Arc::new(SimulatedResearcher::failing_tools_for(&["Background", "Dosage"]));
    let orch = orchestrator(three_sections(), researcher, Arc::new(SimulatedWriter::default()));

    let handle = orch.start(CAFFEINE).unwrap();
    wait_for(&handle, SessionStatus::Done).await;
    assert_eq!(handle.status(), SessionStatus::Done);

    let report = handle.join().await.unwrap();
    assert_eq!(report.sections.len(), 3);
    let degraded: Vec<&str> = report
        .sections
        .iter()
        .filter(|s| s.degraded)
        .map(|s| s.title.as_str())
        .collect();
    assert_eq!(degraded, vec!["Background", "Dosage"]);
}

#[tokio::test]
async fn test_all_sections_failing_fails_session() {
    let researcher = Arc::new(SimulatedResearcher::failing_tools_for(&[
        "Background",
        "Sleep Latency",
        "Dosage",
    ]));
    let writer = Arc::new(SimulatedWriter::default());
    let orch = orchestrator(three_sections(), researcher, writer.clone());

    let handle = orch.start(CAFFEINE).unwrap();
    let session_id = handle.id().to_string();
    let recorder = handle.recorder().clone();

    let failure = handle.join().await.unwrap_err();
    assert_eq!(failure.reason, FailureReason::AllSectionsFailed);
    assert_eq!(failure.session_id, session_id);
    assert_eq!(writer.calls.load(Ordering::SeqCst), 0);

    // Partial trail is preserved: planner plus three researchers.
    assert_eq!(recorder.entries().unwrap().len(), 4);
}

#[tokio::test]
async fn test_empty_plan_fails() {
    let planner = Arc::new(SimulatedPlanner::with_titles(&[]));
    let researcher = Arc::new(SimulatedResearcher::default());
    let orch = orchestrator(planner, researcher.clone(), Arc::new(SimulatedWriter::default()));

    let failure = orch.run(CAFFEINE).await.unwrap_err();
    assert_eq!(failure.reason, FailureReason::EmptyPlan);
    assert_eq!(researcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_planner_error_is_fatal() {
    let planner = Arc::new(SimulatedPlanner::failing("unparseable plan"));
    let orch = orchestrator(
        planner,
        Arc::new(SimulatedResearcher::default()),
        Arc::new(SimulatedWriter::default()),
    );

    let handle = orch.start(CAFFEINE).unwrap();
    let recorder = handle.recorder().clone();
    let failure = handle.join().await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::PlanningError);
    assert!(failure.message.contains("unparseable plan"));

    let entries = recorder.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].agent, "planner");
    assert!(entries[0].decision.starts_with("failed"));
}

#[tokio::test]
async fn test_writer_error_is_fatal() {
    let writer = Arc::new(SimulatedWriter {
        fail: true,
        ..Default::default()
    });
    let orch = orchestrator(three_sections(), Arc::new(SimulatedResearcher::default()), writer);

    let handle = orch.start(CAFFEINE).unwrap();
    let mut status = handle.watch_status();
    let failure = handle.join().await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::WriteFailed);
    assert_eq!(*status.borrow_and_update(), SessionStatus::Failed);
}

#[tokio::test]
async fn test_blank_topic_rejected() {
    let orch = orchestrator(
        three_sections(),
        Arc::new(SimulatedResearcher::default()),
        Arc::new(SimulatedWriter::default()),
    );
    let failure = orch.start("   ").unwrap_err();
    assert_eq!(failure.reason, FailureReason::InvalidTopic);
}

#[tokio::test]
async fn test_researcher_error_degrades_section() {
    let researcher = Arc::new(SimulatedResearcher {
        errors: ["Dosage".to_string()].into_iter().collect(),
        ..Default::default()
    });
    let orch = orchestrator(three_sections(), researcher, Arc::new(SimulatedWriter::default()));

    let report = orch.run(CAFFEINE).await.unwrap();
    assert!(report.sections[2].degraded);
    assert!(report.sections[2].body.contains("simulated agent error"));
}

#[tokio::test]
async fn test_panicking_researcher_degrades_section() {
    let researcher = Arc::new(SimulatedResearcher {
        panics: ["Sleep Latency".to_string()].into_iter().collect(),
        ..Default::default()
    });
    let orch = orchestrator(three_sections(), researcher, Arc::new(SimulatedWriter::default()));

    let handle = orch.start(CAFFEINE).unwrap();
    let recorder = handle.recorder().clone();
    let report = handle.join().await.unwrap();

    assert!(!report.sections[0].degraded);
    assert!(report.sections[1].degraded);
    assert!(report.sections[1].body.contains("panicked"));

    let entries = recorder.entries().unwrap();
    assert_eq!(entries.len(), 5);
    assert!(entries
        .iter()
        .any(|e| e.decision.contains("researcher panicked")));
}

// ============================================================================
// Ordering and concurrency
// ============================================================================

#[tokio::test]
async fn test_report_follows_plan_order_despite_completion_order() {
    let titles = ["One", "Two", "Three", "Four"];
    let planner = Arc::new(SimulatedPlanner::with_titles(&titles));
    let researcher = Arc::new(SimulatedResearcher {
        delays_ms: [("One", 80), ("Two", 60), ("Three", 40), ("Four", 0)]
            .into_iter()
            .map(|(t, d)| (t.to_string(), d))
            .collect(),
        ..Default::default()
    });
    let orch = orchestrator(planner, researcher, Arc::new(SimulatedWriter::default()));

    let handle = orch.start("ordering").unwrap();
    let report = handle.join().await.unwrap();

    let order: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(order, titles);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_researcher_concurrency_is_bounded() {
    let titles = ["A", "B", "C", "D", "E", "F"];
    let researcher = Arc::new(SimulatedResearcher {
        default_delay_ms: 30,
        ..Default::default()
    });
    let orch = orchestrator(
        Arc::new(SimulatedPlanner::with_titles(&titles)),
        researcher.clone(),
        Arc::new(SimulatedWriter::default()),
    )
    .with_settings(OrchestratorSettings {
        max_concurrent_researchers: 2,
        ..Default::default()
    });

    orch.run("bounded").await.unwrap();
    assert_eq!(researcher.calls.load(Ordering::SeqCst), 6);
    assert!(researcher.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_cancel_during_research() {
    let researcher = Arc::new(SimulatedResearcher {
        default_delay_ms: 10_000,
        ..Default::default()
    });
    let writer = Arc::new(SimulatedWriter::default());
    let orch = orchestrator(three_sections(), researcher, writer.clone());

    let handle = orch.start(CAFFEINE).unwrap();
    wait_for(&handle, SessionStatus::Researching).await;
    handle.cancel();
    assert!(handle.is_cancelled());

    let failure = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("cancellation did not stop the session")
        .unwrap_err();
    assert_eq!(failure.reason, FailureReason::Cancelled);
    assert_eq!(writer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_before_planning() {
    let planner = three_sections();
    let orch = orchestrator(
        planner.clone(),
        Arc::new(SimulatedResearcher::default()),
        Arc::new(SimulatedWriter::default()),
    );

    // The session task has not been polled yet on this runtime.
    let handle = orch.start(CAFFEINE).unwrap();
    handle.cancel();
    let recorder = handle.recorder().clone();

    let failure = handle.join().await.unwrap_err();
    assert_eq!(failure.reason, FailureReason::Cancelled);
    assert!(failure.message.contains("planning"));
    assert!(planner.seen.lock().is_empty());
    assert!(recorder.entries().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_during_writing() {
    let memory = long_term();
    let writer = Arc::new(SimulatedWriter {
        delay_ms: 10_000,
        notable: vec!["never committed".into()],
        ..Default::default()
    });
    let orch = Orchestrator::new(
        three_sections(),
        Arc::new(SimulatedResearcher::default()),
        writer.clone(),
        memory.clone(),
        Arc::new(MemorySink::new()),
    );

    let handle = orch.start(CAFFEINE).unwrap();
    let recorder = handle.recorder().clone();
    wait_for(&handle, SessionStatus::Writing).await;
    handle.cancel();

    let failure = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("cancellation did not stop the writer")
        .unwrap_err();
    assert_eq!(failure.reason, FailureReason::Cancelled);
    assert!(failure.message.contains("writing"));

    // Planner and researchers are kept; the abandoned writer step is not.
    let entries = recorder.entries().unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|e| e.agent != "writer"));
    assert_eq!(memory.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_agent_in_wrong_slot_fails_its_phase() {
    let writer_as_planner = Arc::new(SimulatedWriter::default());
    let orch = Orchestrator::new(
        writer_as_planner.clone(),
        Arc::new(SimulatedResearcher::default()),
        Arc::new(SimulatedWriter::default()),
        long_term(),
        Arc::new(MemorySink::new()),
    );

    let handle = orch.start(CAFFEINE).unwrap();
    let recorder = handle.recorder().clone();
    let failure = handle.join().await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::PlanningError);
    assert_eq!(writer_as_planner.calls.load(Ordering::SeqCst), 0);
    let entries = recorder.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].decision.contains("cannot handle a planner task"));
}

// ============================================================================
// Chain of thought
// ============================================================================

#[tokio::test]
async fn test_trace_has_one_entry_per_step() {
    let titles = ["A", "B", "C", "D"];
    let sink = Arc::new(MemorySink::new());
    let orch = Orchestrator::new(
        Arc::new(SimulatedPlanner::with_titles(&titles)),
        Arc::new(SimulatedResearcher::default()),
        Arc::new(SimulatedWriter::default()),
        long_term(),
        sink.clone(),
    );

    let handle = orch.start("trace").unwrap();
    let session_id = handle.id().to_string();
    let mut live = handle.subscribe();
    handle.join().await.unwrap();

    let replayed: Vec<_> = sink
        .replay(&session_id)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(replayed.len(), 1 + titles.len() + 1);
    assert!(replayed
        .windows(2)
        .all(|w| w[0].sequence_no < w[1].sequence_no));
    assert_eq!(replayed[0].sequence_no, 1);
    assert_eq!(replayed[0].agent, "planner");
    assert_eq!(replayed.last().unwrap().agent, "writer");
    assert_eq!(
        replayed.iter().filter(|e| e.agent == "researcher").count(),
        titles.len()
    );

    let mut streamed = 0;
    while let Ok(entry) = live.try_recv() {
        assert_eq!(entry.session_id, session_id);
        streamed += 1;
    }
    assert_eq!(streamed, replayed.len());
}

#[tokio::test]
async fn test_sessions_share_sink_but_not_sequence() {
    let sink = Arc::new(MemorySink::new());
    let orch = Orchestrator::new(
        three_sections(),
        Arc::new(SimulatedResearcher::default()),
        Arc::new(SimulatedWriter::default()),
        long_term(),
        sink.clone(),
    );

    let first = orch.start("first topic").unwrap();
    let second = orch.start("second topic").unwrap();
    let (first_id, second_id) = (first.id().to_string(), second.id().to_string());
    let (a, b) = tokio::join!(first.join(), second.join());
    a.unwrap();
    b.unwrap();

    for id in [first_id, second_id] {
        let seqs: Vec<u64> = sink
            .replay(&id)
            .unwrap()
            .map(|e| e.unwrap().sequence_no)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }
}

// ============================================================================
// Memory
// ============================================================================

#[tokio::test]
async fn test_short_term_holds_topic_and_agent_turns() {
    let researcher = Arc::new(SimulatedResearcher::default());
    let orch = orchestrator(three_sections(), researcher.clone(), Arc::new(SimulatedWriter::default()));

    let handle = orch.start(CAFFEINE).unwrap();
    wait_for(&handle, SessionStatus::Done).await;

    let turns = handle.short_term_snapshot();
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].text, CAFFEINE);
    // topic + planner + 3 researchers + writer
    assert_eq!(turns.len(), 6);
    assert!(turns[1..].iter().all(|t| t.role == TurnRole::Agent));

    let summary = handle.conversation_summary();
    assert_eq!(summary.entries, 6);
    assert_eq!(summary.user_turns, 1);
    assert_eq!(summary.agent_turns, 5);
    assert!(summary.key_topics.contains(&"caffeine".to_string()));
    handle.join().await.unwrap();

    // Researchers saw the topic and the plan in their context.
    for memory in researcher.seen.lock().iter() {
        assert!(memory.short_term.len() >= 2);
        assert!(memory.rendered.contains(CAFFEINE));
    }
}

#[tokio::test]
async fn test_short_term_bound_holds_over_long_session() {
    let titles: Vec<String> = (1..=8).map(|i| format!("Section {i}")).collect();
    let title_refs: Vec<&str> = titles.iter().map(String::as_str).collect();
    let orch = orchestrator(
        Arc::new(SimulatedPlanner::with_titles(&title_refs)),
        Arc::new(SimulatedResearcher::default()),
        Arc::new(SimulatedWriter::default()),
    )
    .with_settings(OrchestratorSettings {
        short_term_capacity: 4,
        ..Default::default()
    });

    let handle = orch.start("long session").unwrap();
    wait_for(&handle, SessionStatus::Done).await;
    let turns = handle.short_term_snapshot();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].role, TurnRole::Summary);
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_notable_excerpts_are_remembered_across_sessions() {
    let memory = long_term();
    let planner = three_sections();
    let writer = Arc::new(SimulatedWriter {
        notable: vec!["Caffeine has a half-life of about five hours".into()],
        ..Default::default()
    });
    let orch = Orchestrator::new(
        planner.clone(),
        Arc::new(SimulatedResearcher::default()),
        writer,
        memory.clone(),
        Arc::new(MemorySink::new()),
    );

    orch.run(CAFFEINE).await.unwrap();
    assert_eq!(memory.len().await.unwrap(), 1);
    let stats = memory.stats().await.unwrap();
    assert_eq!(stats.by_kind.get(&MemoryKind::Notable), Some(&1));

    orch.run("How long does caffeine last").await.unwrap();
    let seen = planner.seen.lock();
    let second = seen.last().unwrap();
    assert!(second
        .long_term
        .iter()
        .any(|hit| hit.entry.content.contains("half-life")));
    assert!(second.rendered.contains("half-life"));
}

#[tokio::test]
async fn test_summaries_remembered_without_notable() {
    let memory = long_term();
    let orch = Orchestrator::new(
        three_sections(),
        Arc::new(SimulatedResearcher::failing_tools_for(&["Dosage"])),
        Arc::new(SimulatedWriter::default()),
        memory.clone(),
        Arc::new(MemorySink::new()),
    );

    orch.run(CAFFEINE).await.unwrap();
    // Two non-degraded sections.
    assert_eq!(memory.len().await.unwrap(), 2);
    let summaries = memory
        .retrieve_filtered("caffeine", 5, &MemoryFilter::kind(MemoryKind::SectionSummary))
        .await
        .unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|h| h.entry.importance < 1.0));
}

#[tokio::test]
async fn test_unreachable_store_does_not_fail_session() {
    let memory = Arc::new(LongTermMemory::new(
        Arc::new(HashEmbedder::new(64)),
        Arc::new(UnreachableIndex),
    ));
    let planner = three_sections();
    let orch = Orchestrator::new(
        planner.clone(),
        Arc::new(SimulatedResearcher::default()),
        Arc::new(SimulatedWriter {
            notable: vec!["a fact".into()],
            ..Default::default()
        }),
        memory,
        Arc::new(MemorySink::new()),
    );

    let report = orch.run(CAFFEINE).await.unwrap();
    assert_eq!(report.sections.len(), 3);
    assert!(planner.seen.lock()[0].long_term.is_empty());
}
