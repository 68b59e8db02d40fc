use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use delve_common::{ChainOfThoughtEntry, StepTrace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::sink::{CotSink, RecorderError, Replay};

const SUBSCRIBER_CAPACITY: usize = 256;

struct RecorderState {
    next_seq: u64,
    /// Sealed entries the sink has not accepted yet, oldest first
    pending: VecDeque<ChainOfThoughtEntry>,
}

/// Per-session chain-of-thought recorder.
///
/// `record` is atomic: sequencing, the sink append and the broadcast all
/// happen under one mutex, so concurrent callers never interleave. Entries
/// the sink rejects stay pending and are retried on the next `record` or
/// `flush`.
pub struct Recorder {
    session_id: String,
    sink: Arc<dyn CotSink>,
    state: Mutex<RecorderState>,
    tx: broadcast::Sender<ChainOfThoughtEntry>,
}

impl Recorder {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn CotSink>) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            session_id: session_id.into(),
            sink,
            state: Mutex::new(RecorderState {
                next_seq: 1,
                pending: VecDeque::new(),
            }),
            tx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Seal `step` with the next sequence number and append it.
    pub fn record(&self, step: StepTrace) -> ChainOfThoughtEntry {
        let mut state = self.state.lock();
        let entry = ChainOfThoughtEntry::seal(&self.session_id, state.next_seq, step);
        state.next_seq += 1;
        state.pending.push_back(entry.clone());

        if let Err(e) = self.drain(&mut state) {
            warn!(
                session_id = %self.session_id,
                sequence_no = entry.sequence_no,
                pending = state.pending.len(),
                error = %e,
                "Chain-of-thought sink append failed, entry buffered"
            );
        }

        debug!(
            session_id = %self.session_id,
            sequence_no = entry.sequence_no,
            agent = %entry.agent,
            "Recorded step"
        );
        // No subscribers is fine.
        let _ = self.tx.send(entry.clone());
        entry
    }

    /// Retry pending entries. Fails with the first sink error, if any.
    pub fn flush(&self) -> Result<(), RecorderError> {
        let mut state = self.state.lock();
        self.drain(&mut state)
    }

    /// Number of entries waiting for the sink.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainOfThoughtEntry> {
        self.tx.subscribe()
    }

    /// Replay the trail of `session_id` in creation order.
    ///
    /// For this recorder's own session the result also includes entries
    /// still pending, and is bounded to what had been recorded at call time.
    pub fn for_session(&self, session_id: &str) -> Result<Replay, RecorderError> {
        if session_id != self.session_id {
            return self.sink.replay(session_id);
        }

        let state = self.state.lock();
        let pending: Vec<ChainOfThoughtEntry> = state.pending.iter().cloned().collect();
        let persisted_below = pending
            .first()
            .map(|e| e.sequence_no)
            .unwrap_or(state.next_seq);
        let persisted = self.sink.replay(session_id)?;
        drop(state);

        let persisted = persisted.filter(move |item| match item {
            Ok(entry) => entry.sequence_no < persisted_below,
            Err(_) => true,
        });
        Ok(Box::new(persisted.chain(pending.into_iter().map(Ok))))
    }

    /// Collected trail of this session; unreadable entries are skipped.
    pub fn entries(&self) -> Result<Vec<ChainOfThoughtEntry>, RecorderError> {
        Ok(self
            .for_session(&self.session_id)?
            .filter_map(|item| match item {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "Skipping unreadable trace entry");
                    None
                }
            })
            .collect())
    }

    pub fn summary(&self) -> Result<TraceSummary, RecorderError> {
        Ok(summarize(&self.entries()?))
    }

    fn drain(&self, state: &mut RecorderState) -> Result<(), RecorderError> {
        while let Some(front) = state.pending.front() {
            self.sink.append(front)?;
            state.pending.pop_front();
        }
        Ok(())
    }
}

/// Aggregate view of a session trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_steps: usize,
    /// Agents in order of first appearance
    pub agents: Vec<String>,
    /// Tools in order of first use
    pub tools: Vec<String>,
    pub tool_calls: usize,
    pub failed_tool_calls: usize,
}

impl fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps by [{}]; {} tool calls ({} failed) via [{}]",
            self.total_steps,
            self.agents.join(", "),
            self.tool_calls,
            self.failed_tool_calls,
            self.tools.join(", ")
        )
    }
}

pub fn summarize(entries: &[ChainOfThoughtEntry]) -> TraceSummary {
    let mut summary = TraceSummary {
        total_steps: entries.len(),
        ..Default::default()
    };
    for entry in entries {
        if !summary.agents.contains(&entry.agent) {
            summary.agents.push(entry.agent.clone());
        }
        for call in &entry.tool_calls {
            summary.tool_calls += 1;
            if !call.is_ok() {
                summary.failed_tool_calls += 1;
            }
            if !summary.tools.contains(&call.tool) {
                summary.tools.push(call.tool.clone());
            }
        }
    }
    summary
}
