//! Memory types and configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Who produced a short-term turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
    /// Compacted stand-in for evicted turns
    Summary,
}

impl TurnRole {
    pub fn label(self) -> &'static str {
        match self {
            TurnRole::User => "USER",
            TurnRole::Agent => "AGENT",
            TurnRole::Summary => "SUMMARY",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inclusive range of original turn sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqSpan {
    pub first: u64,
    pub last: u64,
}

impl SeqSpan {
    pub fn single(seq: u64) -> Self {
        Self {
            first: seq,
            last: seq,
        }
    }

    /// Number of original turns covered.
    pub fn count(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// One entry of the short-term buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Per-buffer sequence number; a summary carries the last seq it covers
    pub seq: u64,
    pub role: TurnRole,
    pub text: String,
    /// Unix millis
    pub timestamp: u64,
    /// Provenance of a summary entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SeqSpan>,
}

impl Turn {
    pub fn is_summary(&self) -> bool {
        self.role == TurnRole::Summary
    }

    /// The original turns this entry stands for.
    pub fn covers(&self) -> SeqSpan {
        self.span.unwrap_or_else(|| SeqSpan::single(self.seq))
    }
}

/// What a long-term note records.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    #[default]
    Note,
    /// Excerpt the writer flagged as worth keeping
    Notable,
    /// Summary of a researched section
    SectionSummary,
}

impl MemoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryKind::Note => "note",
            MemoryKind::Notable => "notable",
            MemoryKind::SectionSummary => "section_summary",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable note in long-term memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub source_session_id: String,
    /// Unix millis
    pub created_at: u64,

    #[serde(default)]
    pub kind: MemoryKind,

    /// 0.0 to 1.0
    #[serde(default = "default_importance")]
    pub importance: f32,
}

fn default_importance() -> f32 {
    1.0
}

/// Restricts which entries a retrieval may return.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryFilter {
    pub kind: Option<MemoryKind>,
    pub min_importance: f32,
}

impl MemoryFilter {
    pub fn kind(kind: MemoryKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_min_importance(mut self, min_importance: f32) -> Self {
        self.min_importance = min_importance;
        self
    }

    pub fn matches(&self, entry: &LongTermEntry) -> bool {
        self.kind.map_or(true, |k| k == entry.kind) && entry.importance >= self.min_importance
    }
}

/// Size and backend of a long-term store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub by_kind: BTreeMap<MemoryKind, usize>,
    pub backend: String,
    pub embedder: String,
    pub dimension: usize,
}

/// Counts and key topics of a short-term buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Entries currently held
    pub entries: usize,
    /// Original turns those entries stand for, summarized ones included
    pub turns_covered: u64,
    pub user_turns: usize,
    pub agent_turns: usize,
    pub summary_entries: usize,
    /// Millis between the oldest and newest entry
    pub span_ms: u64,
    /// Most frequent content words, most frequent first
    pub key_topics: Vec<String>,
}

impl fmt::Display for ConversationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries covering {} turns ({} user, {} agent, {} summaries) over {}s",
            self.entries,
            self.turns_covered,
            self.user_turns,
            self.agent_turns,
            self.summary_entries,
            self.span_ms / 1000
        )?;
        if !self.key_topics.is_empty() {
            write!(f, "; topics: {}", self.key_topics.join(", "))?;
        }
        Ok(())
    }
}

/// A long-term entry with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedMemory {
    pub entry: LongTermEntry,
    pub score: f32,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("long-term store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration for both memory tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum short-term entries per session
    #[serde(default = "default_short_term_capacity")]
    pub short_term_capacity: usize,

    /// Maximum characters kept in a summary entry
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    /// JSON-lines file backing long-term memory; in-memory when unset
    #[serde(default)]
    pub long_term_path: Option<PathBuf>,

    /// fastembed model name, or `hash` for the offline bag-of-words embedder
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Long-term hits passed to each agent
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Budget for the rendered memory context
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

fn default_short_term_capacity() -> usize {
    20
}

fn default_summary_max_chars() -> usize {
    400
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".into()
}

fn default_embedding_dim() -> usize {
    384
}

fn default_top_k() -> usize {
    5
}

fn default_max_context_tokens() -> usize {
    2000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: default_short_term_capacity(),
            summary_max_chars: default_summary_max_chars(),
            long_term_path: None,
            embedding_model: default_embedding_model(),
            embedding_dim: default_embedding_dim(),
            top_k: default_top_k(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.short_term_capacity, 20);
        assert_eq!(config.summary_max_chars, 400);
        assert_eq!(config.embedding_model, "all-MiniLM-L6-v2");
        assert_eq!(config.embedding_dim, 384);
        assert_eq!(config.top_k, 5);
        assert!(config.long_term_path.is_none());
    }

    #[test]
    fn turn_covers_own_seq_without_span() {
        let turn = Turn {
            seq: 7,
            role: TurnRole::User,
            text: "hi".into(),
            timestamp: 0,
            span: None,
        };
        assert_eq!(turn.covers(), SeqSpan::single(7));
        assert_eq!(turn.covers().count(), 1);
    }
}
