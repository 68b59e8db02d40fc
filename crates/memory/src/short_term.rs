//! Bounded per-session conversation buffer.

use std::collections::{HashMap, VecDeque};

use delve_common::{now_millis, truncate_chars};
use parking_lot::Mutex;
use tracing::debug;

use crate::types::{ConversationSummary, SeqSpan, Turn, TurnRole};

struct Buffer {
    turns: VecDeque<Turn>,
    next_seq: u64,
}

/// Ordered buffer of recent turns holding at most `capacity` entries.
///
/// When an append would overflow, the oldest entries are folded into one
/// summary entry at the front. With capacity `N >= 2` the buffer is brought
/// back to `N - 1` entries before the new turn is pushed. With `N == 1` the
/// evicted entry and the incoming turn collapse into a single summary.
pub struct ShortTermMemory {
    capacity: usize,
    summary_max_chars: usize,
    inner: Mutex<Buffer>,
}

impl ShortTermMemory {
    /// Capacity is clamped to at least one entry.
    pub fn new(capacity: usize, summary_max_chars: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            summary_max_chars,
            inner: Mutex::new(Buffer {
                turns: VecDeque::with_capacity(capacity.max(1)),
                next_seq: 1,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a turn and return it as assigned (with its sequence number).
    pub fn append(&self, role: TurnRole, text: impl Into<String>) -> Turn {
        let mut buf = self.inner.lock();
        let seq = buf.next_seq;
        buf.next_seq += 1;

        let turn = Turn {
            seq,
            role,
            text: text.into(),
            timestamp: now_millis(),
            span: None,
        };

        if self.capacity == 1 {
            if buf.turns.is_empty() {
                buf.turns.push_back(turn.clone());
            } else {
                let mut evicted: Vec<Turn> = buf.turns.drain(..).collect();
                evicted.push(turn.clone());
                let summary = self.summarize(&evicted);
                buf.turns.push_back(summary);
            }
            return turn;
        }

        if buf.turns.len() >= self.capacity {
            let k = buf.turns.len() + 2 - self.capacity;
            let evicted: Vec<Turn> = buf.turns.drain(..k).collect();
            let summary = self.summarize(&evicted);
            debug!(
                evicted = k,
                first_seq = summary.covers().first,
                last_seq = summary.covers().last,
                "Compacted short-term memory"
            );
            buf.turns.push_front(summary);
        }
        buf.turns.push_back(turn.clone());

        turn
    }

    /// Consistent copy of the buffer, oldest first.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.inner.lock().turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().turns.is_empty()
    }

    /// Drop every entry. Sequence numbers keep increasing.
    pub fn clear(&self) {
        self.inner.lock().turns.clear();
    }

    /// `[ROLE] text` lines, oldest first.
    pub fn render_context(&self) -> String {
        render_turns(&self.snapshot())
    }

    /// The most recent `limit` turns containing `query` (case-insensitive), oldest first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Turn> {
        if limit == 0 {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        let buf = self.inner.lock();
        let mut hits: Vec<Turn> = buf
            .turns
            .iter()
            .rev()
            .filter(|t| t.text.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect();
        hits.reverse();
        hits
    }

    /// Role counts, time span and key topics of the current buffer.
    pub fn summary(&self) -> ConversationSummary {
        let turns = self.snapshot();
        let count = |role: TurnRole| turns.iter().filter(|t| t.role == role).count();
        let span_ms = match (turns.first(), turns.last()) {
            (Some(first), Some(last)) => last.timestamp.saturating_sub(first.timestamp),
            _ => 0,
        };

        ConversationSummary {
            entries: turns.len(),
            turns_covered: turns.iter().map(|t| t.covers().count()).sum(),
            user_turns: count(TurnRole::User),
            agent_turns: count(TurnRole::Agent),
            summary_entries: count(TurnRole::Summary),
            span_ms,
            key_topics: key_topics(&turns, KEY_TOPICS),
        }
    }

    fn summarize(&self, evicted: &[Turn]) -> Turn {
        // `evicted` is non-empty and contiguous; callers drain from the front.
        let first = evicted.first().map(|t| t.covers().first).unwrap_or_default();
        let last = evicted.last().map(|t| t.covers().last).unwrap_or_default();

        let joined = evicted
            .iter()
            .map(|t| match t.role {
                TurnRole::Summary => t.text.clone(),
                role => format!("{}: {}", role.label(), t.text),
            })
            .collect::<Vec<_>>()
            .join(" | ");

        Turn {
            seq: last,
            role: TurnRole::Summary,
            text: compact(&joined, self.summary_max_chars),
            timestamp: now_millis(),
            span: Some(SeqSpan { first, last }),
        }
    }
}

/// Render turns as `[ROLE] text` lines.
pub fn render_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("[{}] {}", t.role.label(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

const KEY_TOPICS: usize = 5;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "could", "does", "from", "have", "into", "more", "most",
    "only", "other", "over", "should", "some", "such", "than", "that", "their", "them", "then",
    "there", "these", "they", "this", "those", "under", "very", "were", "what", "when", "which",
    "while", "will", "with", "would",
];

/// The `limit` most frequent content words, ties in order of first use.
fn key_topics(turns: &[Turn], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let words = turns
        .iter()
        .filter(|t| !t.is_summary())
        .flat_map(|t| t.text.split(|c: char| !c.is_alphanumeric() && c != '-'))
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| w.chars().count() > 3 && !STOPWORDS.contains(&w.as_str()));

    for (order, word) in words.enumerate() {
        counts.entry(word).or_insert((0, order)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|(_, (ca, oa)), (_, (cb, ob))| cb.cmp(ca).then(oa.cmp(ob)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Fit `text` into `max_chars`, marking a cut with `...` when there is room for it.
fn compact(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else if max_chars < 3 {
        text.chars().take(max_chars).collect()
    } else {
        truncate_chars(text, max_chars - 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn originals_covered(turns: &[Turn]) -> Vec<u64> {
        turns
            .iter()
            .flat_map(|t| {
                let span = t.covers();
                span.first..=span.last
            })
            .collect()
    }

    #[test]
    fn appends_below_capacity_keep_order() {
        let mem = ShortTermMemory::new(4, 400);
        mem.append(TurnRole::User, "a");
        mem.append(TurnRole::Agent, "b");

        let snap = mem.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].seq, 1);
        assert_eq!(snap[1].seq, 2);
        assert!(snap.iter().all(|t| !t.is_summary()));
    }

    #[test]
    fn capacity_two_folds_a_and_b() {
        let mem = ShortTermMemory::new(2, 400);
        mem.append(TurnRole::User, "A");
        mem.append(TurnRole::Agent, "B");
        mem.append(TurnRole::User, "C");

        let snap = mem.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].is_summary());
        assert_eq!(snap[0].span, Some(SeqSpan { first: 1, last: 2 }));
        assert!(snap[0].text.contains("USER: A"));
        assert!(snap[0].text.contains("AGENT: B"));
        assert_eq!(snap[1].text, "C");
        assert_eq!(snap[1].seq, 3);
    }

    #[test]
    fn capacity_one_collapses_into_single_summary() {
        let mem = ShortTermMemory::new(1, 400);
        mem.append(TurnRole::User, "first");
        assert_eq!(mem.len(), 1);
        assert!(!mem.snapshot()[0].is_summary());

        mem.append(TurnRole::Agent, "second");
        let snap = mem.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap[0].is_summary());
        assert_eq!(snap[0].span, Some(SeqSpan { first: 1, last: 2 }));

        mem.append(TurnRole::User, "third");
        let snap = mem.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].span, Some(SeqSpan { first: 1, last: 3 }));
    }

    #[test]
    fn bound_and_provenance_hold_for_many_capacities() {
        for capacity in 1..=7 {
            let mem = ShortTermMemory::new(capacity, 400);
            for i in 1..=40u64 {
                mem.append(TurnRole::User, format!("turn {i}"));
                let snap = mem.snapshot();
                assert!(snap.len() <= capacity, "capacity {capacity} exceeded");

                // Every original turn is covered exactly once, in order.
                let covered = originals_covered(&snap);
                let expected: Vec<u64> = (1..=i).collect();
                assert_eq!(covered, expected, "capacity {capacity} after {i} appends");
            }
        }
    }

    #[test]
    fn re_evicted_summary_extends_span() {
        let mem = ShortTermMemory::new(3, 400);
        for text in ["a", "b", "c", "d", "e"] {
            mem.append(TurnRole::User, text);
        }
        let snap = mem.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].span, Some(SeqSpan { first: 1, last: 3 }));
        assert_eq!(snap[1].text, "d");
        assert_eq!(snap[2].text, "e");
    }

    #[test]
    fn summary_is_truncated() {
        let mem = ShortTermMemory::new(2, 20);
        mem.append(TurnRole::User, "x".repeat(50));
        mem.append(TurnRole::Agent, "y".repeat(50));
        mem.append(TurnRole::User, "z");

        let summary = &mem.snapshot()[0];
        assert!(summary.text.chars().count() <= 20);
        assert!(summary.text.ends_with("..."));
    }

    #[test]
    fn tiny_summary_limit_is_respected() {
        for limit in 0..=3 {
            let mem = ShortTermMemory::new(2, limit);
            mem.append(TurnRole::User, "first turn");
            mem.append(TurnRole::Agent, "second turn");
            mem.append(TurnRole::User, "third");

            let summary = &mem.snapshot()[0];
            assert!(summary.is_summary());
            assert!(summary.text.chars().count() <= limit, "limit {limit}");
        }
    }

    #[test]
    fn summary_counts_roles_and_topics() {
        let mem = ShortTermMemory::new(3, 400);
        mem.append(TurnRole::User, "Effects of caffeine on sleep");
        mem.append(TurnRole::Agent, "Plan: caffeine background, sleep latency");
        mem.append(TurnRole::Agent, "Caffeine half-life is about five hours");
        mem.append(TurnRole::Agent, "Report on caffeine and sleep written");

        let summary = mem.summary();
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.turns_covered, 4);
        assert_eq!(summary.summary_entries, 1);
        assert_eq!(summary.user_turns, 0);
        assert_eq!(summary.agent_turns, 2);
        assert_eq!(summary.key_topics[0], "caffeine");
        assert!(summary.key_topics.contains(&"half-life".to_string()));
        assert!(!summary.key_topics.contains(&"about".to_string()));
        assert!(summary.to_string().starts_with("3 entries covering 4 turns"));
    }

    #[test]
    fn empty_buffer_summary() {
        let summary = ShortTermMemory::new(4, 400).summary();
        assert_eq!(summary.entries, 0);
        assert_eq!(summary.turns_covered, 0);
        assert_eq!(summary.span_ms, 0);
        assert!(summary.key_topics.is_empty());
    }

    #[test]
    fn render_and_search() {
        let mem = ShortTermMemory::new(10, 400);
        mem.append(TurnRole::User, "Caffeine and sleep");
        mem.append(TurnRole::Agent, "Plan: 3 sections");
        mem.append(TurnRole::Agent, "caffeine half-life is ~5h");

        assert_eq!(
            mem.render_context(),
            "[USER] Caffeine and sleep\n[AGENT] Plan: 3 sections\n[AGENT] caffeine half-life is ~5h"
        );

        let hits = mem.search("CAFFEINE", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seq, 3);

        let hits = mem.search("caffeine", 5);
        assert_eq!(hits.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![1, 3]);
        assert!(mem.search("caffeine", 0).is_empty());
    }

    #[test]
    fn clear_keeps_sequence_monotonic() {
        let mem = ShortTermMemory::new(5, 400);
        mem.append(TurnRole::User, "a");
        mem.clear();
        assert!(mem.is_empty());
        let turn = mem.append(TurnRole::User, "b");
        assert_eq!(turn.seq, 2);
    }
}
