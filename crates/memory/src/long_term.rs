//! Durable, similarity-searchable notes shared across sessions.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use delve_common::{jsonl, now_millis};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::embedding::{build_embedder, Embedder};
use crate::types::{
    LongTermEntry, MemoryConfig, MemoryError, MemoryFilter, MemoryKind, MemoryStats,
    RetrievedMemory,
};

/// Storage backend for long-term entries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert an entry. Returns `false` when an entry with the same id exists.
    async fn insert(&self, entry: LongTermEntry) -> Result<bool, MemoryError>;

    /// Up to `k` entries passing `filter`, ranked by cosine similarity to `query`.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<RetrievedMemory>, MemoryError>;

    async fn len(&self) -> Result<usize, MemoryError>;

    /// Entry count per kind.
    async fn kind_counts(&self) -> Result<BTreeMap<MemoryKind, usize>, MemoryError>;

    /// Short backend name for stats and logs.
    fn backend(&self) -> &str;
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Rank by score descending, then newest first, then latest inserted first.
fn rank(
    entries: &[LongTermEntry],
    query: &[f32],
    k: usize,
    filter: &MemoryFilter,
) -> Vec<RetrievedMemory> {
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(usize, f32)> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| filter.matches(e))
        .map(|(i, e)| (i, cosine(&e.embedding, query)))
        .collect();

    scored.sort_by(|(ia, sa), (ib, sb)| {
        sb.total_cmp(sa)
            .then_with(|| entries[*ib].created_at.cmp(&entries[*ia].created_at))
            .then_with(|| ib.cmp(ia))
    });

    scored
        .into_iter()
        .take(k)
        .map(|(i, score)| RetrievedMemory {
            entry: entries[i].clone(),
            score,
        })
        .collect()
}

#[derive(Default)]
struct IndexState {
    entries: Vec<LongTermEntry>,
    ids: HashSet<String>,
}

impl IndexState {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn push(&mut self, entry: LongTermEntry) {
        self.ids.insert(entry.id.clone());
        self.entries.push(entry);
    }

    fn kind_counts(&self) -> BTreeMap<MemoryKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Process-local index; contents are lost on exit.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<IndexState>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert(&self, entry: LongTermEntry) -> Result<bool, MemoryError> {
        let mut state = self.state.write();
        if state.contains(&entry.id) {
            return Ok(false);
        }
        state.push(entry);
        Ok(true)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<RetrievedMemory>, MemoryError> {
        Ok(rank(&self.state.read().entries, query, k, filter))
    }

    async fn len(&self) -> Result<usize, MemoryError> {
        Ok(self.state.read().entries.len())
    }

    async fn kind_counts(&self) -> Result<BTreeMap<MemoryKind, usize>, MemoryError> {
        Ok(self.state.read().kind_counts())
    }

    fn backend(&self) -> &str {
        "in_memory"
    }
}

/// Append-only JSON-lines file mirrored by an in-memory index.
///
/// Each entry is appended as one whole line while the
/// index write lock is held, so readers only ever see fully committed entries.
pub struct JsonlIndex {
    path: PathBuf,
    state: RwLock<IndexState>,
    file: Mutex<File>,
}

impl JsonlIndex {
    /// Open (or create) the index file and load existing entries.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut state = IndexState::default();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LongTermEntry>(&line) {
                    Ok(entry) if !state.contains(&entry.id) => state.push(entry),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(path = %path.display(), line = line_no + 1, error = %e, "Skipping unreadable long-term entry");
                    }
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        info!(path = %path.display(), entries = state.entries.len(), "Opened long-term index");

        Ok(Self {
            path,
            state: RwLock::new(state),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VectorIndex for JsonlIndex {
    async fn insert(&self, entry: LongTermEntry) -> Result<bool, MemoryError> {
        let mut state = self.state.write();
        if state.contains(&entry.id) {
            return Ok(false);
        }

        let line = serde_json::to_string(&entry)?;
        jsonl::append_line(&mut self.file.lock(), &line).map_err(|e| {
            MemoryError::StoreUnavailable(format!("{}: {e}", self.path.display()))
        })?;

        state.push(entry);
        Ok(true)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<RetrievedMemory>, MemoryError> {
        Ok(rank(&self.state.read().entries, query, k, filter))
    }

    async fn len(&self) -> Result<usize, MemoryError> {
        Ok(self.state.read().entries.len())
    }

    async fn kind_counts(&self) -> Result<BTreeMap<MemoryKind, usize>, MemoryError> {
        Ok(self.state.read().kind_counts())
    }

    fn backend(&self) -> &str {
        "jsonl"
    }
}

/// Long-term memory: an embedder in front of a vector index.
#[derive(Clone)]
pub struct LongTermMemory {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl LongTermMemory {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self::new(embedder, Arc::new(InMemoryIndex::new()))
    }

    /// JSON-lines backed when `long_term_path` is set, in-memory otherwise.
    pub fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        let embedder = build_embedder(config)?;
        let index: Arc<dyn VectorIndex> = match &config.long_term_path {
            Some(path) => Arc::new(JsonlIndex::open(path)?),
            None => Arc::new(InMemoryIndex::new()),
        };
        Ok(Self::new(embedder, index))
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed and store `content` as a plain note from `source_session_id`.
    ///
    /// The id is derived from session and content, so remembering the same
    /// note twice from one session stores it once.
    pub async fn remember(
        &self,
        content: &str,
        source_session_id: &str,
    ) -> Result<LongTermEntry, MemoryError> {
        self.remember_as(content, source_session_id, MemoryKind::Note, 1.0)
            .await
    }

    /// [`remember`](Self::remember) with an explicit kind and importance.
    ///
    /// Importance is clamped to `0.0..=1.0`.
    #[instrument(skip(self, content), fields(session_id = %source_session_id, kind = %kind))]
    pub async fn remember_as(
        &self,
        content: &str,
        source_session_id: &str,
        kind: MemoryKind,
        importance: f32,
    ) -> Result<LongTermEntry, MemoryError> {
        let embedding = self.embedder.embed(content).await?;
        let id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{source_session_id}\n{content}").as_bytes(),
        );
        let entry = LongTermEntry {
            id: format!("ltm_{id}"),
            content: content.to_string(),
            embedding,
            source_session_id: source_session_id.to_string(),
            created_at: now_millis(),
            kind,
            importance: importance.clamp(0.0, 1.0),
        };
        self.store(entry.clone()).await?;
        Ok(entry)
    }

    /// Store an entry; storing an id that already exists is a no-op.
    pub async fn store(&self, entry: LongTermEntry) -> Result<bool, MemoryError> {
        let expected = self.embedder.dimension();
        if entry.embedding.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: entry.embedding.len(),
            });
        }
        let id = entry.id.clone();
        let inserted = self.index.insert(entry).await?;
        debug!(id = %id, inserted, "Stored long-term entry");
        Ok(inserted)
    }

    /// Up to `k` entries most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedMemory>, MemoryError> {
        self.retrieve_filtered(query, k, &MemoryFilter::default())
            .await
    }

    /// Like [`retrieve`](Self::retrieve), limited to entries matching `filter`.
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<RetrievedMemory>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        self.index.search(&embedding, k, filter).await
    }

    /// Like [`retrieve`](Self::retrieve), but any failure reads as "no prior context".
    pub async fn retrieve_or_empty(&self, query: &str, k: usize) -> Vec<RetrievedMemory> {
        match self.retrieve(query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Long-term retrieval failed, continuing without prior context");
                Vec::new()
            }
        }
    }

    pub async fn len(&self) -> Result<usize, MemoryError> {
        self.index.len().await
    }

    pub async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        let by_kind = self.index.kind_counts().await?;
        Ok(MemoryStats {
            total_entries: by_kind.values().sum(),
            by_kind,
            backend: self.index.backend().to_string(),
            embedder: self.embedder.name().to_string(),
            dimension: self.embedder.dimension(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn entry(id: &str, embedding: Vec<f32>, created_at: u64) -> LongTermEntry {
        LongTermEntry {
            id: id.into(),
            content: id.into(),
            embedding,
            source_session_id: "session_test".into(),
            created_at,
            kind: MemoryKind::Note,
            importance: 1.0,
        }
    }

    #[test]
    fn rank_orders_by_score_then_recency_then_insertion() {
        let entries = vec![
            entry("old-tie", vec![1.0, 0.0], 10),
            entry("best", vec![0.0, 1.0], 5),
            entry("new-tie", vec![1.0, 0.0], 20),
            entry("same-time-later", vec![1.0, 0.0], 20),
        ];
        let query = [0.2, 1.0];
        let ranked = rank(&entries, &query, 10, &MemoryFilter::default());
        let ids: Vec<&str> = ranked.iter().map(|r| r.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["best", "same-time-later", "new-tie", "old-tie"]);

        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn rank_respects_k() {
        let entries = vec![entry("a", vec![1.0], 1), entry("b", vec![1.0], 2)];
        let any = MemoryFilter::default();
        assert_eq!(rank(&entries, &[1.0], 1, &any).len(), 1);
        assert!(rank(&entries, &[1.0], 0, &any).is_empty());
        assert!(rank(&[], &[1.0], 3, &any).is_empty());
    }

    #[tokio::test]
    async fn store_is_idempotent() {
        let ltm = LongTermMemory::in_memory(Arc::new(HashEmbedder::default()));
        let first = ltm.remember("Caffeine half-life is about five hours", "s1").await.unwrap();
        let again = ltm.remember("Caffeine half-life is about five hours", "s1").await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(ltm.len().await.unwrap(), 1);
        assert!(!ltm.store(first).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let ltm = LongTermMemory::in_memory(Arc::new(HashEmbedder::new(4)));
        let result = ltm.store(entry("x", vec![1.0, 0.0], 0)).await;
        assert!(matches!(
            result,
            Err(MemoryError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn retrieve_returns_most_similar_first() {
        let ltm = LongTermMemory::in_memory(Arc::new(HashEmbedder::default()));
        ltm.remember("Rust borrow checker rules", "s1").await.unwrap();
        ltm.remember("Caffeine delays sleep onset", "s1").await.unwrap();
        ltm.remember("Adenosine builds sleep pressure", "s2").await.unwrap();

        let hits = ltm.retrieve("caffeine sleep", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.content, "Caffeine delays sleep onset");
        assert!(hits[0].score >= hits[1].score);

        assert!(ltm.retrieve("caffeine", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_store_retrieves_nothing() {
        let ltm = LongTermMemory::in_memory(Arc::new(HashEmbedder::default()));
        assert!(ltm.retrieve("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filtered_retrieval_by_kind_and_importance() {
        let ltm = LongTermMemory::in_memory(Arc::new(HashEmbedder::default()));
        ltm.remember_as("Caffeine delays sleep onset", "s1", MemoryKind::Notable, 1.0)
            .await
            .unwrap();
        ltm.remember_as("Caffeine sleep background summary", "s1", MemoryKind::SectionSummary, 0.5)
            .await
            .unwrap();
        ltm.remember("Caffeine sleep scratch note", "s1").await.unwrap();

        let notable = ltm
            .retrieve_filtered("caffeine sleep", 5, &MemoryFilter::kind(MemoryKind::Notable))
            .await
            .unwrap();
        assert_eq!(notable.len(), 1);
        assert_eq!(notable[0].entry.kind, MemoryKind::Notable);

        let important = ltm
            .retrieve_filtered(
                "caffeine sleep",
                5,
                &MemoryFilter::default().with_min_importance(0.8),
            )
            .await
            .unwrap();
        assert_eq!(important.len(), 2);
        assert!(important.iter().all(|h| h.entry.importance >= 0.8));

        assert_eq!(ltm.retrieve("caffeine sleep", 5).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn importance_is_clamped() {
        let ltm = LongTermMemory::in_memory(Arc::new(HashEmbedder::default()));
        let entry = ltm
            .remember_as("overweighted", "s1", MemoryKind::Note, 7.0)
            .await
            .unwrap();
        assert_eq!(entry.importance, 1.0);
    }

    #[tokio::test]
    async fn stats_count_entries_per_kind() {
        let ltm = LongTermMemory::in_memory(Arc::new(HashEmbedder::new(32)));
        ltm.remember_as("a", "s1", MemoryKind::Notable, 1.0).await.unwrap();
        ltm.remember_as("b", "s1", MemoryKind::Notable, 1.0).await.unwrap();
        ltm.remember("c", "s1").await.unwrap();

        let stats = ltm.stats().await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_kind.get(&MemoryKind::Notable), Some(&2));
        assert_eq!(stats.by_kind.get(&MemoryKind::Note), Some(&1));
        assert_eq!(stats.backend, "in_memory");
        assert_eq!(stats.embedder, "hash");
        assert_eq!(stats.dimension, 32);
    }

    #[test]
    fn entries_without_kind_or_importance_still_load() {
        let line = r#"{"id":"ltm_1","content":"old","embedding":[1.0],"source_session_id":"s","created_at":5}"#;
        let entry: LongTermEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.kind, MemoryKind::Note);
        assert_eq!(entry.importance, 1.0);
    }
}
