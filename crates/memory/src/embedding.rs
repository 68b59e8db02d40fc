//! Text embeddings for long-term memory.
//!
//! [`FastEmbedder`] (the default `fastembed` feature) wraps a local ONNX
//! sentence-embedding model. [`HashEmbedder`] is a deterministic feature-hashed
//! bag of words for tests and offline use, selected with `embedding_model = "hash"`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::types::{MemoryConfig, MemoryError};

/// Turns text into a fixed-width vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets; the bucket counts are L2-normalised. Texts sharing vocabulary
/// score higher under cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

#[cfg(feature = "fastembed")]
mod fast {
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use once_cell::sync::OnceCell;
    use tokio::task;
    use tracing::{debug, info, instrument};

    use super::Embedder;
    use crate::types::MemoryError;

    /// Local sentence-embedding model, loaded on first use.
    pub struct FastEmbedder {
        name: String,
        model_name: EmbeddingModel,
        dimension: usize,
        model: OnceCell<Arc<TextEmbedding>>,
    }

    impl FastEmbedder {
        /// Resolve a model name and verify it produces `expected_dim`-wide vectors.
        pub fn from_config(model_name: &str, expected_dim: usize) -> Result<Self, MemoryError> {
            let (model, dimension) = match model_name {
                "all-MiniLM-L6-v2" | "AllMiniLML6V2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "all-MiniLM-L12-v2" | "AllMiniLML12V2" => (EmbeddingModel::AllMiniLML12V2, 384),
                "bge-small-en-v1.5" | "BGESmallENV15" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" | "BGEBaseENV15" => (EmbeddingModel::BGEBaseENV15, 768),
                "nomic-embed-text-v1.5" | "NomicEmbedTextV15" => {
                    (EmbeddingModel::NomicEmbedTextV15, 768)
                }
                other => {
                    return Err(MemoryError::Embedding(format!(
                        "unknown embedding model '{other}'"
                    )));
                }
            };
            if dimension != expected_dim {
                return Err(MemoryError::DimensionMismatch {
                    expected: expected_dim,
                    actual: dimension,
                });
            }
            Ok(Self {
                name: model_name.to_string(),
                model_name: model,
                dimension,
                model: OnceCell::new(),
            })
        }

        #[instrument(skip(self))]
        fn get_or_init_model(&self) -> Result<Arc<TextEmbedding>, MemoryError> {
            self.model
                .get_or_try_init(|| {
                    info!(model = ?self.model_name, "Initializing embedding model");
                    let mut options = InitOptions::new(self.model_name.clone());
                    options.show_download_progress = false;
                    let model = TextEmbedding::try_new(options)
                        .map_err(|e| MemoryError::Embedding(e.to_string()))?;
                    Ok(Arc::new(model))
                })
                .cloned()
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        #[instrument(skip(self, text), fields(text_len = text.len()))]
        async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
            let model = self.get_or_init_model()?;
            let text = text.to_string();

            // fastembed is synchronous
            let embeddings = task::spawn_blocking(move || model.embed(vec![text], None))
                .await
                .map_err(|e| MemoryError::Embedding(format!("embedding task failed: {e}")))?
                .map_err(|e| MemoryError::Embedding(e.to_string()))?;

            let vector = embeddings
                .into_iter()
                .next()
                .ok_or_else(|| MemoryError::Embedding("empty embedding result".into()))?;
            debug!(dimension = vector.len(), "Generated embedding");
            Ok(vector)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

}

#[cfg(feature = "fastembed")]
pub use fast::FastEmbedder;

/// Pick the embedder named by `config.embedding_model`.
pub fn build_embedder(config: &MemoryConfig) -> Result<Arc<dyn Embedder>, MemoryError> {
    let embedder: Arc<dyn Embedder> = match config.embedding_model.as_str() {
        "hash" => Arc::new(HashEmbedder::new(config.embedding_dim)),
        #[cfg(feature = "fastembed")]
        other => Arc::new(FastEmbedder::from_config(other, config.embedding_dim)?),
        #[cfg(not(feature = "fastembed"))]
        other => {
            return Err(MemoryError::Embedding(format!(
                "embedding model '{other}' requires the `fastembed` feature"
            )));
        }
    };
    info!(
        embedder = embedder.name(),
        dimension = embedder.dimension(),
        "Embedder ready"
    );
    Ok(embedder)
}
