//! Two-tier memory for Delve sessions.
//!
//! - **Short-term**: a bounded, per-session buffer of conversation turns.
//!   Overflowing turns are folded into a summary entry instead of dropped.
//! - **Long-term**: durable notes with embeddings, shared by every session
//!   and retrieved by cosine similarity.
//!
//! ```text
//!  agent turn ──► ShortTermMemory ──snapshot──┐
//!                                             ├──► ContextBuilder ──► prompt context
//!  query ──► Embedder ──► VectorIndex ──hits──┘
//! ```

pub mod embedding;
pub mod long_term;
pub mod retrieval;
pub mod short_term;
pub mod types;

pub use embedding::{build_embedder, Embedder, HashEmbedder};
#[cfg(feature = "fastembed")]
pub use embedding::FastEmbedder;
pub use long_term::{InMemoryIndex, JsonlIndex, LongTermMemory, VectorIndex};
pub use retrieval::{estimate_tokens, ContextBuilder};
pub use short_term::ShortTermMemory;
pub use types::{
    ConversationSummary, LongTermEntry, MemoryConfig, MemoryError, MemoryFilter, MemoryKind,
    MemoryStats, RetrievedMemory, SeqSpan, Turn, TurnRole,
};
