//! Session orchestration for Delve.
//!
//! The orchestrator drives each research session through
//! `planning -> researching -> writing -> done`, with `failed` reachable
//! from every running state.
//!
//! # Architecture
//!
//! ```text
//!   topic
//!     │
//!     ▼
//! ┌──────────────┐   snapshot + top-k    ┌──────────────────────┐
//! │ Orchestrator │◄─────────────────────►│ Short/Long-term mem  │
//! └──────┬───────┘                       └──────────────────────┘
//!        │ Plan ─► Research × N (JoinSet) ─► Write
//!        ▼
//! ┌──────────────┐
//! │   Recorder   │  one entry per agent step
//! └──────────────┘
//! ```
//!
//! Planner and writer failures end the session. Researcher failures only
//! degrade their own section unless every section degrades.

pub mod config;
mod fanout;
pub mod orchestrator;
pub mod session;

pub use config::{DelveConfig, RecorderConfig, ResearchConfig};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use session::SessionHandle;
