//! The research agents.
//!
//! Three specialists sit behind one [`Agent`] trait:
//!
//! - **Planner**: decomposes a topic into an ordered [`Plan`](delve_common::Plan)
//! - **Researcher**: gathers evidence for one section through the [`ToolGateway`]
//! - **Writer**: turns research results into a sectioned report
//!
//! ```text
//!                 ┌───────────┐
//!   topic ───────►│  Planner  │──── Plan
//!                 └───────────┘
//!                       │ one per section
//!                 ┌─────▼─────┐      ┌─────────────┐
//!                 │Researcher │◄────►│ ToolGateway │
//!                 └───────────┘      └─────────────┘
//!                       │ ResearchResult*
//!                 ┌─────▼─────┐
//!                 │  Writer   │──── Report
//!                 └───────────┘
//! ```
//!
//! Every invocation returns a [`StepTrace`](delve_common::StepTrace), on
//! success and on failure, for the chain-of-thought recorder.

pub mod gateway;
pub mod planning;
pub mod prompts;
pub mod research;
pub mod traits;
pub mod writing;

pub use gateway::{GatewayConfig, HttpToolGateway, RetryingGateway, ToolError, ToolGateway, ToolHit, ToolOutput};
pub use planning::{parse_plan, PlannerAgent};
pub use research::ResearcherAgent;
pub use traits::{Agent, AgentContext, AgentError, AgentOutcome, AgentOutput, AgentRole, AgentTask, MemoryContext};
pub use writing::WriterAgent;
