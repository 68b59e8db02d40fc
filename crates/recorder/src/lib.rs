//! Chain-of-thought recording.
//!
//! Every agent step of a session is sealed into a [`ChainOfThoughtEntry`]
//! with a per-session sequence number and appended to a [`CotSink`]. The
//! [`Recorder`] also fans entries out to live subscribers and can replay a
//! session's trail in creation order.
//!
//! [`ChainOfThoughtEntry`]: delve_common::ChainOfThoughtEntry

pub mod recorder;
pub mod sink;

pub use recorder::{summarize, Recorder, TraceSummary};
pub use sink::{CotSink, JsonlSink, MemorySink, RecorderError, Replay};
