//! Error types for Delve.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DelveError {
    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DelveError>;
