//! Append-only destinations for chain-of-thought entries.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use delve_common::{jsonl, ChainOfThoughtEntry};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink rejected entry: {0}")]
    Sink(String),
}

/// Lazy, finite sequence of entries in creation order.
pub type Replay = Box<dyn Iterator<Item = Result<ChainOfThoughtEntry, RecorderError>> + Send>;

/// Append-only store of chain-of-thought entries.
///
/// Implementations never modify an entry once appended.
pub trait CotSink: Send + Sync {
    fn append(&self, entry: &ChainOfThoughtEntry) -> Result<(), RecorderError>;

    /// Entries of `session_id`, in the order they were appended.
    fn replay(&self, session_id: &str) -> Result<Replay, RecorderError>;
}

/// Process-local sink, mostly for tests and one-shot runs.
#[derive(Default)]
pub struct MemorySink {
    entries: RwLock<Vec<ChainOfThoughtEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CotSink for MemorySink {
    fn append(&self, entry: &ChainOfThoughtEntry) -> Result<(), RecorderError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    fn replay(&self, session_id: &str) -> Result<Replay, RecorderError> {
        let entries: Vec<ChainOfThoughtEntry> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        Ok(Box::new(entries.into_iter().map(Ok)))
    }
}

/// JSON-lines file sink. One entry per line, appended whole or not at all.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.create(true).read(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CotSink for JsonlSink {
    fn append(&self, entry: &ChainOfThoughtEntry) -> Result<(), RecorderError> {
        let line = serde_json::to_string(entry)?;
        jsonl::append_line(&mut self.file.lock(), &line)?;
        Ok(())
    }

    fn replay(&self, session_id: &str) -> Result<Replay, RecorderError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let session_id = session_id.to_string();

        let iter = reader.lines().filter_map(move |line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => match serde_json::from_str::<ChainOfThoughtEntry>(&line) {
                Ok(entry) if entry.session_id == session_id => Some(Ok(entry)),
                Ok(_) => None,
                Err(e) => Some(Err(RecorderError::from(e))),
            },
            Err(e) => Some(Err(RecorderError::from(e))),
        });
        Ok(Box::new(iter))
    }
}
