use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

/// A past run's measured cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub algorithm: String,
    pub model: String,
    pub signal: String,
    /// Wall time in seconds.
    pub time: f64,
    /// CPU percent summed over cores.
    pub cpu_used: f64,
    pub mem_used_bytes: u64,
}

impl HistoryEntry {
    /// Whether this entry describes the given job shape.
    ///
    /// The model base names must be equal and this entry's signal base name must
    /// be a prefix of the request's, so `signal-30x30` covers `signal-30x30-1`.
    pub fn matches(&self, model: &str, signal: &str) -> bool {
        base_name(&self.model) == base_name(model)
            && base_name(signal).starts_with(base_name(&self.signal))
    }
}

fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// Past run costs, consulted for every estimate.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Returns the entries matching `model` and `signal`, oldest first.
    async fn lookup(&self, model: &str, signal: &str) -> Vec<HistoryEntry>;
}

#[async_trait]
impl HistoryStore for Vec<HistoryEntry> {
    async fn lookup(&self, model: &str, signal: &str) -> Vec<HistoryEntry> {
        self.iter()
            .filter(|entry| entry.matches(model, signal))
            .cloned()
            .collect()
    }
}

/// History kept in a JSON array on disk, re-read on every lookup.
///
/// A missing or unreadable file is an empty history.
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Vec<HistoryEntry> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("no history at {}: {e}", self.path.display());
                return Vec::new();
            }
        };

        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            debug!("ignoring unreadable history {}: {e}", self.path.display());
            Vec::new()
        })
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn lookup(&self, model: &str, signal: &str) -> Vec<HistoryEntry> {
        self.load().await.lookup(model, signal).await
    }
}
