use crate::core::error::StoryError;
use crate::core::io::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Top-level pipeline stages, in execution order. Checkpoints are recorded
/// once per stage, never per fan-out task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The request a run was started with, recorded before any work.
    Inputs,
    Script,
    Characters,
    EnhancedScript,
    KeyframesAndStyle,
    Scenes,
    Images,
    Media,
    Result,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Inputs => "inputs",
            Stage::Script => "script",
            Stage::Characters => "characters",
            Stage::EnhancedScript => "enhanced_script",
            Stage::KeyframesAndStyle => "keyframes_and_style",
            Stage::Scenes => "scenes",
            Stage::Images => "images",
            Stage::Media => "media",
            Stage::Result => "result",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run stage results, keyed by run id.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    async fn load(&self, run_id: &str, stage: Stage) -> Result<Option<Value>>;
    async fn save(&self, run_id: &str, stage: Stage, value: Value) -> Result<()>;
    async fn clear(&self, run_id: &str) -> Result<()>;
}

pub async fn load_stage<T: DeserializeOwned>(
    store: &dyn RunStateStore,
    run_id: &str,
    stage: Stage,
) -> Result<Option<T>> {
    let Some(value) = store.load(run_id, stage).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            // An unreadable checkpoint only costs a re-run of that stage.
            warn!("Ignoring unreadable checkpoint {}/{}: {}", run_id, stage, e);
            Ok(None)
        }
    }
}

pub async fn save_stage<T: Serialize + ?Sized>(
    store: &dyn RunStateStore,
    run_id: &str,
    stage: Stage,
    value: &T,
) -> Result<()> {
    let value = serde_json::to_value(value)?;
    store.save(run_id, stage, value).await
}

/// Process-lifetime store; resuming only works within one process.
#[derive(Default)]
pub struct MemoryRunStore {
    entries: Mutex<HashMap<(String, Stage), Value>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self, run_id: &str) -> Vec<Stage> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut stages: Vec<Stage> = entries
            .keys()
            .filter(|(id, _)| id == run_id)
            .map(|(_, stage)| *stage)
            .collect();
        stages.sort();
        stages
    }
}

#[async_trait]
impl RunStateStore for MemoryRunStore {
    async fn load(&self, run_id: &str, stage: Stage) -> Result<Option<Value>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(&(run_id.to_string(), stage)).cloned())
    }

    async fn save(&self, run_id: &str, stage: Stage, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((run_id.to_string(), stage), value);
        Ok(())
    }

    async fn clear(&self, run_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(id, _), _| id != run_id);
        Ok(())
    }
}

/// Durable store: `<root>/<run_id>/<stage>.json`.
pub struct StorageRunStore {
    root: PathBuf,
    storage: Arc<dyn Storage>,
}

impl StorageRunStore {
    pub fn new(root: impl Into<PathBuf>, storage: Arc<dyn Storage>) -> Self {
        Self {
            root: root.into(),
            storage,
        }
    }

    /// One directory per run id. Anything outside `[A-Za-z0-9_-]` is
    /// percent-encoded, `%` included, so distinct ids never share a folder.
    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty() {
            return Err(StoryError::Configuration("run id must not be empty".into()).into());
        }
        let mut dir = String::with_capacity(run_id.len());
        for byte in run_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                dir.push(byte as char);
            } else {
                dir.push_str(&format!("%{:02X}", byte));
            }
        }
        Ok(self.root.join(dir))
    }

    fn stage_path(&self, run_id: &str, stage: Stage) -> Result<PathBuf> {
        Ok(self.run_dir(run_id)?.join(format!("{}.json", stage)))
    }
}

#[async_trait]
impl RunStateStore for StorageRunStore {
    async fn load(&self, run_id: &str, stage: Stage) -> Result<Option<Value>> {
        let path = self.stage_path(run_id, stage)?;
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let bytes = self.storage.read(&path).await?;
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;
        Ok(Some(value))
    }

    async fn save(&self, run_id: &str, stage: Stage, value: Value) -> Result<()> {
        let path = self.stage_path(run_id, stage)?;
        let content = serde_json::to_string_pretty(&value)?;
        self.storage.write(&path, content.as_bytes()).await
    }

    async fn clear(&self, run_id: &str) -> Result<()> {
        self.storage.delete(&self.run_dir(run_id)?).await
    }
}
