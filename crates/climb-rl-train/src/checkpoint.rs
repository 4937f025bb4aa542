//! Checkpoint format and storage backends

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use climb_rl_core::{AgentSnapshot, RLError, Result};

/// Checkpoint layout version written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// Entry in the bounded save history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Save identifier
    pub id: Uuid,
    /// Episodes completed at save time
    pub episode: usize,
    /// Rolling average reward at save time
    pub average_reward: f32,
    /// Rolling success rate at save time
    pub success_rate: f32,
    /// When the checkpoint was written
    pub saved_at: DateTime<Utc>,
}

/// Training progress stored next to the parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Layout version, see [`FORMAT_VERSION`]
    pub format_version: u32,
    /// Agent hyperparameters
    pub hyperparameters: serde_json::Value,
    /// Episodes completed
    pub episodes: usize,
    /// Environment steps taken
    pub total_steps: u64,
    /// Best episode reward
    pub best_reward: Option<f32>,
    /// Rolling success rate
    pub success_rate: f32,
    /// Previous saves, oldest first
    pub history: Vec<CheckpointRecord>,
}

/// Owned copy of everything needed to resume training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Agent parameters
    pub snapshot: AgentSnapshot,
    /// Progress metadata
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Reject checkpoints written with another layout
    pub fn check_version(&self) -> Result<()> {
        if self.metadata.format_version == FORMAT_VERSION {
            Ok(())
        } else {
            Err(RLError::Persistence(format!(
                "unsupported checkpoint format version {} (expected {FORMAT_VERSION})",
                self.metadata.format_version
            )))
        }
    }
}

/// Storage for checkpoints addressed by key
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint` under `key`, replacing any previous one
    async fn save_checkpoint(&self, key: &str, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the checkpoint stored under `key`
    async fn load_checkpoint(&self, key: &str) -> Result<Checkpoint>;
}

/// JSON files in a directory, one per key
///
/// Writes go to `<key>.json.tmp` and are renamed over `<key>.json`, so a
/// reader never sees a partially written checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store checkpoints under `dir`, created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the checkpoint files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path for `key`
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn persistence(action: &str, path: &Path, e: impl std::fmt::Display) -> RLError {
    RLError::Persistence(format!("{action} {}: {e}", path.display()))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_checkpoint(&self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persistence("create", &self.dir, e))?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        let json = serde_json::to_vec_pretty(checkpoint)?;

        fs::write(&tmp, json).await.map_err(|e| persistence("write", &tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| persistence("rename", &path, e))?;

        info!(path = %path.display(), episodes = checkpoint.metadata.episodes, "saved checkpoint");
        Ok(())
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Checkpoint> {
        let path = self.path_for(key);
        let json = fs::read(&path).await.map_err(|e| persistence("read", &path, e))?;
        let checkpoint: Checkpoint =
            serde_json::from_slice(&json).map_err(|e| persistence("parse", &path, e))?;
        checkpoint.check_version()?;
        debug!(path = %path.display(), "loaded checkpoint");
        Ok(checkpoint)
    }
}

/// In-process store, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing has been saved
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save_checkpoint(&self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Checkpoint> {
        let checkpoint = self
            .entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| RLError::Persistence(format!("no checkpoint stored under {key}")))?;
        checkpoint.check_version()?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climb_rl_core::AgentKind;

    fn sample_checkpoint() -> Checkpoint {
        Checkpoint {
            snapshot: AgentSnapshot::new(AgentKind::Dqn)
                .with_network("q_network", vec![0.5, -1.0, 2.0])
                .with_network("target_network", vec![0.5, -1.0, 2.0]),
            metadata: CheckpointMetadata {
                format_version: FORMAT_VERSION,
                hyperparameters: serde_json::json!({ "gamma": 0.99 }),
                episodes: 12,
                total_steps: 3400,
                best_reward: None,
                success_rate: 0.25,
                history: vec![CheckpointRecord {
                    id: Uuid::new_v4(),
                    episode: 12,
                    average_reward: -3.5,
                    success_rate: 0.25,
                    saved_at: Utc::now(),
                }],
            },
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("climb-rl-checkpoints-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = temp_dir();
        let store = FileCheckpointStore::new(&dir);
        let checkpoint = sample_checkpoint();

        store.save_checkpoint("latest", &checkpoint).await.unwrap();
        assert!(store.path_for("latest").exists());
        assert!(!dir.join("latest.json.tmp").exists());

        let loaded = store.load_checkpoint("latest").await.unwrap();
        assert_eq!(loaded, checkpoint);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_file_store_replaces_existing() {
        let dir = temp_dir();
        let store = FileCheckpointStore::new(&dir);
        let mut checkpoint = sample_checkpoint();
        store.save_checkpoint("latest", &checkpoint).await.unwrap();

        checkpoint.metadata.episodes = 24;
        store.save_checkpoint("latest", &checkpoint).await.unwrap();
        assert_eq!(store.load_checkpoint("latest").await.unwrap().metadata.episodes, 24);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_a_persistence_error() {
        let store = FileCheckpointStore::new(temp_dir());
        let err = store.load_checkpoint("latest").await.unwrap_err();
        assert!(matches!(err, RLError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_unsupported_version_is_rejected() {
        let dir = temp_dir();
        let store = FileCheckpointStore::new(&dir);
        let mut checkpoint = sample_checkpoint();
        checkpoint.metadata.format_version = FORMAT_VERSION + 1;
        store.save_checkpoint("latest", &checkpoint).await.unwrap();

        let err = store.load_checkpoint("latest").await.unwrap_err();
        assert!(matches!(err, RLError::Persistence(_)));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        assert!(store.is_empty().await);
        assert!(store.load_checkpoint("latest").await.is_err());

        store.save_checkpoint("latest", &sample_checkpoint()).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load_checkpoint("latest").await.unwrap().metadata.episodes, 12);
    }
}
