//! Checkpoint stores: load and save [`ConversationState`] by thread id.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::state::ConversationState;

/// Durable per-thread state.
///
/// `load` of an unknown thread yields a fresh default state. A failing store
/// is reported as `Error::Checkpoint` and ends the turn.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<ConversationState>;
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()>;
}

/// Longest thread id accepted as a file name.
pub const MAX_THREAD_ID_LEN: usize = 128;

/// Reject ids that are empty, too long, hidden, or not plain file-name characters.
pub fn validate_thread_id(thread_id: &str) -> Result<()> {
    let ok = !thread_id.is_empty()
        && thread_id.len() <= MAX_THREAD_ID_LEN
        && !thread_id.starts_with('.')
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidThreadId(thread_id.to_string()))
    }
}

/// In-process store, lost on exit.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: Mutex<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.threads.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<ConversationState> {
        validate_thread_id(thread_id)?;
        Ok(self
            .threads
            .lock()
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        validate_thread_id(thread_id)?;
        self.threads
            .lock()
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }
}

const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    thread_id: String,
    updated_at: i64,
    state: ConversationState,
}

/// One JSON file per thread under a directory.
///
/// Writes go to a temporary file that is then renamed over the old one, so a
/// crash mid-write leaves the previous checkpoint intact. Two processes saving
/// the same thread race and the last rename wins.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", thread_id))
    }

    /// Thread ids with a stored checkpoint, sorted.
    pub async fn list_threads(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_error(&self.dir, e)),
        };

        let mut ids = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_thread_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Checkpoint(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<ConversationState> {
        validate_thread_id(thread_id)?;
        let path = self.path_for(thread_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(thread_id, "no checkpoint, starting fresh");
                return Ok(ConversationState::default());
            }
            Err(e) => return Err(io_error(&path, e)),
        };

        let envelope: Envelope = serde_json::from_str(&content)
            .map_err(|e| Error::Checkpoint(format!("{}: {}", path.display(), e)))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(Error::Checkpoint(format!(
                "{}: unsupported checkpoint version {}",
                path.display(),
                envelope.version
            )));
        }
        Ok(envelope.state)
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        validate_thread_id(thread_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            thread_id: thread_id.to_string(),
            updated_at: chrono::Utc::now().timestamp_millis(),
            state: state.clone(),
        };
        let content = serde_json::to_string_pretty(&envelope)
            .map_err(|e| Error::Checkpoint(e.to_string()))?;

        let path = self.path_for(thread_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", thread_id));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        tracing::debug!(thread_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DialogueMode;
    use bolus_ai::Message;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("bolus-checkpoints-{}", uuid::Uuid::new_v4()))
    }

    fn sample_state() -> ConversationState {
        let mut state = ConversationState::default();
        state.push(Message::user("I ate grapes"));
        state.set_mode(DialogueMode::Meal);
        state
    }

    #[test]
    fn test_validate_thread_id() {
        assert!(validate_thread_id("thread-1_a.b").is_ok());
        assert!(validate_thread_id("").is_err());
        assert!(validate_thread_id(".hidden").is_err());
        assert!(validate_thread_id("../etc/passwd").is_err());
        assert!(validate_thread_id("a b").is_err());
        assert!(validate_thread_id(&"x".repeat(MAX_THREAD_ID_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_memory_store_defaults_and_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load("t1").await.unwrap(), ConversationState::default());

        let state = sample_state();
        store.save("t1", &state).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap(), state);
        assert_eq!(store.thread_ids(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_list() {
        let dir = scratch_dir();
        let store = FileCheckpointStore::new(&dir);
        assert!(store.list_threads().await.unwrap().is_empty());
        assert_eq!(store.load("t1").await.unwrap(), ConversationState::default());

        let state = sample_state();
        store.save("t2", &state).await.unwrap();
        store.save("t1", &ConversationState::default()).await.unwrap();
        assert_eq!(store.load("t2").await.unwrap(), state);
        assert_eq!(store.list_threads().await.unwrap(), vec!["t1", "t2"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_checkpoint() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bad.json"), "{not json").unwrap();
        let store = FileCheckpointStore::new(&dir);
        let err = store.load("bad").await.unwrap_err();
        assert!(matches!(err, Error::Checkpoint(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_store_rejects_bad_thread_id() {
        let store = FileCheckpointStore::new(scratch_dir());
        let err = store.load("../x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidThreadId(_)));
    }
}
