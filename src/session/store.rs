//! Persistence collaborators
//!
//! Sessions with a persistence id restore their history through
//! `load_messages` and append every completed turn through `store_envelope`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::envelope::{replay, MessageEnvelope};
use crate::core::sync::{read, write};
use crate::core::{RuntimeError, RuntimeResult};
use crate::llm::Message;

/// Default directory for session storage
pub const SESSIONS_DIR: &str = "sessions";

/// Storage for session histories
#[async_trait::async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Load the conversation stored under `persistence_id`; empty if none
    async fn load_messages(&self, persistence_id: &str) -> RuntimeResult<Vec<Message>>;

    /// Append a record to the history stored under `persistence_id`
    async fn store_envelope(
        &self,
        persistence_id: &str,
        envelope: &MessageEnvelope,
    ) -> RuntimeResult<()>;
}

/// Append-only JSONL history files, one directory per persistence id
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a store under the default directory
    pub fn new() -> Self {
        Self::with_dir(SESSIONS_DIR)
    }

    /// Create a store under a custom directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: dir.into(),
        }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the history file path for a persistence id
    pub fn history_path(&self, persistence_id: &str) -> RuntimeResult<PathBuf> {
        if persistence_id.is_empty()
            || persistence_id.contains(['/', '\\'])
            || persistence_id.starts_with('.')
        {
            return Err(RuntimeError::invalid_config(format!(
                "invalid persistence id: {:?}",
                persistence_id
            )));
        }
        Ok(self.base_dir.join(persistence_id).join("history.jsonl"))
    }

    /// Load every record, oldest first
    pub async fn load_envelopes(&self, persistence_id: &str) -> RuntimeResult<Vec<MessageEnvelope>> {
        let path = self.history_path(persistence_id)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut envelopes = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            envelopes.push(serde_json::from_str(&line)?);
        }
        Ok(envelopes)
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceStore for FileStore {
    async fn load_messages(&self, persistence_id: &str) -> RuntimeResult<Vec<Message>> {
        let envelopes = self.load_envelopes(persistence_id).await?;
        Ok(replay(&envelopes))
    }

    async fn store_envelope(
        &self,
        persistence_id: &str,
        envelope: &MessageEnvelope,
    ) -> RuntimeResult<()> {
        let path = self.history_path(persistence_id)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut line = serde_json::to_string(envelope)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// In-process store, for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<MessageEnvelope>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored under a persistence id
    pub fn envelopes(&self, persistence_id: &str) -> Vec<MessageEnvelope> {
        read(&self.records)
            .get(persistence_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PersistenceStore for MemoryStore {
    async fn load_messages(&self, persistence_id: &str) -> RuntimeResult<Vec<Message>> {
        Ok(read(&self.records)
            .get(persistence_id)
            .map(|records| replay(records))
            .unwrap_or_default())
    }

    async fn store_envelope(
        &self,
        persistence_id: &str,
        envelope: &MessageEnvelope,
    ) -> RuntimeResult<()> {
        write(&self.records)
            .entry(persistence_id.to_string())
            .or_default()
            .push(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::with_dir(temp_dir.path());
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_append_load_messages() {
        let (store, _temp) = create_test_store();
        let session = Uuid::new_v4();

        store
            .store_envelope("chat", &MessageEnvelope::message(session, Message::user("Hello")))
            .await
            .unwrap();
        store
            .store_envelope("chat", &MessageEnvelope::message(session, Message::assistant("Hi there")))
            .await
            .unwrap();

        let messages = store.load_messages("chat").await.unwrap();
        assert_eq!(messages, vec![Message::user("Hello"), Message::assistant("Hi there")]);
        assert!(store.history_path("chat").unwrap().exists());
    }

    #[tokio::test]
    async fn test_missing_history_is_empty() {
        let (store, _temp) = create_test_store();
        assert!(store.load_messages("nothing-here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compacted_record_replaces_history() {
        let (store, _temp) = create_test_store();
        let session = Uuid::new_v4();
        for text in ["a", "b", "c"] {
            store
                .store_envelope("chat", &MessageEnvelope::message(session, Message::user(text)))
                .await
                .unwrap();
        }
        store
            .store_envelope(
                "chat",
                &MessageEnvelope::compacted(session, vec![Message::user("summary")]),
            )
            .await
            .unwrap();

        assert_eq!(store.load_envelopes("chat").await.unwrap().len(), 4);
        assert_eq!(
            store.load_messages("chat").await.unwrap(),
            vec![Message::user("summary")]
        );
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let (store, _temp) = create_test_store();
        assert!(store.history_path("../escape").is_err());
        assert!(store.history_path("a/b").is_err());
        assert!(store.history_path("").is_err());
        assert!(store.history_path("ok-id").is_ok());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        let session = Uuid::new_v4();
        store
            .store_envelope("m", &MessageEnvelope::message(session, Message::user("x")))
            .await
            .unwrap();
        assert_eq!(store.load_messages("m").await.unwrap(), vec![Message::user("x")]);
        assert_eq!(store.envelopes("m").len(), 1);
        assert!(store.load_messages("other").await.unwrap().is_empty());
    }
}
