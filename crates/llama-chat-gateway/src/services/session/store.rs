use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::SessionError;
use crate::models::chat::{SessionId, SessionRecord};

const RECORD_EXT: &str = "json";

/// Durable session records.
///
/// Implementations do no locking of their own; callers hold the session lock
/// across a load/mutate/save sequence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Missing or unreadable records load as empty.
    async fn load(&self, id: &SessionId) -> SessionRecord;
    /// Replace the whole record. Either the new record is fully written or
    /// the previous one is left untouched.
    async fn save(&self, id: &SessionId, record: &SessionRecord) -> Result<(), SessionError>;
    async fn exists(&self, id: &SessionId) -> Result<bool, SessionError>;
    async fn list(&self) -> Result<Vec<SessionId>, SessionError>;
    async fn delete(&self, id: &SessionId) -> Result<(), SessionError>;
    async fn count(&self) -> Result<usize, SessionError>;
}

/// One pretty-printed JSON document per session: `<dir>/<id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXT))
    }

    fn temp_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!(".{}.{}.tmp", id, RECORD_EXT))
    }

    async fn write_atomic(&self, id: &SessionId, bytes: &[u8]) -> Result<(), SessionError> {
        let tmp_path = self.temp_path(id);

        let mut tmp_file = fs::File::create(&tmp_path).await?;
        tmp_file.write_all(bytes).await?;
        tmp_file.sync_all().await?;
        drop(tmp_file);

        fs::rename(&tmp_path, self.record_path(id)).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load(&self, id: &SessionId) -> SessionRecord {
        let path = self.record_path(id);

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return SessionRecord::default(),
            Err(e) => {
                warn!("Unreadable history for chat_id '{}', using empty state: {}", id, e);
                return SessionRecord::default();
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("Corrupt history for chat_id '{}', using empty state: {}", id, e);
                SessionRecord::default()
            }
        }
    }

    async fn save(&self, id: &SessionId, record: &SessionRecord) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec_pretty(record)?;

        if let Err(e) = self.write_atomic(id, &bytes).await {
            let _ = fs::remove_file(self.temp_path(id)).await;
            return Err(e);
        }

        debug!("Saved {} turns for chat_id '{}'", record.history.len(), id);
        Ok(())
    }

    async fn exists(&self, id: &SessionId) -> Result<bool, SessionError> {
        Ok(fs::try_exists(self.record_path(id)).await?)
    }

    async fn list(&self) -> Result<Vec<SessionId>, SessionError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            // Stems outside the id charset (including temp files) are not sessions
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| SessionId::parse(s).ok())
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SessionError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn count(&self) -> Result<usize, SessionError> {
        Ok(self.list().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Turn;
    use tempfile::TempDir;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn store() -> (TempDir, JsonFileStore) {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("history")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_record_loads_empty() {
        let (_dir, store) = store();
        assert_eq!(store.load(&id("abc")).await, SessionRecord::default());
        assert!(!store.exists(&id("abc")).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (_dir, store) = store();
        let record = SessionRecord {
            system_prompt: Some("Be terse.".to_string()),
            history: vec![Turn::new("hi", "hey")],
        };

        store.save(&id("abc"), &record).await.unwrap();

        assert_eq!(store.load(&id("abc")).await, record);
        assert!(store.exists(&id("abc")).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let (_dir, store) = store();
        store.save(&id("abc"), &SessionRecord::default()).await.unwrap();
        store.save(&id("abc"), &SessionRecord::default()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["abc.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_record_masked_as_empty() {
        let (_dir, store) = store();
        std::fs::write(store.dir().join("broken.json"), b"{ not json").unwrap();

        assert_eq!(store.load(&id("broken")).await, SessionRecord::default());
        // Still counts as a known session until deleted
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_seeded_record_with_missing_fields() {
        let (_dir, store) = store();
        std::fs::write(
            store.dir().join("seeded.json"),
            br#"{"system_prompt": "You are a pirate."}"#,
        )
        .unwrap();

        let record = store.load(&id("seeded")).await;
        assert_eq!(record.system_prompt.as_deref(), Some("You are a pirate."));
        assert!(record.history.is_empty());
    }

    #[tokio::test]
    async fn test_list_ignores_foreign_files() {
        let (_dir, store) = store();
        store.save(&id("b"), &SessionRecord::default()).await.unwrap();
        store.save(&id("a"), &SessionRecord::default()).await.unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"x").unwrap();
        std::fs::write(store.dir().join(".c.json.tmp"), b"x").unwrap();
        std::fs::write(store.dir().join("bad name.json"), b"{}").unwrap();

        assert_eq!(store.list().await.unwrap(), vec![id("a"), id("b")]);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_dir, store) = store();
        store.save(&id("keep"), &SessionRecord::default()).await.unwrap();

        let err = store.delete(&id("ghost")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(ref missing) if missing.as_str() == "ghost"));
        assert_eq!(store.count().await.unwrap(), 1);

        store.delete(&id("keep")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
