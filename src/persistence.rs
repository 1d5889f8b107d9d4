use crate::error::{RaftError, Result};
use crate::log::Entry;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The durable subset of `State`: `currentTerm`, `votedFor`, and the
/// full entries list. Everything else (`commitIndex`, leader volatile
/// state, the state tag itself) is recovered fresh as `Follower` on
/// restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentSnapshot<V> {
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub entries: Vec<Entry<V>>,
}

impl<V> Default for PersistentSnapshot<V> {
    fn default() -> Self {
        Self { current_term: 0, voted_for: None, entries: Vec::new() }
    }
}

/// The byte-level persistence medium is an external collaborator
/// (§1): this trait is the seam the core plugs an implementation into.
///
/// "synchronous and blocking" in §4.2 describes the contract, not the
/// Rust keyword: a caller must `.await` `write` to completion before
/// dispatching the next event, but the write itself may be performed
/// by an async I/O driver.
#[async_trait]
pub trait Persistence<V>: Send + Sync
where
    V: Send + Sync,
{
    /// Returns a default snapshot when nothing has ever been written.
    async fn read(&self) -> Result<PersistentSnapshot<V>>;

    async fn write(&self, snapshot: &PersistentSnapshot<V>) -> Result<()>;
}

/// Whole-file `bincode` snapshot, written atomically via a temp file
/// plus rename so a crash mid-write never leaves a half-written file
/// behind for the next `read()`.
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl<V> Persistence<V> for FilePersistence
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn read(&self) -> Result<PersistentSnapshot<V>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => bincode::deserialize(&bytes).map_err(RaftError::Codec),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(PersistentSnapshot::default())
            }
            Err(e) => Err(RaftError::PersistenceRead {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }

    async fn write(&self, snapshot: &PersistentSnapshot<V>) -> Result<()> {
        let bytes = bincode::serialize(snapshot).map_err(RaftError::Codec)?;
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| RaftError::PersistenceWrite {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| RaftError::PersistenceWrite {
            path: self.path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::RequestId;

    #[tokio::test]
    async fn read_on_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let persistence = FilePersistence::new(&path);
        let snapshot: PersistentSnapshot<String> = persistence.read().await.unwrap();
        assert_eq!(snapshot, PersistentSnapshot::default());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let persistence = FilePersistence::new(&path);

        let snapshot = PersistentSnapshot {
            current_term: 4,
            voted_for: Some("node-2".to_string()),
            entries: vec![Entry::Value {
                term: 3,
                value: "x<-1".to_string(),
                id: RequestId { client_id: 1, request_serial: 1 },
            }],
        };
        persistence.write(&snapshot).await.unwrap();

        let read_back: PersistentSnapshot<String> = persistence.read().await.unwrap();
        assert_eq!(read_back, snapshot);
    }

    #[tokio::test]
    async fn write_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let persistence = FilePersistence::new(&path);

        let first: PersistentSnapshot<String> =
            PersistentSnapshot { current_term: 1, voted_for: None, entries: vec![] };
        let second: PersistentSnapshot<String> =
            PersistentSnapshot { current_term: 2, voted_for: Some("a".into()), entries: vec![] };

        persistence.write(&first).await.unwrap();
        persistence.write(&second).await.unwrap();

        let read_back: PersistentSnapshot<String> = persistence.read().await.unwrap();
        assert_eq!(read_back, second);
    }
}
