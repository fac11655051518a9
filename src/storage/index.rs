use super::files::{write_atomic, IndexLock};
use crate::error::SinkError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, trace};

/// Records plus the next id to hand out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument<T> {
    pub next_id: u64,
    pub records: Vec<T>,
}

impl<T> Default for IndexDocument<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: Vec::new(),
        }
    }
}

impl<T> IndexDocument<T> {
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// JSON file holding an [`IndexDocument`].
///
/// The file is the source of truth, so other processes (e.g. `boothctl`)
/// see each other's changes on the next load. Writers hold [`JsonIndex::lock`]
/// from load to save.
#[derive(Debug, Clone)]
pub struct JsonIndex<T> {
    path: PathBuf,
    _records: PhantomData<fn() -> T>,
}

impl<T> JsonIndex<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _records: PhantomData,
        }
    }

    /// Exclusive lock on the `<index>.lock` sibling, across processes
    pub(crate) async fn lock(&self) -> Result<IndexLock, SinkError> {
        let mut lock_path = self.path.clone().into_os_string();
        lock_path.push(".lock");
        IndexLock::acquire(PathBuf::from(lock_path)).await
    }

    /// Load the document; a missing file is an empty index
    pub async fn load(&self) -> Result<IndexDocument<T>, SinkError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(IndexDocument::default());
            }
            Err(e) => return Err(SinkError::io(&self.path, e)),
        };

        let document: IndexDocument<T> =
            serde_json::from_str(&content).map_err(|e| SinkError::Index {
                details: format!("{}: {}", self.path.display(), e),
            })?;
        trace!(
            "Loaded {} record(s) from {}",
            document.records.len(),
            self.path.display()
        );
        Ok(document)
    }

    pub async fn save(&self, document: &IndexDocument<T>) -> Result<(), SinkError> {
        let content = serde_json::to_vec_pretty(document).map_err(|e| SinkError::Index {
            details: format!("Failed to serialize {}: {}", self.path.display(), e),
        })?;
        write_atomic(&self.path, &content).await?;
        debug!(
            "Saved {} record(s) to {}",
            document.records.len(),
            self.path.display()
        );
        Ok(())
    }
}
