use crate::error::SinkError;
use chrono::Utc;
use fs2::FileExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::trace;

/// Allocate `<prefix>-<unix millis>.<ext>` that does not exist yet in `dir`.
///
/// Two uploads within the same millisecond get consecutive stamps.
pub(crate) async fn unique_file_name(dir: &Path, prefix: &str, ext: &str) -> String {
    let mut stamp = Utc::now().timestamp_millis();
    loop {
        let name = format!("{}-{}.{}", prefix, stamp, ext);
        if !fs::try_exists(dir.join(&name)).await.unwrap_or(false) {
            return name;
        }
        trace!("{} already taken, bumping timestamp", name);
        stamp += 1;
    }
}

/// Public URL of a stored file
pub(crate) fn public_url(base_url: &str, folder: &str, file_name: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), folder, file_name)
}

/// Reject names that could escape their storage folder
pub(crate) fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
}

/// Write through a uniquely named temporary sibling and rename over the
/// target, so concurrent writers never share a temp file
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();

    tokio::task::spawn_blocking(move || {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| SinkError::io(&dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_data())
            .map_err(|e| SinkError::io(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| SinkError::io(&path, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| SinkError::Index {
        details: format!("write task failed: {}", e),
    })?
}

/// Exclusive advisory lock on `<index>.lock`, held across a whole
/// load-modify-save of the index. Shared with other processes (boothctl).
pub(crate) struct IndexLock {
    file: std::fs::File,
}

impl IndexLock {
    pub(crate) async fn acquire(lock_path: PathBuf) -> Result<Self, SinkError> {
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)
                .map_err(|e| SinkError::io(&lock_path, e))?;
            file.lock_exclusive()
                .map_err(|e| SinkError::io(&lock_path, e))?;
            trace!("Locked {}", lock_path.display());
            Ok(Self { file })
        })
        .await
        .map_err(|e| SinkError::Index {
            details: format!("lock task failed: {}", e),
        })?
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        // closing the file drops the lock too
        let _ = FileExt::unlock(&self.file);
    }
}

pub(crate) async fn ensure_dir(dir: &Path) -> Result<(), SinkError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| SinkError::io(dir, e))
}
