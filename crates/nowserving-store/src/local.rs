//! On-device file store with same-process change notifications.
//!
//! Each key lives in `<dir>/<key>.json`, with characters outside
//! `[A-Za-z0-9_-]` in the key replaced by `_`. Each write goes to its own
//! uniquely named temporary file in the same directory, which is then
//! renamed into place, so a reader never sees a half-written document.
//!
//! The rename makes a single write atomic, not a read-modify-write. Callers
//! that mutate the document hold [`ChangeFeed::lock`] around the whole
//! sequence.

use std::io::Write;
use std::path::{Path, PathBuf};

use nowserving_types::QueueState;

use crate::error::StoreError;
use crate::feed::ChangeFeed;

/// File-backed store for the local fan-out transport.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
    feed: ChangeFeed,
}

impl LocalStore {
    /// A store rooted at `dir` that announces writes on `feed`. The
    /// directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>, feed: ChangeFeed) -> Self {
        Self {
            dir: dir.into(),
            feed,
        }
    }

    /// The directory holding document files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The feed this store publishes to.
    pub const fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// The file that holds `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    /// The raw value at `key`, or `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] for any other read failure.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the document at `key` and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created or the
    /// file cannot be written.
    pub async fn set(&self, key: &str, raw: &str, state: &QueueState) -> Result<(), StoreError> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let contents = raw.to_owned();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, contents.as_bytes()))
            .await
            .map_err(std::io::Error::other)??;

        let notified = self.feed.publish(key, state);
        tracing::debug!(key, notified, "local queue state written");
        Ok(())
    }
}

/// Write `contents` to a fresh temporary file in `dir` and rename it over
/// `path`.
fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
