//! StoreContext - I/O primitives for user data storage
//!
//! The context provides access to storage and utilities. No business logic,
//! just path helpers and atomic file I/O; [`crate::store::UserDataStore`]
//! does the work.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use ulid::Ulid;

use crate::error::Result;
use crate::record::{RecordStore, UserRecord};

/// Context for the on-disk store layout:
/// ```text
/// store/
///   records/   ← one .json per user
///   blobs/     ← uploaded files under their logical names
/// ```
#[derive(Debug, Clone)]
pub struct StoreContext {
    root: PathBuf,
}

impl StoreContext {
    /// Create a new context for the given store directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the records directory
    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    /// Path to a user's record file
    pub fn record_path(&self, user_id: &str) -> PathBuf {
        self.records_dir().join(format!("{user_id}.json"))
    }

    /// Path to the blobs directory
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    /// Path to a blob under its logical name
    pub fn blob_path(&self, logical: &str) -> PathBuf {
        self.blobs_dir().join(logical)
    }

    /// Create the directory structure
    ///
    /// This is idempotent - safe to call multiple times.
    pub async fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(self.records_dir()).await?;
        fs::create_dir_all(self.blobs_dir()).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for StoreContext {
    async fn read(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let path = self.record_path(user_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn write(&self, record: &UserRecord) -> Result<u64> {
        self.ensure_directories().await?;
        let content = serde_json::to_string_pretty(record)?;
        atomic_write(&self.record_path(&record.user_id), content.as_bytes()).await?;
        Ok(1)
    }
}

/// Write to a temp file then rename for atomic persistence.
pub(crate) async fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent dir"))?;
    let tmp = dir.join(format!(".tmp_{}", Ulid::new()));
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
