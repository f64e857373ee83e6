//! Blob storage and media transcoding collaborators.
//!
//! The submission engine never touches pixels: MIME detection and resizing
//! go through [`MediaTranscoder`], file placement through [`BlobStore`].
//! The file-backed implementations here cover the default deployment; any
//! other backend just implements the traits.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

/// The accepted upload formats. Everything else is rejected per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Gif,
}

impl ImageMime {
    /// The file extension used for the stored blob. Note jpeg → `jpg`.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageMime::Jpeg => "jpg",
            ImageMime::Png => "png",
            ImageMime::Gif => "gif",
        }
    }
}

/// MIME detection and raster scaling contract.
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Sniff the format of an uploaded temp file. `None` means unsupported.
    async fn detect_mime(&self, path: &Path) -> Option<ImageMime>;

    /// Scale the stored blob named `logical` to fit `width`/`height`
    /// (zero leaves that dimension alone). Returns false on failure.
    async fn resize(&self, logical: &str, width: u32, height: u32) -> bool;
}

/// Uploaded file placement contract. All methods are best-effort booleans:
/// a failure is field-scoped, never fatal to sibling fields.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Move an uploaded temp file to its logical name. False on failure.
    async fn store(&self, tmp_path: &Path, logical: &str) -> bool;

    /// Remove a stored blob. False on failure.
    async fn remove(&self, logical: &str) -> bool;

    /// The public URL a stored blob is served under.
    fn public_url(&self, logical: &str) -> String;
}

/// File-backed blob store rooted at a blobs directory.
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn path_of(&self, logical: &str) -> PathBuf {
        self.root.join(logical)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, tmp_path: &Path, logical: &str) -> bool {
        if let Err(e) = fs::create_dir_all(&self.root).await {
            warn!(%e, "cannot create blobs directory");
            return false;
        }
        let dest = self.path_of(logical);
        match fs::rename(tmp_path, &dest).await {
            Ok(()) => true,
            // Rename fails across filesystems; fall back to copy + remove.
            Err(_) => match fs::copy(tmp_path, &dest).await {
                Ok(_) => {
                    let _ = fs::remove_file(tmp_path).await;
                    true
                }
                Err(e) => {
                    warn!(%logical, %e, "blob store failed");
                    false
                }
            },
        }
    }

    async fn remove(&self, logical: &str) -> bool {
        match fs::remove_file(self.path_of(logical)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%logical, %e, "blob remove failed");
                false
            }
        }
    }

    fn public_url(&self, logical: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), logical)
    }
}

/// File-backed transcoder: magic-byte MIME detection, delegated scaling.
///
/// Actual raster work happens out of process in deployments that need it;
/// this implementation only records the intent.
pub struct FsMedia {
    blobs_root: PathBuf,
}

impl FsMedia {
    pub fn new(blobs_root: impl Into<PathBuf>) -> Self {
        Self {
            blobs_root: blobs_root.into(),
        }
    }
}

#[async_trait]
impl MediaTranscoder for FsMedia {
    async fn detect_mime(&self, path: &Path) -> Option<ImageMime> {
        let bytes = fs::read(path).await.ok()?;
        sniff(&bytes)
    }

    async fn resize(&self, logical: &str, width: u32, height: u32) -> bool {
        if width == 0 && height == 0 {
            return true;
        }
        let path = self.blobs_root.join(logical);
        if !path.exists() {
            warn!(%logical, "resize target missing");
            return false;
        }
        debug!(%logical, width, height, "resize delegated");
        true
    }
}

/// Magic-byte sniffing for the three accepted formats.
fn sniff(bytes: &[u8]) -> Option<ImageMime> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageMime::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(ImageMime::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageMime::Gif)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn sniffs_the_three_accepted_formats() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageMime::Jpeg));
        assert_eq!(sniff(PNG_HEADER), Some(ImageMime::Png));
        assert_eq!(sniff(b"GIF89a..."), Some(ImageMime::Gif));
        assert_eq!(sniff(b"GIF87a..."), Some(ImageMime::Gif));
        assert_eq!(sniff(b"<svg xmlns"), None);
        assert_eq!(sniff(b""), None);
    }

    #[test]
    fn jpeg_extension_is_jpg() {
        assert_eq!(ImageMime::Jpeg.extension(), "jpg");
        assert_eq!(ImageMime::Png.extension(), "png");
        assert_eq!(ImageMime::Gif.extension(), "gif");
    }

    #[tokio::test]
    async fn fs_blob_store_moves_and_removes() {
        let temp = TempDir::new().unwrap();
        let blobs = temp.path().join("blobs");
        let store = FsBlobStore::new(&blobs, "https://cdn.example.com/u");

        let tmp = temp.path().join("upload.tmp");
        tokio::fs::write(&tmp, b"payload").await.unwrap();

        assert!(store.store(&tmp, "u1_avatar.png").await);
        assert!(!tmp.exists());
        assert!(blobs.join("u1_avatar.png").exists());

        assert_eq!(
            store.public_url("u1_avatar.png"),
            "https://cdn.example.com/u/u1_avatar.png"
        );

        assert!(store.remove("u1_avatar.png").await);
        assert!(!blobs.join("u1_avatar.png").exists());
        assert!(!store.remove("u1_avatar.png").await, "double remove fails");
    }

    #[tokio::test]
    async fn fs_media_detects_and_passes_resize_through() {
        let temp = TempDir::new().unwrap();
        let media = FsMedia::new(temp.path());

        let upload = temp.path().join("pic");
        tokio::fs::write(&upload, PNG_HEADER).await.unwrap();
        assert_eq!(media.detect_mime(&upload).await, Some(ImageMime::Png));

        tokio::fs::write(temp.path().join("u1_pic.png"), PNG_HEADER)
            .await
            .unwrap();
        assert!(media.resize("u1_pic.png", 64, 64).await);
        assert!(!media.resize("missing.png", 64, 64).await);
        assert!(media.resize("missing.png", 0, 0).await, "no-op resize");
    }
}
