//! Upload storage for received videos

use crate::models::UserId;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Longest stored filename, extension included
pub const MAX_FILENAME_LEN: usize = 100;

/// File extension for a video MIME type; unknown types are stored as mp4
pub fn extension_for_mime(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match essence.as_str() {
        "video/quicktime" => ".mov",
        "video/avi" | "video/x-msvideo" => ".avi",
        "video/mpeg" => ".mpeg",
        "video/webm" => ".webm",
        _ => ".mp4",
    }
}

/// Reduce `name` to a safe basename of `[A-Za-z0-9_.-]` characters.
///
/// Over-long names are cut from the stem so the extension survives.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    if cleaned.len() <= MAX_FILENAME_LEN {
        return cleaned;
    }

    let (stem, ext) = match cleaned.rfind('.') {
        Some(dot) if dot > 0 && cleaned.len() - dot < MAX_FILENAME_LEN => cleaned.split_at(dot),
        _ => (cleaned.as_str(), ""),
    };
    let keep = MAX_FILENAME_LEN - ext.len();
    format!("{}{}", &stem[..keep.min(stem.len())], ext)
}

/// A video resolved inside the upload directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVideo {
    /// Canonical path
    pub path: PathBuf,
    /// Size on disk
    pub size_bytes: u64,
}

/// Writes uploaded videos under a single directory
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filename a video from `user` is stored under
    pub fn filename_for(user: UserId, mime: &str) -> String {
        let ts = Utc::now().timestamp_millis();
        sanitize_filename(&format!("video_{user}_{ts}{}", extension_for_mime(mime)))
    }

    pub async fn save(&self, user: UserId, mime: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::filename_for(user, mime));
        tokio::fs::write(&path, bytes).await?;
        debug!(user_id = %user, path = %path.display(), bytes = bytes.len(), "Stored upload");
        Ok(path)
    }

    /// Resolve a previously stored video.
    ///
    /// Relative paths are taken from the upload directory. Returns `None`
    /// for missing files, non-files, and anything that resolves outside the
    /// upload directory through `..` or symlinks.
    pub async fn locate(&self, path: &Path) -> Option<StoredVideo> {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        };
        let root = tokio::fs::canonicalize(&self.dir).await.ok()?;
        let resolved = tokio::fs::canonicalize(&candidate).await.ok()?;
        if !resolved.starts_with(&root) {
            warn!(path = %path.display(), "Video path outside the upload directory");
            return None;
        }

        let metadata = tokio::fs::metadata(&resolved).await.ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(StoredVideo {
            path: resolved,
            size_bytes: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_table() {
        assert_eq!(extension_for_mime("video/mp4"), ".mp4");
        assert_eq!(extension_for_mime("video/QuickTime"), ".mov");
        assert_eq!(extension_for_mime("video/x-msvideo"), ".avi");
        assert_eq!(extension_for_mime("video/webm; codecs=vp9"), ".webm");
        assert_eq!(extension_for_mime("application/octet-stream"), ".mp4");
    }

    #[test]
    fn test_sanitize_strips_paths_and_symbols() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("my video (1).mp4"), "my_video__1_.mp4");
        assert_eq!(sanitize_filename(".."), "_");
        assert_eq!(sanitize_filename("присед.mov"), "______.mov");
    }

    #[test]
    fn test_sanitize_truncates_keeping_extension() {
        let long = format!("{}.webm", "a".repeat(150));
        let out = sanitize_filename(&long);
        assert_eq!(out.len(), MAX_FILENAME_LEN);
        assert!(out.ends_with(".webm"));
    }

    #[tokio::test]
    async fn test_save_writes_bytes() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));

        let path = store.save(UserId(42), "video/quicktime", b"moov").await.unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("video_42_"));
        assert!(name.ends_with(".mov"));
        assert_eq!(std::fs::read(&path).unwrap(), b"moov");
    }

    #[tokio::test]
    async fn test_locate_reports_size_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));
        let saved = store.save(UserId(7), "video/mp4", &[0u8; 4096]).await.unwrap();
        let name = saved.file_name().unwrap().to_owned();

        let by_name = store.locate(Path::new(&name)).await.unwrap();
        assert_eq!(by_name.size_bytes, 4096);
        let by_path = store.locate(&saved).await.unwrap();
        assert_eq!(by_path, by_name);
    }

    #[tokio::test]
    async fn test_locate_confines_to_upload_dir() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));
        store.save(UserId(7), "video/mp4", b"moov").await.unwrap();
        let outside = dir.path().join("secret.mp4");
        std::fs::write(&outside, b"moov").unwrap();

        assert!(store.locate(&outside).await.is_none());
        assert!(store.locate(Path::new("../secret.mp4")).await.is_none());
        assert!(store.locate(Path::new("missing.mp4")).await.is_none());
        // The directory itself is not a video
        assert!(store.locate(store.dir()).await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_locate_rejects_symlink_escape() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));
        std::fs::create_dir_all(store.dir()).unwrap();
        let outside = dir.path().join("secret.mp4");
        std::fs::write(&outside, b"moov").unwrap();
        std::os::unix::fs::symlink(&outside, store.dir().join("link.mp4")).unwrap();

        assert!(store.locate(Path::new("link.mp4")).await.is_none());
    }
}
