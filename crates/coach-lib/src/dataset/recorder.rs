//! Append-only dataset writer
//!
//! Each labelled job appends one line to `videos.jsonl` and one line to
//! `sequences.jsonl`. `sequences.jsonl` is the authoritative training file
//! and is written last; if that append fails, the `videos.jsonl` line is
//! rolled back so the two files never disagree. Writes are serialized so
//! concurrent jobs never interleave partial lines.

use super::labels::{canonicalize, LabelInvalid};
use super::record::{DatasetRecord, VideoLine};
use crate::models::JobSummary;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const SEQUENCES_FILE: &str = "sequences.jsonl";
pub const VIDEOS_FILE: &str = "videos.jsonl";

/// Errors raised while persisting a record
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    LabelInvalid(#[from] LabelInvalid),

    #[error("dataset I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where a record was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordLocation {
    pub sequences_path: PathBuf,
    pub videos_path: PathBuf,
    pub video_id: String,
}

/// Destination for completed, labelled jobs
#[async_trait]
pub trait DatasetSink: Send + Sync {
    /// Canonicalize `raw_label` and persist one record for `summary`.
    ///
    /// An unrecognized label fails with [`RecordError::LabelInvalid`] before
    /// anything is written.
    async fn record(&self, summary: &JobSummary, raw_label: &str) -> Result<RecordLocation, RecordError>;
}

/// JSON-lines recorder rooted at a dataset directory
#[derive(Debug)]
pub struct JsonlDatasetRecorder {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlDatasetRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sequences_path(&self) -> PathBuf {
        self.dir.join(SEQUENCES_FILE)
    }

    pub fn videos_path(&self) -> PathBuf {
        self.dir.join(VIDEOS_FILE)
    }
}

#[async_trait]
impl DatasetSink for JsonlDatasetRecorder {
    async fn record(&self, summary: &JobSummary, raw_label: &str) -> Result<RecordLocation, RecordError> {
        let labels = canonicalize(raw_label)?;

        let record = DatasetRecord::from_summary(summary, labels, Some(raw_label));
        let video = VideoLine::from_summary(summary, labels);
        let record_line = json_line(&record)?;
        let video_line = json_line(&video)?;

        let location = RecordLocation {
            sequences_path: self.sequences_path(),
            videos_path: self.videos_path(),
            video_id: summary.video_id.clone(),
        };

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let videos_len = append(&location.videos_path, &video_line).await?;
        if let Err(e) = append(&location.sequences_path, &record_line).await {
            if let Err(rollback) = truncate(&location.videos_path, videos_len).await {
                warn!(
                    path = %location.videos_path.display(),
                    error = %rollback,
                    "Failed to roll back video index line"
                );
            }
            return Err(e.into());
        }

        debug!(
            video_id = %summary.video_id,
            seq_len = record.seq_len,
            "Appended dataset record"
        );
        Ok(location)
    }
}

fn json_line<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

/// Append `line`, returning the file length before the write
async fn append(path: &Path, line: &[u8]) -> std::io::Result<u64> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    let len = file.metadata().await?.len();
    file.write_all(line).await?;
    file.flush().await?;
    Ok(len)
}

async fn truncate(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await
}
