//! Staged job pipeline
//!
//! Extract and analyze run on the worker pool; aggregation is pure and runs
//! inline; annotation is best-effort; persistence only happens for
//! captioned jobs. Cancellation is observed at every stage boundary.
//!
//! A job's frame directory is removed once the job ends, whatever the
//! outcome; only the annotated frame is moved out to `annotated/`. The
//! source video goes too unless it backs a dataset record.

pub mod aggregate;
mod orchestrator;

pub use orchestrator::PipelineOrchestrator;

/// Subdirectory of `frames_dir` holding kept annotated frames
pub const ANNOTATED_DIR: &str = "annotated";

use crate::dataset::RecordLocation;
use crate::models::{Angle, JobSummary};
use crate::registry::JobStatus;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent directory for per-job frame directories
    pub frames_dir: PathBuf,
    /// Angles scanned for the job's minimum
    pub extremal_family: Vec<Angle>,
    /// Render an overlay for the extremal frame
    pub annotate: bool,
    /// Keep source videos that were not recorded to the dataset
    pub keep_videos: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frames_dir: PathBuf::from("frames"),
            extremal_family: Angle::KNEES.to_vec(),
            annotate: true,
            keep_videos: false,
        }
    }
}

/// Input for one pipeline run
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub video_path: PathBuf,
    /// Raw caption; persisted as the dataset label when present
    pub caption: Option<String>,
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum JobFailure {
    #[error("frame extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("pose analysis failed: {0}")]
    AnalysisFailed(String),
}

/// What happened to the dataset side of a completed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DatasetOutcome {
    /// No caption was supplied
    Skipped,
    Recorded { location: RecordLocation },
    LabelInvalid { raw: String },
    Failed { error: String },
}

/// Discriminated result of a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Cancelled,
    Failed(JobFailure),
    Completed {
        summary: Box<JobSummary>,
        dataset: DatasetOutcome,
    },
}

impl JobOutcome {
    /// Terminal registry status matching this outcome
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Cancelled => JobStatus::Cancelled,
            JobOutcome::Failed(_) => JobStatus::Failed,
            JobOutcome::Completed { .. } => JobStatus::Completed,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::Failed(_) => "failed",
            JobOutcome::Completed { .. } => "completed",
        }
    }

    pub fn summary(&self) -> Option<&JobSummary> {
        match self {
            JobOutcome::Completed { summary, .. } => Some(summary),
            _ => None,
        }
    }
}
