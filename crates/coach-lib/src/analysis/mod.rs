//! Frame extraction and pose analysis collaborators
//!
//! The pipeline treats pose estimation as an opaque function from a frame
//! image to keypoints and angles. Implementations are synchronous because
//! they only ever run inside the worker pool.

mod command;
pub mod geometry;

pub use command::{CommandAnalyzer, CommandAnalyzerConfig, DEFAULT_FRAME_STRIDE};

use crate::models::{FrameRef, FrameResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by an analysis collaborator
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("video source cannot be opened: {0}")]
    SourceUnavailable(PathBuf),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("malformed analyzer output: {0}")]
    Parse(String),

    #[error("annotation is not configured")]
    AnnotationUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The external analysis collaborator
pub trait FrameAnalyzer: Send + Sync {
    /// Sample frames from `video` into `out_dir`, in extraction order
    fn extract_frames(&self, video: &Path, out_dir: &Path) -> Result<Vec<FrameRef>, AnalyzerError>;

    /// Analyze a batch of frames. Frames without a detectable pose are
    /// left out of the result; the order of the rest is preserved.
    fn analyze_batch(&self, frames: &[FrameRef]) -> Result<Vec<FrameResult>, AnalyzerError>;

    /// Render an overlay for `result` and return the annotated image path
    fn annotate(&self, frame: &FrameRef, result: &FrameResult) -> Result<PathBuf, AnalyzerError>;
}
