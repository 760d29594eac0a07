//! Analyzer backed by external programs
//!
//! - Extraction shells out to `ffmpeg`, keeping every `frame_stride`-th frame.
//! - Pose analysis runs a configurable command that receives frame paths as
//!   trailing arguments and prints one JSON object per detected pose.
//! - Annotation runs an optional command with the frame and output paths as
//!   arguments and the frame result as JSON on stdin.

use super::geometry::fill_missing_angles;
use super::{AnalyzerError, FrameAnalyzer};
use crate::models::{FrameRef, FrameResult, JointAngles, Keypoints};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Keep one frame out of this many
pub const DEFAULT_FRAME_STRIDE: u32 = 30;

const FRAME_PREFIX: &str = "frame_";

/// Configuration for [`CommandAnalyzer`]
#[derive(Debug, Clone)]
pub struct CommandAnalyzerConfig {
    pub ffmpeg_bin: String,
    pub frame_stride: u32,
    /// Program and leading arguments of the pose estimator
    pub pose_command: Vec<String>,
    /// Program and leading arguments of the overlay renderer
    pub annotate_command: Option<Vec<String>>,
}

impl Default for CommandAnalyzerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            frame_stride: DEFAULT_FRAME_STRIDE,
            pose_command: vec!["pose-estimator".to_string()],
            annotate_command: None,
        }
    }
}

/// One line of pose estimator output
#[derive(Debug, Deserialize)]
struct PoseLine {
    image_path: PathBuf,
    #[serde(default)]
    size: Option<(u32, u32)>,
    #[serde(default)]
    keypoints_pixels: Keypoints,
    #[serde(default)]
    keypoints_normalized: Keypoints,
    #[serde(default)]
    angles: JointAngles,
}

/// [`FrameAnalyzer`] that runs ffmpeg and external pose tooling
pub struct CommandAnalyzer {
    config: CommandAnalyzerConfig,
}

impl CommandAnalyzer {
    pub fn new(config: CommandAnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn annotation_enabled(&self) -> bool {
        self.config.annotate_command.is_some()
    }

    fn frame_filter(&self) -> String {
        // ffmpeg counts from 0; keep the stride-th, 2*stride-th, ... frame
        format!("select=not(mod(n+1\\,{}))", self.config.frame_stride.max(1))
    }
}

impl FrameAnalyzer for CommandAnalyzer {
    fn extract_frames(&self, video: &Path, out_dir: &Path) -> Result<Vec<FrameRef>, AnalyzerError> {
        if !video.is_file() {
            return Err(AnalyzerError::SourceUnavailable(video.to_path_buf()));
        }
        std::fs::create_dir_all(out_dir)?;

        let pattern = out_dir.join(format!("{FRAME_PREFIX}%04d.jpg"));
        let filter = self.frame_filter();
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.args(["-v", "error", "-nostdin", "-y", "-i"])
            .arg(video)
            .args(["-vf", filter.as_str(), "-vsync", "vfr", "-q:v", "2"])
            .arg(&pattern);
        run(&self.config.ffmpeg_bin, &mut cmd, None)?;

        let frames = list_frames(out_dir)?;
        info!(
            video = %video.display(),
            frames = frames.len(),
            stride = self.config.frame_stride,
            "Extracted frames"
        );
        Ok(frames)
    }

    fn analyze_batch(&self, frames: &[FrameRef]) -> Result<Vec<FrameResult>, AnalyzerError> {
        let (program, leading) = self
            .config
            .pose_command
            .split_first()
            .ok_or_else(|| AnalyzerError::Parse("empty pose command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(leading).args(frames.iter().map(|f| &f.path));
        let stdout = run(program, &mut cmd, None)?;

        Ok(parse_pose_output(&String::from_utf8_lossy(&stdout), frames))
    }

    fn annotate(&self, frame: &FrameRef, result: &FrameResult) -> Result<PathBuf, AnalyzerError> {
        let command = self
            .config
            .annotate_command
            .as_ref()
            .ok_or(AnalyzerError::AnnotationUnavailable)?;
        let (program, leading) = command
            .split_first()
            .ok_or(AnalyzerError::AnnotationUnavailable)?;

        let output = annotated_path(&frame.path);
        let payload =
            serde_json::to_vec(result).map_err(|e| AnalyzerError::Parse(e.to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(leading).arg(&frame.path).arg(&output);
        run(program, &mut cmd, Some(&payload))?;

        if !output.is_file() {
            return Err(AnalyzerError::CommandFailed {
                program: program.clone(),
                exit_code: Some(0),
                stderr: format!("no image written to {}", output.display()),
            });
        }
        Ok(output)
    }
}

/// Match pose output lines back to their frames.
///
/// Lines that fail to parse or reference unknown frames are skipped; the
/// result is ordered by frame index.
pub(crate) fn parse_pose_output(stdout: &str, frames: &[FrameRef]) -> Vec<FrameResult> {
    let by_path: HashMap<&Path, &FrameRef> =
        frames.iter().map(|f| (f.path.as_path(), f)).collect();

    let mut results = Vec::with_capacity(frames.len());
    for (line_no, line) in stdout.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let pose: PoseLine = match serde_json::from_str(line) {
            Ok(p) => p,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed pose line");
                continue;
            }
        };
        let Some(frame) = by_path.get(pose.image_path.as_path()) else {
            debug!(path = %pose.image_path.display(), "Pose line for unknown frame");
            continue;
        };

        let mut angles = pose.angles;
        fill_missing_angles(&mut angles, &pose.keypoints_pixels);
        results.push(FrameResult {
            frame: (*frame).clone(),
            size: pose.size,
            keypoints_pixels: pose.keypoints_pixels,
            keypoints_normalized: pose.keypoints_normalized,
            angles,
        });
    }

    results.sort_by_key(|r| r.frame.index);
    results.dedup_by_key(|r| r.frame.index);
    results
}

fn list_frames(dir: &Path) -> Result<Vec<FrameRef>, AnalyzerError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FRAME_PREFIX) && n.ends_with(".jpg") && !n.contains("_annotated"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| FrameRef {
            index: i as u32,
            path,
        })
        .collect())
}

fn annotated_path(frame: &Path) -> PathBuf {
    let stem = frame
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    frame.with_file_name(format!("{stem}_annotated.jpg"))
}

fn run(program: &str, cmd: &mut Command, stdin: Option<&[u8]>) -> Result<Vec<u8>, AnalyzerError> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = cmd.spawn().map_err(|source| AnalyzerError::Spawn {
        program: program.to_string(),
        source,
    })?;

    // Feed stdin while the output pipes are drained, and always reap the child
    let output = std::thread::scope(|scope| {
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => Some(scope.spawn(move || pipe.write_all(input))),
            _ => None,
        };
        let output = child.wait_with_output();
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    warn!(program, error = %e, "Failed to write command input");
                }
                Err(_) => warn!(program, "Input writer panicked"),
                _ => {}
            }
        }
        output
    })?;

    if !output.status.success() {
        return Err(AnalyzerError::CommandFailed {
            program: program.to_string(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}
