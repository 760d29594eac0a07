//! Service configuration

use anyhow::{Context, Result};
use coach_lib::analysis::CommandAnalyzerConfig;
use coach_lib::pipeline::PipelineConfig;
use coach_lib::rate_limit::RateLimitConfig;
use coach_lib::service::SubmissionLimits;
use coach_lib::models::Angle;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "COACH_CONFIG";

/// Service configuration
///
/// Every field has a default; a config file and `COACH_*` environment
/// variables override them, environment last.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name attached to structured log events
    pub instance_name: String,

    /// HTTP port for the job API, health and metrics
    pub api_port: u16,

    /// Directory uploaded videos are stored in
    pub upload_dir: PathBuf,

    /// Parent directory for per-job extracted frames
    pub frames_dir: PathBuf,

    /// Keep videos after their job unless they back a dataset record
    pub keep_videos: bool,

    /// Directory holding `sequences.jsonl` and `videos.jsonl`
    pub dataset_dir: PathBuf,

    /// Concurrent CPU-bound stages across all users
    pub worker_capacity: usize,

    pub rate_limit_capacity: usize,
    pub rate_limit_window_secs: u64,

    pub max_duration_secs: u64,
    pub max_upload_bytes: u64,

    /// Keep every n-th frame of the source video
    pub frame_stride: u32,
    pub ffmpeg_bin: String,
    pub pose_command: Vec<String>,
    /// Overlay renderer; annotation is skipped when unset
    pub annotate_command: Option<Vec<String>>,

    /// Interval for purging expired rate-limit entries and stale frames
    pub sweep_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let limits = SubmissionLimits::default();
        let rate = RateLimitConfig::default();
        let analyzer = CommandAnalyzerConfig::default();
        Self {
            instance_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "squat-coach".to_string()),
            api_port: 8080,
            upload_dir: PathBuf::from("uploads/videos"),
            frames_dir: PathBuf::from("uploads/frames"),
            keep_videos: false,
            dataset_dir: PathBuf::from("dataset"),
            worker_capacity: coach_lib::worker_pool::DEFAULT_CAPACITY,
            rate_limit_capacity: rate.capacity,
            rate_limit_window_secs: rate.window.as_secs(),
            max_duration_secs: limits.max_duration_secs,
            max_upload_bytes: limits.max_size_bytes,
            frame_stride: analyzer.frame_stride,
            ffmpeg_bin: analyzer.ffmpeg_bin,
            pose_command: analyzer.pose_command,
            annotate_command: analyzer.annotate_command,
            sweep_interval_secs: 300,
        }
    }
}

impl ServiceConfig {
    /// Load from the file named by `COACH_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("COACH")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("pose_command")
                    .with_list_parse_key("annotate_command"),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.worker_capacity > 0, "worker_capacity must be > 0");
        anyhow::ensure!(self.rate_limit_capacity > 0, "rate_limit_capacity must be > 0");
        anyhow::ensure!(!self.pose_command.is_empty(), "pose_command must not be empty");
        Ok(())
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.rate_limit_capacity,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    pub fn submission_limits(&self) -> SubmissionLimits {
        SubmissionLimits {
            max_duration_secs: self.max_duration_secs,
            max_size_bytes: self.max_upload_bytes,
        }
    }

    pub fn analyzer(&self) -> CommandAnalyzerConfig {
        CommandAnalyzerConfig {
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            frame_stride: self.frame_stride,
            pose_command: self.pose_command.clone(),
            annotate_command: self.annotate_command.clone(),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            frames_dir: self.frames_dir.clone(),
            extremal_family: Angle::KNEES.to_vec(),
            annotate: self.annotate_command.is_some(),
            keep_videos: self.keep_videos,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_service_limits() {
        let config = ServiceConfig::default();
        assert_eq!(config.worker_capacity, 2);
        assert_eq!(config.rate_limit_capacity, 3);
        assert_eq!(config.rate_limit_window_secs, 60);
        assert_eq!(config.max_duration_secs, 60);
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.frame_stride, 30);
        assert!(!config.pipeline().annotate);
        assert!(!config.pipeline().keep_videos);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "worker_capacity = 4\nframe_stride = 15\nkeep_videos = true\npose_command = [\"python3\", \"pose.py\"]\nannotate_command = [\"draw\"]"
        )
        .unwrap();

        let config = ServiceConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.worker_capacity, 4);
        assert_eq!(config.analyzer().frame_stride, 15);
        assert_eq!(config.pose_command, vec!["python3", "pose.py"]);
        assert!(config.pipeline().annotate);
        assert!(config.pipeline().keep_videos);
        // Untouched fields keep their defaults
        assert_eq!(config.rate_limit_capacity, 3);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "worker_capacity = 0").unwrap();

        assert!(ServiceConfig::load_from(Some(file.path())).is_err());
    }
}
