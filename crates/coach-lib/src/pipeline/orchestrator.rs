//! Drives one job through the pipeline stages

use super::aggregate::summarize;
use super::{DatasetOutcome, JobFailure, JobOutcome, JobRequest, PipelineConfig, ANNOTATED_DIR};
use crate::analysis::{AnalyzerError, FrameAnalyzer};
use crate::dataset::{DatasetSink, RecordError};
use crate::health::{components, HealthRegistry};
use crate::models::{FrameRef, FrameResult, JobSummary};
use crate::observability::{CoachMetrics, StructuredLogger};
use crate::registry::{Job, JobStatus};
use crate::worker_pool::{WorkerError, WorkerPool};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why a run stopped before completion
enum Halt {
    Cancelled,
    Failed(JobFailure),
}

impl From<Halt> for JobOutcome {
    fn from(halt: Halt) -> Self {
        match halt {
            Halt::Cancelled => JobOutcome::Cancelled,
            Halt::Failed(failure) => JobOutcome::Failed(failure),
        }
    }
}

/// Runs jobs against a shared worker pool and analysis collaborator
pub struct PipelineOrchestrator {
    pool: Arc<WorkerPool>,
    analyzer: Arc<dyn FrameAnalyzer>,
    sink: Arc<dyn DatasetSink>,
    config: PipelineConfig,
    metrics: CoachMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl PipelineOrchestrator {
    pub fn new(
        pool: Arc<WorkerPool>,
        analyzer: Arc<dyn FrameAnalyzer>,
        sink: Arc<dyn DatasetSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pool,
            analyzer,
            sink,
            config,
            metrics: CoachMetrics::new(),
            logger: StructuredLogger::new("squat-coach"),
            health: HealthRegistry::new(),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `job` to a terminal state.
    ///
    /// The job's terminal status is set exactly once, before this returns.
    pub async fn run(&self, job: &Job, request: JobRequest) -> JobOutcome {
        job.mark_running();
        let outcome = match self.drive(job, &request).await {
            Ok(outcome) => outcome,
            Err(halt) => halt.into(),
        };
        self.discard_frames(job, &outcome).await;
        self.discard_source(&request, &outcome).await;
        // No-op for Completed, which is published before persistence
        job.finish(outcome.status());

        self.metrics.inc_finished(outcome.kind());
        let detail = match &outcome {
            JobOutcome::Failed(failure) => Some(failure.to_string()),
            _ => None,
        };
        self.logger
            .log_finished(job.owner(), job.id(), outcome.kind(), detail.as_deref());
        outcome
    }

    async fn drive(&self, job: &Job, request: &JobRequest) -> Result<JobOutcome, Halt> {
        let frames = self.extract(job, &request.video_path).await?;
        checkpoint(job)?;
        let frames_count = frames.len();
        let results = self.analyze(job, frames).await?;

        let mut summary = summarize(
            job.id(),
            &request.video_path,
            frames_count,
            results,
            &self.config.extremal_family,
        );
        checkpoint(job)?;

        if self.config.annotate {
            summary.annotated_frame = self.annotate(job, &summary).await?;
            checkpoint(job)?;
        }

        job.finish(JobStatus::Completed);
        let dataset = self.persist(job, &summary, request.caption.as_deref()).await;
        Ok(JobOutcome::Completed {
            summary: Box::new(summary),
            dataset,
        })
    }

    /// Sweep frame directories left behind by abandoned extractions.
    ///
    /// A cancelled job can leave an extraction running that writes frames
    /// after the job's own cleanup; directories untouched for `max_age` are
    /// removed. Returns the number removed.
    pub async fn sweep_frames(&self, max_age: Duration) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.config.frames_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %self.config.frames_dir.display(), error = %e, "Cannot list frame directories");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name() == ANNOTATED_DIR {
                continue;
            }
            let stale = match entry.metadata().await {
                Ok(meta) => {
                    meta.is_dir()
                        && meta
                            .modified()
                            .map(|m| m.elapsed().unwrap_or(Duration::ZERO) >= max_age)
                            .unwrap_or(false)
                }
                Err(_) => false,
            };
            if stale && remove_dir(&entry.path()).await {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Swept stale frame directories");
        }
        removed
    }

    async fn extract(&self, job: &Job, video: &Path) -> Result<Vec<FrameRef>, Halt> {
        let analyzer = self.analyzer.clone();
        let video = video.to_path_buf();
        let out_dir = self.job_frames_dir(job);

        let started = Instant::now();
        let extracted = self
            .dispatch(job, move || analyzer.extract_frames(&video, &out_dir))
            .await
            .ok_or(Halt::Cancelled)?;
        let frames = self
            .settle(extracted)
            .await
            .map_err(|e| Halt::Failed(JobFailure::ExtractionFailed(e)))?;

        if frames.is_empty() {
            return Err(Halt::Failed(JobFailure::ExtractionFailed(
                "no frames sampled from video".to_string(),
            )));
        }
        self.stage_done(job, "extract", started, frames.len());
        Ok(frames)
    }

    async fn analyze(&self, job: &Job, frames: Vec<FrameRef>) -> Result<Vec<FrameResult>, Halt> {
        let analyzer = self.analyzer.clone();

        let started = Instant::now();
        let analyzed = self
            .dispatch(job, move || analyzer.analyze_batch(&frames))
            .await
            .ok_or(Halt::Cancelled)?;
        let results = self
            .settle(analyzed)
            .await
            .map_err(|e| Halt::Failed(JobFailure::AnalysisFailed(e)))?;

        if results.is_empty() {
            return Err(Halt::Failed(JobFailure::AnalysisFailed(
                "no pose detected in any frame".to_string(),
            )));
        }
        self.health.set_healthy(components::ANALYZER).await;
        self.stage_done(job, "analyze", started, results.len());
        Ok(results)
    }

    /// Best-effort overlay for the extremal frame; never fails the job
    async fn annotate(&self, job: &Job, summary: &JobSummary) -> Result<Option<PathBuf>, Halt> {
        let Some(extremal) = &summary.min_angle else {
            return Ok(None);
        };
        let Some(result) = summary
            .results
            .iter()
            .find(|r| r.frame == extremal.frame)
            .cloned()
        else {
            return Ok(None);
        };

        let analyzer = self.analyzer.clone();
        let frame = extremal.frame.clone();
        let started = Instant::now();
        let rendered = self
            .dispatch(job, move || analyzer.annotate(&frame, &result))
            .await
            .ok_or(Halt::Cancelled)?;

        match rendered {
            Ok(Ok(path)) => {
                self.stage_done(job, "annotate", started, 1);
                Ok(self.keep_annotated(job, &path).await)
            }
            Ok(Err(AnalyzerError::AnnotationUnavailable)) => {
                debug!(job_id = %job.id(), "Annotation not configured");
                Ok(None)
            }
            Ok(Err(e)) => {
                self.logger.log_annotation_degraded(job.id(), &e.to_string());
                Ok(None)
            }
            Err(e) => {
                self.logger.log_annotation_degraded(job.id(), &e.to_string());
                Ok(None)
            }
        }
    }

    /// Move the overlay out of the job's frame directory before it is removed
    async fn keep_annotated(&self, job: &Job, rendered: &Path) -> Option<PathBuf> {
        let kept = self.kept_overlay(job);
        let kept_dir = self.config.frames_dir.join(ANNOTATED_DIR);
        let moved = async {
            tokio::fs::create_dir_all(&kept_dir).await?;
            tokio::fs::rename(rendered, &kept).await
        }
        .await;

        match moved {
            Ok(()) => Some(kept),
            Err(e) => {
                self.logger.log_annotation_degraded(job.id(), &e.to_string());
                None
            }
        }
    }

    fn job_frames_dir(&self, job: &Job) -> PathBuf {
        self.config.frames_dir.join(job.id().to_string())
    }

    fn kept_overlay(&self, job: &Job) -> PathBuf {
        self.config
            .frames_dir
            .join(ANNOTATED_DIR)
            .join(format!("{}.jpg", job.id()))
    }

    /// Remove the job's frames, and its overlay unless the job completed
    async fn discard_frames(&self, job: &Job, outcome: &JobOutcome) {
        remove_dir(&self.job_frames_dir(job)).await;
        if outcome.summary().is_none() {
            if let Err(e) = tokio::fs::remove_file(self.kept_overlay(job)).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(job_id = %job.id(), error = %e, "Failed to remove overlay");
                }
            }
        }
    }

    /// Delete the source video unless a dataset record points at it
    async fn discard_source(&self, request: &JobRequest, outcome: &JobOutcome) {
        let recorded = matches!(
            outcome,
            JobOutcome::Completed {
                dataset: DatasetOutcome::Recorded { .. },
                ..
            }
        );
        if self.config.keep_videos || recorded {
            return;
        }
        match tokio::fs::remove_file(&request.video_path).await {
            Ok(()) => debug!(path = %request.video_path.display(), "Removed source video"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %request.video_path.display(), error = %e, "Failed to remove source video"),
        }
    }

    async fn persist(&self, job: &Job, summary: &JobSummary, caption: Option<&str>) -> DatasetOutcome {
        let Some(raw) = caption.map(str::trim).filter(|c| !c.is_empty()) else {
            return DatasetOutcome::Skipped;
        };

        match self.sink.record(summary, raw).await {
            Ok(location) => {
                self.metrics.inc_dataset_write("recorded");
                self.logger.log_dataset_recorded(job.id(), &location.video_id);
                self.health.report_dataset_write(None).await;
                DatasetOutcome::Recorded { location }
            }
            Err(RecordError::LabelInvalid(invalid)) => {
                self.metrics.inc_dataset_write("label_invalid");
                self.logger.log_dataset_skipped(job.id(), &invalid.to_string());
                DatasetOutcome::LabelInvalid { raw: invalid.raw }
            }
            Err(e) => {
                let error = e.to_string();
                self.metrics.inc_dataset_write("failed");
                self.logger.log_dataset_skipped(job.id(), &error);
                self.health.report_dataset_write(Some(&error)).await;
                DatasetOutcome::Failed { error }
            }
        }
    }

    /// Submit `work` to the pool unless cancellation wins first.
    ///
    /// `None` means the job was cancelled; any dispatched unit keeps running
    /// and its result is dropped.
    async fn dispatch<F, R>(&self, job: &Job, work: F) -> Option<Result<R, WorkerError>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let outcome = tokio::select! {
            biased;
            _ = job.cancellation().cancelled() => None,
            result = self.pool.submit(work) => Some(result),
        };
        self.metrics
            .set_pool_load(self.pool.in_flight(), self.pool.queued());
        if outcome.is_none() {
            debug!(job_id = %job.id(), "Cancellation requested, abandoning stage");
        }
        outcome
    }

    /// Collapse pool and collaborator errors into a failure reason
    async fn settle<T>(&self, result: Result<Result<T, AnalyzerError>, WorkerError>) -> Result<T, String> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if matches!(e, AnalyzerError::Spawn { .. }) {
                    self.health
                        .set_degraded(components::ANALYZER, e.to_string())
                        .await;
                }
                Err(e.to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn stage_done(&self, job: &Job, stage: &str, started: Instant, items: usize) {
        let elapsed = started.elapsed();
        self.metrics.observe_stage(stage, elapsed);
        self.logger.log_stage(job.id(), stage, elapsed, items);
    }
}

/// Remove `dir` recursively; true if something was removed
async fn remove_dir(dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to remove frame directory");
            false
        }
    }
}

fn checkpoint(job: &Job) -> Result<(), Halt> {
    if job.is_cancel_requested() {
        Err(Halt::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{canonicalize, RecordLocation};
    use crate::models::{JointAngles, Keypoints, UserId};
    use crate::registry::JobRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use tempfile::TempDir;
    use tokio::sync::mpsc as async_mpsc;

    /// Scripted analyzer writing real frame files; optionally blocks inside
    /// one stage until released
    #[derive(Default)]
    struct FakeAnalyzer {
        frames: usize,
        /// Left knee angle per frame; frames past the end yield no pose
        knees: Vec<f64>,
        fail_extract: bool,
        fail_annotate: bool,
        block_on: Option<&'static str>,
        release: Mutex<Option<mpsc::Receiver<()>>>,
        entered: Option<async_mpsc::UnboundedSender<&'static str>>,
        analyze_calls: AtomicUsize,
    }

    impl FakeAnalyzer {
        fn enter(&self, stage: &'static str) {
            if let Some(tx) = &self.entered {
                let _ = tx.send(stage);
            }
            if self.block_on == Some(stage) {
                if let Some(rx) = self.release.lock().unwrap().take() {
                    let _ = rx.recv();
                }
            }
        }
    }

    impl FrameAnalyzer for FakeAnalyzer {
        fn extract_frames(&self, _video: &Path, out_dir: &Path) -> Result<Vec<FrameRef>, AnalyzerError> {
            self.enter("extract");
            if self.fail_extract {
                return Err(AnalyzerError::SourceUnavailable(PathBuf::from("missing.mp4")));
            }
            std::fs::create_dir_all(out_dir)?;
            (0..self.frames)
                .map(|i| -> Result<FrameRef, AnalyzerError> {
                    let path = out_dir.join(format!("frame_{:04}.jpg", i + 1));
                    std::fs::write(&path, b"jpeg")?;
                    Ok(FrameRef {
                        index: i as u32,
                        path,
                    })
                })
                .collect()
        }

        fn analyze_batch(&self, frames: &[FrameRef]) -> Result<Vec<FrameResult>, AnalyzerError> {
            self.analyze_calls.fetch_add(1, Ordering::SeqCst);
            self.enter("analyze");
            Ok(frames
                .iter()
                .zip(&self.knees)
                .map(|(frame, knee)| FrameResult {
                    frame: frame.clone(),
                    size: Some((640, 480)),
                    keypoints_pixels: Keypoints::default(),
                    keypoints_normalized: Keypoints::default(),
                    angles: JointAngles {
                        left_knee: Some(*knee),
                        ..Default::default()
                    },
                })
                .collect())
        }

        fn annotate(&self, frame: &FrameRef, _result: &FrameResult) -> Result<PathBuf, AnalyzerError> {
            if self.fail_annotate {
                return Err(AnalyzerError::Parse("overlay renderer crashed".to_string()));
            }
            let path = frame.path.with_file_name("annotated.jpg");
            std::fs::write(&path, b"overlay")?;
            Ok(path)
        }
    }

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<(JobSummary, String)>>,
    }

    #[async_trait]
    impl DatasetSink for MemorySink {
        async fn record(&self, summary: &JobSummary, raw_label: &str) -> Result<RecordLocation, RecordError> {
            canonicalize(raw_label)?;
            self.records
                .lock()
                .unwrap()
                .push((summary.clone(), raw_label.to_string()));
            Ok(RecordLocation {
                sequences_path: PathBuf::from("sequences.jsonl"),
                videos_path: PathBuf::from("videos.jsonl"),
                video_id: summary.video_id.clone(),
            })
        }
    }

    /// Scratch directory holding the frames root and a source video
    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn frames_dir(&self) -> PathBuf {
            self.dir.path().join("frames")
        }

        fn job_dir(&self, job: &Job) -> PathBuf {
            self.frames_dir().join(job.id().to_string())
        }

        fn orchestrator(&self, analyzer: Arc<FakeAnalyzer>, sink: Arc<MemorySink>) -> PipelineOrchestrator {
            let config = PipelineConfig {
                frames_dir: self.frames_dir(),
                ..Default::default()
            };
            PipelineOrchestrator::new(Arc::new(WorkerPool::new(2)), analyzer, sink, config)
        }

        /// Store a fresh source video and build a request for it
        fn request(&self, caption: Option<&str>) -> JobRequest {
            let video_path = self.dir.path().join("video_1_100.mp4");
            std::fs::write(&video_path, b"ftyp").unwrap();
            JobRequest {
                video_path,
                caption: caption.map(str::to_string),
            }
        }
    }

    #[tokio::test]
    async fn test_completed_job_records_dataset() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 3,
            knees: vec![150.0, 92.0, 120.0],
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let orch = ws.orchestrator(analyzer, sink.clone());
        let job = Job::new(UserId(1));
        let request = ws.request(Some("valgus"));

        let outcome = orch.run(&job, request.clone()).await;

        assert_eq!(job.status(), JobStatus::Completed);
        let JobOutcome::Completed { summary, dataset } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(summary.frames_count, 3);
        assert_eq!(summary.processed_count, 3);
        let min = summary.min_angle.clone().unwrap();
        assert_eq!(min.value, 92.0);
        assert_eq!(min.frame.index, 1);
        assert!(matches!(dataset, DatasetOutcome::Recorded { .. }));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        // The record points at the kept overlay, not the scratch directory
        let kept = ws.frames_dir().join(ANNOTATED_DIR).join(format!("{}.jpg", job.id()));
        assert_eq!(records[0].0.annotated_frame.as_deref(), Some(kept.as_path()));
        assert_eq!(summary.annotated_frame.as_deref(), Some(kept.as_path()));
        assert_eq!(std::fs::read(&kept).unwrap(), b"overlay");

        assert!(!ws.job_dir(&job).exists());
        // Recorded videos stay with their dataset record
        assert!(request.video_path.exists());
    }

    #[tokio::test]
    async fn test_unrecorded_job_cleans_frames_and_source() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 2,
            knees: vec![140.0, 100.0],
            ..Default::default()
        });
        let orch = ws.orchestrator(analyzer, Arc::new(MemorySink::default()));
        let job = Job::new(UserId(1));
        let request = ws.request(None);

        let outcome = orch.run(&job, request.clone()).await;

        assert_eq!(outcome.status(), JobStatus::Completed);
        assert!(!ws.job_dir(&job).exists());
        assert!(!request.video_path.exists());
    }

    #[tokio::test]
    async fn test_keep_videos_retains_source() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 1,
            knees: vec![100.0],
            ..Default::default()
        });
        let config = PipelineConfig {
            frames_dir: ws.frames_dir(),
            keep_videos: true,
            ..Default::default()
        };
        let orch = PipelineOrchestrator::new(
            Arc::new(WorkerPool::new(1)),
            analyzer,
            Arc::new(MemorySink::default()),
            config,
        );
        let request = ws.request(None);

        orch.run(&Job::new(UserId(1)), request.clone()).await;

        assert!(request.video_path.exists());
    }

    #[tokio::test]
    async fn test_zero_frames_fails_extraction() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer::default());
        let sink = Arc::new(MemorySink::default());
        let orch = ws.orchestrator(analyzer.clone(), sink.clone());
        let job = Job::new(UserId(1));

        let outcome = orch.run(&job, ws.request(Some("ok"))).await;

        assert!(matches!(
            outcome,
            JobOutcome::Failed(JobFailure::ExtractionFailed(_))
        ));
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);
        assert!(sink.records.lock().unwrap().is_empty());
        assert!(!ws.job_dir(&job).exists());
    }

    #[tokio::test]
    async fn test_unreadable_source_fails_extraction() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer {
            fail_extract: true,
            ..Default::default()
        });
        let orch = ws.orchestrator(analyzer, Arc::new(MemorySink::default()));
        let job = Job::new(UserId(1));

        match orch.run(&job, ws.request(None)).await {
            JobOutcome::Failed(JobFailure::ExtractionFailed(reason)) => {
                assert!(reason.contains("missing.mp4"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_analysis_fails_and_cleans_up() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 4,
            knees: Vec::new(),
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let orch = ws.orchestrator(analyzer, sink.clone());
        let job = Job::new(UserId(1));
        let request = ws.request(Some("valgus"));

        let outcome = orch.run(&job, request.clone()).await;

        assert!(matches!(
            outcome,
            JobOutcome::Failed(JobFailure::AnalysisFailed(_))
        ));
        assert!(sink.records.lock().unwrap().is_empty());
        assert!(!ws.job_dir(&job).exists());
        assert!(!request.video_path.exists());
    }

    #[tokio::test]
    async fn test_partial_results_and_annotation_failure_still_complete() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 5,
            knees: vec![170.0, 140.0],
            fail_annotate: true,
            ..Default::default()
        });
        let orch = ws.orchestrator(analyzer, Arc::new(MemorySink::default()));
        let job = Job::new(UserId(1));

        let outcome = orch.run(&job, ws.request(None)).await;

        let summary = outcome.summary().unwrap();
        assert_eq!(summary.frames_count, 5);
        assert_eq!(summary.processed_count, 2);
        assert!(summary.annotated_frame.is_none());
        assert!(matches!(
            outcome,
            JobOutcome::Completed {
                dataset: DatasetOutcome::Skipped,
                ..
            }
        ));
        assert!(!ws.frames_dir().join(ANNOTATED_DIR).exists());
    }

    #[tokio::test]
    async fn test_invalid_label_keeps_job_completed() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 1,
            knees: vec![100.0],
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let orch = ws.orchestrator(analyzer, sink.clone());
        let job = Job::new(UserId(1));

        let outcome = orch.run(&job, ws.request(Some("looked fine to me"))).await;

        assert_eq!(job.status(), JobStatus::Completed);
        assert!(matches!(
            outcome,
            JobOutcome::Completed {
                dataset: DatasetOutcome::LabelInvalid { .. },
                ..
            }
        ));
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_during_analysis_discards_result() {
        let ws = Workspace::new();
        let (release_tx, release_rx) = mpsc::channel();
        let (entered_tx, mut entered_rx) = async_mpsc::unbounded_channel();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 2,
            knees: vec![120.0, 90.0],
            block_on: Some("analyze"),
            release: Mutex::new(Some(release_rx)),
            entered: Some(entered_tx),
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let orch = Arc::new(ws.orchestrator(analyzer, sink.clone()));
        let registry = Arc::new(JobRegistry::new());

        let job = Job::new(UserId(9));
        let job_dir = ws.job_dir(&job);
        registry.register(&job).unwrap();
        let run = {
            let orch = orch.clone();
            let request = ws.request(Some("valgus"));
            tokio::spawn(async move { orch.run(&job, request).await })
        };

        assert_eq!(entered_rx.recv().await, Some("extract"));
        assert_eq!(entered_rx.recv().await, Some("analyze"));
        assert!(job_dir.exists());

        // The analyze unit is still running; cancellation abandons the wait
        assert!(registry.cancel(UserId(9)).await);
        assert!(!registry.has_active(UserId(9)));
        assert_eq!(run.await.unwrap(), JobOutcome::Cancelled);
        assert!(!job_dir.exists());

        release_tx.send(()).unwrap();
        orch.pool().shutdown().await;
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_during_extraction_never_analyzes() {
        let ws = Workspace::new();
        let (release_tx, release_rx) = mpsc::channel();
        let (entered_tx, mut entered_rx) = async_mpsc::unbounded_channel();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 2,
            knees: vec![120.0, 90.0],
            block_on: Some("extract"),
            release: Mutex::new(Some(release_rx)),
            entered: Some(entered_tx),
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let orch = Arc::new(ws.orchestrator(analyzer.clone(), sink.clone()));
        let registry = Arc::new(JobRegistry::new());

        let job = Job::new(UserId(10));
        registry.register(&job).unwrap();
        let run = {
            let orch = orch.clone();
            let request = ws.request(Some("valgus"));
            tokio::spawn(async move { orch.run(&job, request).await })
        };

        assert_eq!(entered_rx.recv().await, Some("extract"));
        assert!(registry.cancel(UserId(10)).await);
        assert_eq!(run.await.unwrap(), JobOutcome::Cancelled);

        // Extraction finishes after the job ended; its frames are never analyzed
        release_tx.send(()).unwrap();
        orch.pool().shutdown().await;
        assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);
        assert!(sink.records.lock().unwrap().is_empty());

        // The late frames are left for the sweep
        assert_eq!(orch.sweep_frames(Duration::ZERO).await, 1);
        assert_eq!(orch.sweep_frames(Duration::ZERO).await, 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_annotated_and_fresh_directories() {
        let ws = Workspace::new();
        let orch = ws.orchestrator(Arc::new(FakeAnalyzer::default()), Arc::new(MemorySink::default()));
        assert_eq!(orch.sweep_frames(Duration::ZERO).await, 0);

        std::fs::create_dir_all(ws.frames_dir().join(ANNOTATED_DIR)).unwrap();
        std::fs::create_dir_all(ws.frames_dir().join("left-behind")).unwrap();
        std::fs::write(ws.frames_dir().join("left-behind").join("frame_0001.jpg"), b"x").unwrap();

        assert_eq!(orch.sweep_frames(Duration::from_secs(3600)).await, 0);
        assert_eq!(orch.sweep_frames(Duration::ZERO).await, 1);
        assert!(ws.frames_dir().join(ANNOTATED_DIR).exists());
        assert!(!ws.frames_dir().join("left-behind").exists());
    }

    #[tokio::test]
    async fn test_cancel_before_start_never_dispatches() {
        let ws = Workspace::new();
        let analyzer = Arc::new(FakeAnalyzer {
            frames: 2,
            knees: vec![120.0, 90.0],
            ..Default::default()
        });
        let orch = ws.orchestrator(analyzer.clone(), Arc::new(MemorySink::default()));
        let job = Job::new(UserId(1));
        job.cancellation().cancel();

        assert_eq!(orch.run(&job, ws.request(None)).await, JobOutcome::Cancelled);
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);
    }
}
