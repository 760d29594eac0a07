//! Admission and job lifecycle entry points
//!
//! Order of admission: input validation, a read-only active-job check, the
//! atomic rate-limit reservation, then atomic registration. Only an admitted
//! request consumes rate-limit capacity: a request that loses the
//! registration race to a concurrent one from the same user hands its
//! reservation back.

use crate::models::{JobSummary, UserId, VideoSubmission};
use crate::observability::{CoachMetrics, StructuredLogger};
use crate::pipeline::{DatasetOutcome, JobFailure, JobOutcome, JobRequest, PipelineOrchestrator};
use crate::rate_limit::RateLimiter;
use crate::registry::{Job, JobRegistry, JobSnapshot, RegistryError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{error, info};
use uuid::Uuid;

const MIB: u64 = 1024 * 1024;

/// Input bounds checked before admission
#[derive(Debug, Clone, Copy)]
pub struct SubmissionLimits {
    pub max_duration_secs: u64,
    pub max_size_bytes: u64,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            max_duration_secs: 60,
            max_size_bytes: 20 * MIB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("video is too long, send up to {max_secs} seconds")]
    TooLong { duration_secs: u64, max_secs: u64 },
    #[error("file is too large, maximum {} MiB", .max_bytes / MIB)]
    TooLarge { size_bytes: u64, max_bytes: u64 },
    #[error("video not found, upload it first")]
    UnknownVideo,
}

/// A submission that was turned away without creating a job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejection {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("too many requests, {remaining}/{capacity} available, wait {retry_after_secs} seconds")]
    RateLimited {
        remaining: usize,
        capacity: usize,
        retry_after_secs: u64,
    },

    #[error("you already have an active job, wait for it or cancel")]
    AlreadyActive { job_id: Uuid },
}

impl SubmitRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            SubmitRejection::Validation(_) => "validation",
            SubmitRejection::RateLimited { .. } => "rate_limited",
            SubmitRejection::AlreadyActive { .. } => "already_active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    Failed,
    Cancelled,
    Unexpected,
}

/// Final, user-facing account of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub user: UserId,
    pub status: ReportStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetOutcome>,
}

impl JobReport {
    pub fn from_outcome(job_id: Uuid, user: UserId, outcome: JobOutcome) -> Self {
        let base = Self {
            job_id,
            user,
            status: ReportStatus::Cancelled,
            message: "analysis cancelled".to_string(),
            summary: None,
            failure: None,
            dataset: None,
        };
        match outcome {
            JobOutcome::Cancelled => base,
            JobOutcome::Failed(failure) => Self {
                status: ReportStatus::Failed,
                message: match failure {
                    JobFailure::ExtractionFailed(_) => "could not extract frames from the video",
                    JobFailure::AnalysisFailed(_) => "no pose detected in the video",
                }
                .to_string(),
                failure: Some(failure),
                ..base
            },
            JobOutcome::Completed { summary, dataset } => Self {
                status: ReportStatus::Completed,
                message: completion_message(&summary, &dataset),
                summary: Some(*summary),
                dataset: Some(dataset),
                ..base
            },
        }
    }

    /// Report for a job whose task died without an outcome
    pub fn unexpected(job_id: Uuid, user: UserId) -> Self {
        Self {
            job_id,
            user,
            status: ReportStatus::Unexpected,
            message: "something went wrong, please try again later".to_string(),
            summary: None,
            failure: None,
            dataset: None,
        }
    }
}

fn completion_message(summary: &JobSummary, dataset: &DatasetOutcome) -> String {
    let mut message = format!(
        "analysis complete: {}/{} frames processed",
        summary.processed_count, summary.frames_count
    );
    match &summary.min_angle {
        Some(m) => message.push_str(&format!(
            ", minimum {} {:.1} degrees at frame {}",
            m.angle, m.value, m.frame.index
        )),
        None => message.push_str(", no knee angle could be measured"),
    }
    match dataset {
        DatasetOutcome::Skipped => {}
        DatasetOutcome::Recorded { .. } => message.push_str("; saved to the dataset"),
        DatasetOutcome::LabelInvalid { raw } => {
            message.push_str(&format!("; label {raw:?} not recognized, not saved"))
        }
        DatasetOutcome::Failed { .. } => message.push_str("; could not save the dataset record"),
    }
    message
}

/// Handle to an admitted job
#[derive(Debug)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub user: UserId,
    /// Rate-limit capacity left after this admission
    pub remaining: usize,
    report: oneshot::Receiver<JobReport>,
}

impl JobTicket {
    /// Wait for the job's final report
    pub async fn wait(self) -> JobReport {
        match self.report.await {
            Ok(report) => report,
            Err(_) => JobReport::unexpected(self.job_id, self.user),
        }
    }
}

/// Process-wide admission gate and job runner
pub struct AnalysisService {
    limiter: RateLimiter,
    registry: Arc<JobRegistry>,
    orchestrator: Arc<PipelineOrchestrator>,
    limits: SubmissionLimits,
    metrics: CoachMetrics,
    logger: StructuredLogger,
    tasks: TaskTracker,
}

impl AnalysisService {
    pub fn new(
        limiter: RateLimiter,
        orchestrator: Arc<PipelineOrchestrator>,
        limits: SubmissionLimits,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            limiter,
            registry: Arc::new(JobRegistry::new()),
            orchestrator,
            limits,
            metrics: CoachMetrics::new(),
            logger,
            tasks: TaskTracker::new(),
        }
    }

    pub fn limits(&self) -> SubmissionLimits {
        self.limits
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.orchestrator
    }

    pub fn validate(&self, submission: &VideoSubmission) -> Result<(), ValidationError> {
        if submission.duration_secs > self.limits.max_duration_secs {
            return Err(ValidationError::TooLong {
                duration_secs: submission.duration_secs,
                max_secs: self.limits.max_duration_secs,
            });
        }
        if submission.size_bytes > self.limits.max_size_bytes {
            return Err(ValidationError::TooLarge {
                size_bytes: submission.size_bytes,
                max_bytes: self.limits.max_size_bytes,
            });
        }
        Ok(())
    }

    /// Admit a submission and start its pipeline in the background
    pub fn submit(&self, submission: VideoSubmission) -> Result<JobTicket, SubmitRejection> {
        let user = submission.user;
        let remaining = self
            .admit(&submission)
            .map_err(|rejection| self.rejected(user, rejection))?;

        let job = Job::new(user);
        if let Err(RegistryError::AlreadyActive { job_id, .. }) = self.registry.register(&job) {
            self.limiter.refund(user);
            return Err(self.rejected(user, SubmitRejection::AlreadyActive { job_id }));
        }

        let job_id = job.id();
        self.metrics.inc_admitted();
        self.metrics.set_active_jobs(self.registry.active_count());
        self.logger.log_admitted(user, job_id, remaining);

        let (tx, rx) = oneshot::channel();
        let request = JobRequest {
            video_path: submission.video_path,
            caption: submission.caption,
        };
        let orchestrator = self.orchestrator.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();

        self.tasks.spawn(async move {
            let run = tokio::spawn(async move { orchestrator.run(&job, request).await });
            let report = match run.await {
                Ok(outcome) => JobReport::from_outcome(job_id, user, outcome),
                Err(e) => {
                    // The job was dropped with the task and published Failed
                    error!(job_id = %job_id, user_id = %user, error = %e, "Job task died");
                    logger.log_finished(user, job_id, "unexpected", Some(&e.to_string()));
                    JobReport::unexpected(job_id, user)
                }
            };
            registry.remove(user);
            metrics.set_active_jobs(registry.active_count());
            let _ = tx.send(report);
        });

        Ok(JobTicket {
            job_id,
            user,
            remaining,
            report: rx,
        })
    }

    /// Returns the rate-limit capacity left after the reservation
    fn admit(&self, submission: &VideoSubmission) -> Result<usize, SubmitRejection> {
        let user = submission.user;
        self.validate(submission)?;

        if let Some(active) = self.active_job(user) {
            return Err(SubmitRejection::AlreadyActive {
                job_id: active.job_id,
            });
        }

        let decision = self.limiter.admit(user);
        if !decision.allowed {
            return Err(SubmitRejection::RateLimited {
                remaining: decision.remaining,
                capacity: self.limiter.config().capacity,
                retry_after_secs: decision.retry_after.as_secs_f64().ceil() as u64,
            });
        }
        Ok(decision.remaining)
    }

    fn rejected(&self, user: UserId, rejection: SubmitRejection) -> SubmitRejection {
        self.metrics.inc_rejected(rejection.reason());
        self.logger
            .log_rejected(user, rejection.reason(), &rejection.to_string());
        rejection
    }

    /// Cancel the user's job; true if there was one to cancel
    pub async fn cancel(&self, user: UserId) -> bool {
        let cancelled = self.registry.cancel(user).await;
        self.metrics.set_active_jobs(self.registry.active_count());
        cancelled
    }

    /// The user's in-flight job, if any
    pub fn active_job(&self, user: UserId) -> Option<JobSnapshot> {
        self.registry
            .snapshot(user)
            .filter(|snapshot| !snapshot.status.is_terminal())
    }

    pub fn has_active(&self, user: UserId) -> bool {
        self.registry.has_active(user)
    }

    pub fn remaining(&self, user: UserId) -> usize {
        self.limiter.remaining(user)
    }

    /// Purge expired rate-limit entries
    pub fn sweep(&self) -> usize {
        self.limiter.sweep()
    }

    /// Close the worker pool and wait for running jobs to wind down
    pub async fn shutdown(&self) {
        info!(active_jobs = self.registry.active_count(), "Draining jobs");
        self.orchestrator.pool().shutdown().await;
        self.tasks.close();
        self.tasks.wait().await;
    }
}
