//! Observability infrastructure for the squat coach
//!
//! Provides:
//! - Prometheus metrics (admissions, job outcomes, stage latency, pool load)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::UserId;

/// Histogram buckets for pipeline stages (in seconds)
const STAGE_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CoachMetricsInner> = OnceLock::new();

struct CoachMetricsInner {
    jobs_admitted: IntCounter,
    jobs_rejected: IntCounterVec,
    jobs_finished: IntCounterVec,
    stage_duration_seconds: HistogramVec,
    active_jobs: IntGauge,
    pool_in_flight: IntGauge,
    pool_queued: IntGauge,
    dataset_writes: IntCounterVec,
}

impl CoachMetricsInner {
    fn new() -> Self {
        Self {
            jobs_admitted: register_int_counter!(
                "squat_coach_jobs_admitted_total",
                "Jobs that cleared validation and admission"
            )
            .expect("Failed to register jobs_admitted_total"),

            jobs_rejected: register_int_counter_vec!(
                "squat_coach_jobs_rejected_total",
                "Submissions rejected before a job was created",
                &["reason"]
            )
            .expect("Failed to register jobs_rejected_total"),

            jobs_finished: register_int_counter_vec!(
                "squat_coach_jobs_finished_total",
                "Jobs that reached a terminal state",
                &["outcome"]
            )
            .expect("Failed to register jobs_finished_total"),

            stage_duration_seconds: register_histogram_vec!(
                "squat_coach_stage_duration_seconds",
                "Wall time spent per pipeline stage",
                &["stage"],
                STAGE_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_duration_seconds"),

            active_jobs: register_int_gauge!(
                "squat_coach_active_jobs",
                "Jobs currently registered as in flight"
            )
            .expect("Failed to register active_jobs"),

            pool_in_flight: register_int_gauge!(
                "squat_coach_worker_pool_in_flight",
                "Units of work executing on the worker pool"
            )
            .expect("Failed to register worker_pool_in_flight"),

            pool_queued: register_int_gauge!(
                "squat_coach_worker_pool_queued",
                "Submissions waiting for a worker"
            )
            .expect("Failed to register worker_pool_queued"),

            dataset_writes: register_int_counter_vec!(
                "squat_coach_dataset_writes_total",
                "Dataset recording attempts by result",
                &["result"]
            )
            .expect("Failed to register dataset_writes_total"),
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct CoachMetrics {
    _private: (),
}

impl Default for CoachMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CoachMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CoachMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CoachMetricsInner {
        GLOBAL_METRICS.get_or_init(CoachMetricsInner::new)
    }

    pub fn inc_admitted(&self) {
        self.inner().jobs_admitted.inc();
    }

    /// `reason` is one of `validation`, `rate_limited`, `already_active`
    pub fn inc_rejected(&self, reason: &str) {
        self.inner().jobs_rejected.with_label_values(&[reason]).inc();
    }

    pub fn inc_finished(&self, outcome: &str) {
        self.inner().jobs_finished.with_label_values(&[outcome]).inc();
    }

    pub fn observe_stage(&self, stage: &str, elapsed: Duration) {
        self.inner()
            .stage_duration_seconds
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_active_jobs(&self, count: usize) {
        self.inner().active_jobs.set(count as i64);
    }

    pub fn set_pool_load(&self, in_flight: usize, queued: usize) {
        self.inner().pool_in_flight.set(in_flight as i64);
        self.inner().pool_queued.set(queued as i64);
    }

    pub fn inc_dataset_write(&self, result: &str) {
        self.inner().dataset_writes.with_label_values(&[result]).inc();
    }
}

/// Structured logger for job lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, worker_capacity: usize) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            worker_capacity = worker_capacity,
            "Squat coach started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Squat coach shutting down"
        );
    }

    pub fn log_admitted(&self, user: UserId, job_id: Uuid, remaining: usize) {
        info!(
            event = "job_admitted",
            instance = %self.instance,
            user = %user,
            job_id = %job_id,
            remaining = remaining,
            "Job admitted"
        );
    }

    pub fn log_rejected(&self, user: UserId, reason: &str, detail: &str) {
        info!(
            event = "job_rejected",
            instance = %self.instance,
            user = %user,
            reason = %reason,
            detail = %detail,
            "Submission rejected"
        );
    }

    pub fn log_stage(&self, job_id: Uuid, stage: &str, elapsed: Duration, items: usize) {
        info!(
            event = "stage_completed",
            instance = %self.instance,
            job_id = %job_id,
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            items = items,
            "Pipeline stage completed"
        );
    }

    pub fn log_finished(&self, user: UserId, job_id: Uuid, outcome: &str, detail: Option<&str>) {
        match outcome {
            "failed" | "unexpected" => warn!(
                event = "job_finished",
                instance = %self.instance,
                user = %user,
                job_id = %job_id,
                outcome = %outcome,
                detail = ?detail,
                "Job failed"
            ),
            _ => info!(
                event = "job_finished",
                instance = %self.instance,
                user = %user,
                job_id = %job_id,
                outcome = %outcome,
                "Job finished"
            ),
        }
    }

    pub fn log_annotation_degraded(&self, job_id: Uuid, error: &str) {
        warn!(
            event = "annotation_degraded",
            instance = %self.instance,
            job_id = %job_id,
            error = %error,
            "Annotation failed, continuing without overlay"
        );
    }

    pub fn log_dataset_recorded(&self, job_id: Uuid, video_id: &str) {
        info!(
            event = "dataset_recorded",
            instance = %self.instance,
            job_id = %job_id,
            video_id = %video_id,
            "Dataset record appended"
        );
    }

    pub fn log_dataset_skipped(&self, job_id: Uuid, reason: &str) {
        warn!(
            event = "dataset_skipped",
            instance = %self.instance,
            job_id = %job_id,
            reason = %reason,
            "Dataset record not written"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coach_metrics_shared_registration() {
        // Both handles share the single global registration
        let metrics = CoachMetrics::new();
        let other = CoachMetrics::default();

        metrics.inc_admitted();
        metrics.inc_rejected("rate_limited");
        metrics.inc_finished("completed");
        metrics.observe_stage("extract", Duration::from_millis(120));
        other.set_active_jobs(1);
        other.set_pool_load(2, 3);
        other.inc_dataset_write("recorded");

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "squat_coach_stage_duration_seconds"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("coach-1");
        assert_eq!(logger.instance, "coach-1");
    }
}
