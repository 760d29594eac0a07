//! Squat coach core library
//!
//! This crate provides the job lifecycle behind video technique analysis:
//! - Per-user sliding-window rate limiting
//! - A registry holding at most one cancellable job per user
//! - A bounded worker pool for CPU-heavy stages
//! - The staged analysis pipeline and dataset capture
//! - Health checks and observability

pub mod analysis;
pub mod dataset;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod rate_limit;
pub mod registry;
pub mod service;
pub mod storage;
pub mod worker_pool;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CoachMetrics, StructuredLogger};
pub use service::{AnalysisService, JobReport, JobTicket, ReportStatus, SubmitRejection};
