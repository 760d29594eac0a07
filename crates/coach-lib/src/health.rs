//! Component health for liveness and readiness checks

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::worker_pool::WorkerPool;

/// Health of one component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, with reduced function
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last report
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across components; healthy when none are registered
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Names of the tracked components
pub mod components {
    pub const WORKER_POOL: &str = "worker_pool";
    pub const ANALYZER: &str = "analyzer";
    pub const DATASET: &str = "dataset";

    pub const ALL: [&str; 3] = [WORKER_POOL, ANALYZER, DATASET];
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every tracked component healthy
    pub async fn register_defaults(&self) {
        let mut table = self.components.write().await;
        for name in components::ALL {
            table.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    async fn put(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.put(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.put(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.put(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Derive worker pool health from its current load.
    ///
    /// A closed pool is unhealthy; a queue deeper than `backlog_limit` times
    /// the capacity is degraded.
    pub async fn report_pool(&self, pool: &WorkerPool, backlog_limit: usize) {
        let queued = pool.queued();
        let health = if pool.is_shut_down() {
            ComponentHealth::unhealthy("worker pool is shut down")
        } else if queued > pool.capacity() * backlog_limit {
            ComponentHealth::degraded(format!(
                "{} submissions waiting for {} workers",
                queued,
                pool.capacity()
            ))
        } else {
            ComponentHealth::healthy()
        };
        self.put(components::WORKER_POOL, health).await;
    }

    /// Dataset health follows the most recent write attempt
    pub async fn report_dataset_write(&self, error: Option<&str>) {
        match error {
            Some(e) => self.set_degraded(components::DATASET, e).await,
            None => self.set_healthy(components::DATASET).await,
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    /// Ready once startup finished and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !self.ready.load(Ordering::SeqCst) {
            Some("Service not yet initialized")
        } else if self.health().await.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
