//! Job lifecycle and the per-user active job registry
//!
//! A [`Job`] is owned by the task driving its pipeline; the registry only
//! holds a [`JobHandle`] that observes the job's status and can request
//! cancellation. Each user has at most one non-terminal job registered.

use crate::models::UserId;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Cancelled | JobStatus::Completed | JobStatus::Failed
        )
    }
}

/// Errors returned by the registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("user {user} already has active job {job_id}")]
    AlreadyActive { user: UserId, job_id: Uuid },
}

/// A cancellable unit of pipeline work, owned by the task that runs it
#[derive(Debug)]
pub struct Job {
    id: Uuid,
    owner: UserId,
    token: CancellationToken,
    status: watch::Sender<JobStatus>,
    started_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job for `owner`
    pub fn new(owner: UserId) -> Self {
        let (status, _) = watch::channel(JobStatus::Pending);
        Self {
            id: Uuid::new_v4(),
            owner,
            token: CancellationToken::new(),
            status,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Token observed by the pipeline at stage boundaries
    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A registry-side view of this job
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            owner: self.owner,
            token: self.token.clone(),
            status: self.status.subscribe(),
            started_at: self.started_at,
        }
    }

    /// Move a pending job to running. No-op once the job left `Pending`.
    pub fn mark_running(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == JobStatus::Pending {
                *status = JobStatus::Running;
                true
            } else {
                false
            }
        })
    }

    /// Set the terminal status. Only the first call has any effect.
    pub fn finish(&self, terminal: JobStatus) -> bool {
        debug_assert!(terminal.is_terminal());
        self.status.send_if_modified(|status| {
            if status.is_terminal() {
                false
            } else {
                *status = terminal;
                true
            }
        })
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        // A job dropped mid-flight (panic, aborted task) must not leave its owner stuck
        if self.finish(JobStatus::Failed) {
            warn!(job_id = %self.id, user_id = %self.owner, "Job dropped before reaching a terminal state");
        }
    }
}

/// Registry-side handle to a job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    owner: UserId,
    token: CancellationToken,
    status: watch::Receiver<JobStatus>,
    started_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Wait until the job reaches a terminal status and return it
    pub async fn wait_terminal(&mut self) -> JobStatus {
        let observed = self
            .status
            .wait_for(|s| s.is_terminal())
            .await
            .map(|status| *status);
        match observed {
            Ok(status) => status,
            // The job was dropped; its Drop impl already published Failed
            Err(_) => {
                let last = *self.status.borrow();
                if last.is_terminal() {
                    last
                } else {
                    JobStatus::Failed
                }
            }
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            user: self.owner,
            status: self.status(),
            started_at: self.started_at,
            cancel_requested: self.token.is_cancelled(),
        }
    }
}

/// Point-in-time view of a registered job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub user: UserId,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

/// Tracks at most one in-flight job per user
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<UserId, JobHandle>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` for its owner.
    ///
    /// Fails if the owner already has a non-terminal job. A stale terminal
    /// entry that was not yet removed is replaced.
    pub fn register(&self, job: &Job) -> Result<(), RegistryError> {
        match self.jobs.entry(job.owner()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_terminal() {
                    return Err(RegistryError::AlreadyActive {
                        user: job.owner(),
                        job_id: existing.get().id(),
                    });
                }
                existing.insert(job.handle());
            }
            Entry::Vacant(slot) => {
                slot.insert(job.handle());
            }
        }
        info!(user_id = %job.owner(), job_id = %job.id(), "Registered job");
        Ok(())
    }

    /// True iff the user has a registered, non-terminal job
    pub fn has_active(&self, user: UserId) -> bool {
        self.jobs
            .get(&user)
            .map(|handle| !handle.is_terminal())
            .unwrap_or(false)
    }

    /// Cancel the user's job and wait for it to finalize.
    ///
    /// Returns false when there is nothing to cancel. If the job completes
    /// before it observes the request, completion stands.
    pub async fn cancel(&self, user: UserId) -> bool {
        // Clone out of the map so no shard lock is held across the await
        let mut handle = match self.jobs.get(&user) {
            Some(handle) => handle.clone(),
            None => return false,
        };

        if handle.is_terminal() {
            self.remove_job(user, handle.id());
            return false;
        }

        handle.token.cancel();
        let status = handle.wait_terminal().await;
        self.remove_job(user, handle.id());

        info!(user_id = %user, job_id = %handle.id(), final_status = ?status, "Cancel request finalized");
        true
    }

    /// Deregister the user's job if it is terminal; no-op otherwise
    pub fn remove(&self, user: UserId) {
        if self
            .jobs
            .remove_if(&user, |_, handle| handle.is_terminal())
            .is_some()
        {
            debug!(user_id = %user, "Removed finished job");
        }
    }

    /// Status of the user's registered job
    pub fn snapshot(&self, user: UserId) -> Option<JobSnapshot> {
        self.jobs.get(&user).map(|handle| handle.snapshot())
    }

    /// Number of registered non-terminal jobs
    pub fn active_count(&self) -> usize {
        self.jobs.iter().filter(|h| !h.is_terminal()).count()
    }

    fn remove_job(&self, user: UserId, job_id: Uuid) {
        self.jobs
            .remove_if(&user, |_, handle| handle.id() == job_id && handle.is_terminal());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_job_lifecycle_terminal_set_once() {
        let job = Job::new(UserId(1));
        assert_eq!(job.status(), JobStatus::Pending);

        assert!(job.mark_running());
        assert!(!job.mark_running());
        assert_eq!(job.status(), JobStatus::Running);

        assert!(job.finish(JobStatus::Completed));
        assert!(!job.finish(JobStatus::Cancelled));
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn test_register_rejects_second_active_job() {
        let registry = JobRegistry::new();
        let first = Job::new(UserId(1));
        let second = Job::new(UserId(1));

        registry.register(&first).unwrap();
        let err = registry.register(&second).unwrap_err();

        assert_eq!(
            err,
            RegistryError::AlreadyActive {
                user: UserId(1),
                job_id: first.id()
            }
        );
        // The original entry is untouched
        assert_eq!(registry.snapshot(UserId(1)).unwrap().job_id, first.id());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_register_replaces_stale_terminal_entry() {
        let registry = JobRegistry::new();
        let first = Job::new(UserId(1));
        registry.register(&first).unwrap();
        first.finish(JobStatus::Completed);

        let second = Job::new(UserId(1));
        registry.register(&second).unwrap();
        assert_eq!(registry.snapshot(UserId(1)).unwrap().job_id, second.id());
    }

    #[test]
    fn test_remove_ignores_in_flight_job() {
        let registry = JobRegistry::new();
        let job = Job::new(UserId(5));
        registry.register(&job).unwrap();
        job.mark_running();

        registry.remove(UserId(5));
        assert!(registry.has_active(UserId(5)));

        job.finish(JobStatus::Failed);
        assert!(!registry.has_active(UserId(5)));
        registry.remove(UserId(5));
        assert!(registry.snapshot(UserId(5)).is_none());
    }

    #[tokio::test]
    async fn test_cancel_without_job_returns_false() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel(UserId(9)).await);
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_deregisters_and_returns_false() {
        let registry = JobRegistry::new();
        let job = Job::new(UserId(2));
        registry.register(&job).unwrap();
        job.finish(JobStatus::Completed);

        assert!(!registry.cancel(UserId(2)).await);
        assert!(registry.snapshot(UserId(2)).is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_job_waits_for_finalization() {
        let registry = Arc::new(JobRegistry::new());
        let job = Job::new(UserId(3));
        registry.register(&job).unwrap();
        job.mark_running();

        let token = job.cancellation().clone();
        let worker = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            job.finish(JobStatus::Cancelled);
            job
        });

        assert!(registry.cancel(UserId(3)).await);
        assert!(!registry.has_active(UserId(3)));
        assert!(registry.snapshot(UserId(3)).is_none());

        let job = worker.await.unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[test]
    fn test_cancel_stays_pending_until_job_finishes() {
        let registry = JobRegistry::new();
        let job = Job::new(UserId(6));
        registry.register(&job).unwrap();
        job.mark_running();

        let mut cancel = tokio_test::task::spawn(registry.cancel(UserId(6)));
        tokio_test::assert_pending!(cancel.poll());
        assert!(job.is_cancel_requested());
        assert!(registry.has_active(UserId(6)));

        // Completion wins the race; cancel still reports it acted
        job.finish(JobStatus::Completed);
        assert!(cancel.is_woken());
        assert!(tokio_test::assert_ready!(cancel.poll()));
        drop(cancel);

        assert_eq!(job.status(), JobStatus::Completed);
        assert!(registry.snapshot(UserId(6)).is_none());
    }

    #[tokio::test]
    async fn test_cancel_observes_dropped_job_as_failed() {
        let registry = JobRegistry::new();
        let job = Job::new(UserId(4));
        registry.register(&job).unwrap();
        job.mark_running();

        let token = job.cancellation().clone();
        tokio::spawn(async move {
            token.cancelled().await;
            drop(job);
        });

        assert!(registry.cancel(UserId(4)).await);
        assert!(!registry.has_active(UserId(4)));
    }
}
