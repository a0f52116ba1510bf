//! Asynchronous job registry and executor.
//!
//! Jobs move `pending → running → completed | failed | cancelled`. Terminal
//! states never transition again, and `progress = 100` only ever appears on
//! terminal jobs. Each accepted job spawns a background task that performs
//! the work through the opaque command layer, checking for cancellation
//! between stages so a cancelled job is never overwritten by a late
//! completion.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    bus::{Bus, Event},
    commands::CommandRegistry,
    middleware::request_id,
};

/// Job types accepted at creation; anything else is a 400 with a
/// `valid_types` hint.
pub const VALID_JOB_TYPES: &[&str] = &["scan", "sync", "prune"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutation applied to a job under the registry lock.
#[derive(Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

pub enum CancelOutcome {
    NotFound,
    /// Job already terminal; carries the current status.
    Conflict(JobStatus),
    Cancelled(Job),
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job type {0:?}")]
pub struct UnknownJobType(pub String);

/// In-memory job store, constructor-injected.
pub struct JobRegistry {
    jobs: DashMap<String, Job>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Validates the type and records a fresh pending job. Ids come from the
    /// same generator as request ids.
    pub fn create(&self, job_type: &str) -> Result<Job, UnknownJobType> {
        if !VALID_JOB_TYPES.contains(&job_type) {
            return Err(UnknownJobType(job_type.to_string()));
        }
        let now = Utc::now();
        let job = Job {
            id: request_id::generate(),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|j| j.value().clone())
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.jobs.get(id).map(|j| j.value().status)
    }

    /// All jobs, newest first. An empty registry yields an empty vec, never
    /// a missing field.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Applies `update` to the job. Unknown ids are dropped silently;
    /// terminal jobs never change status again.
    pub fn update(&self, id: &str, update: JobUpdate) {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return;
        };
        if let Some(status) = update.status {
            if !job.status.is_terminal() {
                job.status = status;
            }
        }
        if let Some(progress) = update.progress {
            job.progress = progress.min(100);
        }
        if let Some(result) = update.result {
            job.result = Some(result);
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        job.updated_at = Utc::now();
    }

    /// Cancels a pending or running job with the caller's message.
    pub fn cancel(&self, id: &str, message: &str) -> CancelOutcome {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return CancelOutcome::NotFound;
        };
        if job.status.is_terminal() {
            return CancelOutcome::Conflict(job.status);
        }
        job.status = JobStatus::Cancelled;
        job.error = Some(message.to_string());
        job.updated_at = Utc::now();
        CancelOutcome::Cancelled(job.clone())
    }
}

/// Runs a job to completion in the background.
///
/// The task marks the job running, walks staged progress with a cancellation
/// check between stages, performs the actual work as an opaque command
/// invocation, and finishes terminal. A job cancelled mid-flight keeps its
/// cancelled status; the registry's terminal guard makes the late update a
/// no-op.
pub fn spawn_executor(
    registry: Arc<JobRegistry>,
    commands: Arc<CommandRegistry>,
    bus: Bus,
    job: Job,
) {
    tokio::spawn(async move {
        let id = job.id.clone();
        registry.update(
            &id,
            JobUpdate {
                status: Some(JobStatus::Running),
                ..Default::default()
            },
        );
        emit_status(&bus, &registry, &id).await;

        for progress in [25u8, 50, 75] {
            tokio::time::sleep(Duration::from_millis(50)).await;
            match registry.status(&id) {
                Some(JobStatus::Cancelled) | None => return,
                _ => {}
            }
            registry.update(
                &id,
                JobUpdate {
                    progress: Some(progress),
                    ..Default::default()
                },
            );
        }

        let outcome = commands
            .invoke(
                &format!("jobs.{}", job.job_type),
                json!({"job_id": id.clone(), "type": job.job_type.clone()}),
            )
            .await;

        if matches!(registry.status(&id), Some(JobStatus::Cancelled) | None) {
            return;
        }

        match outcome {
            Ok(result) => registry.update(
                &id,
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    progress: Some(100),
                    result: Some(result),
                    ..Default::default()
                },
            ),
            Err(err) => registry.update(
                &id,
                JobUpdate {
                    status: Some(JobStatus::Failed),
                    progress: Some(100),
                    error: Some(err.to_string()),
                    ..Default::default()
                },
            ),
        }
        emit_status(&bus, &registry, &id).await;
    });
}

async fn emit_status(bus: &Bus, registry: &JobRegistry, id: &str) {
    if let Some(job) = registry.get(id) {
        bus.emit(Event::new(
            "job_status",
            None,
            json!({
                "job_id": job.id,
                "type": job.job_type,
                "status": job.status.as_str(),
                "progress": job.progress,
            }),
        ))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_validates_type() {
        let registry = JobRegistry::new();
        assert!(registry.create("scan").is_ok());
        let err = registry.create("explode").unwrap_err();
        assert_eq!(err.0, "explode");
    }

    #[test]
    fn fresh_jobs_are_pending_with_equal_timestamps() {
        let registry = JobRegistry::new();
        let job = registry.create("scan").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.created_at, job.updated_at);
        assert_eq!(job.id.len(), 24);
    }

    #[test]
    fn terminal_status_never_transitions() {
        let registry = JobRegistry::new();
        let job = registry.create("scan").unwrap();
        registry.update(
            &job.id,
            JobUpdate {
                status: Some(JobStatus::Cancelled),
                ..Default::default()
            },
        );
        registry.update(
            &job.id,
            JobUpdate {
                status: Some(JobStatus::Completed),
                progress: Some(100),
                ..Default::default()
            },
        );
        assert_eq!(registry.status(&job.id), Some(JobStatus::Cancelled));
    }

    #[test]
    fn cancel_conflicts_on_terminal() {
        let registry = JobRegistry::new();
        let job = registry.create("sync").unwrap();
        registry.update(
            &job.id,
            JobUpdate {
                status: Some(JobStatus::Completed),
                progress: Some(100),
                ..Default::default()
            },
        );
        match registry.cancel(&job.id, "stop") {
            CancelOutcome::Conflict(status) => assert_eq!(status, JobStatus::Completed),
            _ => panic!("expected conflict"),
        }
    }

    #[test]
    fn cancel_records_message() {
        let registry = JobRegistry::new();
        let job = registry.create("prune").unwrap();
        match registry.cancel(&job.id, "operator request") {
            CancelOutcome::Cancelled(job) => {
                assert_eq!(job.status, JobStatus::Cancelled);
                assert_eq!(job.error.as_deref(), Some("operator request"));
            }
            _ => panic!("expected cancellation"),
        }
    }

    #[test]
    fn unknown_id_updates_are_dropped() {
        let registry = JobRegistry::new();
        registry.update(
            "missing",
            JobUpdate {
                status: Some(JobStatus::Running),
                ..Default::default()
            },
        );
        assert!(registry.list().is_empty());
    }

    #[test]
    fn list_is_newest_first() {
        let registry = JobRegistry::new();
        let a = registry.create("scan").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let b = registry.create("sync").unwrap();
        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }
}
