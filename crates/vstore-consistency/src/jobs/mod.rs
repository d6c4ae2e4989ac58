//! Background jobs and the runner that drives them.
//!
//! Every job exposes a single iteration (`run_once`). The runner decides how
//! often to call it and checks the cancellation signal between iterations,
//! never in the middle of one.

mod binaries_cleanup;
mod lock_cleanup;
mod object_events;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info, warn};
use vstore_core::StoreError;

pub use binaries_cleanup::{BinariesCleanupJob, BinariesCleanupReport};
pub use lock_cleanup::{LockCleanupJob, LockCleanupReport};
pub use object_events::{ObjectEventsProcessingJob, ObjectEventsReport};

/// How the runner drives a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSchedule {
    /// Run a single iteration and return its result.
    OneShot,
    /// Iterate until cancelled, pausing `idle` between iterations.
    Continuous { idle: Duration },
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    fn schedule(&self) -> JobSchedule;

    /// One iteration. Per-item failures are handled inside; an error means the
    /// iteration itself could not proceed.
    async fn run_once(&self) -> Result<(), StoreError>;
}

/// Explicit job id → job map, assembled by the host at startup.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, job_id: impl Into<String>, job: Arc<dyn Job>) -> Self {
        self.register(job_id, job);
        self
    }

    pub fn register(&mut self, job_id: impl Into<String>, job: Arc<dyn Job>) {
        let job_id = job_id.into();
        if self.jobs.insert(job_id.clone(), job).is_some() {
            warn!(job_id, "Replaced previously registered job");
        }
    }

    pub fn get(&self, job_id: &str) -> Result<Arc<dyn Job>, StoreError> {
        self.jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    /// Registered ids, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.jobs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Runs registered jobs under a cooperative cancellation signal.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
}

impl JobRunner {
    pub fn new(registry: JobRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Run `job_id` until it finishes (one-shot) or `cancel` turns true.
    ///
    /// For continuous jobs, iteration errors are logged and the loop goes on,
    /// except event log transport failures, which end the run with that error. Dropping
    /// the cancellation sender also stops a continuous job.
    pub async fn run(
        &self,
        job_id: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), StoreError> {
        let job = self.registry.get(job_id)?;
        info!(job_id, name = job.name(), "Starting job");

        match job.schedule() {
            JobSchedule::OneShot => {
                let result = job.run_once().await;
                info!(job_id, ok = result.is_ok(), "Job finished");
                result
            }
            JobSchedule::Continuous { idle } => {
                let mut iterations = 0u64;
                while !*cancel.borrow() {
                    iterations += 1;
                    match job.run_once().await {
                        Ok(()) => {}
                        Err(e) if is_log_failure(&e) => {
                            error!(job_id, iterations, error = %e, "Reading the event log failed, stopping job");
                            return Err(e);
                        }
                        Err(e) => {
                            error!(job_id, iterations, error = %e, "Job iteration failed");
                        }
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(idle) => {}
                        _ = cancel.wait_for(|&cancelled| cancelled) => break,
                    }
                }

                info!(job_id, iterations, "Job cancelled");
                Ok(())
            }
        }
    }
}

fn is_log_failure(e: &StoreError) -> bool {
    matches!(e, StoreError::EventLog(_))
}
