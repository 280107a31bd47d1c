//! Drains the queue, one deploy at a time

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::{Queue, QueueEntry};
use crate::error::{HookError, WorkerError};
use crate::worker::{CommandRunner, DeployReport, Worker, WorkerSettings};

/// What a single pass of the loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The queue was empty
    Idle,
    Deployed(Uuid),
    /// The job was popped and dropped after failing
    Failed(Uuid),
}

pub struct Dispatcher {
    queue: Queue,
    settings: WorkerSettings,
    runner: Arc<dyn CommandRunner>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Queue,
        settings: WorkerSettings,
        runner: Arc<dyn CommandRunner>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            settings,
            runner,
            poll_interval,
        }
    }

    /// Loop forever. A failed job is logged and dropped; it never stops the loop.
    pub async fn run(self) {
        info!(
            "Dispatcher started (work dir {}, poll every {:?})",
            self.settings.work_dir.display(),
            self.poll_interval
        );

        loop {
            match self.run_once().await {
                Ok(DispatchOutcome::Idle) => self.wait_for_work().await,
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to read from the build queue: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Pop at most one job and run it to completion
    pub async fn run_once(&self) -> Result<DispatchOutcome, HookError> {
        let Some(entry) = self.queue.pop().await? else {
            return Ok(DispatchOutcome::Idle);
        };

        info!(
            "Job {} dequeued (enqueued at {})",
            entry.id,
            entry.enqueued_at.to_rfc3339()
        );

        match self.deploy(&entry).await {
            Ok(report) => {
                info!(
                    "Job {} completed successfully: deployed to {} using {} ({} scripts)",
                    entry.id,
                    report.clone_path.display(),
                    report.config_path.display(),
                    report.scripts_run.len()
                );
                Ok(DispatchOutcome::Deployed(entry.id))
            }
            Err(e) => {
                error!("Job {} failed: {}", entry.id, e);
                Ok(DispatchOutcome::Failed(entry.id))
            }
        }
    }

    async fn deploy(&self, entry: &QueueEntry) -> Result<DeployReport, WorkerError> {
        let event = entry.payload.push_event()?;
        let mut worker = Worker::new(event, &self.settings, self.runner.as_ref());
        worker.deploy().await
    }

    /// Sleep until something is added in this process, or the poll interval
    /// passes (another process may have written to the database).
    async fn wait_for_work(&self) {
        tokio::select! {
            _ = self.queue.notified() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }
}
