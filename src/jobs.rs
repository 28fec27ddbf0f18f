//! Supervises import runs started from the HTTP surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::import::{Importer, Session};
use crate::outbox::TaskQueue;

/// Finished statuses kept per process; the oldest are dropped first.
const MAX_FINISHED_STATUSES: usize = 1024;

#[derive(Debug, Clone)]
pub enum ExecutionMode {
    /// Run the whole import in a background task of this process.
    Inline,
    /// Enqueue one task per object for the queue worker.
    Queued(TaskQueue),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("an import is already running for this workspace")]
    AlreadyRunning { run_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed { created: usize, skipped: usize },
    Queued { enqueued: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self.state, JobState::Running)
    }
}

#[derive(Debug, Clone)]
pub struct ImportJobs {
    importer: Arc<Importer>,
    mode: ExecutionMode,
    statuses: Arc<Mutex<HashMap<String, JobStatus>>>,
    max_finished: usize,
}

impl ImportJobs {
    pub fn new(importer: Arc<Importer>, mode: ExecutionMode) -> Self {
        Self {
            importer,
            mode,
            statuses: Arc::default(),
            max_finished: MAX_FINISHED_STATUSES,
        }
    }

    /// Keep at most `max` finished statuses around.
    pub fn max_finished(mut self, max: usize) -> Self {
        self.max_finished = max;
        self
    }

    pub fn status(&self, bot_id: &str) -> Option<JobStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(bot_id)
            .cloned()
    }

    fn finish(&self, bot_id: &str, state: JobState) {
        let mut statuses = self
            .statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(status) = statuses.get_mut(bot_id) {
            status.state = state;
            status.finished_at = Some(Utc::now());
        }
        prune_finished(&mut statuses, self.max_finished);
    }

    /// Start an import for `session` unless one is already running for the
    /// same bot in this process. Returns the run id and the task handle.
    pub fn start(&self, session: Session) -> Result<(Uuid, JoinHandle<()>), JobError> {
        let run_id = Uuid::new_v4();
        {
            let mut statuses = self
                .statuses
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(current) = statuses.get(&session.bot_id).filter(|s| s.is_running()) {
                return Err(JobError::AlreadyRunning {
                    run_id: current.run_id,
                });
            }
            statuses.insert(
                session.bot_id.clone(),
                JobStatus {
                    run_id,
                    started_at: Utc::now(),
                    finished_at: None,
                    state: JobState::Running,
                },
            );
        }

        let jobs = self.clone();
        let handle = tokio::spawn(async move {
            let bot_id = session.bot_id.clone();
            info!(%bot_id, %run_id, "import started");
            let state = match &jobs.mode {
                ExecutionMode::Inline => match jobs.importer.import_all(&session).await {
                    Ok(summary) => JobState::Completed {
                        created: summary.created,
                        skipped: summary.skipped,
                    },
                    Err(err) => JobState::Failed {
                        error: format!("{err:#}"),
                    },
                },
                ExecutionMode::Queued(queue) => {
                    match jobs.importer.enqueue_all(&session, queue).await {
                        Ok(enqueued) => JobState::Queued { enqueued },
                        Err(err) => JobState::Failed {
                            error: format!("{err:#}"),
                        },
                    }
                }
            };

            let updates = jobs.importer.updates();
            match &state {
                JobState::Completed { created, skipped } => {
                    info!(%bot_id, %run_id, created, skipped, "import completed");
                    updates.publish(&bot_id, "All records imported.");
                }
                JobState::Queued { enqueued } => {
                    info!(%bot_id, %run_id, enqueued, "import handed to queue worker");
                }
                JobState::Failed { error } => {
                    error!(%bot_id, %run_id, %error, "import failed");
                    updates.publish(&bot_id, format!("Import failed: {error}"));
                }
                JobState::Running => {}
            }
            jobs.finish(&bot_id, state);
            // Drops the channel unless an event stream is still attached.
            updates.release(&bot_id);
        });
        Ok((run_id, handle))
    }
}

fn prune_finished(statuses: &mut HashMap<String, JobStatus>, max: usize) {
    let mut finished: Vec<(DateTime<Utc>, String)> = statuses
        .iter()
        .filter_map(|(bot, s)| s.finished_at.map(|at| (at, bot.clone())))
        .collect();
    if finished.len() <= max {
        return;
    }
    finished.sort();
    let excess = finished.len() - max;
    for (_, bot) in finished.into_iter().take(excess) {
        statuses.remove(&bot);
    }
}
