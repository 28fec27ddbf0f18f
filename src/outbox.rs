//! Durable queue of per-object import tasks, consumed by the queue worker.

use anyhow::{anyhow, Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::import::{Importer, Outcome, Session};
use crate::model::ObjectKind;
use crate::notion::NotionConnector;

#[derive(Debug, Clone, Copy)]
pub struct NewTask<'a> {
    pub bot_id: &'a str,
    pub parent_page_id: &'a str,
    pub kind: ObjectKind,
    pub object_id: &'a str,
    pub database_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub bot_id: String,
    pub parent_page_id: String,
    pub kind: String,
    pub object_id: String,
    pub database_id: String,
    pub attempt: i64,
}

#[derive(Debug, Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a pending task. An existing failed task for the same object is
    /// reset to pending; pending or running ones are left alone.
    #[instrument(skip_all)]
    pub async fn enqueue(&self, task: &NewTask<'_>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_tasks (bot_id, parent_page_id, kind, object_id, database_id)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (bot_id, parent_page_id, object_id) DO UPDATE SET
                database_id = excluded.database_id,
                last_error = CASE WHEN import_tasks.state = 'failed' THEN NULL ELSE import_tasks.last_error END,
                state = CASE WHEN import_tasks.state = 'failed' THEN 'pending' ELSE import_tasks.state END,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(task.bot_id)
        .bind(task.parent_page_id)
        .bind(task.kind.as_str())
        .bind(task.object_id)
        .bind(task.database_id)
        .execute(&self.pool)
        .await
        .context("failed to enqueue import task")?;
        Ok(())
    }

    /// Atomically move the oldest pending task to running.
    #[instrument(skip_all)]
    pub async fn claim_next(&self) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE import_tasks
            SET state = 'running', attempt = attempt + 1, updated_at = CURRENT_TIMESTAMP
            WHERE id = (
                SELECT id FROM import_tasks WHERE state = 'pending' ORDER BY id LIMIT 1
            )
            RETURNING id, bot_id, parent_page_id, kind, object_id, database_id, attempt
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("failed to claim import task")?;
        Ok(task)
    }

    pub async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM import_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Park the task as failed. Failed tasks are not retried until the import
    /// is started again.
    pub async fn fail(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE import_tasks SET state = 'failed', last_error = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return tasks left running by a previous process to the queue.
    pub async fn requeue_running(&self) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE import_tasks SET state = 'pending', updated_at = CURRENT_TIMESTAMP WHERE state = 'running'",
        )
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Tasks for `bot_id` that are still waiting or in flight.
    pub async fn count_pending(&self, bot_id: &str) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM import_tasks WHERE bot_id = ? AND state IN ('pending', 'running')",
        )
        .bind(bot_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    pub async fn count_failed(&self, bot_id: &str) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM import_tasks WHERE bot_id = ? AND state = 'failed'",
        )
        .bind(bot_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}

/// What a worker needs to turn a task back into a page creation.
#[derive(Clone)]
pub struct WorkerContext {
    pub importer: Arc<Importer>,
    pub connector: Arc<dyn NotionConnector>,
}

#[instrument(skip_all)]
pub async fn process_next_task(queue: &TaskQueue, ctx: &WorkerContext) -> Result<bool> {
    match queue.claim_next().await? {
        Some(task) => {
            run_task(queue, ctx, task).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn run_task(queue: &TaskQueue, ctx: &WorkerContext, task: Task) -> Result<()> {
    let id = task.id;
    match execute(ctx, &task).await {
        Ok(outcome) => {
            queue.complete(id).await?;
            info!(
                id,
                kind = %task.kind,
                object_id = %task.object_id,
                created = matches!(outcome, Outcome::Created(_)),
                "import task succeeded"
            );
        }
        Err(err) => {
            warn!(
                ?err,
                id,
                kind = %task.kind,
                object_id = %task.object_id,
                attempt = task.attempt,
                "import task failed"
            );
            queue.fail(id, &format!("{err:#}")).await?;
        }
    }
    Ok(())
}

async fn execute(ctx: &WorkerContext, task: &Task) -> Result<Outcome> {
    let kind: ObjectKind = task.kind.parse().map_err(|e: String| anyhow!(e))?;
    let stored = Session::load(
        ctx.importer.store().as_ref(),
        ctx.connector.as_ref(),
        &task.bot_id,
    )
    .await
    .with_context(|| format!("no connection for bot {}", task.bot_id))?;
    // The task keeps the parent page it was enqueued for, even after a re-auth.
    let session = Session::new(&task.bot_id, &task.parent_page_id, stored.client);
    let record = ctx
        .importer
        .mitre()
        .record(kind, &task.object_id)
        .ok_or_else(|| anyhow!("{} {} is not in the loaded bundle", kind, task.object_id))?;
    ctx.importer
        .import_record(&session, &task.database_id, record, None)
        .await
}

/// Consume the queue for the life of the process, running at most
/// `concurrency` tasks at once.
pub async fn run_worker(
    queue: TaskQueue,
    ctx: WorkerContext,
    concurrency: usize,
    poll_interval: Duration,
) -> Result<()> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    info!(concurrency, "import worker started");
    loop {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .context("worker semaphore closed")?;
        match queue.claim_next().await {
            Ok(Some(task)) => {
                let queue = queue.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) = run_task(&queue, &ctx, task).await {
                        error!(?err, "import worker error");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::time::sleep(poll_interval).await;
            }
            Err(err) => {
                drop(permit);
                error!(?err, "import worker error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
