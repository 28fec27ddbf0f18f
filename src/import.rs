//! Throttled, resumable bulk import of ATT&CK objects into Notion.
//!
//! Progress is recorded in the KV store one marker per created database or
//! page, so a failed or interrupted run can simply be started again. The
//! marker check is a plain get-then-set: two runs for the same bot and parent
//! page racing each other may both create the same object.

use anyhow::{Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config;
use crate::kv::{self, keys, KvError, KvStore};
use crate::mitre::{Mitre, Record};
use crate::model::{ConnectionRecord, ObjectKind};
use crate::notion::{Database, NotionApi, NotionConnector, Page};
use crate::outbox::{NewTask, TaskQueue};
use crate::updates::UpdateHub;

/// An authenticated Notion handle plus the page that receives the databases.
#[derive(Clone)]
pub struct Session {
    pub bot_id: String,
    pub parent_page_id: String,
    pub client: Arc<dyn NotionApi>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("bot_id", &self.bot_id)
            .field("parent_page_id", &self.parent_page_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        bot_id: impl Into<String>,
        parent_page_id: impl Into<String>,
        client: Arc<dyn NotionApi>,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            parent_page_id: parent_page_id.into(),
            client,
        }
    }

    /// Rebuild the session stored for `bot_id` by the OAuth callback.
    /// [`KvError::NotFound`] means the bot never connected.
    pub async fn load(
        store: &dyn KvStore,
        connector: &dyn NotionConnector,
        bot_id: &str,
    ) -> Result<Self, KvError> {
        let record: ConnectionRecord = kv::get_json(store, &keys::connection(bot_id)).await?;
        Ok(Self::new(
            bot_id,
            record.parent_page_id,
            connector.connect(&record.token),
        ))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(Page),
    Skipped,
}

/// Where a record sits in its batch, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub kinds: Vec<ObjectKind>,
    pub rate_per_second: NonZeroU32,
    pub burst: NonZeroU32,
    pub max_objects_per_run: Option<usize>,
    pub log_every: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self::from(&config::Import::default())
    }
}

impl From<&config::Import> for ImportSettings {
    fn from(cfg: &config::Import) -> Self {
        Self {
            kinds: cfg.kinds.clone(),
            rate_per_second: NonZeroU32::new(cfg.rate_per_second).unwrap_or(NonZeroU32::MIN),
            burst: NonZeroU32::new(cfg.burst).unwrap_or(NonZeroU32::MIN),
            max_objects_per_run: cfg.max_objects_per_run,
            log_every: cfg.log_every.max(1),
        }
    }
}

pub struct Importer {
    store: Arc<dyn KvStore>,
    mitre: Mitre,
    limiter: DefaultDirectRateLimiter,
    updates: UpdateHub,
    settings: ImportSettings,
}

impl fmt::Debug for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Importer {
    pub fn new(
        store: Arc<dyn KvStore>,
        mitre: Mitre,
        updates: UpdateHub,
        settings: ImportSettings,
    ) -> Self {
        let quota = Quota::per_second(settings.rate_per_second).allow_burst(settings.burst);
        Self {
            store,
            mitre,
            limiter: RateLimiter::direct(quota),
            updates,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn mitre(&self) -> &Mitre {
        &self.mitre
    }

    pub fn updates(&self) -> &UpdateHub {
        &self.updates
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Import every configured kind. Stops at the first failure; everything
    /// created before it stays marked.
    #[instrument(skip_all, fields(bot_id = %session.bot_id))]
    pub async fn import_all(&self, session: &Session) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        for &kind in &self.settings.kinds {
            if self.cap_reached(&summary) {
                break;
            }
            let database = self.ensure_database(session, kind).await?;
            self.import_kind(session, kind, &database, &mut summary).await?;
        }
        info!(
            created = summary.created,
            skipped = summary.skipped,
            "import finished"
        );
        Ok(summary)
    }

    fn cap_reached(&self, summary: &ImportSummary) -> bool {
        self.settings
            .max_objects_per_run
            .is_some_and(|max| summary.created >= max)
    }

    async fn import_kind(
        &self,
        session: &Session,
        kind: ObjectKind,
        database: &Database,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        let records = self.mitre.records(kind);
        let total = records.len();
        for (i, record) in records.into_iter().enumerate() {
            if self.cap_reached(summary) {
                info!(%kind, created = summary.created, "per-run object cap reached");
                return Ok(());
            }
            let position = Position { index: i + 1, total };
            match self
                .import_record(session, &database.id, record, Some(position))
                .await?
            {
                Outcome::Created(_) => summary.created += 1,
                Outcome::Skipped => summary.skipped += 1,
            }
            if position.index % self.settings.log_every == 0 || position.index == total {
                info!(%kind, done = position.index, total, "import progress");
            }
        }
        Ok(())
    }

    /// Reuse the kind's database recorded for this bot and parent page, or
    /// create it and record it.
    pub async fn ensure_database(&self, session: &Session, kind: ObjectKind) -> Result<Database> {
        let key = keys::database_marker(&session.bot_id, &session.parent_page_id, kind);
        match kv::get_json::<Database>(self.store.as_ref(), &key).await {
            Ok(existing) => return Ok(existing),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err).with_context(|| format!("failed to read marker {key}")),
        }

        self.limiter.until_ready().await;
        let database = self
            .mitre
            .create_database(session.client.as_ref(), kind, &session.parent_page_id)
            .await?;
        kv::set_json(self.store.as_ref(), &key, &database)
            .await
            .with_context(|| format!("failed to record database marker {key}"))?;
        info!(%kind, database_id = %database.id, "created database");
        Ok(database)
    }

    /// Create the page for one record unless its marker already exists.
    pub async fn import_record(
        &self,
        session: &Session,
        database_id: &str,
        record: Record<'_>,
        position: Option<Position>,
    ) -> Result<Outcome> {
        let key = keys::marker(&session.bot_id, &session.parent_page_id, record.id());
        if self.is_marked(&key).await? {
            return Ok(Outcome::Skipped);
        }

        self.limiter.until_ready().await;
        let page = self
            .mitre
            .create_page(session.client.as_ref(), database_id, record)
            .await?;
        kv::set_json(self.store.as_ref(), &key, &page)
            .await
            .with_context(|| format!("failed to record page marker {key}"))?;

        let label = record.kind().label();
        let message = match position {
            Some(p) => format!("Imported {} of {} {} records", p.index, p.total, label),
            None => format!("Imported {} {}", label, record.name()),
        };
        self.updates.publish(&session.bot_id, message);
        Ok(Outcome::Created(page))
    }

    async fn is_marked(&self, key: &str) -> Result<bool> {
        match self.store.get(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to read marker {key}")),
        }
    }

    /// Queued variant of [`Importer::import_all`]: databases are ensured
    /// inline, then one task per unmarked record goes to `queue`.
    #[instrument(skip_all, fields(bot_id = %session.bot_id))]
    pub async fn enqueue_all(&self, session: &Session, queue: &TaskQueue) -> Result<usize> {
        let mut enqueued = 0usize;
        for &kind in &self.settings.kinds {
            let database = self.ensure_database(session, kind).await?;
            for record in self.mitre.records(kind) {
                if let Some(max) = self.settings.max_objects_per_run {
                    if enqueued >= max {
                        warn!(%kind, enqueued, "per-run object cap reached while enqueueing");
                        return Ok(enqueued);
                    }
                }
                let key = keys::marker(&session.bot_id, &session.parent_page_id, record.id());
                if self.is_marked(&key).await? {
                    continue;
                }
                queue
                    .enqueue(&NewTask {
                        bot_id: &session.bot_id,
                        parent_page_id: &session.parent_page_id,
                        kind,
                        object_id: record.id(),
                        database_id: &database.id,
                    })
                    .await?;
                enqueued += 1;
            }
        }
        self.updates
            .publish(&session.bot_id, format!("Queued {enqueued} records for import"));
        info!(enqueued, "import tasks queued");
        Ok(enqueued)
    }
}
