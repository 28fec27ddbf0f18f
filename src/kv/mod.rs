//! Key-value store used for OAuth connection records and import markers.
//!
//! Two interchangeable backends implement [`KvStore`]:
//! - [`MemoryKv`]: a guarded map, lost on restart. Development and tests.
//! - [`SqliteKv`]: an embedded SQLite file with periodic compaction.
//!
//! A missing key is reported as [`KvError::NotFound`] so callers can treat it
//! as "not imported yet" rather than as a failure.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("stored value for {key} is not valid JSON: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl KvError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound(_))
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// One compaction pass. No-op for backends without on-disk state.
    async fn compact(&self) -> Result<(), KvError>;
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<T, KvError> {
    let raw = store.get(key).await?;
    serde_json::from_slice(&raw).map_err(|source| KvError::Decode {
        key: key.to_string(),
        source,
    })
}

pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), KvError> {
    let raw = serde_json::to_vec(value).map_err(|source| KvError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw).await
}

/// Runs `compact` every `interval` for the life of the process.
pub async fn cleanup(store: Arc<dyn KvStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match store.compact().await {
            Ok(()) => debug!("kv compaction finished"),
            Err(err) => warn!(?err, "kv compaction failed"),
        }
    }
}

/// Key layout shared by the connect handler, the importer and the queue worker.
pub mod keys {
    use crate::model::ObjectKind;

    pub fn connection(bot_id: &str) -> String {
        format!("connection:{bot_id}")
    }

    pub fn marker(bot_id: &str, parent_page_id: &str, object_key: &str) -> String {
        format!("{bot_id}-{parent_page_id}-{object_key}")
    }

    pub fn database_marker(bot_id: &str, parent_page_id: &str, kind: ObjectKind) -> String {
        marker(bot_id, parent_page_id, kind.marker_key())
    }
}
