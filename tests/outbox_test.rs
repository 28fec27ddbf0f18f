use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Mutex;

use notion_stix::import::{ImportSettings, Importer, Session};
use notion_stix::kv::{self, keys, KvStore, SqliteKv};
use notion_stix::mitre::Mitre;
use notion_stix::model::{ConnectionRecord, ObjectKind};
use notion_stix::notion::{Database, NotionApi, NotionConnector, Page};
use notion_stix::outbox::{self, TaskQueue, WorkerContext};
use notion_stix::stix::Collection;
use notion_stix::updates::UpdateHub;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Clone, Default)]
struct RecordingNotion {
    failures: Arc<Mutex<VecDeque<bool>>>,
    database_calls: Arc<Mutex<usize>>,
    page_calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotion {
    async fn page_calls(&self) -> Vec<String> {
        self.page_calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl NotionApi for RecordingNotion {
    async fn create_database(&self, body: &Value) -> Result<Database> {
        let mut n = self.database_calls.lock().await;
        *n += 1;
        let title = body["title"][0]["text"]["content"].as_str().unwrap_or_default();
        Ok(Database {
            id: format!("db-{title}"),
            url: None,
        })
    }

    async fn create_page(&self, body: &Value) -> Result<Page> {
        if self.failures.lock().await.pop_front().unwrap_or(false) {
            return Err(anyhow!("notion error 500 Internal Server Error"));
        }
        let mut calls = self.page_calls.lock().await;
        calls.push(
            body["properties"]["Name"]["title"][0]["text"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        );
        Ok(Page {
            id: format!("page-{}", calls.len()),
            url: None,
        })
    }
}

#[derive(Clone)]
struct FixedConnector(RecordingNotion);

impl NotionConnector for FixedConnector {
    fn connect(&self, _token: &str) -> Arc<dyn NotionApi> {
        Arc::new(self.0.clone())
    }
}

struct Setup {
    store: Arc<SqliteKv>,
    queue: TaskQueue,
    importer: Arc<Importer>,
    notion: RecordingNotion,
    ctx: WorkerContext,
    hub: UpdateHub,
}

async fn setup(notion: RecordingNotion) -> Setup {
    let pool = setup_pool().await;
    let store = Arc::new(SqliteKv::new(pool.clone()));
    let queue = TaskQueue::new(pool);

    let bundle = json!({
        "type": "bundle",
        "objects": [
            { "type": "attack-pattern", "id": "attack-pattern--1", "name": "Phishing" },
            { "type": "malware", "id": "malware--1", "name": "PoisonIvy" },
            { "type": "malware", "id": "malware--2", "name": "BlackEnergy" }
        ]
    });
    let collection = Collection::from_json(&serde_json::to_vec(&bundle).unwrap()).unwrap();
    let hub = UpdateHub::new();
    let importer = Arc::new(Importer::new(
        store.clone(),
        Mitre::new(Arc::new(collection)),
        hub.clone(),
        ImportSettings {
            kinds: vec![ObjectKind::AttackPattern, ObjectKind::Malware],
            rate_per_second: NonZeroU32::new(1000).unwrap(),
            burst: NonZeroU32::new(1000).unwrap(),
            max_objects_per_run: None,
            log_every: 1,
        },
    ));

    let record = ConnectionRecord {
        token: "token".into(),
        parent_page_id: "parent".into(),
        workspace_name: None,
    };
    kv::set_json(store.as_ref(), &keys::connection("bot"), &record)
        .await
        .unwrap();

    let ctx = WorkerContext {
        importer: importer.clone(),
        connector: Arc::new(FixedConnector(notion.clone())),
    };
    Setup {
        store,
        queue,
        importer,
        notion,
        ctx,
        hub,
    }
}

async fn drain(s: &Setup) -> usize {
    let mut processed = 0;
    while outbox::process_next_task(&s.queue, &s.ctx).await.unwrap() {
        processed += 1;
    }
    processed
}

fn session(s: &Setup) -> Session {
    Session::new("bot", "parent", Arc::new(s.notion.clone()))
}

#[tokio::test]
async fn queued_import_runs_to_completion() {
    let s = setup(RecordingNotion::default()).await;
    let mut rx = s.hub.subscribe("bot");

    let enqueued = s.importer.enqueue_all(&session(&s), &s.queue).await.unwrap();
    assert_eq!(enqueued, 3);
    assert_eq!(rx.recv().await.unwrap(), "Queued 3 records for import");
    // Databases are created while enqueueing, pages only by the worker.
    assert_eq!(*s.notion.database_calls.lock().await, 2);
    assert!(s.notion.page_calls().await.is_empty());
    assert_eq!(s.queue.count_pending("bot").await.unwrap(), 3);

    assert_eq!(drain(&s).await, 3);
    assert_eq!(
        s.notion.page_calls().await,
        vec!["Phishing", "PoisonIvy", "BlackEnergy"]
    );
    assert_eq!(s.queue.count_pending("bot").await.unwrap(), 0);
    for id in ["attack-pattern--1", "malware--1", "malware--2"] {
        let marker = s.store.get(&keys::marker("bot", "parent", id)).await;
        assert!(marker.is_ok(), "missing marker for {id}");
    }
    assert_eq!(rx.recv().await.unwrap(), "Imported attack pattern Phishing");
    assert_eq!(rx.recv().await.unwrap(), "Imported malware PoisonIvy");
    assert_eq!(rx.recv().await.unwrap(), "Imported malware BlackEnergy");
}

#[tokio::test]
async fn enqueue_skips_marked_records() {
    let s = setup(RecordingNotion::default()).await;
    s.importer.enqueue_all(&session(&s), &s.queue).await.unwrap();
    drain(&s).await;

    let again = s.importer.enqueue_all(&session(&s), &s.queue).await.unwrap();
    assert_eq!(again, 0);
    assert_eq!(drain(&s).await, 0);
    assert_eq!(*s.notion.database_calls.lock().await, 2);
    assert_eq!(s.notion.page_calls().await.len(), 3);
}

#[tokio::test]
async fn failed_task_is_kept_and_retried_on_next_enqueue() {
    let notion = RecordingNotion {
        failures: Arc::new(Mutex::new(VecDeque::from(vec![false, true]))),
        ..Default::default()
    };
    let s = setup(notion).await;

    s.importer.enqueue_all(&session(&s), &s.queue).await.unwrap();
    assert_eq!(drain(&s).await, 3);
    assert_eq!(s.notion.page_calls().await, vec!["Phishing", "BlackEnergy"]);
    assert_eq!(s.queue.count_failed("bot").await.unwrap(), 1);
    assert!(s
        .store
        .get(&keys::marker("bot", "parent", "malware--1"))
        .await
        .unwrap_err()
        .is_not_found());

    let again = s.importer.enqueue_all(&session(&s), &s.queue).await.unwrap();
    assert_eq!(again, 1);
    assert_eq!(s.queue.count_failed("bot").await.unwrap(), 0);
    assert_eq!(drain(&s).await, 1);
    assert_eq!(
        s.notion.page_calls().await,
        vec!["Phishing", "BlackEnergy", "PoisonIvy"]
    );
}

#[tokio::test]
async fn task_without_connection_fails() {
    let s = setup(RecordingNotion::default()).await;
    let other = Session::new("stranger", "parent", Arc::new(s.notion.clone()));
    s.importer.enqueue_all(&other, &s.queue).await.unwrap();

    assert_eq!(drain(&s).await, 3);
    assert!(s.notion.page_calls().await.is_empty());
    assert_eq!(s.queue.count_failed("stranger").await.unwrap(), 3);
}

#[tokio::test]
async fn interrupted_tasks_are_requeued() {
    let s = setup(RecordingNotion::default()).await;
    s.importer.enqueue_all(&session(&s), &s.queue).await.unwrap();

    let claimed = s.queue.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.attempt, 1);
    assert_eq!(s.queue.requeue_running().await.unwrap(), 1);

    assert_eq!(drain(&s).await, 3);
    assert_eq!(s.notion.page_calls().await.len(), 3);
}
