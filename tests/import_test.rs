use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use notion_stix::import::{ImportSettings, ImportSummary, Importer, Session};
use notion_stix::kv::{KvStore, MemoryKv};
use notion_stix::mitre::Mitre;
use notion_stix::model::ObjectKind;
use notion_stix::notion::{Database, NotionApi, Page};
use notion_stix::stix::Collection;
use notion_stix::updates::UpdateHub;

#[derive(Clone, Default)]
struct RecordingNotion {
    page_failures: Arc<Mutex<VecDeque<Option<String>>>>,
    database_calls: Arc<Mutex<Vec<String>>>,
    page_calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotion {
    /// Script page outcomes in call order: `Some(msg)` fails that call.
    fn with_page_failures(failures: Vec<Option<String>>) -> Self {
        Self {
            page_failures: Arc::new(Mutex::new(VecDeque::from(failures))),
            ..Default::default()
        }
    }

    async fn database_calls(&self) -> Vec<String> {
        self.database_calls.lock().await.clone()
    }

    async fn page_calls(&self) -> Vec<String> {
        self.page_calls.lock().await.clone()
    }
}

fn text_of(value: &Value) -> String {
    value[0]["text"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[async_trait::async_trait]
impl NotionApi for RecordingNotion {
    async fn create_database(&self, body: &Value) -> Result<Database> {
        let mut calls = self.database_calls.lock().await;
        calls.push(text_of(&body["title"]));
        Ok(Database {
            id: format!("db-{}", calls.len()),
            url: None,
        })
    }

    async fn create_page(&self, body: &Value) -> Result<Page> {
        if let Some(Some(msg)) = self.page_failures.lock().await.pop_front() {
            return Err(anyhow!(msg));
        }
        let mut calls = self.page_calls.lock().await;
        calls.push(text_of(&body["properties"]["Name"]["title"]));
        Ok(Page {
            id: format!("page-{}", calls.len()),
            url: Some(format!("https://notion.so/page-{}", calls.len())),
        })
    }
}

fn mitre(objects: Value) -> Mitre {
    let bundle = json!({ "type": "bundle", "id": "bundle--test", "objects": objects });
    let bytes = serde_json::to_vec(&bundle).unwrap();
    Mitre::new(Arc::new(Collection::from_json(&bytes).unwrap()))
}

fn fast_settings(kinds: Vec<ObjectKind>) -> ImportSettings {
    ImportSettings {
        kinds,
        rate_per_second: NonZeroU32::new(1000).unwrap(),
        burst: NonZeroU32::new(1000).unwrap(),
        max_objects_per_run: None,
        log_every: 1,
    }
}

fn six_malware() -> Value {
    Value::Array(
        (1..=6)
            .map(|i| json!({ "type": "malware", "id": format!("malware--{i}"), "name": format!("Malware {i}") }))
            .collect(),
    )
}

#[tokio::test]
async fn single_campaign_creates_one_database_and_one_page() {
    let store = Arc::new(MemoryKv::new());
    let mitre = mitre(json!([
        {
            "type": "campaign",
            "id": "campaign--cozy",
            "name": "Cozy Bear Ops",
            "description": "Espionage.",
            "created": "2023-03-24T21:07:25.126Z"
        },
        { "type": "identity", "id": "identity--mitre", "name": "MITRE" }
    ]));
    let importer = Importer::new(
        store.clone(),
        mitre,
        UpdateHub::new(),
        fast_settings(vec![ObjectKind::Campaign]),
    );
    let notion = RecordingNotion::default();
    let session = Session::new("bot-1", "parent-1", Arc::new(notion.clone()));

    let summary = importer.import_all(&session).await.unwrap();

    assert_eq!(summary, ImportSummary { created: 1, skipped: 0 });
    assert_eq!(notion.database_calls().await, vec!["MITRE ATT&CK - Campaigns"]);
    assert_eq!(notion.page_calls().await, vec!["Cozy Bear Ops"]);
    assert_eq!(
        store.keys(),
        vec![
            "bot-1-parent-1-campaign--cozy".to_string(),
            "bot-1-parent-1-campaigns".to_string(),
        ]
    );

    let marker = store.get("bot-1-parent-1-campaign--cozy").await.unwrap();
    let page: Page = serde_json::from_slice(&marker).unwrap();
    assert_eq!(page.id, "page-1");
}

#[tokio::test]
async fn second_run_creates_nothing() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let importer = Importer::new(
        store,
        mitre(six_malware()),
        UpdateHub::new(),
        fast_settings(vec![ObjectKind::Malware]),
    );
    let notion = RecordingNotion::default();
    let session = Session::new("bot", "page", Arc::new(notion.clone()));

    importer.import_all(&session).await.unwrap();
    assert_eq!(notion.page_calls().await.len(), 6);

    let again = importer.import_all(&session).await.unwrap();
    assert_eq!(again, ImportSummary { created: 0, skipped: 6 });
    assert_eq!(notion.page_calls().await.len(), 6);
    assert_eq!(notion.database_calls().await.len(), 1);
}

#[tokio::test]
async fn another_parent_page_imports_again() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let importer = Importer::new(
        store,
        mitre(six_malware()),
        UpdateHub::new(),
        fast_settings(vec![ObjectKind::Malware]),
    );
    let notion = RecordingNotion::default();

    let first = Session::new("bot", "page-a", Arc::new(notion.clone()));
    let second = Session::new("bot", "page-b", Arc::new(notion.clone()));
    importer.import_all(&first).await.unwrap();
    importer.import_all(&second).await.unwrap();

    assert_eq!(notion.database_calls().await.len(), 2);
    assert_eq!(notion.page_calls().await.len(), 12);
}

#[tokio::test]
async fn failed_run_resumes_at_failing_object() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let importer = Importer::new(
        store,
        mitre(six_malware()),
        UpdateHub::new(),
        fast_settings(vec![ObjectKind::Malware]),
    );
    let notion = RecordingNotion::with_page_failures(vec![
        None,
        None,
        None,
        Some("notion error 502 Bad Gateway".into()),
    ]);
    let session = Session::new("bot", "page", Arc::new(notion.clone()));

    let err = importer.import_all(&session).await.unwrap_err();
    assert!(format!("{err:#}").contains("malware--4"));
    assert_eq!(
        notion.page_calls().await,
        vec!["Malware 1", "Malware 2", "Malware 3"]
    );

    let resumed = importer.import_all(&session).await.unwrap();
    assert_eq!(resumed, ImportSummary { created: 3, skipped: 3 });
    assert_eq!(
        notion.page_calls().await,
        vec![
            "Malware 1",
            "Malware 2",
            "Malware 3",
            "Malware 4",
            "Malware 5",
            "Malware 6"
        ]
    );
    assert_eq!(notion.database_calls().await.len(), 1);
}

#[tokio::test]
async fn creations_are_throttled() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let settings = ImportSettings {
        rate_per_second: NonZeroU32::new(20).unwrap(),
        burst: NonZeroU32::new(2).unwrap(),
        ..fast_settings(vec![ObjectKind::Malware])
    };
    let importer = Importer::new(store, mitre(six_malware()), UpdateHub::new(), settings);
    let notion = RecordingNotion::default();
    let session = Session::new("bot", "page", Arc::new(notion.clone()));

    let started = Instant::now();
    importer.import_all(&session).await.unwrap();

    // One database and six pages: two cells of burst, then five at 50ms each.
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(notion.page_calls().await.len(), 6);
}

#[tokio::test]
async fn every_created_page_is_announced() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let hub = UpdateHub::new();
    let mut rx = hub.subscribe("bot");
    let importer = Importer::new(
        store,
        mitre(json!([
            { "type": "intrusion-set", "id": "intrusion-set--1", "name": "APT29", "aliases": ["APT29", "Cozy Bear"] },
            { "type": "intrusion-set", "id": "intrusion-set--2", "name": "APT28" }
        ])),
        hub.clone(),
        fast_settings(vec![ObjectKind::Group]),
    );
    let session = Session::new("bot", "page", Arc::new(RecordingNotion::default()));

    importer.import_all(&session).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), "Imported 1 of 2 APT group records");
    assert_eq!(rx.recv().await.unwrap(), "Imported 2 of 2 APT group records");
}
