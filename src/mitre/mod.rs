//! Mapping of ATT&CK objects onto Notion databases and pages.
//!
//! Each kind has a fixed database schema and a pure pair of body builders;
//! [`Mitre`] ties them to the loaded [`Collection`] and a [`NotionApi`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::model::ObjectKind;
use crate::notion::{blocks, Database, NotionApi, Page};
use crate::stix::{AttackPattern, Campaign, Collection, Common, Indicator, IntrusionSet, Malware};

pub mod attack_pattern;
pub mod campaign;
pub mod group;
pub mod indicator;
pub mod malware;

/// A borrowed STIX object of any importable kind.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    AttackPattern(&'a AttackPattern),
    Campaign(&'a Campaign),
    Group(&'a IntrusionSet),
    Malware(&'a Malware),
    Indicator(&'a Indicator),
}

impl<'a> Record<'a> {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Record::AttackPattern(_) => ObjectKind::AttackPattern,
            Record::Campaign(_) => ObjectKind::Campaign,
            Record::Group(_) => ObjectKind::Group,
            Record::Malware(_) => ObjectKind::Malware,
            Record::Indicator(_) => ObjectKind::Indicator,
        }
    }

    pub fn common(&self) -> &'a Common {
        match *self {
            Record::AttackPattern(o) => &o.common,
            Record::Campaign(o) => &o.common,
            Record::Group(o) => &o.common,
            Record::Malware(o) => &o.common,
            Record::Indicator(o) => &o.common,
        }
    }

    pub fn id(&self) -> &'a str {
        &self.common().id
    }

    pub fn name(&self) -> &'a str {
        match *self {
            Record::AttackPattern(o) => &o.name,
            Record::Campaign(o) => &o.name,
            Record::Group(o) => &o.name,
            Record::Malware(o) => &o.name,
            Record::Indicator(o) => indicator::display_name(o),
        }
    }

    /// Request body for the page representing this record.
    pub fn page_params(&self, database_id: &str, now: DateTime<Utc>) -> Value {
        match self {
            Record::AttackPattern(o) => attack_pattern::page_params(database_id, o, now),
            Record::Campaign(o) => campaign::page_params(database_id, o, now),
            Record::Group(o) => group::page_params(database_id, o, now),
            Record::Malware(o) => malware::page_params(database_id, o, now),
            Record::Indicator(o) => indicator::page_params(database_id, o),
        }
    }
}

pub fn database_params(kind: ObjectKind, parent_page_id: &str) -> Value {
    match kind {
        ObjectKind::AttackPattern => attack_pattern::database_params(parent_page_id),
        ObjectKind::Campaign => campaign::database_params(parent_page_id),
        ObjectKind::Group => group::database_params(parent_page_id),
        ObjectKind::Malware => malware::database_params(parent_page_id),
        ObjectKind::Indicator => indicator::database_params(parent_page_id),
    }
}

#[derive(Debug, Clone)]
pub struct Mitre {
    collection: Arc<Collection>,
}

impl Mitre {
    pub fn new(collection: Arc<Collection>) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// All records of `kind` in collection order.
    pub fn records(&self, kind: ObjectKind) -> Vec<Record<'_>> {
        let c = &self.collection;
        match kind {
            ObjectKind::AttackPattern => c
                .attack_patterns()
                .iter()
                .map(Record::AttackPattern)
                .collect(),
            ObjectKind::Campaign => c.campaigns().iter().map(Record::Campaign).collect(),
            ObjectKind::Group => c.intrusion_sets().iter().map(Record::Group).collect(),
            ObjectKind::Malware => c.malware().iter().map(Record::Malware).collect(),
            ObjectKind::Indicator => c.indicators().iter().map(Record::Indicator).collect(),
        }
    }

    pub fn record(&self, kind: ObjectKind, id: &str) -> Option<Record<'_>> {
        let c = &self.collection;
        match kind {
            ObjectKind::AttackPattern => c.attack_pattern(id).map(Record::AttackPattern),
            ObjectKind::Campaign => c.campaign(id).map(Record::Campaign),
            ObjectKind::Group => c.intrusion_set(id).map(Record::Group),
            ObjectKind::Malware => c.malware_by_id(id).map(Record::Malware),
            ObjectKind::Indicator => c.indicator(id).map(Record::Indicator),
        }
    }

    pub async fn create_database(
        &self,
        client: &dyn NotionApi,
        kind: ObjectKind,
        parent_page_id: &str,
    ) -> Result<Database> {
        let body = database_params(kind, parent_page_id);
        info!(%kind, title = %body["title"][0]["text"]["content"], "creating Notion database");
        client
            .create_database(&body)
            .await
            .with_context(|| format!("failed to create {kind} database"))
    }

    pub async fn create_page(
        &self,
        client: &dyn NotionApi,
        database_id: &str,
        record: Record<'_>,
    ) -> Result<Page> {
        let body = record.page_params(database_id, Utc::now());
        debug!(name = record.name(), kind = %record.kind(), "creating page");
        client
            .create_page(&body)
            .await
            .with_context(|| format!("failed to create page for {}", record.id()))
    }
}

pub(crate) fn database_body(
    parent_page_id: &str,
    title: &str,
    description: &str,
    icon: &str,
    properties: Value,
) -> Value {
    json!({
        "parent": { "type": "page_id", "page_id": parent_page_id },
        "title": [{ "type": "text", "text": { "content": title } }],
        "description": [{ "type": "text", "text": { "content": description } }],
        "icon": { "type": "emoji", "emoji": icon },
        "properties": properties,
    })
}

pub(crate) fn page_body(
    database_id: &str,
    icon: &str,
    properties: Map<String, Value>,
    children: Vec<Value>,
) -> Value {
    json!({
        "parent": { "type": "database_id", "database_id": database_id },
        "icon": { "type": "emoji", "emoji": icon },
        "properties": Value::Object(properties),
        "children": blocks::cap_children(children),
    })
}

/// Insert `Description` only when the object has one.
pub(crate) fn put_description(props: &mut Map<String, Value>, description: Option<&str>) {
    if let Some(d) = description.filter(|d| !d.is_empty()) {
        props.insert("Description".into(), blocks::rich_text_prop(d));
    }
}

pub(crate) fn put_date(props: &mut Map<String, Value>, name: &str, ts: Option<&DateTime<Utc>>) {
    if let Some(ts) = ts {
        props.insert(name.into(), blocks::date_prop(ts));
    }
}
