use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::{database_body, page_body, put_date, put_description};
use crate::notion::blocks;
use crate::stix::AttackPattern;

pub const DATABASE_TITLE: &str = "Attack Patterns";
pub const ICON: &str = "📔";

pub fn database_params(parent_page_id: &str) -> Value {
    database_body(
        parent_page_id,
        DATABASE_TITLE,
        "A database of MITRE ATT&CK techniques.",
        ICON,
        json!({
            "Name": { "title": {} },
            "Description": { "rich_text": {} },
            "ATT&CK ID": { "rich_text": {} },
            "Kill Chain Phases": { "multi_select": {} },
            "Created": { "date": {} },
            "Imported": { "date": {} },
        }),
    )
}

pub fn page_params(database_id: &str, pattern: &AttackPattern, now: DateTime<Utc>) -> Value {
    let mut props = Map::new();
    props.insert("Name".into(), blocks::title_prop(&pattern.name));
    put_description(&mut props, pattern.description.as_deref());
    if let Some(id) = pattern.common.attack_id() {
        props.insert("ATT&CK ID".into(), blocks::rich_text_prop(id));
    }
    if !pattern.kill_chain_phases.is_empty() {
        let phases: Vec<&str> = pattern
            .kill_chain_phases
            .iter()
            .map(|p| p.phase_name.as_str())
            .collect();
        props.insert("Kill Chain Phases".into(), blocks::multi_select_prop(&phases));
    }
    put_date(&mut props, "Created", pattern.common.created.as_ref());
    put_date(&mut props, "Imported", Some(&now));

    let children = blocks::references_section(&pattern.common.external_references);
    page_body(database_id, ICON, props, children)
}
