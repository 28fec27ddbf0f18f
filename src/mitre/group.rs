use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::{database_body, page_body, put_date, put_description};
use crate::notion::blocks;
use crate::stix::IntrusionSet;

pub const DATABASE_TITLE: &str = "MITRE ATT&CK - Groups";
pub const ICON: &str = "📁";

pub fn database_params(parent_page_id: &str) -> Value {
    database_body(
        parent_page_id,
        DATABASE_TITLE,
        "A database of MITRE ATT&CK groups.",
        ICON,
        json!({
            "Name": { "title": {} },
            "Description": { "rich_text": {} },
            "Aliases": { "multi_select": {} },
            "Motivation": { "select": {} },
            "Created": { "date": {} },
            "Imported": { "date": {} },
        }),
    )
}

pub fn page_params(database_id: &str, group: &IntrusionSet, now: DateTime<Utc>) -> Value {
    let mut props = Map::new();
    props.insert("Name".into(), blocks::title_prop(&group.name));
    put_description(&mut props, group.description.as_deref());
    // ATT&CK lists the group's own name first among its aliases.
    let aliases: Vec<&str> = group
        .aliases
        .iter()
        .map(String::as_str)
        .filter(|a| *a != group.name)
        .collect();
    if !aliases.is_empty() {
        props.insert("Aliases".into(), blocks::multi_select_prop(&aliases));
    }
    if let Some(m) = group.primary_motivation.as_deref().filter(|m| !m.is_empty()) {
        props.insert("Motivation".into(), blocks::select_prop(m));
    }
    put_date(&mut props, "Created", group.common.created.as_ref());
    put_date(&mut props, "Imported", Some(&now));

    let children = blocks::references_section(&group.common.external_references);
    page_body(database_id, ICON, props, children)
}
