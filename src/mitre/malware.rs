use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::{database_body, page_body, put_date, put_description};
use crate::notion::blocks;
use crate::stix::Malware;

pub const DATABASE_TITLE: &str = "MITRE ATT&CK - Malware";
pub const ICON: &str = "🦠";

pub fn database_params(parent_page_id: &str) -> Value {
    database_body(
        parent_page_id,
        DATABASE_TITLE,
        "A database of MITRE ATT&CK malware and tools.",
        ICON,
        json!({
            "Name": { "title": {} },
            "Description": { "rich_text": {} },
            "Types": { "multi_select": {} },
            "Family": { "checkbox": {} },
            "Created": { "date": {} },
            "Imported": { "date": {} },
        }),
    )
}

pub fn page_params(database_id: &str, malware: &Malware, now: DateTime<Utc>) -> Value {
    let mut props = Map::new();
    props.insert("Name".into(), blocks::title_prop(&malware.name));
    put_description(&mut props, malware.description.as_deref());
    if !malware.malware_types.is_empty() {
        props.insert("Types".into(), blocks::multi_select_prop(&malware.malware_types));
    }
    props.insert("Family".into(), blocks::checkbox_prop(malware.is_family));
    put_date(&mut props, "Created", malware.common.created.as_ref());
    put_date(&mut props, "Imported", Some(&now));

    let mut children = blocks::references_section(&malware.common.external_references);
    let caps = blocks::capabilities_to_blocks(&malware.capabilities);
    if !caps.is_empty() {
        children.push(blocks::heading_2("Capabilities"));
        children.extend(caps);
    }
    page_body(database_id, ICON, props, children)
}
