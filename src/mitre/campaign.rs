use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::{database_body, page_body, put_date, put_description};
use crate::notion::blocks;
use crate::stix::Campaign;

pub const DATABASE_TITLE: &str = "MITRE ATT&CK - Campaigns";
pub const ICON: &str = "🗺️";

pub fn database_params(parent_page_id: &str) -> Value {
    database_body(
        parent_page_id,
        DATABASE_TITLE,
        "A database of MITRE ATT&CK campaigns.",
        ICON,
        json!({
            "Name": { "title": {} },
            "Description": { "rich_text": {} },
            "Objective": { "rich_text": {} },
            "First Seen": { "date": {} },
            "Last Seen": { "date": {} },
            "Created": { "date": {} },
            "Imported": { "date": {} },
        }),
    )
}

pub fn page_params(database_id: &str, campaign: &Campaign, now: DateTime<Utc>) -> Value {
    let mut props = Map::new();
    props.insert("Name".into(), blocks::title_prop(&campaign.name));
    put_description(&mut props, campaign.description.as_deref());
    if let Some(objective) = campaign.objective.as_deref().filter(|o| !o.is_empty()) {
        props.insert("Objective".into(), blocks::rich_text_prop(objective));
    }
    put_date(&mut props, "First Seen", campaign.first_seen.as_ref());
    put_date(&mut props, "Last Seen", campaign.last_seen.as_ref());
    put_date(&mut props, "Created", campaign.common.created.as_ref());
    put_date(&mut props, "Imported", Some(&now));

    let children = blocks::references_section(&campaign.common.external_references);
    page_body(database_id, ICON, props, children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mitre::fixtures;
    use chrono::TimeZone;

    #[test]
    fn absent_timestamps_are_omitted() {
        let mut common = fixtures::common("campaign--1");
        common.created = None;
        let campaign = Campaign {
            common,
            name: "Cozy Bear Ops".into(),
            description: None,
            aliases: vec![],
            objective: Some("Collect diplomatic intelligence".into()),
            first_seen: Some(Utc.with_ymd_and_hms(2015, 1, 2, 0, 0, 0).unwrap()),
            last_seen: None,
        };
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        let props = page_params("db", &campaign, now)["properties"].clone();
        assert_eq!(props["First Seen"]["date"]["start"], "2015-01-02");
        assert_eq!(props["Imported"]["date"]["start"], "2024-09-01");
        assert!(props.get("Last Seen").is_none());
        assert!(props.get("Created").is_none());
        assert!(props.get("Description").is_none());
        assert_eq!(
            props["Objective"]["rich_text"][0]["text"]["content"],
            "Collect diplomatic intelligence"
        );
    }
}
