use serde_json::{json, Map, Value};

use super::{database_body, page_body, put_date, put_description};
use crate::notion::blocks;
use crate::stix::Indicator;

pub const DATABASE_TITLE: &str = "Indicators";
pub const ICON: &str = "🔍";

pub fn display_name(indicator: &Indicator) -> &str {
    indicator
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(&indicator.common.id)
}

pub fn database_params(parent_page_id: &str) -> Value {
    database_body(
        parent_page_id,
        DATABASE_TITLE,
        "A database of indicators of compromise.",
        ICON,
        json!({
            "Name": { "title": {} },
            "Description": { "rich_text": {} },
            "Pattern Type": { "select": {} },
            "Valid From": { "date": {} },
            "Created": { "date": {} },
        }),
    )
}

pub fn page_params(database_id: &str, indicator: &Indicator) -> Value {
    let mut props = Map::new();
    props.insert("Name".into(), blocks::title_prop(display_name(indicator)));
    put_description(&mut props, indicator.description.as_deref());
    if let Some(t) = indicator.pattern_type.as_deref().filter(|t| !t.is_empty()) {
        props.insert("Pattern Type".into(), blocks::select_prop(t));
    }
    put_date(&mut props, "Valid From", indicator.valid_from.as_ref());
    put_date(&mut props, "Created", indicator.common.created.as_ref());

    let mut children = vec![
        blocks::heading_2("Pattern"),
        blocks::code(&indicator.pattern, "plain text"),
    ];
    children.extend(blocks::references_section(&indicator.common.external_references));
    page_body(database_id, ICON, props, children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mitre::fixtures;

    #[test]
    fn pattern_is_rendered_as_code() {
        let indicator = Indicator {
            common: fixtures::common("indicator--1"),
            name: None,
            description: None,
            pattern: "[ipv4-addr:value = '198.51.100.1']".into(),
            pattern_type: Some("stix".into()),
            valid_from: None,
        };
        let body = page_params("db", &indicator);
        assert_eq!(
            body["properties"]["Name"]["title"][0]["text"]["content"],
            "indicator--1"
        );
        let children = body["children"].as_array().unwrap();
        assert_eq!(children[0]["heading_2"]["rich_text"][0]["text"]["content"], "Pattern");
        assert_eq!(
            children[1]["code"]["rich_text"][0]["text"]["content"],
            "[ipv4-addr:value = '198.51.100.1']"
        );
        assert_eq!(children[1]["code"]["language"], "plain text");
    }
}
