//! Builders for Notion property values and page blocks.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::stix::ExternalReference;

/// Notion rejects rich text content longer than this.
pub const MAX_TEXT_LEN: usize = 2000;
/// Notion accepts at most this many children in one create request.
pub const MAX_CHILDREN: usize = 100;
pub const MAX_OPTION_LEN: usize = 100;

/// Char-safe prefix of at most `n` characters.
pub fn truncate(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": truncate(content, MAX_TEXT_LEN) } }])
}

pub fn title_prop(content: &str) -> Value {
    json!({ "title": rich_text(content) })
}

pub fn rich_text_prop(content: &str) -> Value {
    json!({ "rich_text": rich_text(content) })
}

pub fn date(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

pub fn date_prop(ts: &DateTime<Utc>) -> Value {
    json!({ "date": { "start": date(ts) } })
}

pub fn select_prop(name: &str) -> Value {
    json!({ "select": { "name": option_name(name) } })
}

pub fn checkbox_prop(value: bool) -> Value {
    json!({ "checkbox": value })
}

/// Multi-select option names may not contain commas.
pub fn option_name(name: &str) -> String {
    truncate(&name.replace(',', ";"), MAX_OPTION_LEN).to_string()
}

pub fn multi_select_prop<S: AsRef<str>>(names: &[S]) -> Value {
    let mut seen: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let option = option_name(name.as_ref());
        if !option.is_empty() && !seen.contains(&option) {
            seen.push(option);
        }
    }
    let options: Vec<Value> = seen.into_iter().map(|name| json!({ "name": name })).collect();
    json!({ "multi_select": options })
}

pub fn heading_2(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_2",
        "heading_2": { "rich_text": rich_text(content) },
    })
}

pub fn paragraph(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": rich_text(content) },
    })
}

pub fn bookmark(url: &str) -> Value {
    json!({
        "object": "block",
        "type": "bookmark",
        "bookmark": { "url": url },
    })
}

pub fn bulleted(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "bulleted_list_item",
        "bulleted_list_item": { "rich_text": rich_text(content) },
    })
}

pub fn code(content: &str, language: &str) -> Value {
    json!({
        "object": "block",
        "type": "code",
        "code": { "rich_text": rich_text(content), "language": language },
    })
}

/// One bookmark per reference with a URL, in input order.
pub fn references_to_blocks(refs: &[ExternalReference]) -> Vec<Value> {
    refs.iter()
        .filter_map(|r| r.url.as_deref())
        .filter(|url| !url.is_empty())
        .map(bookmark)
        .collect()
}

pub fn capabilities_to_blocks<S: AsRef<str>>(caps: &[S]) -> Vec<Value> {
    caps.iter()
        .map(AsRef::as_ref)
        .filter(|c| !c.is_empty())
        .map(bulleted)
        .collect()
}

/// "References" heading followed by the reference bookmarks, or nothing when
/// no reference has a URL.
pub fn references_section(refs: &[ExternalReference]) -> Vec<Value> {
    let bookmarks = references_to_blocks(refs);
    if bookmarks.is_empty() {
        return bookmarks;
    }
    let mut out = Vec::with_capacity(bookmarks.len() + 1);
    out.push(heading_2("References"));
    out.extend(bookmarks);
    out
}

pub fn cap_children(mut children: Vec<Value>) -> Vec<Value> {
    children.truncate(MAX_CHILDREN);
    children
}
