//! Property validation and tag palette assignment (§4.5). Storage CRUD
//! lives on `Store`; this module is the business-rule layer the façade
//! calls before ever touching the Store.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;

use crate::error::{Result, TodoError};
use crate::model::{ItemProperty, ListProperty, Tag};
use crate::store::{properties as store_properties, tags as store_tags};

const RESERVED_KEYS: [&str; 4] = ["id", "created_at", "updated_at", "list_id"];
const MAX_PROPERTY_VALUE_LEN: usize = 2000;
const MAX_PROPERTY_KEY_LEN: usize = 100;

const BANNED_SUBSTRINGS: [&str; 6] = [
    "<script>",
    "javascript:",
    "onload=",
    "onerror=",
    "onclick=",
    "onmouseover=",
];

const ALLOWED_TAGS: [&str; 7] = ["b", "i", "u", "em", "strong", "br", "p"];

static PROPERTY_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-.:]+$").unwrap());
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\s*/?\s*([a-zA-Z][a-zA-Z0-9]*)").unwrap());

/// The 12-entry color palette; assignment is positional by name order
/// (§4.5).
pub const TAG_PALETTE: [&str; 12] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff",
];

pub fn validate_property_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_PROPERTY_KEY_LEN {
        return Err(TodoError::InvalidArgument(format!(
            "property key must be 1-{MAX_PROPERTY_KEY_LEN} characters"
        )));
    }
    if !PROPERTY_KEY_RE.is_match(key) {
        return Err(TodoError::InvalidArgument(format!(
            "property key '{key}' contains disallowed characters"
        )));
    }
    if RESERVED_KEYS.iter().any(|r| r.eq_ignore_ascii_case(key)) {
        return Err(TodoError::InvalidArgument(format!(
            "property key '{key}' is reserved"
        )));
    }
    Ok(())
}

pub fn validate_property_value(value: &str) -> Result<()> {
    if value.len() > MAX_PROPERTY_VALUE_LEN {
        return Err(TodoError::InvalidArgument(format!(
            "property value exceeds {MAX_PROPERTY_VALUE_LEN} characters"
        )));
    }
    let lower = value.to_lowercase();
    if BANNED_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return Err(TodoError::InvalidArgument(
            "property value contains a disallowed script pattern".into(),
        ));
    }
    for caps in HTML_TAG_RE.captures_iter(value) {
        let tag = caps[1].to_lowercase();
        if !ALLOWED_TAGS.contains(&tag.as_str()) {
            return Err(TodoError::InvalidArgument(format!(
                "property value contains disallowed tag '<{tag}>'"
            )));
        }
    }
    Ok(())
}

/// Takes `conn: &Connection` so the façade can record its history entry in
/// the same transaction as the property write (spec.md §4.7/§5, §8
/// invariant 5).
pub fn set_item_property_checked(conn: &Connection, item_id: i64, key: &str, value: &str) -> Result<ItemProperty> {
    validate_property_key(key)?;
    validate_property_value(value)?;
    store_properties::set_item_property(conn, item_id, key, value)
}

pub fn set_list_property_checked(conn: &Connection, list_id: i64, key: &str, value: &str) -> Result<ListProperty> {
    validate_property_key(key)?;
    validate_property_value(value)?;
    store_properties::set_list_property(conn, list_id, key, value)
}

/// Gets-or-creates a tag by (lower-cased) name, assigning the next
/// palette color by sorted-name position. Fails `TagLimit` on an attempt
/// to introduce a 13th distinct tag.
pub fn get_or_create_tag(conn: &Connection, name: &str) -> Result<Tag> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(TodoError::InvalidArgument("tag name must not be empty".into()));
    }
    if let Some(existing) = store_tags::get_tag_by_name(conn, &name)? {
        return Ok(existing);
    }
    let existing_tags = store_tags::list_tags(conn)?;
    if existing_tags.len() >= TAG_PALETTE.len() {
        return Err(TodoError::TagLimit);
    }
    let position = existing_tags.partition_point(|t| t.name.as_str() < name.as_str());
    let color = TAG_PALETTE[position % TAG_PALETTE.len()];
    store_tags::create_tag(conn, &name, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn rejects_reserved_and_malformed_keys() {
        assert!(validate_property_key("id").is_err());
        assert!(validate_property_key("Created_At").is_err());
        assert!(validate_property_key("has space").is_err());
        assert!(validate_property_key("priority").is_ok());
        assert!(validate_property_key("a.b-c:d_e").is_ok());
    }

    #[test]
    fn rejects_script_patterns_case_insensitively() {
        assert!(validate_property_value("<SCRIPT>alert(1)</SCRIPT>").is_err());
        assert!(validate_property_value("JavaScript:alert(1)").is_err());
        assert!(validate_property_value("plain text").is_ok());
    }

    #[test]
    fn allows_safelisted_html_only() {
        assert!(validate_property_value("<b>bold</b> and <em>stress</em>").is_ok());
        assert!(validate_property_value("<div>not allowed</div>").is_err());
    }

    #[test]
    fn rejects_oversized_value() {
        let value = "x".repeat(2001);
        assert!(validate_property_value(&value).is_err());
    }

    #[test]
    fn tag_palette_assigns_by_sorted_position() {
        let store = Store::open_in_memory().unwrap();
        let alpha = get_or_create_tag(store.conn(), "alpha").unwrap();
        let zeta = get_or_create_tag(store.conn(), "zeta").unwrap();
        assert_eq!(alpha.color, TAG_PALETTE[0]);
        assert_eq!(zeta.color, TAG_PALETTE[1]);
    }

    #[test]
    fn thirteenth_tag_rejected() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..12 {
            get_or_create_tag(store.conn(), &format!("tag{i}")).unwrap();
        }
        let err = get_or_create_tag(store.conn(), "tag_overflow").unwrap_err();
        assert_eq!(err.code(), "tag_limit");
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let first = get_or_create_tag(store.conn(), "Dev").unwrap();
        let second = get_or_create_tag(store.conn(), "dev").unwrap();
        assert_eq!(first.id, second.id);
    }
}
