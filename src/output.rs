//! CLI rendering (SPEC_FULL.md §6, ambient output-format switch).
//!
//! Format is selected by the `OUTPUT_FORMAT` environment variable:
//! `table` (default), `vertical`, `json`, `yaml`, or `xml`. Table/vertical
//! are hand-rolled fixed-width layouts, matching the teacher's
//! `output.rs` (no table-drawing crate in the dependency stack); json/yaml
//! go through `serde_json`/`serde_yaml`; xml has no crate in the corpus
//! for this shape, so it's a small hand-rolled serializer over
//! `serde_json::Value`.

use serde::Serialize;

use crate::error::Result;
use crate::model::{ItemStatus, TodoItem, TodoList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Vertical,
    Json,
    Yaml,
    Xml,
}

impl OutputFormat {
    pub fn from_env() -> Self {
        match std::env::var("OUTPUT_FORMAT").unwrap_or_default().to_lowercase().as_str() {
            "vertical" => Self::Vertical,
            "json" => Self::Json,
            "yaml" => Self::Yaml,
            "xml" => Self::Xml,
            _ => Self::Table,
        }
    }
}

const MIN_KEY_WIDTH: usize = 12;
const MIN_TITLE_WIDTH: usize = 24;

fn status_marker(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Pending => "[ ]",
        ItemStatus::InProgress => "[~]",
        ItemStatus::Completed => "[x]",
        ItemStatus::Failed => "[!]",
    }
}

pub fn format_lists(format: OutputFormat, lists: &[TodoList]) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(lists)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(lists)?),
        OutputFormat::Xml => render_xml("lists", lists),
        OutputFormat::Vertical => Ok(lists.iter().map(format_list_vertical).collect::<Vec<_>>().join("\n")),
        OutputFormat::Table => Ok(format_lists_table(lists)),
    }
}

fn format_lists_table(lists: &[TodoList]) -> String {
    if lists.is_empty() {
        return "(no lists)".to_string();
    }
    let key_width = lists.iter().map(|l| l.list_key.len()).max().unwrap_or(0).max(MIN_KEY_WIDTH);
    let title_width = lists.iter().map(|l| l.title.len()).max().unwrap_or(0).max(MIN_TITLE_WIDTH);
    let mut out = format!(
        "{:<key_width$} {:<title_width$} {}\n",
        "KEY", "TITLE", "STATUS"
    );
    for list in lists {
        out.push_str(&format!(
            "{:<key_width$} {:<title_width$} {}\n",
            list.list_key, list.title, list.status
        ));
    }
    out
}

fn format_list_vertical(list: &TodoList) -> String {
    format!(
        "list_key:    {}\ntitle:       {}\nstatus:      {}\ndescription: {}\n",
        list.list_key,
        list.title,
        list.status,
        list.description.as_deref().unwrap_or("-")
    )
}

pub fn format_items(format: OutputFormat, items: &[TodoItem]) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(items)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(items)?),
        OutputFormat::Xml => render_xml("items", items),
        OutputFormat::Vertical => Ok(items.iter().map(format_item_vertical).collect::<Vec<_>>().join("\n")),
        OutputFormat::Table => Ok(format_items_table(items)),
    }
}

fn format_items_table(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "(no items)".to_string();
    }
    let key_width = items.iter().map(|i| i.item_key.len()).max().unwrap_or(0).max(MIN_KEY_WIDTH);
    let mut out = format!("{:<3} {:<key_width$} {}\n", "", "KEY", "CONTENT");
    for item in items {
        out.push_str(&format!(
            "{} {:<key_width$} {}\n",
            status_marker(item.status),
            item.item_key,
            item.content
        ));
    }
    out
}

fn format_item_vertical(item: &TodoItem) -> String {
    format!(
        "item_key: {}\nstatus:   {}\ncontent:  {}\nparent:   {}\n",
        item.item_key,
        item.status,
        item.content,
        item.parent_item_id.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string())
    )
}

/// Fallback renderer for everything that isn't a list/item collection
/// (stats, single properties, dependency records, history). Table and
/// vertical both render as `key: value` lines over the value's JSON shape
/// — there's no natural column layout for heterogeneous single objects.
pub fn format_one<T: Serialize>(format: OutputFormat, value: &T) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        OutputFormat::Xml => render_xml("result", value),
        OutputFormat::Table | OutputFormat::Vertical => {
            let json = serde_json::to_value(value)?;
            Ok(format_value_as_lines(&json, 0))
        }
    }
}

fn format_value_as_lines(value: &serde_json::Value, depth: usize) -> String {
    let indent = "  ".repeat(depth);
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    format!("{indent}{k}:\n{}", format_value_as_lines(v, depth + 1))
                }
                other => format!("{indent}{k}: {}", scalar_to_string(other)),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{indent}[{i}] {}", scalar_to_string(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => format!("{indent}{}", scalar_to_string(other)),
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn render_xml<T: Serialize>(root_tag: &str, value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    write_xml_node(&mut out, root_tag, &json, 0);
    Ok(out)
}

fn write_xml_node(out: &mut String, tag: &str, value: &serde_json::Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        serde_json::Value::Null => out.push_str(&format!("{indent}<{tag}/>\n")),
        serde_json::Value::Bool(b) => out.push_str(&format!("{indent}<{tag}>{b}</{tag}>\n")),
        serde_json::Value::Number(n) => out.push_str(&format!("{indent}<{tag}>{n}</{tag}>\n")),
        serde_json::Value::String(s) => {
            out.push_str(&format!("{indent}<{tag}>{}</{tag}>\n", escape_xml(s)));
        }
        serde_json::Value::Array(items) => {
            out.push_str(&format!("{indent}<{tag}>\n"));
            for item in items {
                write_xml_node(out, "item", item, depth + 1);
            }
            out.push_str(&format!("{indent}</{tag}>\n"));
        }
        serde_json::Value::Object(map) => {
            out.push_str(&format!("{indent}<{tag}>\n"));
            for (k, v) in map {
                write_xml_node(out, sanitize_tag(k).as_str(), v, depth + 1);
            }
            out.push_str(&format!("{indent}</{tag}>\n"));
        }
    }
}

/// XML element names can't start with a digit; `serde_json` field names in
/// this crate never do, but map keys (e.g. a metadata blob) might.
fn sanitize_tag(key: &str) -> String {
    if key.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("_{key}")
    } else {
        key.replace(' ', "_")
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ListStatus, ListType};
    use std::collections::HashMap;

    fn sample_list() -> TodoList {
        TodoList {
            id: 1,
            list_key: "proj1".into(),
            title: "Project One".into(),
            description: None,
            list_type: ListType::Sequential,
            status: ListStatus::Active,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn table_format_includes_header_and_key() {
        let rendered = format_lists(OutputFormat::Table, &[sample_list()]).unwrap();
        assert!(rendered.contains("KEY"));
        assert!(rendered.contains("proj1"));
    }

    #[test]
    fn empty_table_says_no_lists() {
        let rendered = format_lists(OutputFormat::Table, &[]).unwrap();
        assert_eq!(rendered, "(no lists)");
    }

    #[test]
    fn json_format_round_trips() {
        let rendered = format_lists(OutputFormat::Json, &[sample_list()]).unwrap();
        let back: Vec<TodoList> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(back[0].list_key, "proj1");
    }

    #[test]
    fn xml_format_wraps_root_tag() {
        let rendered = format_one(OutputFormat::Xml, &sample_list()).unwrap();
        assert!(rendered.starts_with("<?xml"));
        assert!(rendered.contains("<result>"));
        assert!(rendered.contains("proj1"));
    }

    #[test]
    fn from_env_defaults_to_table() {
        // SAFETY: test-only mutation of a variable unique to this test.
        unsafe {
            std::env::remove_var("OUTPUT_FORMAT");
        }
        assert_eq!(OutputFormat::from_env(), OutputFormat::Table);
    }
}
