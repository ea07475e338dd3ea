//! Core domain types shared by every Porter crate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// One data-store record: an id plus an ordered mapping from field name to value.
///
/// Field names are display names and may contain spaces or punctuation.
/// Order is the store's field order and is significant for identifier
/// collision resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Store-assigned record identifier.
    pub id: String,
    /// Field values in store order.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Row {
    /// Create an empty row with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field insertion, keeping insertion order.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Raw value of a field by its original name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Field value rendered as text, or `None` if the field is absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(render_value)
    }

    /// `true` when the field is absent or holds a blank value.
    pub fn is_blank(&self, name: &str) -> bool {
        self.fields.get(name).is_none_or(is_blank)
    }

    /// Original field names in store order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Render a cell value as prompt text.
///
/// Strings are inserted as-is, null becomes empty, lists are joined with
/// `", "` and objects fall back to compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Whether a cell counts as empty for "fill only blank cells" purposes.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Where a pipeline step was running: which table, row, output column and template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub table: String,
    pub row_id: String,
    pub column: String,
    pub template: String,
}

impl TaskContext {
    pub fn new(
        table: impl Into<String>,
        row_id: impl Into<String>,
        column: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            row_id: row_id.into(),
            column: column.into(),
            template: template.into(),
        }
    }
}

impl std::fmt::Display for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table={} row={} column={} template={}",
            self.table, self.row_id, self.column, self.template
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_preserves_field_order() {
        let row = Row::new("rec1")
            .with_field("Zeta", "z")
            .with_field("Alpha", "a")
            .with_field("Mid Name", "m");
        let names: Vec<&str> = row.field_names().collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Mid Name"]);
    }

    #[test]
    fn row_deserializes_store_record() {
        let row: Row = serde_json::from_value(json!({
            "id": "recA",
            "fields": { "Name": "Acme", "Employees": 42, "Tags": ["b2b", "saas"] }
        }))
        .expect("deserialize row");
        assert_eq!(row.text("Name").as_deref(), Some("Acme"));
        assert_eq!(row.text("Employees").as_deref(), Some("42"));
        assert_eq!(row.text("Tags").as_deref(), Some("b2b, saas"));
        assert_eq!(row.text("Missing"), None);
    }

    #[test]
    fn render_value_variants() {
        assert_eq!(render_value(&Value::Null), "");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(1.5)), "1.5");
        assert_eq!(render_value(&json!(["a", null, "b"])), "a, b");
        assert_eq!(render_value(&json!({"k": 1})), r#"{"k":1}"#);
    }

    #[test]
    fn blank_detection() {
        let row = Row::new("r")
            .with_field("Empty", "  ")
            .with_field("Null", Value::Null)
            .with_field("List", json!([]))
            .with_field("Zero", 0)
            .with_field("Text", "x");
        assert!(row.is_blank("Empty"));
        assert!(row.is_blank("Null"));
        assert!(row.is_blank("List"));
        assert!(row.is_blank("Absent"));
        assert!(!row.is_blank("Zero"));
        assert!(!row.is_blank("Text"));
    }

    #[test]
    fn task_context_display() {
        let ctx = TaskContext::new("companies", "rec9", "AI_Tags", "tags");
        assert_eq!(
            ctx.to_string(),
            "table=companies row=rec9 column=AI_Tags template=tags"
        );
    }
}
