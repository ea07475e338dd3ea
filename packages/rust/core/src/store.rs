//! Data store capability consumed by the pipeline and the table runner.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use porter_shared::{PorterError, Result, Row, render_value};
use porter_storage::Storage;

/// Read/write access to tables of rows.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_row(&self, table: &str, row_id: &str) -> Result<Row>;

    async fn list_rows(&self, table: &str) -> Result<Vec<Row>>;

    /// Distinct non-empty values currently in `column`. List cells
    /// contribute each element.
    async fn get_column_values(&self, table: &str, column: &str) -> Result<BTreeSet<String>>;

    async fn set_cell(&self, table: &str, row_id: &str, column: &str, value: &str) -> Result<()>;
}

/// Collect the distinct non-empty strings held by cell values.
pub fn distinct_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for value in values {
        match value {
            Value::Array(items) => out.extend(items.iter().map(render_value)),
            other => {
                out.insert(render_value(other));
            }
        }
    }
    out.into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn row_not_found(table: &str, row_id: &str) -> PorterError {
    PorterError::Storage(format!("row {row_id} not found in table {table}"))
}

// ---------------------------------------------------------------------------
// libSQL store
// ---------------------------------------------------------------------------

#[async_trait]
impl DataStore for Storage {
    async fn get_row(&self, table: &str, row_id: &str) -> Result<Row> {
        Storage::get_row(self, table, row_id)
            .await?
            .ok_or_else(|| row_not_found(table, row_id))
    }

    async fn list_rows(&self, table: &str) -> Result<Vec<Row>> {
        Storage::list_rows(self, table).await
    }

    async fn get_column_values(&self, table: &str, column: &str) -> Result<BTreeSet<String>> {
        let values = self.column_values(table, column).await?;
        Ok(distinct_values(&values))
    }

    async fn set_cell(&self, table: &str, row_id: &str, column: &str, value: &str) -> Result<()> {
        Storage::set_cell(self, table, row_id, column, Value::String(value.to_string())).await
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(table: &str, rows: Vec<Row>) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(table.to_string(), rows);
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn insert_row(&self, table: &str, row: Row) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(row);
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_row(&self, table: &str, row_id: &str) -> Result<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|rows| rows.iter().find(|r| r.id == row_id))
            .cloned()
            .ok_or_else(|| row_not_found(table, row_id))
    }

    async fn list_rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.tables.read().await.get(table).cloned().unwrap_or_default())
    }

    async fn get_column_values(&self, table: &str, column: &str) -> Result<BTreeSet<String>> {
        let tables = self.tables.read().await;
        let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(distinct_values(rows.iter().filter_map(|r| r.get(column))))
    }

    async fn set_cell(&self, table: &str, row_id: &str, column: &str, value: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == row_id))
            .ok_or_else(|| row_not_found(table, row_id))?;
        row.fields
            .insert(column.to_string(), Value::String(value.to_string()));
        Ok(())
    }
}
