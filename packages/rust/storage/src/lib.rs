//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding named tables of
//! rows. Each row is an id plus an ordered JSON object of fields, so tables
//! need no schema of their own: columns appear as values are written.
//!
//! **Access rules:**
//! - `porter run` / `porter import`: read-write via [`Storage::open`]
//! - `porter export` / `porter tables`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use porter_shared::{PorterError, Result, Row};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// Serializes read-modify-write cycles on `fields_json`.
    write_lock: Mutex<()>,
}

fn storage_err(e: impl std::fmt::Display) -> PorterError {
    PorterError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PorterError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PorterError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PorterError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PorterError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    /// List tables with their row counts, ordered by name.
    pub async fn list_tables(&self) -> Result<Vec<(String, usize)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT table_name, COUNT(*) FROM table_rows GROUP BY table_name ORDER BY table_name",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let name = row.get::<String>(0).map_err(storage_err)?;
            let count = row.get::<i64>(1).map_err(storage_err)?;
            results.push((name, usize::try_from(count).unwrap_or(0)));
        }
        Ok(results)
    }

    /// Number of cells written back to `table` so far.
    pub async fn write_count(&self, table: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM cell_writes WHERE table_name = ?1",
                params![table],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count = row.get::<i64>(0).map_err(storage_err)?;
                Ok(usize::try_from(count).unwrap_or(0))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Rows
    // -----------------------------------------------------------------------

    /// Insert or replace rows of `table`. Rows without an id get a fresh one.
    ///
    /// New rows are appended after the existing ones; replaced rows keep
    /// their position. Returns the number of rows written.
    pub async fn import_rows(&self, table: &str, rows: &[Row]) -> Result<usize> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let mut next_position = self.max_position(table).await? + 1;
        let now = Utc::now().to_rfc3339();

        for row in rows {
            let row_id = if row.id.trim().is_empty() {
                Uuid::now_v7().to_string()
            } else {
                row.id.clone()
            };
            let fields_json = serde_json::to_string(&row.fields).map_err(storage_err)?;

            self.conn
                .execute(
                    "INSERT INTO table_rows (table_name, row_id, position, fields_json, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(table_name, row_id) DO UPDATE SET
                       fields_json = excluded.fields_json,
                       updated_at = excluded.updated_at",
                    params![table, row_id.as_str(), next_position, fields_json, now.as_str()],
                )
                .await
                .map_err(storage_err)?;
            next_position += 1;
        }

        tracing::info!(table, rows = rows.len(), "rows imported");
        Ok(rows.len())
    }

    /// All rows of `table` in position order.
    pub async fn list_rows(&self, table: &str) -> Result<Vec<Row>> {
        let mut rows = self
            .conn
            .query(
                "SELECT row_id, fields_json FROM table_rows WHERE table_name = ?1 ORDER BY position",
                params![table],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(to_row(&row)?);
        }
        Ok(results)
    }

    /// One row by id.
    pub async fn get_row(&self, table: &str, row_id: &str) -> Result<Option<Row>> {
        let mut rows = self
            .conn
            .query(
                "SELECT row_id, fields_json FROM table_rows WHERE table_name = ?1 AND row_id = ?2",
                params![table, row_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(to_row(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Raw values of `column` across `table`, skipping rows without it.
    pub async fn column_values(&self, table: &str, column: &str) -> Result<Vec<Value>> {
        Ok(self
            .list_rows(table)
            .await?
            .into_iter()
            .filter_map(|mut row| row.fields.remove(column))
            .collect())
    }

    /// Write one cell. A column the row does not have yet is appended.
    pub async fn set_cell(&self, table: &str, row_id: &str, column: &str, value: Value) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let mut row = self.get_row(table, row_id).await?.ok_or_else(|| {
            PorterError::Storage(format!("row {row_id} not found in table {table}"))
        })?;
        row.fields.insert(column.to_string(), value);

        let fields_json = serde_json::to_string(&row.fields).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE table_rows SET fields_json = ?1, updated_at = ?2
                 WHERE table_name = ?3 AND row_id = ?4",
                params![fields_json, now.as_str(), table, row_id],
            )
            .await
            .map_err(storage_err)?;
        self.conn
            .execute(
                "INSERT INTO cell_writes (table_name, row_id, column_name, written_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![table, row_id, column, now.as_str()],
            )
            .await
            .map_err(storage_err)?;

        tracing::debug!(table, row_id, column, "cell written");
        Ok(())
    }

    async fn max_position(&self, table: &str) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(position), 0) FROM table_rows WHERE table_name = ?1",
                params![table],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).map_err(storage_err),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // JSON import / export
    // -----------------------------------------------------------------------

    /// Import a JSON array of rows (see [`parse_rows`]).
    pub async fn import_json(&self, table: &str, json: &str) -> Result<usize> {
        let rows = parse_rows(json)?;
        self.import_rows(table, &rows).await
    }

    /// Export `table` as a pretty-printed JSON array of `{id, fields}` objects.
    pub async fn export_json(&self, table: &str) -> Result<String> {
        let rows = self.list_rows(table).await?;
        serde_json::to_string_pretty(&rows).map_err(storage_err)
    }
}

/// Parse a JSON array of rows.
///
/// Elements are either `{"id": ..., "fields": {...}}` records or flat
/// objects, which become the fields of a row with a generated id.
pub fn parse_rows(json: &str) -> Result<Vec<Row>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| PorterError::parse(format!("invalid rows JSON: {e}")))?;
    let Value::Array(items) = value else {
        return Err(PorterError::parse("rows JSON must be an array"));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(mut object) if object.get("fields").is_some_and(Value::is_object) => {
                let id = match object.remove("id") {
                    Some(Value::String(id)) => id,
                    Some(Value::Number(n)) => n.to_string(),
                    _ => String::new(),
                };
                let fields = match object.remove("fields") {
                    Some(Value::Object(fields)) => fields,
                    _ => Map::new(),
                };
                Ok(Row { id, fields })
            }
            Value::Object(fields) => Ok(Row {
                id: String::new(),
                fields,
            }),
            _ => Err(PorterError::parse(format!("row {i} is not a JSON object"))),
        })
        .collect()
}

fn to_row(row: &libsql::Row) -> Result<Row> {
    let id = row.get::<String>(0).map_err(storage_err)?;
    let fields_json = row.get::<String>(1).map_err(storage_err)?;
    let fields: Map<String, Value> = serde_json::from_str(&fields_json)
        .map_err(|e| PorterError::Storage(format!("corrupt fields for row {id}: {e}")))?;
    Ok(Row { id, fields })
}
