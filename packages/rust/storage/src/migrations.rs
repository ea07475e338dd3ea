//! SQL migration definitions for the Porter table store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: table_rows",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One record per row; fields kept as an ordered JSON object
CREATE TABLE IF NOT EXISTS table_rows (
    table_name  TEXT NOT NULL,
    row_id      TEXT NOT NULL,
    position    INTEGER NOT NULL,
    fields_json TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (table_name, row_id)
);

CREATE INDEX IF NOT EXISTS idx_table_rows_position ON table_rows(table_name, position);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Cell write log",
            sql: r#"
-- Every value written back by a run, for auditing what a run changed
CREATE TABLE IF NOT EXISTS cell_writes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name  TEXT NOT NULL,
    row_id      TEXT NOT NULL,
    column_name TEXT NOT NULL,
    written_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cell_writes_row ON cell_writes(table_name, row_id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
