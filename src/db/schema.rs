//! SQL DDL for the embedding cache.
//!
//! Defines the `embedding_cache` table (one row per material id and model) and
//! `schema_meta`. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
-- Cached embedding vectors, invalidated when the material content changes
CREATE TABLE IF NOT EXISTS embedding_cache (
    material_id TEXT NOT NULL,
    model TEXT NOT NULL,
    content TEXT NOT NULL,
    dims INTEGER NOT NULL CHECK(dims > 0),
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (material_id, model)
);

CREATE INDEX IF NOT EXISTS idx_embedding_cache_model ON embedding_cache(model);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Create all tables and record the schema version on first run.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the stored schema version.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}
