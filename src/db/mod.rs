//! SQLite storage for the embedding cache.

pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the embedding cache at `path`, creating the file, its parent
/// directory and the schema as needed.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create cache directory {}", dir.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("cannot open embedding cache {}", path.display()))?;
    // CLI builds and a running server may share one cache file
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    prepare(&conn)?;

    tracing::info!(path = %path.display(), "embedding cache opened");
    Ok(conn)
}

/// Cache that lives only as long as the connection.
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("cannot open in-memory embedding cache")?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    schema::init_schema(conn).context("cannot initialize embedding cache schema")?;
    let version = schema::get_schema_version(conn)?;
    if version > schema::CURRENT_SCHEMA_VERSION {
        tracing::warn!(
            found = version,
            supported = schema::CURRENT_SCHEMA_VERSION,
            "embedding cache was written by a newer version"
        );
    }
    Ok(())
}
