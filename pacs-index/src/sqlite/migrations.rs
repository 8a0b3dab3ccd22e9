//! Schema migrations for the index database.
//!
//! Versioning is driven by the `user_version` pragma; each migration
//! runs exactly once, in order, inside its own transaction.

use pacs_core::IndexError;
use rusqlite::Connection;

/// Schema version produced by the newest migration.
pub const LATEST_VERSION: u32 = 1;

const V001_INITIAL: &str = "
CREATE TABLE resources (
    internal_id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_id   TEXT NOT NULL UNIQUE,
    kind        INTEGER NOT NULL,
    parent_id   INTEGER REFERENCES resources(internal_id) ON DELETE CASCADE,
    protected   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX idx_resources_parent ON resources(parent_id);
CREATE INDEX idx_resources_kind ON resources(kind);

CREATE TABLE main_tags (
    resource_id INTEGER NOT NULL REFERENCES resources(internal_id) ON DELETE CASCADE,
    tag_group   INTEGER NOT NULL,
    tag_element INTEGER NOT NULL,
    value       TEXT NOT NULL,
    PRIMARY KEY (resource_id, tag_group, tag_element)
);

CREATE TABLE identifier_tags (
    resource_id INTEGER NOT NULL REFERENCES resources(internal_id) ON DELETE CASCADE,
    tag_group   INTEGER NOT NULL,
    tag_element INTEGER NOT NULL,
    value       TEXT NOT NULL,
    PRIMARY KEY (resource_id, tag_group, tag_element)
);
CREATE INDEX idx_identifier_tags_value
    ON identifier_tags(tag_group, tag_element, value);

CREATE TABLE metadata (
    resource_id INTEGER NOT NULL REFERENCES resources(internal_id) ON DELETE CASCADE,
    kind        INTEGER NOT NULL,
    value       TEXT NOT NULL,
    PRIMARY KEY (resource_id, kind)
);

CREATE TABLE attachments (
    resource_id       INTEGER NOT NULL REFERENCES resources(internal_id) ON DELETE CASCADE,
    content_kind      INTEGER NOT NULL,
    uuid              TEXT NOT NULL,
    compressed_size   INTEGER NOT NULL,
    uncompressed_size INTEGER NOT NULL,
    compressed_hash   TEXT NOT NULL,
    uncompressed_hash TEXT NOT NULL,
    compression       INTEGER NOT NULL,
    PRIMARY KEY (resource_id, content_kind)
);

CREATE TABLE changes (
    seq           INTEGER PRIMARY KEY,
    kind          INTEGER NOT NULL,
    resource_kind INTEGER,
    public_id     TEXT NOT NULL,
    at            INTEGER NOT NULL
);

CREATE TABLE exported_resources (
    seq           INTEGER PRIMARY KEY,
    resource_kind INTEGER NOT NULL,
    public_id     TEXT NOT NULL,
    modality      TEXT NOT NULL,
    patient_id    TEXT NOT NULL,
    study_uid     TEXT NOT NULL,
    series_uid    TEXT NOT NULL,
    sop_uid       TEXT NOT NULL,
    at            INTEGER NOT NULL
);

CREATE TABLE global_properties (
    property INTEGER PRIMARY KEY,
    value    TEXT NOT NULL
);
";

const MIGRATIONS: &[(u32, &str)] = &[(1, V001_INITIAL)];

fn sqe(e: impl std::fmt::Display) -> IndexError {
    IndexError::Database {
        message: e.to_string(),
    }
}

/// Connection-level pragmas, applied before anything else.
pub fn apply_pragmas(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 100;",
    )
    .map_err(sqe)
}

/// Current `user_version` of the connection.
pub fn current_version(conn: &Connection) -> Result<u32, IndexError> {
    conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))
        .map_err(sqe)
}

/// Run all pending migrations. A database newer than this build is
/// refused as corrupt rather than silently downgraded.
pub fn run_migrations(conn: &Connection) -> Result<(), IndexError> {
    let version = current_version(conn)?;
    if version > LATEST_VERSION {
        return Err(IndexError::Corrupt {
            details: format!(
                "database schema v{version} is newer than supported v{LATEST_VERSION}"
            ),
        });
    }

    for (target, sql) in MIGRATIONS {
        if *target <= version {
            continue;
        }
        let tx = conn.unchecked_transaction().map_err(sqe)?;
        tx.execute_batch(sql).map_err(|e| IndexError::Corrupt {
            details: format!("migration to v{target} failed: {e}"),
        })?;
        tx.pragma_update(None, "user_version", target).map_err(sqe)?;
        tx.commit().map_err(sqe)?;
        tracing::info!(version = target, "applied index schema migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn fresh_database_migrates_to_latest() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
        let tables = table_names(&conn);
        for expected in [
            "resources",
            "main_tags",
            "identifier_tags",
            "metadata",
            "attachments",
            "changes",
            "exported_resources",
            "global_properties",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
        assert!(matches!(
            run_migrations(&conn),
            Err(IndexError::Corrupt { .. })
        ));
    }
}
