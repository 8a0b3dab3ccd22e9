//! `SqliteIndexDatabase` — the SQLite-backed database wrapper.
//!
//! Single connection, WAL journal. The index serializes all access
//! through its coarse lock, so no connection pool is needed here; a
//! transaction simply borrows the connection for its lifetime.

use std::path::Path;

use pacs_core::traits::database::{DatabaseTransaction, IndexDatabase};
use pacs_core::types::enums::{GlobalProperty, TransactionKind};
use pacs_core::IndexError;
use rusqlite::Connection;

use super::migrations;
use super::transaction::{map_sqlite_error, SqliteTransaction};

/// SQLite reference implementation of [`IndexDatabase`].
pub struct SqliteIndexDatabase {
    conn: Connection,
}

impl SqliteIndexDatabase {
    /// Open (or create) a file-backed index database, applying
    /// pragmas and pending migrations.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path).map_err(map_sqlite_error)?;
        Self::prepare(conn)
    }

    /// In-memory database for tests and ephemeral hosts.
    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self, IndexError> {
        migrations::apply_pragmas(&conn)?;
        migrations::run_migrations(&conn)?;
        let db = Self { conn };
        db.check_schema_property()?;
        Ok(db)
    }

    /// The schema-version global property must agree with the
    /// migrated schema; a mismatch means the file was produced by an
    /// incompatible implementation.
    fn check_schema_property(&self) -> Result<(), IndexError> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM global_properties WHERE property = ?1",
                [GlobalProperty::SchemaVersion.as_int()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sqlite_error(other)),
            })?;

        match stored {
            None => {
                self.conn
                    .execute(
                        "INSERT INTO global_properties (property, value) VALUES (?1, ?2)",
                        rusqlite::params![
                            GlobalProperty::SchemaVersion.as_int(),
                            migrations::LATEST_VERSION.to_string()
                        ],
                    )
                    .map_err(map_sqlite_error)?;
                Ok(())
            }
            Some(v) if v == migrations::LATEST_VERSION.to_string() => Ok(()),
            Some(v) => Err(IndexError::Corrupt {
                details: format!(
                    "schema-version property is {v}, expected {}",
                    migrations::LATEST_VERSION
                ),
            }),
        }
    }
}

impl IndexDatabase for SqliteIndexDatabase {
    fn transaction<'a>(
        &'a mut self,
        kind: TransactionKind,
    ) -> Result<Box<dyn DatabaseTransaction + 'a>, IndexError> {
        let begin = match kind {
            TransactionKind::ReadOnly => "BEGIN",
            // Take the write lock up front so conflicts surface at
            // open rather than at the first write.
            TransactionKind::ReadWrite => "BEGIN IMMEDIATE",
        };
        self.conn.execute_batch(begin).map_err(map_sqlite_error)?;
        Ok(Box::new(SqliteTransaction::new(&self.conn)))
    }

    fn flush_to_disk(&mut self) -> Result<(), IndexError> {
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(map_sqlite_error)
    }

    fn schema_version(&mut self) -> Result<u32, IndexError> {
        migrations::current_version(&self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_property_is_written_on_first_open() {
        let mut db = SqliteIndexDatabase::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), migrations::LATEST_VERSION);

        let tx = db.transaction(TransactionKind::ReadOnly).unwrap();
        let stored = tx.global_property(GlobalProperty::SchemaVersion).unwrap();
        assert_eq!(stored.as_deref(), Some("1"));
        tx.rollback().unwrap();
    }

    #[test]
    fn reopening_a_file_database_preserves_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.db");

        {
            let mut db = SqliteIndexDatabase::open(&path).unwrap();
            let mut tx = db.transaction(TransactionKind::ReadWrite).unwrap();
            tx.set_global_property(GlobalProperty::Peers, "{}").unwrap();
            tx.commit().unwrap();
        }

        let mut db = SqliteIndexDatabase::open(&path).unwrap();
        let tx = db.transaction(TransactionKind::ReadOnly).unwrap();
        assert_eq!(
            tx.global_property(GlobalProperty::Peers).unwrap().as_deref(),
            Some("{}")
        );
        tx.rollback().unwrap();
    }
}
