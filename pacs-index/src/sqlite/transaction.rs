//! `SqliteTransaction` — one atomic unit over the SQLite store.
//!
//! Opened by `SqliteIndexDatabase::transaction`; holds the connection
//! until committed or rolled back. Dropping an open transaction rolls
//! back.

use pacs_core::dicom::tag::DicomTag;
use pacs_core::traits::database::DatabaseTransaction;
use pacs_core::types::attachment::Attachment;
use pacs_core::types::change::{Change, ExportedResource};
use pacs_core::types::enums::{
    AttachmentKind, ChangeKind, CompressionKind, GlobalProperty, MetadataKind, ResourceKind,
};
use pacs_core::types::identifiers::ResourceId;
use pacs_core::IndexError;
use rusqlite::{params, Connection, OptionalExtension};

/// Translate SQLite failures into the index taxonomy.
pub(crate) fn map_sqlite_error(e: rusqlite::Error) -> IndexError {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                IndexError::Busy
            }
            rusqlite::ErrorCode::ConstraintViolation => IndexError::Conflict {
                details: e.to_string(),
            },
            rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                IndexError::Corrupt {
                    details: e.to_string(),
                }
            }
            rusqlite::ErrorCode::DiskFull => IndexError::Io {
                message: e.to_string(),
            },
            _ => IndexError::Database {
                message: e.to_string(),
            },
        },
        _ => IndexError::Database {
            message: e.to_string(),
        },
    }
}

pub(crate) struct SqliteTransaction<'a> {
    conn: &'a Connection,
    open: bool,
}

impl<'a> SqliteTransaction<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn, open: true }
    }

    /// Increment-and-get one of the persistent sequence counters.
    fn next_sequence(&mut self, property: GlobalProperty) -> Result<i64, IndexError> {
        let current = self
            .global_property(property)?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        self.set_global_property(property, &next.to_string())?;
        Ok(next)
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn read_change_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, i64, Option<i64>, String, i64)>
{
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_change(raw: (i64, i64, Option<i64>, String, i64)) -> Result<Change, IndexError> {
    let (seq, kind, resource_kind, public_id, timestamp) = raw;
    let kind = ChangeKind::from_int(kind).ok_or_else(|| IndexError::Corrupt {
        details: format!("unknown change kind {kind}"),
    })?;
    let resource_kind = match resource_kind {
        None => None,
        Some(v) => Some(ResourceKind::from_int(v).ok_or_else(|| IndexError::Corrupt {
            details: format!("unknown resource kind {v}"),
        })?),
    };
    Ok(Change {
        seq,
        kind,
        resource_kind,
        public_id,
        timestamp,
    })
}

fn decode_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, i64, i64, String, String, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn build_attachment(
    raw: (i64, String, i64, i64, String, String, i64),
) -> Result<Attachment, IndexError> {
    let (kind, uuid, compressed, uncompressed, chash, uhash, compression) = raw;
    Ok(Attachment {
        kind: AttachmentKind::from_int(kind).ok_or_else(|| IndexError::Corrupt {
            details: format!("unknown attachment kind {kind}"),
        })?,
        uuid,
        compressed_size: compressed as u64,
        uncompressed_size: uncompressed as u64,
        compressed_hash: chash,
        uncompressed_hash: uhash,
        compression: CompressionKind::from_int(compression).ok_or_else(|| IndexError::Corrupt {
            details: format!("unknown compression kind {compression}"),
        })?,
    })
}

fn decode_exported(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(i64, i64, String, String, String, String, String, String, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn build_exported(
    raw: (i64, i64, String, String, String, String, String, String, i64),
) -> Result<ExportedResource, IndexError> {
    let (seq, kind, public_id, modality, patient_id, study_uid, series_uid, sop_uid, at) = raw;
    Ok(ExportedResource {
        seq,
        resource_kind: ResourceKind::from_int(kind).ok_or_else(|| IndexError::Corrupt {
            details: format!("unknown resource kind {kind}"),
        })?,
        public_id,
        modality,
        patient_id,
        study_uid,
        series_uid,
        sop_uid,
        timestamp: at,
    })
}

impl DatabaseTransaction for SqliteTransaction<'_> {
    fn commit(mut self: Box<Self>) -> Result<(), IndexError> {
        self.open = false;
        self.conn.execute_batch("COMMIT").map_err(|e| {
            let _ = self.conn.execute_batch("ROLLBACK");
            IndexError::Database {
                message: format!("commit failed: {e}"),
            }
        })
    }

    fn rollback(mut self: Box<Self>) -> Result<(), IndexError> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK").map_err(map_sqlite_error)
    }

    // ─── Resources ──────────────────────────────────────────────────

    fn create_resource(
        &mut self,
        public_id: &str,
        kind: ResourceKind,
        parent: Option<ResourceId>,
    ) -> Result<ResourceId, IndexError> {
        self.conn
            .prepare_cached(
                "INSERT INTO resources (public_id, kind, parent_id) VALUES (?1, ?2, ?3)",
            )
            .map_err(map_sqlite_error)?
            .execute(params![public_id, kind.as_int(), parent.map(|p| p.0)])
            .map_err(map_sqlite_error)?;
        Ok(ResourceId(self.conn.last_insert_rowid()))
    }

    fn delete_resource(&mut self, id: ResourceId) -> Result<(), IndexError> {
        let deleted = self
            .conn
            .prepare_cached("DELETE FROM resources WHERE internal_id = ?1")
            .map_err(map_sqlite_error)?
            .execute(params![id.0])
            .map_err(map_sqlite_error)?;
        if deleted == 0 {
            return Err(IndexError::NotFound);
        }
        Ok(())
    }

    fn lookup_resource(
        &self,
        public_id: &str,
    ) -> Result<Option<(ResourceId, ResourceKind)>, IndexError> {
        let row: Option<(i64, i64)> = self
            .conn
            .prepare_cached("SELECT internal_id, kind FROM resources WHERE public_id = ?1")
            .map_err(map_sqlite_error)?
            .query_row(params![public_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
            .map_err(map_sqlite_error)?;
        match row {
            None => Ok(None),
            Some((id, kind)) => {
                let kind = ResourceKind::from_int(kind).ok_or_else(|| IndexError::Corrupt {
                    details: format!("unknown resource kind {kind}"),
                })?;
                Ok(Some((ResourceId(id), kind)))
            }
        }
    }

    fn resource_kind(&self, id: ResourceId) -> Result<ResourceKind, IndexError> {
        let kind: Option<i64> = self
            .conn
            .prepare_cached("SELECT kind FROM resources WHERE internal_id = ?1")
            .map_err(map_sqlite_error)?
            .query_row(params![id.0], |row| row.get(0))
            .optional()
            .map_err(map_sqlite_error)?;
        let kind = kind.ok_or(IndexError::NotFound)?;
        ResourceKind::from_int(kind).ok_or_else(|| IndexError::Corrupt {
            details: format!("unknown resource kind {kind}"),
        })
    }

    fn public_id(&self, id: ResourceId) -> Result<String, IndexError> {
        self.conn
            .prepare_cached("SELECT public_id FROM resources WHERE internal_id = ?1")
            .map_err(map_sqlite_error)?
            .query_row(params![id.0], |row| row.get(0))
            .optional()
            .map_err(map_sqlite_error)?
            .ok_or(IndexError::NotFound)
    }

    fn parent(&self, id: ResourceId) -> Result<Option<ResourceId>, IndexError> {
        let row: Option<Option<i64>> = self
            .conn
            .prepare_cached("SELECT parent_id FROM resources WHERE internal_id = ?1")
            .map_err(map_sqlite_error)?
            .query_row(params![id.0], |row| row.get(0))
            .optional()
            .map_err(map_sqlite_error)?;
        match row {
            None => Err(IndexError::NotFound),
            Some(parent) => Ok(parent.map(ResourceId)),
        }
    }

    fn children(&self, id: ResourceId) -> Result<Vec<ResourceId>, IndexError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT internal_id FROM resources WHERE parent_id = ?1 ORDER BY internal_id",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![id.0], |row| row.get::<_, i64>(0))
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(ResourceId(row.map_err(map_sqlite_error)?));
        }
        Ok(result)
    }

    fn count_resources(&self, kind: ResourceKind) -> Result<u64, IndexError> {
        let count: i64 = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM resources WHERE kind = ?1")
            .map_err(map_sqlite_error)?
            .query_row(params![kind.as_int()], |row| row.get(0))
            .map_err(map_sqlite_error)?;
        Ok(count as u64)
    }

    fn all_public_ids(
        &self,
        kind: ResourceKind,
        since: usize,
        limit: usize,
    ) -> Result<Vec<String>, IndexError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT public_id FROM resources WHERE kind = ?1
                 ORDER BY internal_id LIMIT ?2 OFFSET ?3",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![kind.as_int(), limit as i64, since as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(map_sqlite_error)?);
        }
        Ok(result)
    }

    fn patients_by_creation(&self) -> Result<Vec<(ResourceId, String)>, IndexError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT internal_id, public_id FROM resources WHERE kind = ?1
                 ORDER BY internal_id",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![ResourceKind::Patient.as_int()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            let (id, public_id) = row.map_err(map_sqlite_error)?;
            result.push((ResourceId(id), public_id));
        }
        Ok(result)
    }

    fn is_protected_patient(&self, id: ResourceId) -> Result<bool, IndexError> {
        let protected: Option<i64> = self
            .conn
            .prepare_cached("SELECT protected FROM resources WHERE internal_id = ?1")
            .map_err(map_sqlite_error)?
            .query_row(params![id.0], |row| row.get(0))
            .optional()
            .map_err(map_sqlite_error)?;
        protected.map(|p| p != 0).ok_or(IndexError::NotFound)
    }

    fn set_protected_patient(
        &mut self,
        id: ResourceId,
        protected: bool,
    ) -> Result<(), IndexError> {
        let updated = self
            .conn
            .prepare_cached("UPDATE resources SET protected = ?2 WHERE internal_id = ?1")
            .map_err(map_sqlite_error)?
            .execute(params![id.0, protected as i64])
            .map_err(map_sqlite_error)?;
        if updated == 0 {
            return Err(IndexError::NotFound);
        }
        Ok(())
    }

    // ─── Main tags & metadata ───────────────────────────────────────

    fn set_main_tag(
        &mut self,
        id: ResourceId,
        tag: DicomTag,
        value: &str,
    ) -> Result<(), IndexError> {
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO main_tags (resource_id, tag_group, tag_element, value)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(map_sqlite_error)?
            .execute(params![id.0, tag.group, tag.element, value])
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn set_identifier_tag(
        &mut self,
        id: ResourceId,
        tag: DicomTag,
        value: &str,
    ) -> Result<(), IndexError> {
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO identifier_tags
                 (resource_id, tag_group, tag_element, value)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(map_sqlite_error)?
            .execute(params![id.0, tag.group, tag.element, value])
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn main_tags(&self, id: ResourceId) -> Result<Vec<(DicomTag, String)>, IndexError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT tag_group, tag_element, value FROM main_tags
                 WHERE resource_id = ?1 ORDER BY tag_group, tag_element",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![id.0], |row| {
                Ok((
                    row.get::<_, u16>(0)?,
                    row.get::<_, u16>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            let (group, element, value) = row.map_err(map_sqlite_error)?;
            result.push((DicomTag::new(group, element), value));
        }
        Ok(result)
    }

    fn lookup_identifier_exact(
        &self,
        kind: ResourceKind,
        tag: DicomTag,
        value: &str,
    ) -> Result<Vec<ResourceId>, IndexError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT t.resource_id FROM identifier_tags t
                 JOIN resources r ON r.internal_id = t.resource_id
                 WHERE t.tag_group = ?1 AND t.tag_element = ?2 AND t.value = ?3
                   AND r.kind = ?4
                 ORDER BY t.resource_id",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(
                params![tag.group, tag.element, value, kind.as_int()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(ResourceId(row.map_err(map_sqlite_error)?));
        }
        Ok(result)
    }

    fn set_metadata(
        &mut self,
        id: ResourceId,
        kind: MetadataKind,
        value: &str,
    ) -> Result<(), IndexError> {
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO metadata (resource_id, kind, value) VALUES (?1, ?2, ?3)",
            )
            .map_err(map_sqlite_error)?
            .execute(params![id.0, kind.as_int(), value])
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn metadata(&self, id: ResourceId, kind: MetadataKind) -> Result<Option<String>, IndexError> {
        self.conn
            .prepare_cached("SELECT value FROM metadata WHERE resource_id = ?1 AND kind = ?2")
            .map_err(map_sqlite_error)?
            .query_row(params![id.0, kind.as_int()], |row| row.get(0))
            .optional()
            .map_err(map_sqlite_error)
    }

    fn delete_metadata(&mut self, id: ResourceId, kind: MetadataKind) -> Result<(), IndexError> {
        self.conn
            .prepare_cached("DELETE FROM metadata WHERE resource_id = ?1 AND kind = ?2")
            .map_err(map_sqlite_error)?
            .execute(params![id.0, kind.as_int()])
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn all_metadata(&self, id: ResourceId) -> Result<Vec<(MetadataKind, String)>, IndexError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT kind, value FROM metadata WHERE resource_id = ?1 ORDER BY kind",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![id.0], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            let (kind, value) = row.map_err(map_sqlite_error)?;
            // Unknown kinds written by a newer build are skipped, not
            // treated as corruption.
            if let Some(kind) = MetadataKind::from_int(kind) {
                result.push((kind, value));
            }
        }
        Ok(result)
    }

    // ─── Attachments ────────────────────────────────────────────────

    fn add_attachment(
        &mut self,
        id: ResourceId,
        attachment: &Attachment,
    ) -> Result<(), IndexError> {
        self.conn
            .prepare_cached(
                "INSERT INTO attachments
                 (resource_id, content_kind, uuid, compressed_size, uncompressed_size,
                  compressed_hash, uncompressed_hash, compression)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(map_sqlite_error)?
            .execute(params![
                id.0,
                attachment.kind.as_int(),
                attachment.uuid,
                attachment.compressed_size as i64,
                attachment.uncompressed_size as i64,
                attachment.compressed_hash,
                attachment.uncompressed_hash,
                attachment.compression.as_int(),
            ])
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn attachment(
        &self,
        id: ResourceId,
        kind: AttachmentKind,
    ) -> Result<Option<Attachment>, IndexError> {
        let raw = self
            .conn
            .prepare_cached(
                "SELECT content_kind, uuid, compressed_size, uncompressed_size,
                        compressed_hash, uncompressed_hash, compression
                 FROM attachments WHERE resource_id = ?1 AND content_kind = ?2",
            )
            .map_err(map_sqlite_error)?
            .query_row(params![id.0, kind.as_int()], decode_attachment)
            .optional()
            .map_err(map_sqlite_error)?;
        raw.map(build_attachment).transpose()
    }

    fn delete_attachment(
        &mut self,
        id: ResourceId,
        kind: AttachmentKind,
    ) -> Result<Attachment, IndexError> {
        let attachment = self.attachment(id, kind)?.ok_or(IndexError::NotFound)?;
        self.conn
            .prepare_cached("DELETE FROM attachments WHERE resource_id = ?1 AND content_kind = ?2")
            .map_err(map_sqlite_error)?
            .execute(params![id.0, kind.as_int()])
            .map_err(map_sqlite_error)?;
        Ok(attachment)
    }

    fn attachments(&self, id: ResourceId) -> Result<Vec<Attachment>, IndexError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT content_kind, uuid, compressed_size, uncompressed_size,
                        compressed_hash, uncompressed_hash, compression
                 FROM attachments WHERE resource_id = ?1 ORDER BY content_kind",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![id.0], decode_attachment)
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(build_attachment(row.map_err(map_sqlite_error)?)?);
        }
        Ok(result)
    }

    fn total_compressed_size(&self) -> Result<u64, IndexError> {
        let total: i64 = self
            .conn
            .prepare_cached("SELECT COALESCE(SUM(compressed_size), 0) FROM attachments")
            .map_err(map_sqlite_error)?
            .query_row([], |row| row.get(0))
            .map_err(map_sqlite_error)?;
        Ok(total as u64)
    }

    fn total_uncompressed_size(&self) -> Result<u64, IndexError> {
        let total: i64 = self
            .conn
            .prepare_cached("SELECT COALESCE(SUM(uncompressed_size), 0) FROM attachments")
            .map_err(map_sqlite_error)?
            .query_row([], |row| row.get(0))
            .map_err(map_sqlite_error)?;
        Ok(total as u64)
    }

    // ─── Journals & global properties ───────────────────────────────

    fn log_change(
        &mut self,
        kind: ChangeKind,
        resource_kind: Option<ResourceKind>,
        public_id: &str,
        timestamp: i64,
    ) -> Result<Change, IndexError> {
        let seq = self.next_sequence(GlobalProperty::ChangeSequence)?;
        self.conn
            .prepare_cached(
                "INSERT INTO changes (seq, kind, resource_kind, public_id, at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(map_sqlite_error)?
            .execute(params![
                seq,
                kind.as_int(),
                resource_kind.map(ResourceKind::as_int),
                public_id,
                timestamp,
            ])
            .map_err(map_sqlite_error)?;
        Ok(Change {
            seq,
            kind,
            resource_kind,
            public_id: public_id.to_string(),
            timestamp,
        })
    }

    fn changes_since(&self, since: i64, limit: usize) -> Result<(Vec<Change>, bool), IndexError> {
        let fetch = limit.saturating_add(1);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT seq, kind, resource_kind, public_id, at FROM changes
                 WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![since, fetch as i64], read_change_row)
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(decode_change(row.map_err(map_sqlite_error)?)?);
        }
        let done = result.len() <= limit;
        result.truncate(limit);
        Ok((result, done))
    }

    fn last_change(&self) -> Result<Option<Change>, IndexError> {
        let raw = self
            .conn
            .prepare_cached(
                "SELECT seq, kind, resource_kind, public_id, at FROM changes
                 ORDER BY seq DESC LIMIT 1",
            )
            .map_err(map_sqlite_error)?
            .query_row([], read_change_row)
            .optional()
            .map_err(map_sqlite_error)?;
        raw.map(decode_change).transpose()
    }

    fn clear_changes(&mut self) -> Result<(), IndexError> {
        self.conn
            .execute_batch("DELETE FROM changes")
            .map_err(map_sqlite_error)?;
        self.set_global_property(GlobalProperty::ChangeSequence, "0")
    }

    fn log_exported(&mut self, entry: &ExportedResource) -> Result<ExportedResource, IndexError> {
        let seq = self.next_sequence(GlobalProperty::ExportedSequence)?;
        self.conn
            .prepare_cached(
                "INSERT INTO exported_resources
                 (seq, resource_kind, public_id, modality, patient_id,
                  study_uid, series_uid, sop_uid, at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(map_sqlite_error)?
            .execute(params![
                seq,
                entry.resource_kind.as_int(),
                entry.public_id,
                entry.modality,
                entry.patient_id,
                entry.study_uid,
                entry.series_uid,
                entry.sop_uid,
                entry.timestamp,
            ])
            .map_err(map_sqlite_error)?;
        Ok(ExportedResource {
            seq,
            ..entry.clone()
        })
    }

    fn exported_since(
        &self,
        since: i64,
        limit: usize,
    ) -> Result<(Vec<ExportedResource>, bool), IndexError> {
        let fetch = limit.saturating_add(1);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT seq, resource_kind, public_id, modality, patient_id,
                        study_uid, series_uid, sop_uid, at
                 FROM exported_resources WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![since, fetch as i64], decode_exported)
            .map_err(map_sqlite_error)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(build_exported(row.map_err(map_sqlite_error)?)?);
        }
        let done = result.len() <= limit;
        result.truncate(limit);
        Ok((result, done))
    }

    fn last_exported(&self) -> Result<Option<ExportedResource>, IndexError> {
        let raw = self
            .conn
            .prepare_cached(
                "SELECT seq, resource_kind, public_id, modality, patient_id,
                        study_uid, series_uid, sop_uid, at
                 FROM exported_resources ORDER BY seq DESC LIMIT 1",
            )
            .map_err(map_sqlite_error)?
            .query_row([], decode_exported)
            .optional()
            .map_err(map_sqlite_error)?;
        raw.map(build_exported).transpose()
    }

    fn clear_exported(&mut self) -> Result<(), IndexError> {
        self.conn
            .execute_batch("DELETE FROM exported_resources")
            .map_err(map_sqlite_error)?;
        self.set_global_property(GlobalProperty::ExportedSequence, "0")
    }

    fn set_global_property(
        &mut self,
        property: GlobalProperty,
        value: &str,
    ) -> Result<(), IndexError> {
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO global_properties (property, value) VALUES (?1, ?2)",
            )
            .map_err(map_sqlite_error)?
            .execute(params![property.as_int(), value])
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn global_property(&self, property: GlobalProperty) -> Result<Option<String>, IndexError> {
        self.conn
            .prepare_cached("SELECT value FROM global_properties WHERE property = ?1")
            .map_err(map_sqlite_error)?
            .query_row(params![property.as_int()], |row| row.get(0))
            .optional()
            .map_err(map_sqlite_error)
    }
}
