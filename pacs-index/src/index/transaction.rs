//! Transaction manager: typed read-only / read-write facades over the
//! database wrapper, with bounded retry on transient contention.
//!
//! The read-only facade hands out a shared reference to the wrapper
//! transaction, so mutating operations are unreachable by
//! construction. The read-write facade additionally carries a
//! [`TransactionContext`] that buffers every in-memory side effect
//! (stability touches, recycling-order updates, listener
//! notifications, blob reclamation) until the commit has succeeded;
//! a rolled-back attempt leaves the caches untouched.

use std::thread;
use std::time::{Duration, Instant};

use pacs_core::traits::database::{DatabaseTransaction, IndexDatabase};
use pacs_core::types::change::Change;
use pacs_core::types::enums::{ChangeKind, ResourceKind, TransactionKind};
use pacs_core::types::identifiers::ResourceId;
use pacs_core::IndexError;

/// Retry backoff is exponential, capped here.
const BACKOFF_CAP_MS: u64 = 100;

/// In-memory side effects collected during one read-write attempt and
/// applied by the index only after the commit succeeded.
#[derive(Debug, Default)]
pub(crate) struct TransactionContext {
    /// Changes appended to the journal, in journal order; delivered to
    /// the listener bridge post-commit.
    pub changes: Vec<Change>,
    /// Storage-area uuids of deleted attachments, reclaimed
    /// post-commit.
    pub files_to_remove: Vec<String>,
    /// Resources to mark unstable, in mark order (child before
    /// parent).
    pub touched_unstable: Vec<(ResourceId, ResourceKind, String)>,
    /// Every deleted resource; removed from the stability tracker.
    pub deleted_resources: Vec<ResourceId>,
    /// Deleted patients; removed from the recycling order.
    pub deleted_patients: Vec<ResourceId>,
    /// Freshly created patients; appended to the recycling order.
    pub new_patients: Vec<(ResourceId, String)>,
    /// Patients accessed by this operation; promoted in the recycling
    /// order.
    pub touched_patients: Vec<ResourceId>,
}

/// Totals of a subtree removed by the cascade helper.
#[derive(Debug, Default)]
pub(crate) struct SubtreeStats {
    pub deleted: Vec<(ResourceKind, String)>,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Read-only transaction facade. Only the shared-reference methods of
/// the wrapper are reachable through it.
pub(crate) struct RoTx<'b, 'a> {
    pub db: &'b (dyn DatabaseTransaction + 'a),
}

/// Read-write transaction facade: full wrapper access plus the
/// higher-level constructions shared by the hierarchy engine.
pub(crate) struct RwTx<'b, 'a> {
    pub db: &'b mut (dyn DatabaseTransaction + 'a),
    pub ctx: &'b mut TransactionContext,
    /// Timestamp of this transaction, from the injected clock.
    pub now: i64,
}

impl RwTx<'_, '_> {
    /// Append a change to the journal and queue it for post-commit
    /// delivery.
    pub fn log_change(
        &mut self,
        kind: ChangeKind,
        resource_kind: Option<ResourceKind>,
        public_id: &str,
    ) -> Result<(), IndexError> {
        let change = self.db.log_change(kind, resource_kind, public_id, self.now)?;
        self.ctx.changes.push(change);
        Ok(())
    }

    /// Delete a resource and all of its descendants, emitting
    /// `Deleted` changes in post-order and collecting attachment
    /// uuids for post-commit reclamation.
    pub fn delete_subtree(
        &mut self,
        id: ResourceId,
        stats: &mut SubtreeStats,
    ) -> Result<(), IndexError> {
        for child in self.db.children(id)? {
            self.delete_subtree(child, stats)?;
        }

        let kind = self.db.resource_kind(id)?;
        let public_id = self.db.public_id(id)?;
        for attachment in self.db.attachments(id)? {
            stats.compressed_size += attachment.compressed_size;
            stats.uncompressed_size += attachment.uncompressed_size;
            self.ctx.files_to_remove.push(attachment.uuid);
        }

        self.db.delete_resource(id)?;
        self.ctx.deleted_resources.push(id);
        if kind == ResourceKind::Patient {
            self.ctx.deleted_patients.push(id);
        }
        self.log_change(ChangeKind::Deleted, Some(kind), &public_id)?;
        stats.deleted.push((kind, public_id));
        Ok(())
    }

    /// Mark the resource and its ancestors unstable, child before
    /// parent. Instances carry no stability state; marking starts at
    /// the series containing them.
    pub fn mark_unstable_chain(&mut self, id: ResourceId) -> Result<(), IndexError> {
        let mut current = Some(id);
        while let Some(resource) = current {
            let kind = self.db.resource_kind(resource)?;
            if kind != ResourceKind::Instance {
                let public_id = self.db.public_id(resource)?;
                self.ctx.touched_unstable.push((resource, kind, public_id));
            }
            current = self.db.parent(resource)?;
        }
        Ok(())
    }
}

/// The patient at the top of the resource's ancestor chain.
pub(crate) fn containing_patient(
    db: &dyn DatabaseTransaction,
    id: ResourceId,
) -> Result<ResourceId, IndexError> {
    let mut current = id;
    loop {
        if db.resource_kind(current)? == ResourceKind::Patient {
            return Ok(current);
        }
        current = db.parent(current)?.ok_or_else(|| IndexError::Internal {
            message: format!("resource {current} has no patient ancestor"),
        })?;
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = 1u64 << attempt.min(10);
    Duration::from_millis(exp.min(BACKOFF_CAP_MS))
}

fn deadline_allows_retry(deadline: Option<Instant>, attempt: u32) -> bool {
    match deadline {
        None => true,
        Some(d) => Instant::now() + backoff_delay(attempt) < d,
    }
}

/// Run a read-only operation, retrying on `Busy` up to `max_retries`
/// times with exponential backoff.
pub(crate) fn run_read_only<T>(
    db: &mut Box<dyn IndexDatabase>,
    max_retries: u32,
    deadline: Option<Instant>,
    mut f: impl FnMut(&RoTx<'_, '_>) -> Result<T, IndexError>,
) -> Result<T, IndexError> {
    let mut attempt = 0;
    loop {
        let tx = match db.transaction(TransactionKind::ReadOnly) {
            Ok(tx) => tx,
            Err(e) if e.is_transient() && attempt < max_retries => {
                if !deadline_allows_retry(deadline, attempt) {
                    return Err(e);
                }
                thread::sleep(backoff_delay(attempt));
                attempt += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let result = f(&RoTx { db: tx.as_ref() });
        match result {
            Ok(value) => {
                tx.commit()?;
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_retries => {
                let _ = tx.rollback();
                if !deadline_allows_retry(deadline, attempt) {
                    return Err(e);
                }
                thread::sleep(backoff_delay(attempt));
                attempt += 1;
            }
            Err(e) => {
                let _ = tx.rollback();
                return Err(e);
            }
        }
    }
}

/// Run a read-write operation, retrying on `Busy`. Each attempt gets a
/// fresh [`TransactionContext`]; the context of the committed attempt
/// is returned to the caller for post-commit application.
pub(crate) fn run_read_write<T>(
    db: &mut Box<dyn IndexDatabase>,
    max_retries: u32,
    deadline: Option<Instant>,
    now: i64,
    mut f: impl FnMut(&mut RwTx<'_, '_>) -> Result<T, IndexError>,
) -> Result<(T, TransactionContext), IndexError> {
    let mut attempt = 0;
    loop {
        let mut ctx = TransactionContext::default();
        let mut tx = match db.transaction(TransactionKind::ReadWrite) {
            Ok(tx) => tx,
            Err(e) if e.is_transient() && attempt < max_retries => {
                if !deadline_allows_retry(deadline, attempt) {
                    return Err(e);
                }
                thread::sleep(backoff_delay(attempt));
                attempt += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let result = f(&mut RwTx {
            db: tx.as_mut(),
            ctx: &mut ctx,
            now,
        });
        match result {
            Ok(value) => {
                tx.commit()?;
                return Ok((value, ctx));
            }
            Err(e) if e.is_transient() && attempt < max_retries => {
                let _ = tx.rollback();
                if !deadline_allows_retry(deadline, attempt) {
                    return Err(e);
                }
                thread::sleep(backoff_delay(attempt));
                attempt += 1;
            }
            Err(e) => {
                let _ = tx.rollback();
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff_delay(0), Duration::from_millis(1));
        assert_eq!(backoff_delay(1), Duration::from_millis(2));
        assert_eq!(backoff_delay(5), Duration::from_millis(32));
        assert_eq!(backoff_delay(7), Duration::from_millis(100));
        assert_eq!(backoff_delay(30), Duration::from_millis(100));
    }
}
