//! Quota enforcement and patient recycling.
//!
//! The recycling order is an in-memory LRU over patients, promoted on
//! any access to a patient or one of its descendants and seeded from
//! creation order at startup. Victim selection walks it oldest-first,
//! skipping protected patients and the patient receiving the incoming
//! instance; the whole victim subtree is deleted inside the same
//! transaction as the admission that triggered it.

use std::collections::HashSet;

use lru::LruCache;
use pacs_core::types::enums::ResourceKind;
use pacs_core::types::identifiers::ResourceId;
use pacs_core::IndexError;

use super::transaction::{RwTx, SubtreeStats};

/// LRU order over all stored patients.
pub(crate) struct RecyclingOrder {
    order: LruCache<i64, String>,
}

impl RecyclingOrder {
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }

    /// Seed from patients in creation order (oldest first), so that a
    /// restart degrades to first-in-first-out until accesses rebuild
    /// the real order.
    pub fn seed(&mut self, patients: Vec<(ResourceId, String)>) {
        for (id, public_id) in patients {
            self.order.push(id.0, public_id);
        }
    }

    pub fn insert(&mut self, id: ResourceId, public_id: &str) {
        self.order.push(id.0, public_id.to_string());
    }

    /// Promote a patient to most-recently-used.
    pub fn touch(&mut self, id: ResourceId) {
        let _ = self.order.get(&id.0);
    }

    pub fn remove(&mut self, id: ResourceId) {
        self.order.pop(&id.0);
    }

    /// All patients, least-recently-used first.
    pub fn oldest_first(&self) -> Vec<(ResourceId, String)> {
        let mut patients: Vec<(ResourceId, String)> = self
            .order
            .iter()
            .map(|(id, public_id)| (ResourceId(*id), public_id.clone()))
            .collect();
        patients.reverse();
        patients
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

/// The admission predicate: true when storing `incoming_size` bytes
/// for the patient `new_patient_public_id` would exceed a quota.
pub(crate) fn recycling_needed(
    db: &dyn pacs_core::traits::database::DatabaseTransaction,
    max_storage_bytes: u64,
    max_patient_count: u64,
    incoming_size: u64,
    new_patient_public_id: &str,
) -> Result<bool, IndexError> {
    if max_storage_bytes > 0 {
        let total = db.total_compressed_size()?;
        if total + incoming_size > max_storage_bytes {
            return Ok(true);
        }
    }

    if max_patient_count > 0 {
        let patients = db.count_resources(ResourceKind::Patient)?;
        let patient_is_new = !new_patient_public_id.is_empty()
            && db.lookup_resource(new_patient_public_id)?.is_none();
        if patients >= max_patient_count && patient_is_new {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Recycle until the admission predicate clears, deleting one LRU
/// victim per round. Fails with `FullStorage` when no eligible victim
/// remains.
pub(crate) fn recycle_for_admission(
    rw: &mut RwTx<'_, '_>,
    recycling: &RecyclingOrder,
    max_storage_bytes: u64,
    max_patient_count: u64,
    incoming_size: u64,
    new_patient_public_id: &str,
) -> Result<(), IndexError> {
    let mut consumed: HashSet<i64> = HashSet::new();
    loop {
        if !recycling_needed(
            &*rw.db,
            max_storage_bytes,
            max_patient_count,
            incoming_size,
            new_patient_public_id,
        )? {
            return Ok(());
        }

        let mut victim = None;
        for (id, public_id) in recycling.oldest_first() {
            if consumed.contains(&id.0) || public_id == new_patient_public_id {
                continue;
            }
            match rw.db.is_protected_patient(id) {
                Ok(false) => {
                    victim = Some((id, public_id));
                    break;
                }
                Ok(true) => continue,
                // The order can be momentarily ahead of the store.
                Err(IndexError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }

        let Some((victim, victim_public_id)) = victim else {
            return Err(IndexError::FullStorage);
        };

        tracing::debug!(patient = %victim_public_id, "recycling patient to honour quota");
        let mut stats = SubtreeStats::default();
        rw.delete_subtree(victim, &mut stats)?;
        consumed.insert(victim.0);
    }
}

/// Recycle until the store is back under quota, without admitting
/// anything. Used after a quota reduction at runtime.
pub(crate) fn standalone_recycle(
    rw: &mut RwTx<'_, '_>,
    recycling: &RecyclingOrder,
    max_storage_bytes: u64,
    max_patient_count: u64,
) -> Result<(), IndexError> {
    // With no incoming instance the patient-count clause compares
    // against the bare count.
    let mut consumed: HashSet<i64> = HashSet::new();
    loop {
        let over_bytes = max_storage_bytes > 0
            && rw.db.total_compressed_size()? > max_storage_bytes;
        let over_patients = max_patient_count > 0
            && rw.db.count_resources(ResourceKind::Patient)? > max_patient_count;
        if !over_bytes && !over_patients {
            return Ok(());
        }

        let mut victim = None;
        for (id, public_id) in recycling.oldest_first() {
            if consumed.contains(&id.0) {
                continue;
            }
            match rw.db.is_protected_patient(id) {
                Ok(false) => {
                    victim = Some((id, public_id));
                    break;
                }
                Ok(true) => continue,
                Err(IndexError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }

        let Some((victim, victim_public_id)) = victim else {
            return Err(IndexError::FullStorage);
        };

        tracing::debug!(patient = %victim_public_id, "standalone recycling after quota change");
        let mut stats = SubtreeStats::default();
        rw.delete_subtree(victim, &mut stats)?;
        consumed.insert(victim.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_lru_not_fifo() {
        let mut order = RecyclingOrder::new();
        order.seed(vec![
            (ResourceId(1), "a".to_string()),
            (ResourceId(2), "b".to_string()),
            (ResourceId(3), "c".to_string()),
        ]);
        // Seeded order: oldest first.
        let ids: Vec<i64> = order.oldest_first().iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        order.touch(ResourceId(2));
        let ids: Vec<i64> = order.oldest_first().iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![1, 3, 2]);

        order.remove(ResourceId(1));
        let ids: Vec<i64> = order.oldest_first().iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(order.len(), 2);
    }
}
