//! Consent storage.
//!
//! The ledger talks to storage through `ConsentRepository` so the
//! in-memory map can be swapped for a durable backend without touching
//! validation logic.

use async_trait::async_trait;
use dashmap::DashMap;

use super::ConsentRecord;
use crate::error::Result;

/// One (subject, purpose) slot: the current record plus every record
/// ever stored for the pair, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ConsentEntry {
    pub current: Option<ConsentRecord>,
    pub history: Vec<ConsentRecord>,
}

#[async_trait]
pub trait ConsentRepository: Send + Sync {
    /// Append a record as the new current state for its (subject, purpose).
    async fn store(&self, record: ConsentRecord) -> Result<()>;

    /// Current record for a (subject, purpose), if any.
    async fn get(&self, subject_id: &str, purpose: &str) -> Result<Option<ConsentRecord>>;

    /// Current records across all purposes for a subject.
    async fn get_all(&self, subject_id: &str) -> Result<Vec<ConsentRecord>>;

    /// Full append-only history for a (subject, purpose).
    async fn history(&self, subject_id: &str, purpose: &str) -> Result<Vec<ConsentRecord>>;

    /// Replace the current record in place without extending history.
    async fn update(&self, record: ConsentRecord) -> Result<()>;

    /// Remove every record for a subject. Returns how many purposes
    /// were cleared.
    async fn delete_subject(&self, subject_id: &str) -> Result<usize>;
}

fn slot_key(subject_id: &str, purpose: &str) -> String {
    format!("{subject_id}:{purpose}")
}

/// DashMap-backed repository keyed by `subject:purpose`.
#[derive(Debug, Default)]
pub struct InMemoryConsentRepository {
    entries: DashMap<String, ConsentEntry>,
}

impl InMemoryConsentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentRepository for InMemoryConsentRepository {
    async fn store(&self, record: ConsentRecord) -> Result<()> {
        let key = slot_key(&record.subject_id, &record.purpose);
        let mut entry = self.entries.entry(key).or_default();
        entry.history.push(record.clone());
        entry.current = Some(record);
        Ok(())
    }

    async fn get(&self, subject_id: &str, purpose: &str) -> Result<Option<ConsentRecord>> {
        Ok(self
            .entries
            .get(&slot_key(subject_id, purpose))
            .and_then(|e| e.current.clone()))
    }

    async fn get_all(&self, subject_id: &str) -> Result<Vec<ConsentRecord>> {
        let prefix = format!("{subject_id}:");
        let mut records: Vec<ConsentRecord> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .filter_map(|e| e.value().current.clone())
            .collect();
        records.sort_by(|a, b| a.purpose.cmp(&b.purpose));
        Ok(records)
    }

    async fn history(&self, subject_id: &str, purpose: &str) -> Result<Vec<ConsentRecord>> {
        Ok(self
            .entries
            .get(&slot_key(subject_id, purpose))
            .map(|e| e.history.clone())
            .unwrap_or_default())
    }

    async fn update(&self, record: ConsentRecord) -> Result<()> {
        let key = slot_key(&record.subject_id, &record.purpose);
        let mut entry = self.entries.entry(key).or_default();
        if let Some(last) = entry.history.last_mut() {
            *last = record.clone();
        }
        entry.current = Some(record);
        Ok(())
    }

    async fn delete_subject(&self, subject_id: &str) -> Result<usize> {
        let prefix = format!("{subject_id}:");
        let keys: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(&prefix))
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
