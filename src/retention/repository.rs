//! Retention record storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{RetentionRecord, RetentionStatus};
use crate::error::{ComplianceError, Result};

#[async_trait]
pub trait RetentionRepository: Send + Sync {
    async fn store(&self, record: RetentionRecord) -> Result<()>;

    /// Replace an existing record by id.
    async fn update(&self, record: RetentionRecord) -> Result<()>;

    async fn for_subject(&self, subject_id: &str) -> Result<Vec<RetentionRecord>>;

    /// Records whose retention window has ended and that are still
    /// awaiting disposition.
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<RetentionRecord>>;

    /// Remove every record for a subject. Returns how many were removed.
    async fn delete_subject(&self, subject_id: &str) -> Result<usize>;
}

/// DashMap-backed repository keyed by subject id.
#[derive(Debug, Default)]
pub struct InMemoryRetentionRepository {
    records: DashMap<String, Vec<RetentionRecord>>,
}

impl InMemoryRetentionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetentionRepository for InMemoryRetentionRepository {
    async fn store(&self, record: RetentionRecord) -> Result<()> {
        self.records
            .entry(record.subject_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn update(&self, record: RetentionRecord) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(&record.subject_id)
            .ok_or_else(|| not_found(record.id))?;
        let slot = entry
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| not_found(record.id))?;
        *slot = record;
        Ok(())
    }

    async fn for_subject(&self, subject_id: &str) -> Result<Vec<RetentionRecord>> {
        Ok(self
            .records
            .get(subject_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<RetentionRecord>> {
        Ok(self
            .records
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|r| {
                matches!(
                    r.status,
                    RetentionStatus::Active | RetentionStatus::Extended | RetentionStatus::OnHold
                ) && now > r.retention_end
            })
            .collect())
    }

    async fn delete_subject(&self, subject_id: &str) -> Result<usize> {
        Ok(self
            .records
            .remove(subject_id)
            .map(|(_, records)| records.len())
            .unwrap_or(0))
    }
}

fn not_found(id: Uuid) -> ComplianceError {
    ComplianceError::not_found("retention record", id.to_string())
}
