//! Consent ledger.
//!
//! Tracks per-(subject, purpose) consent as an append-only history with
//! a current, versioned record. Validation never mutates state: an
//! expired grant stays stored as granted and is reported as expired at
//! read time.

pub mod repository;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{duration_secs_opt, ConsentConfig};
use crate::context::RequestContext;
use crate::error::{ComplianceError, Result};

pub use repository::{ConsentEntry, ConsentRepository, InMemoryConsentRepository};

/// Recognized legal bases for processing.
pub mod legal_basis {
    pub const CONSENT: &str = "consent";
    pub const CONTRACT: &str = "contract";
    pub const LEGAL_OBLIGATION: &str = "legal_obligation";
    pub const VITAL_INTERESTS: &str = "vital_interests";
    pub const PUBLIC_TASK: &str = "public_task";
    pub const LEGITIMATE_INTERESTS: &str = "legitimate_interests";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentSource {
    Web,
    Mobile,
    Api,
    Phone,
    Email,
    Paper,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Granted,
    NotGranted,
    Withdrawn,
    Expired,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub id: Uuid,
    pub subject_id: String,
    pub purpose: String,
    pub granted: bool,
    pub legal_basis: String,
    pub source: ConsentSource,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub consent_string: Option<String>,
    /// Monotonic counter, incremented on every mutation of the slot.
    pub version: u32,
    pub region: String,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-facing grant/deny request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub subject_id: String,
    pub purpose: String,
    pub granted: bool,
    pub legal_basis: String,
    #[serde(default = "default_source")]
    pub source: ConsentSource,
    /// Explicit validity window in days; falls back to the configured
    /// TTL when absent.
    #[serde(default)]
    pub expiration_days: Option<i64>,
    #[serde(default)]
    pub consent_string: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ConsentRequest {
    pub fn grant(
        subject_id: impl Into<String>,
        purpose: impl Into<String>,
        legal_basis: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            purpose: purpose.into(),
            granted: true,
            legal_basis: legal_basis.into(),
            source: ConsentSource::Api,
            expiration_days: None,
            consent_string: None,
            region: None,
            metadata: HashMap::new(),
        }
    }
}

fn default_source() -> ConsentSource {
    ConsentSource::Api
}

/// Outcome of a read-time consent check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentValidation {
    pub valid: bool,
    pub status: ConsentStatus,
    pub reason: String,
    #[serde(with = "duration_secs_opt", default)]
    pub remaining_ttl: Option<Duration>,
    pub record: Option<ConsentRecord>,
}

impl ConsentValidation {
    fn invalid(status: ConsentStatus, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            status,
            reason: reason.into(),
            remaining_ttl: None,
            record: None,
        }
    }
}

/// Consent ledger with per-(subject, purpose) write serialization.
pub struct ConsentLedger {
    config: ConsentConfig,
    repository: Arc<dyn ConsentRepository>,
    default_region: String,
    // Serializes read-modify-write per slot; the repository itself only
    // guarantees per-call atomicity.
    write_locks: dashmap::DashMap<String, Arc<Mutex<()>>>,
}

impl ConsentLedger {
    pub fn new(
        config: ConsentConfig,
        repository: Arc<dyn ConsentRepository>,
        default_region: impl Into<String>,
    ) -> Self {
        Self {
            config,
            repository,
            default_region: default_region.into(),
            write_locks: dashmap::DashMap::new(),
        }
    }

    fn lock_for(&self, subject_id: &str, purpose: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(format!("{subject_id}:{purpose}"))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record a grant or denial. Appends a new history entry carrying
    /// the next version for the slot; a re-grant supersedes any earlier
    /// withdrawal.
    pub async fn record_consent(
        &self,
        ctx: &RequestContext,
        request: ConsentRequest,
    ) -> Result<ConsentRecord> {
        self.ensure_enabled()?;
        ctx.check_deadline()?;
        validate_request(&request)?;

        let now = Utc::now();
        let expires_at = match request.expiration_days {
            Some(days) => Some(now + Duration::days(days)),
            None if self.config.ttl > Duration::zero() => Some(now + self.config.ttl),
            None => None,
        };

        let lock = self.lock_for(&request.subject_id, &request.purpose);
        let _guard = lock.lock().await;

        let previous = self
            .repository
            .get(&request.subject_id, &request.purpose)
            .await?;
        let (version, created_at) = match &previous {
            Some(prev) => (prev.version + 1, prev.created_at),
            None => (1, now),
        };

        let record = ConsentRecord {
            id: Uuid::new_v4(),
            subject_id: request.subject_id.clone(),
            purpose: request.purpose.clone(),
            granted: request.granted,
            legal_basis: request.legal_basis,
            source: request.source,
            granted_at: now,
            expires_at,
            withdrawn_at: None,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            consent_string: request.consent_string,
            version,
            region: request
                .region
                .unwrap_or_else(|| self.default_region.clone()),
            metadata: request.metadata,
            created_at,
            updated_at: now,
        };

        self.repository.store(record.clone()).await?;

        info!(
            subject_id = %record.subject_id,
            purpose = %record.purpose,
            granted = record.granted,
            version = record.version,
            "consent recorded"
        );
        Ok(record)
    }

    /// Read-time validity check. Status resolution order: missing slot,
    /// explicit denial, withdrawal, expiry, then valid.
    pub async fn validate(&self, subject_id: &str, purpose: &str) -> Result<ConsentValidation> {
        self.ensure_enabled()?;

        let Some(record) = self.repository.get(subject_id, purpose).await? else {
            return Ok(ConsentValidation::invalid(
                ConsentStatus::NotFound,
                "no consent record",
            ));
        };

        if !record.granted {
            return Ok(ConsentValidation {
                record: Some(record),
                ..ConsentValidation::invalid(ConsentStatus::NotGranted, "consent was denied")
            });
        }
        if record.withdrawn_at.is_some() {
            return Ok(ConsentValidation {
                record: Some(record),
                ..ConsentValidation::invalid(ConsentStatus::Withdrawn, "consent was withdrawn")
            });
        }
        let now = Utc::now();
        if let Some(expires_at) = record.expires_at {
            if now > expires_at {
                return Ok(ConsentValidation {
                    record: Some(record),
                    ..ConsentValidation::invalid(ConsentStatus::Expired, "consent expired")
                });
            }
        }

        Ok(ConsentValidation {
            valid: true,
            status: ConsentStatus::Granted,
            reason: "valid consent".to_string(),
            remaining_ttl: record.expires_at.map(|at| at - now),
            record: Some(record),
        })
    }

    /// Convenience wrapper over [`validate`](Self::validate).
    pub async fn has_valid_consent(&self, subject_id: &str, purpose: &str) -> Result<bool> {
        Ok(self.validate(subject_id, purpose).await?.valid)
    }

    /// Validate and fail with `ConsentDenied` unless currently valid.
    pub async fn require_valid(&self, subject_id: &str, purpose: &str) -> Result<ConsentRecord> {
        let validation = self.validate(subject_id, purpose).await?;
        match validation.record {
            Some(record) if validation.valid => Ok(record),
            _ => Err(ComplianceError::ConsentDenied {
                purpose: purpose.to_string(),
            }),
        }
    }

    /// Withdraw the current grant for a purpose.
    pub async fn withdraw(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        purpose: &str,
    ) -> Result<ConsentRecord> {
        self.ensure_enabled()?;
        ctx.check_deadline()?;

        let lock = self.lock_for(subject_id, purpose);
        let _guard = lock.lock().await;

        let Some(mut record) = self.repository.get(subject_id, purpose).await? else {
            return Err(ComplianceError::not_found(
                "consent",
                format!("{subject_id}:{purpose}"),
            ));
        };

        record.withdrawn_at = Some(Utc::now());
        record.updated_at = Utc::now();
        record.version += 1;
        self.repository.update(record.clone()).await?;

        info!(subject_id, purpose, version = record.version, "consent withdrawn");
        Ok(record)
    }

    /// Full append-only history for a (subject, purpose).
    pub async fn history(&self, subject_id: &str, purpose: &str) -> Result<Vec<ConsentRecord>> {
        self.ensure_enabled()?;
        self.repository.history(subject_id, purpose).await
    }

    /// Current records across all purposes for a subject.
    pub async fn all_consents(&self, subject_id: &str) -> Result<Vec<ConsentRecord>> {
        self.ensure_enabled()?;
        self.repository.get_all(subject_id).await
    }

    /// Remove every consent record for a subject (erasure support).
    pub async fn erase(&self, ctx: &RequestContext, subject_id: &str) -> Result<usize> {
        self.ensure_enabled()?;
        ctx.check_deadline()?;
        let removed = self.repository.delete_subject(subject_id).await?;
        debug!(subject_id, removed, "consent records erased");
        Ok(removed)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if !self.config.enabled {
            return Err(ComplianceError::Disabled {
                subsystem: "consent ledger".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_request(request: &ConsentRequest) -> Result<()> {
    if request.subject_id.trim().is_empty() {
        return Err(ComplianceError::validation("subject_id is required"));
    }
    if request.purpose.trim().is_empty() {
        return Err(ComplianceError::validation("purpose is required"));
    }
    if request.legal_basis.trim().is_empty() {
        return Err(ComplianceError::validation("legal_basis is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> ConsentLedger {
        ConsentLedger::new(
            ConsentConfig::default(),
            Arc::new(InMemoryConsentRepository::new()),
            "BR",
        )
    }

    fn grant_request(subject: &str, purpose: &str) -> ConsentRequest {
        ConsentRequest::grant(subject, purpose, legal_basis::CONSENT)
    }

    #[tokio::test]
    async fn test_grant_then_validate() {
        let ledger = ledger();
        let ctx = RequestContext::new();
        let record = ledger
            .record_consent(&ctx, grant_request("u1", "marketing"))
            .await
            .unwrap();
        assert_eq!(record.version, 1);

        let validation = ledger.validate("u1", "marketing").await.unwrap();
        assert!(validation.valid);
        assert_eq!(validation.status, ConsentStatus::Granted);
        assert!(validation.remaining_ttl.unwrap() > Duration::zero());
    }

    #[tokio::test]
    async fn test_missing_legal_basis_rejected() {
        let ledger = ledger();
        let mut request = grant_request("u1", "marketing");
        request.legal_basis = String::new();
        let err = ledger
            .record_consent(&RequestContext::new(), request)
            .await
            .unwrap_err();
        assert!(matches!(err, ComplianceError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_validate_unknown_subject_is_not_found() {
        let validation = ledger().validate("ghost", "marketing").await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.status, ConsentStatus::NotFound);
    }

    #[tokio::test]
    async fn test_denial_takes_priority_over_expiry() {
        let ledger = ledger();
        let mut request = grant_request("u1", "marketing");
        request.granted = false;
        request.expiration_days = Some(-1);
        ledger
            .record_consent(&RequestContext::new(), request)
            .await
            .unwrap();

        let validation = ledger.validate("u1", "marketing").await.unwrap();
        assert_eq!(validation.status, ConsentStatus::NotGranted);
    }

    #[tokio::test]
    async fn test_withdraw_invalidates_consent() {
        let ledger = ledger();
        let ctx = RequestContext::new();
        ledger
            .record_consent(&ctx, grant_request("u1", "marketing"))
            .await
            .unwrap();
        let withdrawn = ledger.withdraw(&ctx, "u1", "marketing").await.unwrap();
        assert_eq!(withdrawn.version, 2);

        let validation = ledger.validate("u1", "marketing").await.unwrap();
        assert_eq!(validation.status, ConsentStatus::Withdrawn);
        assert!(!ledger.has_valid_consent("u1", "marketing").await.unwrap());

        let err = ledger.require_valid("u1", "marketing").await.unwrap_err();
        assert_eq!(err.to_string(), "no valid consent for purpose: marketing");
    }

    #[tokio::test]
    async fn test_regrant_clears_withdrawal_and_bumps_version() {
        let ledger = ledger();
        let ctx = RequestContext::new();
        ledger
            .record_consent(&ctx, grant_request("u1", "marketing"))
            .await
            .unwrap();
        ledger.withdraw(&ctx, "u1", "marketing").await.unwrap();

        let regrant = ledger
            .record_consent(&ctx, grant_request("u1", "marketing"))
            .await
            .unwrap();
        assert_eq!(regrant.version, 3);
        assert!(regrant.withdrawn_at.is_none());
        assert!(ledger.has_valid_consent("u1", "marketing").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_grant_reported_without_mutation() {
        let ledger = ledger();
        let ctx = RequestContext::new();
        let mut request = grant_request("u1", "marketing");
        request.expiration_days = Some(-1);
        ledger.record_consent(&ctx, request).await.unwrap();

        let validation = ledger.validate("u1", "marketing").await.unwrap();
        assert_eq!(validation.status, ConsentStatus::Expired);

        // Stored record keeps its granted flag; expiry is a read-time
        // judgement only.
        let history = ledger.history("u1", "marketing").await.unwrap();
        assert!(history[0].granted);
    }

    #[tokio::test]
    async fn test_regrant_appends_history() {
        let ledger = ledger();
        let ctx = RequestContext::new();
        ledger
            .record_consent(&ctx, grant_request("u1", "marketing"))
            .await
            .unwrap();
        ledger
            .record_consent(&ctx, grant_request("u1", "marketing"))
            .await
            .unwrap();

        let history = ledger.history("u1", "marketing").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].version, 2);
    }

    #[tokio::test]
    async fn test_context_actor_fields_captured() {
        let ledger = ledger();
        let ctx = RequestContext::new()
            .with_ip_address("10.0.0.1")
            .with_user_agent("test-agent");
        let record = ledger
            .record_consent(&ctx, grant_request("u1", "marketing"))
            .await
            .unwrap();
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.user_agent.as_deref(), Some("test-agent"));
    }

    #[tokio::test]
    async fn test_withdraw_missing_record_is_not_found() {
        let err = ledger()
            .withdraw(&RequestContext::new(), "ghost", "marketing")
            .await
            .unwrap_err();
        assert!(matches!(err, ComplianceError::NotFound { .. }));
    }
}
