//! Pipeline orchestrator.
//!
//! `ComplianceEngine` wires the PII engine, consent ledger, retention
//! ledger, and audit recorder behind two entry points: `process_data`
//! (the per-record pipeline) and `handle_rights_request` (data-subject
//! rights dispatch).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{
    AuditEvent, AuditEventType, AuditRecorder, AuditResult, AuditSink, InMemoryAuditSink,
};
use crate::config::ComplianceConfig;
use crate::consent::{
    ConsentLedger, ConsentRecord, ConsentRepository, ConsentRequest, ConsentValidation,
    InMemoryConsentRepository,
};
use crate::context::RequestContext;
use crate::error::{ComplianceError, Result};
use crate::pii::{PiiClassification, PiiEngine};
use crate::retention::{
    InMemoryRetentionRepository, RetentionLedger, RetentionRecord, RetentionRepository,
    RetentionScheduler,
};

/// Data-subject rights recognized by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataRightType {
    Access,
    Erasure,
    Rectification,
    Portability,
    WithdrawConsent,
    Restriction,
    Objection,
}

impl DataRightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Erasure => "erasure",
            Self::Rectification => "rectification",
            Self::Portability => "portability",
            Self::WithdrawConsent => "withdraw_consent",
            Self::Restriction => "restriction",
            Self::Objection => "objection",
        }
    }
}

impl FromStr for DataRightType {
    type Err = ComplianceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "access" => Ok(Self::Access),
            "erasure" => Ok(Self::Erasure),
            "rectification" => Ok(Self::Rectification),
            "portability" => Ok(Self::Portability),
            "withdraw_consent" => Ok(Self::WithdrawConsent),
            "restriction" => Ok(Self::Restriction),
            "objection" => Ok(Self::Objection),
            other => Err(ComplianceError::UnsupportedRightType {
                request_type: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRightRequest {
    pub id: Uuid,
    pub request_type: DataRightType,
    pub subject_id: String,
    /// Right-specific parameters (e.g. the purpose to withdraw, the
    /// corrected fields for rectification).
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub requested_at: DateTime<Utc>,
}

impl DataRightRequest {
    pub fn new(request_type: DataRightType, subject_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_type,
            subject_id: subject_id.into(),
            data: HashMap::new(),
            requested_at: Utc::now(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RightsRequestStatus {
    Completed,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRightResponse {
    pub request_id: Uuid,
    pub request_type: DataRightType,
    pub status: RightsRequestStatus,
    pub message: String,
    /// Exported payload for access/portability requests.
    pub data: Option<Value>,
    pub completed_at: DateTime<Utc>,
}

/// Result of one `process_data` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedData {
    pub data: HashMap<String, Value>,
    pub classifications: Vec<PiiClassification>,
    pub consent: Option<ConsentValidation>,
    pub retention_records: Vec<RetentionRecord>,
}

/// Snapshot of component state for health reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceStatus {
    pub enabled: bool,
    pub pii_enabled: bool,
    pub consent_enabled: bool,
    pub retention_enabled: bool,
    pub audit_enabled: bool,
    pub audit_events: usize,
    pub retention_policies: usize,
}

pub struct ComplianceEngine {
    config: ComplianceConfig,
    pii: PiiEngine,
    consent: ConsentLedger,
    retention: Arc<RetentionLedger>,
    audit: AuditRecorder,
    scheduler: Mutex<Option<RetentionScheduler>>,
}

impl ComplianceEngine {
    /// Build an engine over in-memory backends. Must be called from
    /// within a tokio runtime when the retention sweeper is enabled.
    pub fn new(config: ComplianceConfig) -> Result<Self> {
        Self::with_backends(
            config,
            Arc::new(InMemoryConsentRepository::new()),
            Arc::new(InMemoryRetentionRepository::new()),
            Arc::new(InMemoryAuditSink::new()),
        )
    }

    pub fn with_backends(
        config: ComplianceConfig,
        consent_repository: Arc<dyn ConsentRepository>,
        retention_repository: Arc<dyn RetentionRepository>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        config.validate()?;

        let pii = PiiEngine::new(config.pii.clone())?;
        let consent = ConsentLedger::new(
            config.consent.clone(),
            consent_repository,
            config.default_region.clone(),
        );
        let retention = Arc::new(RetentionLedger::new(
            config.retention.clone(),
            retention_repository,
        ));
        let audit = AuditRecorder::new(config.audit.clone(), audit_sink)?;

        let scheduler = if config.enabled && config.retention.enabled && config.retention.auto_delete
        {
            Some(RetentionScheduler::start(
                retention.clone(),
                config.retention.sweep_interval,
            ))
        } else {
            None
        };

        info!(
            enabled = config.enabled,
            region = %config.default_region,
            sweeper = scheduler.is_some(),
            "compliance engine initialized"
        );

        Ok(Self {
            config,
            pii,
            consent,
            retention,
            audit,
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Run one record through the pipeline: audit the attempt, check
    /// consent, classify and anonymize PII, open retention windows,
    /// audit the outcome. Returns the (possibly anonymized) record.
    pub async fn process_data(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        purpose: &str,
        data: HashMap<String, Value>,
    ) -> Result<ProcessedData> {
        if !self.config.enabled {
            return Ok(ProcessedData {
                data,
                classifications: Vec::new(),
                consent: None,
                retention_records: Vec::new(),
            });
        }

        ctx.check_deadline()?;
        if subject_id.trim().is_empty() {
            return Err(ComplianceError::validation("subject_id is required"));
        }
        if purpose.trim().is_empty() {
            return Err(ComplianceError::validation("purpose is required"));
        }

        self.audit_stage(ctx, subject_id, purpose, "attempt", AuditResult::Success, &data)
            .await;

        let consent = if self.config.consent.enabled {
            let validation = self.consent.validate(subject_id, purpose).await?;
            if !validation.valid {
                self.audit_stage(
                    ctx,
                    subject_id,
                    purpose,
                    "consent_denied",
                    AuditResult::Blocked,
                    &data,
                )
                .await;
                return Err(ComplianceError::ConsentDenied {
                    purpose: purpose.to_string(),
                });
            }
            Some(validation)
        } else {
            None
        };

        let mut data = data;
        let classifications = match self.pii.process_record(&mut data) {
            Ok(classifications) => classifications,
            Err(e) => {
                self.audit_stage(
                    ctx,
                    subject_id,
                    purpose,
                    "pii_error",
                    AuditResult::Failure,
                    &data,
                )
                .await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .audit
            .log_pii_detection(ctx, subject_id, &classifications)
            .await
        {
            warn!(subject_id, error = %e, "audit write failed");
        }

        // Retention bookkeeping is best-effort; a failure here must not
        // reject data the caller already has consent to process.
        let retention_records = if self.config.retention.enabled {
            match self.retention.apply_policy(ctx, subject_id, &data).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(subject_id, error = %e, "retention tracking failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        self.audit_stage(ctx, subject_id, purpose, "success", AuditResult::Success, &data)
            .await;

        Ok(ProcessedData {
            data,
            classifications,
            consent,
            retention_records,
        })
    }

    /// Record a consent grant or denial and audit it.
    pub async fn record_consent(
        &self,
        ctx: &RequestContext,
        request: ConsentRequest,
    ) -> Result<ConsentRecord> {
        let record = self.consent.record_consent(ctx, request).await?;
        if let Err(e) = self
            .audit
            .log_consent(
                ctx,
                AuditEventType::ConsentGranted,
                &record.subject_id,
                &record.purpose,
                Some(&record.legal_basis),
                if record.granted {
                    AuditResult::Success
                } else {
                    AuditResult::Blocked
                },
            )
            .await
        {
            warn!(subject_id = %record.subject_id, error = %e, "audit write failed");
        }
        Ok(record)
    }

    /// Dispatch a data-subject rights request.
    pub async fn handle_rights_request(
        &self,
        ctx: &RequestContext,
        request: DataRightRequest,
    ) -> Result<DataRightResponse> {
        if !self.config.enabled {
            return Err(ComplianceError::Disabled {
                subsystem: "compliance engine".to_string(),
            });
        }
        ctx.check_deadline()?;
        if request.subject_id.trim().is_empty() {
            return Err(ComplianceError::validation("subject_id is required"));
        }

        let outcome = match request.request_type {
            DataRightType::Access => self.handle_access(ctx, &request).await,
            DataRightType::Erasure => self.handle_erasure(ctx, &request).await,
            DataRightType::Rectification => self.handle_rectification(ctx, &request).await,
            DataRightType::Portability => self.handle_portability(ctx, &request).await,
            DataRightType::WithdrawConsent => self.handle_withdraw(ctx, &request).await,
            DataRightType::Restriction | DataRightType::Objection => {
                Err(ComplianceError::UnsupportedRightType {
                    request_type: request.request_type.as_str().to_string(),
                })
            }
        };

        let audit_result = match &outcome {
            Ok(response) if response.status == RightsRequestStatus::Partial => AuditResult::Partial,
            Ok(_) => AuditResult::Success,
            Err(_) => AuditResult::Failure,
        };
        let mut details = HashMap::new();
        details.insert("request_id".to_string(), json!(request.id.to_string()));
        if let Err(e) = &outcome {
            details.insert("error".to_string(), json!(e.to_string()));
        }
        if let Err(e) = self
            .audit
            .log_rights_request(
                ctx,
                request.request_type.as_str(),
                &request.subject_id,
                audit_result,
                details,
            )
            .await
        {
            warn!(subject_id = %request.subject_id, error = %e, "audit write failed");
        }

        outcome
    }

    async fn handle_access(
        &self,
        ctx: &RequestContext,
        request: &DataRightRequest,
    ) -> Result<DataRightResponse> {
        let consents = self.consent.all_consents(&request.subject_id).await?;
        let retention = self.retention.status(&request.subject_id).await?;
        self.audit_right_event(ctx, AuditEventType::DataAccess, &request.subject_id)
            .await;
        Ok(completed(
            request,
            "access report generated",
            Some(json!({
                "subject_id": request.subject_id,
                "consents": consents,
                "retention": retention,
            })),
        ))
    }

    /// Erasure honors legal holds: held subjects get a partial response
    /// instead of an error, and nothing is deleted.
    async fn handle_erasure(
        &self,
        ctx: &RequestContext,
        request: &DataRightRequest,
    ) -> Result<DataRightResponse> {
        if self.retention.has_legal_hold(&request.subject_id).await? {
            return Ok(DataRightResponse {
                request_id: request.id,
                request_type: request.request_type,
                status: RightsRequestStatus::Partial,
                message: "erasure deferred: subject data is under legal hold".to_string(),
                data: None,
                completed_at: Utc::now(),
            });
        }

        let consents = self.consent.erase(ctx, &request.subject_id).await?;
        let retention = self.retention.erase(ctx, &request.subject_id).await?;
        info!(
            subject_id = %request.subject_id,
            consents,
            retention,
            "subject data erased"
        );
        self.audit_right_event(ctx, AuditEventType::DataErasure, &request.subject_id)
            .await;
        Ok(completed(
            request,
            format!("erased {consents} consent and {retention} retention records"),
            None,
        ))
    }

    /// Corrected values go through the PII engine so the rectified
    /// record never re-introduces raw identifiers downstream.
    async fn handle_rectification(
        &self,
        ctx: &RequestContext,
        request: &DataRightRequest,
    ) -> Result<DataRightResponse> {
        if request.data.is_empty() {
            return Err(ComplianceError::validation(
                "rectification requires corrected fields in data",
            ));
        }
        let mut corrections = request.data.clone();
        let classifications = self.pii.process_record(&mut corrections)?;
        self.audit_right_event(ctx, AuditEventType::DataRectification, &request.subject_id)
            .await;
        Ok(completed(
            request,
            format!(
                "rectification recorded for {} field(s), {} classified as PII",
                request.data.len(),
                classifications.len()
            ),
            Some(json!({ "corrections": corrections })),
        ))
    }

    async fn handle_portability(
        &self,
        ctx: &RequestContext,
        request: &DataRightRequest,
    ) -> Result<DataRightResponse> {
        let consents = self.consent.all_consents(&request.subject_id).await?;
        self.audit_right_event(ctx, AuditEventType::DataExport, &request.subject_id)
            .await;
        Ok(completed(
            request,
            "portability export generated",
            Some(json!({
                "subject_id": request.subject_id,
                "format": "json",
                "consents": consents,
                "exported_at": Utc::now(),
            })),
        ))
    }

    /// Audit writes on the pipeline are best-effort: a sink failure is
    /// logged and never surfaces to the caller.
    async fn audit_stage(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        purpose: &str,
        stage: &str,
        result: AuditResult,
        data: &HashMap<String, Value>,
    ) {
        if let Err(e) = self
            .audit
            .log_data_processing(ctx, subject_id, purpose, stage, result, data)
            .await
        {
            warn!(subject_id, stage, error = %e, "audit write failed");
        }
    }

    async fn audit_right_event(
        &self,
        ctx: &RequestContext,
        event_type: AuditEventType,
        subject_id: &str,
    ) {
        let outcome = self
            .audit
            .log(
                ctx,
                AuditEvent {
                    id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    event_type,
                    result: AuditResult::Success,
                    subject_id: Some(subject_id.to_string()),
                    purpose: None,
                    legal_basis: None,
                    processing_type: None,
                    actor_id: None,
                    session_id: None,
                    ip_address: None,
                    user_agent: None,
                    data_hash: None,
                    details: HashMap::new(),
                    encrypted: false,
                },
            )
            .await;
        if let Err(e) = outcome {
            warn!(subject_id, event_type = ?event_type, error = %e, "audit write failed");
        }
    }

    async fn handle_withdraw(
        &self,
        ctx: &RequestContext,
        request: &DataRightRequest,
    ) -> Result<DataRightResponse> {
        let purpose = request
            .data
            .get("purpose")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                ComplianceError::validation("withdraw_consent requires a purpose in data")
            })?;

        let record = self.consent.withdraw(ctx, &request.subject_id, purpose).await?;
        if let Err(e) = self
            .audit
            .log_consent(
                ctx,
                AuditEventType::ConsentWithdrawn,
                &request.subject_id,
                purpose,
                Some(&record.legal_basis),
                AuditResult::Success,
            )
            .await
        {
            warn!(subject_id = %request.subject_id, error = %e, "audit write failed");
        }
        Ok(completed(
            request,
            format!("consent withdrawn for purpose: {}", record.purpose),
            None,
        ))
    }

    pub async fn compliance_status(&self) -> Result<ComplianceStatus> {
        Ok(ComplianceStatus {
            enabled: self.config.enabled,
            pii_enabled: self.config.pii.enabled,
            consent_enabled: self.config.consent.enabled,
            retention_enabled: self.config.retention.enabled,
            audit_enabled: self.config.audit.enabled,
            audit_events: self.audit.event_count().await?,
            retention_policies: self.retention.policies().len(),
        })
    }

    pub fn pii(&self) -> &PiiEngine {
        &self.pii
    }

    pub fn consent(&self) -> &ConsentLedger {
        &self.consent
    }

    pub fn retention(&self) -> &RetentionLedger {
        &self.retention
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    /// Stop the background sweeper, if one is running.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.shutdown().await?;
        }
        Ok(())
    }
}

fn completed(
    request: &DataRightRequest,
    message: impl Into<String>,
    data: Option<Value>,
) -> DataRightResponse {
    DataRightResponse {
        request_id: request.id,
        request_type: request.request_type,
        status: RightsRequestStatus::Completed,
        message: message.into(),
        data,
        completed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::consent::legal_basis;
    use async_trait::async_trait;

    struct FailingAuditSink;

    #[async_trait]
    impl AuditSink for FailingAuditSink {
        async fn append(&self, _event: AuditEvent) -> Result<()> {
            Err(ComplianceError::Audit {
                message: "sink unavailable".to_string(),
            })
        }

        async fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
            Err(ComplianceError::Audit {
                message: "sink unavailable".to_string(),
            })
        }

        async fn count(&self) -> Result<usize> {
            Err(ComplianceError::Audit {
                message: "sink unavailable".to_string(),
            })
        }
    }

    fn engine_with_failing_audit() -> ComplianceEngine {
        let mut config = ComplianceConfig::default();
        config.retention.auto_delete = false;
        ComplianceEngine::with_backends(
            config,
            Arc::new(InMemoryConsentRepository::new()),
            Arc::new(InMemoryRetentionRepository::new()),
            Arc::new(FailingAuditSink),
        )
        .unwrap()
    }

    fn engine() -> ComplianceEngine {
        let mut config = ComplianceConfig::default();
        // Keep unit tests free of background tasks.
        config.retention.auto_delete = false;
        ComplianceEngine::with_backends(
            config,
            Arc::new(InMemoryConsentRepository::new()),
            Arc::new(InMemoryRetentionRepository::new()),
            Arc::new(InMemoryAuditSink::new()),
        )
        .unwrap()
    }

    fn grant(subject: &str, purpose: &str) -> ConsentRequest {
        ConsentRequest::grant(subject, purpose, legal_basis::CONSENT)
    }

    #[tokio::test]
    async fn test_process_without_consent_denied() {
        let engine = engine();
        let ctx = RequestContext::new();
        let mut data = HashMap::new();
        data.insert("email".to_string(), json!("user@example.com"));

        let err = engine
            .process_data(&ctx, "u1", "marketing", data)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no valid consent for purpose: marketing");
    }

    #[tokio::test]
    async fn test_unsupported_rights_rejected() {
        let engine = engine();
        let ctx = RequestContext::new();
        let err = engine
            .handle_rights_request(&ctx, DataRightRequest::new(DataRightType::Restriction, "u1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported data right type: restriction");
    }

    #[tokio::test]
    async fn test_withdraw_requires_purpose() {
        let engine = engine();
        let ctx = RequestContext::new();
        engine.record_consent(&ctx, grant("u1", "marketing")).await.unwrap();

        let err = engine
            .handle_rights_request(
                &ctx,
                DataRightRequest::new(DataRightType::WithdrawConsent, "u1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ComplianceError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_audit_sink_failure_does_not_block_pipeline() {
        let engine = engine_with_failing_audit();
        let ctx = RequestContext::new();
        engine.record_consent(&ctx, grant("u1", "analytics")).await.unwrap();

        let mut data = HashMap::new();
        data.insert("email".to_string(), json!("user@example.com"));
        let processed = engine
            .process_data(&ctx, "u1", "analytics", data)
            .await
            .unwrap();
        assert_eq!(processed.data["email"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_consent_denial_survives_audit_sink_failure() {
        let engine = engine_with_failing_audit();
        let mut data = HashMap::new();
        data.insert("email".to_string(), json!("user@example.com"));

        let err = engine
            .process_data(&RequestContext::new(), "u1", "marketing", data)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no valid consent for purpose: marketing");
    }

    #[tokio::test]
    async fn test_rights_dispatch_survives_audit_sink_failure() {
        let engine = engine_with_failing_audit();
        let ctx = RequestContext::new();
        engine.record_consent(&ctx, grant("u1", "marketing")).await.unwrap();

        let response = engine
            .handle_rights_request(
                &ctx,
                DataRightRequest::new(DataRightType::WithdrawConsent, "u1")
                    .with_data("purpose", json!("marketing")),
            )
            .await
            .unwrap();
        assert_eq!(response.status, RightsRequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_disabled_engine_passes_data_through() {
        let mut config = ComplianceConfig::default();
        config.enabled = false;
        config.retention.auto_delete = false;
        let engine = ComplianceEngine::new(config).unwrap();

        let mut data = HashMap::new();
        data.insert("email".to_string(), json!("user@example.com"));
        let processed = engine
            .process_data(&RequestContext::new(), "u1", "marketing", data)
            .await
            .unwrap();
        assert_eq!(processed.data["email"], json!("user@example.com"));
        assert!(processed.classifications.is_empty());
    }
}
