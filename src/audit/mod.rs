//! Audit trail recorder.
//!
//! Every compliance-relevant action becomes an immutable `AuditEvent`
//! appended to a sink. Event details can be sealed with an AEAD cipher
//! so the trail itself never leaks the data it describes; a sealing
//! failure degrades to an unencrypted event rather than losing the
//! trail entry.

pub mod crypto;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AuditConfig, DetailLevel};
use crate::context::RequestContext;
use crate::error::{ComplianceError, Result};
use crate::pii::PiiClassification;

pub use crypto::AuditCipher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    DataProcessing,
    ConsentGranted,
    ConsentWithdrawn,
    DataAccess,
    DataExport,
    DataErasure,
    DataRectification,
    RightsRequest,
    PiiDetected,
    DataAnonymized,
    RetentionApplied,
    SecurityIncident,
    ComplianceCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Partial,
    Blocked,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub result: AuditResult,
    pub subject_id: Option<String>,
    pub purpose: Option<String>,
    pub legal_basis: Option<String>,
    /// Processing stage or operation name, free-form.
    pub processing_type: Option<String>,
    pub actor_id: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// SHA-256 over the canonical JSON of the processed data, when the
    /// event describes a concrete payload.
    pub data_hash: Option<String>,
    pub details: HashMap<String, Value>,
    pub encrypted: bool,
}

/// Query filter; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<AuditEventType>,
    pub result: Option<AuditResult>,
    pub subject_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        if self.event_type.is_some_and(|t| t != event.event_type) {
            return false;
        }
        if self.result.is_some_and(|r| r != event.result) {
            return false;
        }
        if let Some(subject) = &self.subject_id {
            if event.subject_id.as_deref() != Some(subject.as_str()) {
                return false;
            }
        }
        if self.since.is_some_and(|s| event.timestamp < s) {
            return false;
        }
        if self.until.is_some_and(|u| event.timestamp > u) {
            return false;
        }
        true
    }
}

/// Append-only destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<()>;
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>>;
    async fn count(&self) -> Result<usize>;
}

/// In-memory sink; events are kept in emission order.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let events = self.events.read().await;
        let matched = events
            .iter()
            .filter(|e| filter.matches(e))
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matched)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.events.read().await.len())
    }
}

/// Audit recorder: enriches, seals, logs, and persists events.
pub struct AuditRecorder {
    config: AuditConfig,
    sink: Arc<dyn AuditSink>,
    cipher: Option<AuditCipher>,
}

impl AuditRecorder {
    /// Fails at construction when encryption is enabled but the key
    /// material is missing or malformed.
    pub fn new(config: AuditConfig, sink: Arc<dyn AuditSink>) -> Result<Self> {
        let cipher = if config.enabled && config.encryption_enabled {
            let material =
                config
                    .encryption_key
                    .as_deref()
                    .ok_or_else(|| ComplianceError::Config {
                        message: "audit encryption enabled without AUDIT_ENCRYPTION_KEY"
                            .to_string(),
                    })?;
            Some(AuditCipher::from_key_material(material)?)
        } else {
            None
        };

        Ok(Self {
            config,
            sink,
            cipher,
        })
    }

    /// Record one event: enrich with context, seal details, emit to the
    /// operational log at the configured detail level, and append to
    /// the sink.
    pub async fn log(&self, ctx: &RequestContext, mut event: AuditEvent) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        event.actor_id = event.actor_id.or_else(|| ctx.user_id.clone());
        event.session_id = event.session_id.or_else(|| ctx.session_id.clone());
        event.ip_address = event.ip_address.or_else(|| ctx.ip_address.clone());
        event.user_agent = event.user_agent.or_else(|| ctx.user_agent.clone());

        if !event.details.is_empty() {
            event.details = sanitize_details(event.details);
            if let Some(cipher) = &self.cipher {
                match seal_details(cipher, &event.details) {
                    Ok(sealed) => {
                        event.details = sealed;
                        event.encrypted = true;
                    }
                    Err(e) => {
                        // Keep the trail entry; losing it is worse than
                        // storing it unsealed.
                        warn!(error = %e, "audit detail encryption failed");
                    }
                }
            }
        }

        self.emit(&event);
        self.sink.append(event).await
    }

    fn emit(&self, event: &AuditEvent) {
        match self.config.detail_level {
            DetailLevel::Minimal => info!(
                target: "consentry::audit",
                event_id = %event.id,
                event_type = ?event.event_type,
                subject_id = event.subject_id.as_deref().unwrap_or("-"),
                result = ?event.result,
                "audit"
            ),
            DetailLevel::Standard => info!(
                target: "consentry::audit",
                event_type = ?event.event_type,
                result = ?event.result,
                subject_id = event.subject_id.as_deref().unwrap_or("-"),
                purpose = event.purpose.as_deref().unwrap_or("-"),
                actor_id = event.actor_id.as_deref().unwrap_or("-"),
                "audit"
            ),
            DetailLevel::Full => info!(
                target: "consentry::audit",
                event_type = ?event.event_type,
                result = ?event.result,
                subject_id = event.subject_id.as_deref().unwrap_or("-"),
                purpose = event.purpose.as_deref().unwrap_or("-"),
                actor_id = event.actor_id.as_deref().unwrap_or("-"),
                processing_type = event.processing_type.as_deref().unwrap_or("-"),
                data_hash = event.data_hash.as_deref().unwrap_or("-"),
                encrypted = event.encrypted,
                "audit"
            ),
        }
    }

    /// Record a pipeline stage for one data-processing call.
    pub async fn log_data_processing(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        purpose: &str,
        stage: &str,
        result: AuditResult,
        data: &HashMap<String, Value>,
    ) -> Result<()> {
        let mut details = HashMap::new();
        if self.config.detail_level == DetailLevel::Full {
            details.insert("field_count".to_string(), Value::from(data.len()));
            let mut fields: Vec<&str> = data.keys().map(String::as_str).collect();
            fields.sort_unstable();
            details.insert("fields".to_string(), Value::from(fields.join(",")));
        }

        self.log(
            ctx,
            AuditEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                event_type: AuditEventType::DataProcessing,
                result,
                subject_id: Some(subject_id.to_string()),
                purpose: Some(purpose.to_string()),
                legal_basis: None,
                processing_type: Some(stage.to_string()),
                actor_id: None,
                session_id: None,
                ip_address: None,
                user_agent: None,
                data_hash: Some(hash_data(data)),
                details,
                encrypted: false,
            },
        )
        .await
    }

    pub async fn log_consent(
        &self,
        ctx: &RequestContext,
        event_type: AuditEventType,
        subject_id: &str,
        purpose: &str,
        legal_basis: Option<&str>,
        result: AuditResult,
    ) -> Result<()> {
        self.log(
            ctx,
            AuditEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                event_type,
                result,
                subject_id: Some(subject_id.to_string()),
                purpose: Some(purpose.to_string()),
                legal_basis: legal_basis.map(str::to_string),
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
        .await
    }

    pub async fn log_rights_request(
        &self,
        ctx: &RequestContext,
        request_type: &str,
        subject_id: &str,
        result: AuditResult,
        details: HashMap<String, Value>,
    ) -> Result<()> {
        self.log(
            ctx,
            AuditEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                event_type: AuditEventType::RightsRequest,
                result,
                subject_id: Some(subject_id.to_string()),
                purpose: None,
                legal_basis: None,
                processing_type: Some(request_type.to_string()),
                actor_id: None,
                session_id: None,
                ip_address: None,
                user_agent: None,
                data_hash: None,
                details,
                encrypted: false,
            },
        )
        .await
    }

    pub async fn log_pii_detection(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        classifications: &[PiiClassification],
    ) -> Result<()> {
        if classifications.is_empty() {
            return Ok(());
        }
        let mut details = HashMap::new();
        details.insert(
            "classifications".to_string(),
            serde_json::to_value(classifications).unwrap_or(Value::Null),
        );

        self.log(
            ctx,
            AuditEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                event_type: AuditEventType::PiiDetected,
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
                details,
                encrypted: false,
            },
        )
        .await
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        self.sink.query(filter).await
    }

    pub async fn event_count(&self) -> Result<usize> {
        self.sink.count().await
    }

    /// Recover the plaintext details of a sealed event.
    pub fn decrypt_details(&self, event: &AuditEvent) -> Result<HashMap<String, Value>> {
        if !event.encrypted {
            return Ok(event.details.clone());
        }
        let cipher = self.cipher.as_ref().ok_or_else(|| ComplianceError::Crypto {
            message: "no cipher configured for encrypted event".to_string(),
        })?;
        let sealed = event
            .details
            .get("encrypted_data")
            .and_then(Value::as_str)
            .ok_or_else(|| ComplianceError::Audit {
                message: "encrypted event missing encrypted_data".to_string(),
            })?;
        let plaintext = cipher.open(sealed)?;
        serde_json::from_slice(&plaintext).map_err(|e| ComplianceError::Audit {
            message: format!("sealed details are not valid JSON: {e}"),
        })
    }
}

fn seal_details(
    cipher: &AuditCipher,
    details: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let plaintext = serde_json::to_vec(details).map_err(|e| ComplianceError::Audit {
        message: format!("details serialization failed: {e}"),
    })?;
    let sealed = cipher.seal(&plaintext)?;
    let mut wrapped = HashMap::new();
    wrapped.insert("encrypted_data".to_string(), Value::String(sealed));
    Ok(wrapped)
}

/// Drop detail keys that look like credentials before anything is
/// stored or logged.
fn sanitize_details(details: HashMap<String, Value>) -> HashMap<String, Value> {
    const BLOCKED: [&str; 4] = ["password", "secret", "token", "api_key"];
    details
        .into_iter()
        .filter(|(k, _)| {
            let lower = k.to_lowercase();
            !BLOCKED.iter().any(|b| lower.contains(b))
        })
        .collect()
}

/// Stable digest of a record: fields are hashed in sorted key order.
fn hash_data(data: &HashMap<String, Value>) -> String {
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort();
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(data[key].to_string().as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}
