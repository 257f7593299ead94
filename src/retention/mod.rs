//! Retention ledger and sweep scheduler.
//!
//! Policies describe how long each data category lives; records track
//! concrete (subject, policy) retention windows. The sweep walks
//! expired records and applies the policy action, skipping anything
//! under legal hold or still inside its grace window.

pub mod repository;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{duration_secs, duration_secs_opt, RetentionConfig};
use crate::context::RequestContext;
use crate::error::{ComplianceError, Result};

pub use repository::{InMemoryRetentionRepository, RetentionRepository};
pub use scheduler::RetentionScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionAction {
    Delete,
    Archive,
    Anonymize,
    Notify,
    Review,
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStatus {
    Active,
    Extended,
    OnHold,
    Expired,
    Processing,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Data category this policy governs.
    pub category: String,
    #[serde(with = "duration_secs")]
    pub retention_period: Duration,
    /// Extra window after expiry during which the sweep holds off.
    #[serde(with = "duration_secs_opt", default)]
    pub grace_period: Option<Duration>,
    pub action: RetentionAction,
    /// Higher-priority policies are applied first.
    pub priority: u32,
    pub legal_basis: Option<String>,
    pub jurisdictions: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionExtension {
    pub reason: String,
    #[serde(with = "duration_secs")]
    pub extend_by: Duration,
    pub approved_by: String,
    pub extended_at: DateTime<Utc>,
    /// Retention end after this extension was applied.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionRecord {
    pub id: Uuid,
    pub subject_id: String,
    pub policy_id: String,
    pub category: String,
    pub action: RetentionAction,
    pub created_at: DateTime<Utc>,
    pub retention_end: DateTime<Utc>,
    pub grace_end: Option<DateTime<Utc>>,
    pub status: RetentionStatus,
    pub legal_hold: bool,
    pub legal_hold_reason: Option<String>,
    pub action_taken_at: Option<DateTime<Utc>>,
    pub extensions: Vec<RetentionExtension>,
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub processed: usize,
    pub skipped_hold: usize,
    pub skipped_grace: usize,
    pub failed: usize,
}

/// Retention ledger with per-subject write serialization.
pub struct RetentionLedger {
    config: RetentionConfig,
    repository: Arc<dyn RetentionRepository>,
    policies: DashMap<String, RetentionPolicy>,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RetentionLedger {
    pub fn new(config: RetentionConfig, repository: Arc<dyn RetentionRepository>) -> Self {
        let ledger = Self {
            config,
            repository,
            policies: DashMap::new(),
            write_locks: DashMap::new(),
        };
        ledger.install_default_policies();
        ledger
    }

    fn install_default_policies(&self) {
        self.upsert_policy(RetentionPolicy {
            id: "user_data".to_string(),
            name: "User data".to_string(),
            description: "Identity-bearing subject data".to_string(),
            category: "user_data".to_string(),
            retention_period: self.config.default_period,
            grace_period: Some(Duration::days(30)),
            action: RetentionAction::Delete,
            priority: 100,
            legal_basis: Some("consent".to_string()),
            jurisdictions: vec!["BR".to_string(), "EU".to_string()],
            active: true,
        });
        self.upsert_policy(RetentionPolicy {
            id: "operational_data".to_string(),
            name: "Operational data".to_string(),
            description: "Task and processing bookkeeping".to_string(),
            category: "operational_data".to_string(),
            retention_period: Duration::days(365),
            grace_period: None,
            action: RetentionAction::Archive,
            priority: 50,
            legal_basis: Some("legitimate_interests".to_string()),
            jurisdictions: Vec::new(),
            active: true,
        });
        for (category, period) in &self.config.category_periods {
            self.upsert_policy(RetentionPolicy {
                id: category.clone(),
                name: format!("{category} (configured)"),
                description: "Configured per-category retention".to_string(),
                category: category.clone(),
                retention_period: *period,
                grace_period: None,
                action: RetentionAction::Delete,
                priority: 10,
                legal_basis: None,
                jurisdictions: Vec::new(),
                active: true,
            });
        }
    }

    pub fn upsert_policy(&self, policy: RetentionPolicy) {
        self.policies.insert(policy.id.clone(), policy);
    }

    pub fn policies(&self) -> Vec<RetentionPolicy> {
        let mut policies: Vec<RetentionPolicy> =
            self.policies.iter().map(|p| p.value().clone()).collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        policies
    }

    fn lock_for(&self, subject_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Open retention windows for every active policy matching the
    /// record's data category. A failed store for one policy is logged
    /// and does not abort the remaining matches.
    pub async fn apply_policy(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        data: &HashMap<String, Value>,
    ) -> Result<Vec<RetentionRecord>> {
        self.ensure_enabled()?;
        ctx.check_deadline()?;
        if subject_id.trim().is_empty() {
            return Err(ComplianceError::validation("subject_id is required"));
        }

        let category = infer_category(data).to_string();
        self.open_windows(subject_id, &category).await
    }

    /// Like [`apply_policy`](Self::apply_policy) with an explicit
    /// category, bypassing shape inference.
    pub async fn record_data_creation(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        category: &str,
    ) -> Result<Vec<RetentionRecord>> {
        self.ensure_enabled()?;
        ctx.check_deadline()?;
        if subject_id.trim().is_empty() {
            return Err(ComplianceError::validation("subject_id is required"));
        }
        self.open_windows(subject_id, category).await
    }

    async fn open_windows(&self, subject_id: &str, category: &str) -> Result<Vec<RetentionRecord>> {
        let now = Utc::now();
        let lock = self.lock_for(subject_id);
        let _guard = lock.lock().await;

        let mut matched: Vec<RetentionPolicy> = self
            .policies
            .iter()
            .filter(|p| p.active && p.category == category)
            .map(|p| p.value().clone())
            .collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut created = Vec::new();
        for policy in matched {
            let retention_end = now + policy.retention_period;
            let record = RetentionRecord {
                id: Uuid::new_v4(),
                subject_id: subject_id.to_string(),
                policy_id: policy.id.clone(),
                category: policy.category.clone(),
                action: policy.action,
                created_at: now,
                retention_end,
                grace_end: policy.grace_period.map(|g| retention_end + g),
                status: RetentionStatus::Active,
                legal_hold: false,
                legal_hold_reason: None,
                action_taken_at: None,
                extensions: Vec::new(),
            };
            match self.repository.store(record.clone()).await {
                Ok(()) => created.push(record),
                Err(e) => {
                    warn!(
                        subject_id,
                        policy_id = %policy.id,
                        error = %e,
                        "retention window creation failed"
                    );
                }
            }
        }

        debug!(subject_id, category, count = created.len(), "retention windows opened");
        Ok(created)
    }

    /// Walk expired records and apply their policy action.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.ensure_enabled()?;

        let now = Utc::now();
        let expired = self.repository.expired(now).await?;
        let mut report = SweepReport::default();

        for mut record in expired {
            if record.legal_hold || record.status == RetentionStatus::OnHold {
                report.skipped_hold += 1;
                continue;
            }
            if record.grace_end.is_some_and(|g| now <= g) {
                report.skipped_grace += 1;
                continue;
            }

            record.status = RetentionStatus::Processing;
            if let Err(e) = self.repository.update(record.clone()).await {
                warn!(record_id = %record.id, error = %e, "sweep update failed");
                report.failed += 1;
                continue;
            }

            record.status = RetentionStatus::Completed;
            record.action_taken_at = Some(now);
            match self.repository.update(record.clone()).await {
                Ok(()) => {
                    info!(
                        record_id = %record.id,
                        subject_id = %record.subject_id,
                        action = ?record.action,
                        "retention action applied"
                    );
                    report.processed += 1;
                }
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "sweep completion failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            processed = report.processed,
            skipped_hold = report.skipped_hold,
            skipped_grace = report.skipped_grace,
            failed = report.failed,
            "retention sweep finished"
        );
        Ok(report)
    }

    /// Block every retention action for a subject until the hold is lifted.
    pub async fn place_legal_hold(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        reason: impl Into<String>,
    ) -> Result<usize> {
        self.set_legal_hold(ctx, subject_id, Some(reason.into())).await
    }

    pub async fn remove_legal_hold(&self, ctx: &RequestContext, subject_id: &str) -> Result<usize> {
        self.set_legal_hold(ctx, subject_id, None).await
    }

    async fn set_legal_hold(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        reason: Option<String>,
    ) -> Result<usize> {
        self.ensure_enabled()?;
        ctx.check_deadline()?;
        let hold = reason.is_some();

        let lock = self.lock_for(subject_id);
        let _guard = lock.lock().await;

        let records = self.repository.for_subject(subject_id).await?;
        let mut touched = 0;
        for mut record in records {
            if record.status == RetentionStatus::Completed {
                continue;
            }
            record.legal_hold = hold;
            record.legal_hold_reason = reason.clone();
            record.status = if hold {
                RetentionStatus::OnHold
            } else if record.extensions.is_empty() {
                RetentionStatus::Active
            } else {
                RetentionStatus::Extended
            };
            self.repository.update(record).await?;
            touched += 1;
        }
        info!(subject_id, hold, touched, "legal hold updated");
        Ok(touched)
    }

    /// Extend retention for a subject; shifts `retention_end` and any
    /// grace window by the same amount.
    pub async fn extend_retention(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        extend_by: Duration,
        reason: impl Into<String>,
        approved_by: impl Into<String>,
    ) -> Result<usize> {
        self.ensure_enabled()?;
        ctx.check_deadline()?;
        if extend_by <= Duration::zero() {
            return Err(ComplianceError::validation(
                "extension period must be positive",
            ));
        }
        let reason = reason.into();
        let approved_by = approved_by.into();

        let lock = self.lock_for(subject_id);
        let _guard = lock.lock().await;

        let records = self.repository.for_subject(subject_id).await?;
        let mut extended = 0;
        for mut record in records {
            if record.status == RetentionStatus::Completed {
                continue;
            }
            record.retention_end += extend_by;
            record.grace_end = record.grace_end.map(|g| g + extend_by);
            record.extensions.push(RetentionExtension {
                reason: reason.clone(),
                extend_by,
                approved_by: approved_by.clone(),
                extended_at: Utc::now(),
                expires_at: record.retention_end,
            });
            if record.status == RetentionStatus::Active {
                record.status = RetentionStatus::Extended;
            }
            self.repository.update(record).await?;
            extended += 1;
        }
        if extended == 0 {
            return Err(ComplianceError::not_found("retention record", subject_id));
        }
        info!(subject_id, extended, "retention extended");
        Ok(extended)
    }

    /// True when some non-held record in the category has passed both
    /// its retention end and any grace window.
    pub async fn should_delete(&self, subject_id: &str, category: &str) -> Result<bool> {
        self.ensure_enabled()?;
        let records = self.repository.for_subject(subject_id).await?;
        let now = Utc::now();
        Ok(records.iter().any(|r| {
            r.category == category
                && !r.legal_hold
                && r.status != RetentionStatus::Completed
                && now > r.retention_end
                && r.grace_end.map_or(true, |g| now > g)
        }))
    }

    pub async fn status(&self, subject_id: &str) -> Result<Vec<RetentionRecord>> {
        self.ensure_enabled()?;
        self.repository.for_subject(subject_id).await
    }

    /// Whether any record for the subject is under legal hold.
    pub async fn has_legal_hold(&self, subject_id: &str) -> Result<bool> {
        self.ensure_enabled()?;
        let records = self.repository.for_subject(subject_id).await?;
        Ok(records.iter().any(|r| r.legal_hold))
    }

    /// Remove every retention record for a subject (erasure support).
    pub async fn erase(&self, ctx: &RequestContext, subject_id: &str) -> Result<usize> {
        self.ensure_enabled()?;
        ctx.check_deadline()?;
        let removed = self.repository.delete_subject(subject_id).await?;
        debug!(subject_id, removed, "retention records erased");
        Ok(removed)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if !self.config.enabled {
            return Err(ComplianceError::Disabled {
                subsystem: "retention ledger".to_string(),
            });
        }
        Ok(())
    }
}

/// Infer the data category from record shape. An explicit `_category`
/// tag wins; identity-bearing fields mark user data, task bookkeeping
/// marks operational data.
fn infer_category(data: &HashMap<String, Value>) -> &str {
    if let Some(tag) = data.get("_category").and_then(Value::as_str) {
        return tag;
    }
    if data.contains_key("email") || data.contains_key("cpf") || data.contains_key("name") {
        "user_data"
    } else if data.contains_key("task_id") {
        "operational_data"
    } else {
        "general_data"
    }
}
