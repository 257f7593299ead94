use crate::error::{ComplianceError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Serde support for `chrono::Duration` as whole seconds.
pub mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(secs))
    }
}

/// Serde support for `Option<chrono::Duration>` as whole seconds.
pub mod duration_secs_opt {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.num_seconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<i64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::seconds))
    }
}

mod category_periods_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        value: &HashMap<String, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let secs: HashMap<&String, i64> = value.iter().map(|(k, v)| (k, v.num_seconds())).collect();
        serde::Serialize::serialize(&secs, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<String, Duration>, D::Error> {
        let secs = HashMap::<String, i64>::deserialize(deserializer)?;
        Ok(secs
            .into_iter()
            .map(|(k, v)| (k, Duration::seconds(v)))
            .collect())
    }
}

/// Top-level configuration for the compliance engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Master switch; when false every entry point is a pass-through no-op.
    pub enabled: bool,

    /// Default jurisdiction tag applied to emitted records.
    pub default_region: String,

    /// PII detection and anonymization settings
    pub pii: PiiConfig,

    /// Consent ledger settings
    pub consent: ConsentConfig,

    /// Retention ledger and scheduler settings
    pub retention: RetentionConfig,

    /// Audit recorder settings
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiConfig {
    pub enabled: bool,

    /// Field names always scanned even without a pattern match.
    pub scan_fields: Vec<String>,

    /// Minimum confidence for a classification to be accepted.
    pub confidence_threshold: f64,

    /// Replace classified values with their anonymized form in-place.
    pub auto_mask: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentConfig {
    pub enabled: bool,

    /// Purposes granted by default when bootstrapping a subject.
    pub default_purposes: Vec<String>,

    /// Default consent validity window applied when a grant has no
    /// explicit expiry.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,

    /// Consent granularity: purpose, field, or operation.
    pub granularity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub enabled: bool,

    /// Retention period applied when no category-specific policy matches.
    #[serde(with = "duration_secs")]
    pub default_period: Duration,

    /// Per-category retention periods, each materialized as a policy.
    #[serde(with = "category_periods_secs")]
    pub category_periods: HashMap<String, Duration>,

    /// Start the background sweep task when the engine is built.
    pub auto_delete: bool,

    /// Interval between scheduler sweeps.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
}

/// How much of each audit event is written to the operational log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Minimal,
    Standard,
    Full,
}

impl FromStr for DetailLevel {
    type Err = ComplianceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "standard" => Ok(Self::Standard),
            "full" => Ok(Self::Full),
            other => Err(ComplianceError::Config {
                message: format!("unknown audit detail level: {other}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,

    pub detail_level: DetailLevel,

    /// Seal the `details` payload of every event with an AEAD cipher.
    pub encryption_enabled: bool,

    /// Hex (64 chars) or base64 encoded 32-byte key; required when
    /// `encryption_enabled` is set. Never serialized.
    #[serde(skip_serializing, default)]
    pub encryption_key: Option<String>,

    /// How long emitted audit events are kept.
    #[serde(with = "duration_secs")]
    pub retention_period: Duration,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_region: "BR".to_string(),
            pii: PiiConfig::default(),
            consent: ConsentConfig::default(),
            retention: RetentionConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_fields: vec![
                "email".to_string(),
                "phone".to_string(),
                "cpf".to_string(),
                "name".to_string(),
            ],
            confidence_threshold: 0.8,
            auto_mask: true,
        }
    }
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_purposes: vec!["processing".to_string(), "analytics".to_string()],
            ttl: Duration::days(730), // 2 years
            granularity: "purpose".to_string(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_period: Duration::days(730), // 2 years
            category_periods: HashMap::new(),
            auto_delete: true,
            sweep_interval: Duration::hours(24),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detail_level: DetailLevel::Full,
            encryption_enabled: false,
            encryption_key: None,
            retention_period: Duration::days(2555), // 7 years
        }
    }
}

impl ComplianceConfig {
    /// Load configuration from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = Self::default();

        if let Ok(v) = env::var("COMPLIANCE_ENABLED") {
            config.enabled = parse_bool("COMPLIANCE_ENABLED", &v)?;
        }
        if let Ok(v) = env::var("COMPLIANCE_DEFAULT_REGION") {
            config.default_region = v;
        }
        if let Ok(v) = env::var("PII_DETECTION_ENABLED") {
            config.pii.enabled = parse_bool("PII_DETECTION_ENABLED", &v)?;
        }
        if let Ok(v) = env::var("PII_CONFIDENCE_THRESHOLD") {
            config.pii.confidence_threshold =
                v.parse::<f64>().map_err(|e| ComplianceError::Config {
                    message: format!("invalid PII_CONFIDENCE_THRESHOLD: {e}"),
                })?;
        }
        if let Ok(v) = env::var("PII_AUTO_MASK") {
            config.pii.auto_mask = parse_bool("PII_AUTO_MASK", &v)?;
        }
        if let Ok(v) = env::var("CONSENT_ENABLED") {
            config.consent.enabled = parse_bool("CONSENT_ENABLED", &v)?;
        }
        if let Ok(v) = env::var("CONSENT_TTL_DAYS") {
            config.consent.ttl = parse_days("CONSENT_TTL_DAYS", &v)?;
        }
        if let Ok(v) = env::var("RETENTION_ENABLED") {
            config.retention.enabled = parse_bool("RETENTION_ENABLED", &v)?;
        }
        if let Ok(v) = env::var("RETENTION_DEFAULT_PERIOD_DAYS") {
            config.retention.default_period = parse_days("RETENTION_DEFAULT_PERIOD_DAYS", &v)?;
        }
        if let Ok(v) = env::var("RETENTION_AUTO_DELETE") {
            config.retention.auto_delete = parse_bool("RETENTION_AUTO_DELETE", &v)?;
        }
        if let Ok(v) = env::var("RETENTION_SWEEP_INTERVAL_SECS") {
            let secs = v.parse::<i64>().map_err(|e| ComplianceError::Config {
                message: format!("invalid RETENTION_SWEEP_INTERVAL_SECS: {e}"),
            })?;
            config.retention.sweep_interval = Duration::seconds(secs);
        }
        if let Ok(v) = env::var("AUDIT_ENABLED") {
            config.audit.enabled = parse_bool("AUDIT_ENABLED", &v)?;
        }
        if let Ok(v) = env::var("AUDIT_DETAIL_LEVEL") {
            config.audit.detail_level = v.parse()?;
        }
        if let Ok(v) = env::var("AUDIT_ENCRYPTION_ENABLED") {
            config.audit.encryption_enabled = parse_bool("AUDIT_ENCRYPTION_ENABLED", &v)?;
        }
        if let Ok(v) = env::var("AUDIT_ENCRYPTION_KEY") {
            config.audit.encryption_key = Some(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Startup-time validation; failures here are fatal configuration errors.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.pii.confidence_threshold) {
            return Err(ComplianceError::Config {
                message: format!(
                    "pii.confidence_threshold must be within [0, 1], got {}",
                    self.pii.confidence_threshold
                ),
            });
        }

        if self.retention.enabled && self.retention.sweep_interval <= Duration::zero() {
            return Err(ComplianceError::Config {
                message: "retention.sweep_interval must be positive".to_string(),
            });
        }

        if self.audit.enabled && self.audit.encryption_enabled {
            match self.audit.encryption_key.as_deref() {
                None | Some("") => {
                    return Err(ComplianceError::Config {
                        message: "AUDIT_ENCRYPTION_KEY must be set when audit encryption \
                                  is enabled"
                            .to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ComplianceError::Config {
            message: format!("invalid boolean for {name}: {value}"),
        }),
    }
}

fn parse_days(name: &str, value: &str) -> Result<Duration> {
    let days = value.parse::<i64>().map_err(|e| ComplianceError::Config {
        message: format!("invalid {name}: {e}"),
    })?;
    Ok(Duration::days(days))
}
