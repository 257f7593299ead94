//! PII classification and anonymization.
//!
//! Detectors score candidate fields by pattern and field-name signals;
//! classifications at or above the configured confidence threshold are
//! anonymized in-place with a strategy chosen per PII type.

pub mod anonymizers;
pub mod detectors;

use crate::config::PiiConfig;
use crate::error::{ComplianceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use anonymizers::{GeneralizeAnonymizer, HashAnonymizer, RedactAnonymizer, TokenizeAnonymizer};
use detectors::{
    CnpjDetector, CpfDetector, CreditCardDetector, EmailDetector, IpAddressDetector, NameDetector,
    PhoneDetector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Cpf,
    Cnpj,
    Email,
    Phone,
    CreditCard,
    IpAddress,
    Name,
    Ssn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Public,
    Internal,
    Confidential,
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizationMethod {
    Hash,
    Tokenize,
    Redact,
    Generalize,
}

/// One detector's scored match: confidence plus an opaque evidence map
/// describing which signal fired. Never carries the raw value.
#[derive(Debug, Clone)]
pub struct Signal {
    pub confidence: f64,
    pub evidence: HashMap<String, String>,
}

impl Signal {
    pub fn new(confidence: f64, signal: &str) -> Self {
        let mut evidence = HashMap::new();
        evidence.insert("signal".to_string(), signal.to_string());
        Self {
            confidence,
            evidence,
        }
    }
}

/// A single scored detection for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub field: String,
    pub pii_type: PiiType,
    pub confidence: f64,
    pub sensitivity: Sensitivity,
    pub evidence: HashMap<String, String>,
}

/// Accepted classification carried on a processed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiClassification {
    pub field: String,
    pub pii_type: PiiType,
    pub confidence: f64,
    pub sensitivity: Sensitivity,
    pub method: AnonymizationMethod,
    pub timestamp: DateTime<Utc>,
    pub evidence: HashMap<String, String>,
}

/// A detector scores one (field, value) pair for one PII type.
pub trait PiiDetector: Send + Sync {
    fn pii_type(&self) -> PiiType;
    fn sensitivity(&self) -> Sensitivity;

    /// `None` means no signal; otherwise confidence is in (0, 1].
    fn detect(&self, field: &str, value: &str) -> Option<Signal>;
}

/// An anonymizer transforms a raw value into its protected form.
pub trait Anonymizer: Send + Sync {
    fn method(&self) -> AnonymizationMethod;
    fn anonymize(&self, value: &str) -> String;

    /// Whether the original value can be recovered from the output.
    /// No strategy here keeps a reverse mapping, so the default holds
    /// for all of them.
    fn is_reversible(&self) -> bool {
        false
    }
}

/// PII classification and anonymization engine.
///
/// Detector order is fixed so that overlapping signals resolve
/// deterministically: for a given field the first detector reaching the
/// highest confidence wins.
pub struct PiiEngine {
    config: PiiConfig,
    detectors: Vec<Box<dyn PiiDetector>>,
    anonymizers: HashMap<AnonymizationMethod, Box<dyn Anonymizer>>,
}

impl PiiEngine {
    pub fn new(config: PiiConfig) -> Result<Self> {
        let detectors: Vec<Box<dyn PiiDetector>> = vec![
            Box::new(CpfDetector::new()?),
            Box::new(CnpjDetector::new()?),
            Box::new(EmailDetector::new()?),
            Box::new(CreditCardDetector::new()?),
            Box::new(PhoneDetector::new()?),
            Box::new(IpAddressDetector::new()?),
            Box::new(NameDetector::new()),
        ];

        let mut anonymizers: HashMap<AnonymizationMethod, Box<dyn Anonymizer>> = HashMap::new();
        anonymizers.insert(AnonymizationMethod::Hash, Box::new(HashAnonymizer));
        anonymizers.insert(AnonymizationMethod::Tokenize, Box::new(TokenizeAnonymizer));
        anonymizers.insert(AnonymizationMethod::Redact, Box::new(RedactAnonymizer));
        anonymizers.insert(
            AnonymizationMethod::Generalize,
            Box::new(GeneralizeAnonymizer),
        );

        Ok(Self {
            config,
            detectors,
            anonymizers,
        })
    }

    /// Classify every field of a record, keeping only detections at or
    /// above the confidence threshold.
    pub fn classify(&self, data: &HashMap<String, Value>) -> Vec<PiiClassification> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut classifications = Vec::new();
        for (field, value) in data {
            if value.is_null() {
                continue;
            }
            let text = value_to_string(value);
            if let Some(detection) = self.detect_field(field, &text) {
                if detection.confidence >= self.config.confidence_threshold {
                    let method = self.method_for(detection.pii_type);
                    classifications.push(PiiClassification {
                        field: detection.field,
                        pii_type: detection.pii_type,
                        confidence: detection.confidence,
                        sensitivity: detection.sensitivity,
                        method,
                        timestamp: Utc::now(),
                        evidence: detection.evidence,
                    });
                }
            }
        }
        classifications
    }

    /// Classify a record and, when auto-masking is on, replace classified
    /// values with their anonymized form.
    pub fn process_record(
        &self,
        data: &mut HashMap<String, Value>,
    ) -> Result<Vec<PiiClassification>> {
        let classifications = self.classify(data);

        if self.config.auto_mask {
            for classification in &classifications {
                let anonymizer = self
                    .anonymizers
                    .get(&classification.method)
                    .ok_or_else(|| ComplianceError::Pii {
                        message: format!(
                            "no anonymizer registered for {:?}",
                            classification.method
                        ),
                    })?;

                if let Some(value) = data.get_mut(&classification.field) {
                    let original = value_to_string(value);
                    let masked = anonymizer.anonymize(&original);
                    debug!(
                        field = %classification.field,
                        pii_type = ?classification.pii_type,
                        method = ?classification.method,
                        "anonymized field"
                    );
                    *value = Value::String(masked);
                }
            }
        }

        Ok(classifications)
    }

    /// Anonymization strategy per PII type.
    pub fn method_for(&self, pii_type: PiiType) -> AnonymizationMethod {
        match pii_type {
            PiiType::Email => AnonymizationMethod::Hash,
            PiiType::Cpf | PiiType::Cnpj | PiiType::CreditCard => AnonymizationMethod::Tokenize,
            PiiType::Phone | PiiType::Name => AnonymizationMethod::Generalize,
            PiiType::Ssn | PiiType::IpAddress => AnonymizationMethod::Redact,
        }
    }

    fn detect_field(&self, field: &str, value: &str) -> Option<Detection> {
        let mut best: Option<Detection> = None;
        for detector in &self.detectors {
            let Some(signal) = detector.detect(field, value) else {
                continue;
            };
            // Strictly-greater keeps the earlier detector on ties.
            let replace = best
                .as_ref()
                .map_or(true, |b| signal.confidence > b.confidence);
            if replace {
                best = Some(Detection {
                    field: field.to_string(),
                    pii_type: detector.pii_type(),
                    confidence: signal.confidence,
                    sensitivity: detector.sensitivity(),
                    evidence: signal.evidence,
                });
            }
        }
        best
    }
}

/// String form used for detection and anonymization. JSON strings are
/// used verbatim; everything else falls back to its JSON rendering.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> PiiEngine {
        PiiEngine::new(PiiConfig::default()).unwrap()
    }

    #[test]
    fn test_classify_email_field() {
        let mut data = HashMap::new();
        data.insert("email".to_string(), json!("user@example.com"));
        let classifications = engine().classify(&data);
        assert_eq!(classifications.len(), 1);
        assert_eq!(classifications[0].pii_type, PiiType::Email);
        assert_eq!(classifications[0].sensitivity, Sensitivity::Confidential);
        assert!(classifications[0].confidence >= 0.9);
        assert_eq!(
            classifications[0].evidence.get("signal").map(String::as_str),
            Some("pattern")
        );
    }

    #[test]
    fn test_non_pii_fields_untouched() {
        let mut data = HashMap::new();
        data.insert("age".to_string(), json!(30));
        data.insert("task_count".to_string(), json!(12));
        data.insert("notes".to_string(), Value::Null);
        let classifications = engine().process_record(&mut data).unwrap();
        assert!(classifications.is_empty());
        assert_eq!(data["age"], json!(30));
    }

    #[test]
    fn test_auto_mask_replaces_email_with_hash() {
        let mut data = HashMap::new();
        data.insert("email".to_string(), json!("user@example.com"));
        engine().process_record(&mut data).unwrap();
        let masked = data["email"].as_str().unwrap();
        assert_eq!(masked.len(), 64);
        assert!(masked.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_auto_mask_disabled_preserves_values() {
        let mut config = PiiConfig::default();
        config.auto_mask = false;
        let engine = PiiEngine::new(config).unwrap();
        let mut data = HashMap::new();
        data.insert("email".to_string(), json!("user@example.com"));
        let classifications = engine.process_record(&mut data).unwrap();
        assert_eq!(classifications.len(), 1);
        assert_eq!(data["email"], json!("user@example.com"));
    }

    #[test]
    fn test_cpf_beats_field_name_heuristics() {
        let mut data = HashMap::new();
        data.insert("document".to_string(), json!("52998224725"));
        let classifications = engine().classify(&data);
        assert_eq!(classifications.len(), 1);
        assert_eq!(classifications[0].pii_type, PiiType::Cpf);
        assert_eq!(classifications[0].method, AnonymizationMethod::Tokenize);
    }

    #[test]
    fn test_phone_generalized_not_redacted() {
        assert_eq!(
            engine().method_for(PiiType::Phone),
            AnonymizationMethod::Generalize
        );
        assert_eq!(
            engine().method_for(PiiType::Ssn),
            AnonymizationMethod::Redact
        );
    }

    #[test]
    fn test_disabled_engine_classifies_nothing() {
        let mut config = PiiConfig::default();
        config.enabled = false;
        let engine = PiiEngine::new(config).unwrap();
        let mut data = HashMap::new();
        data.insert("email".to_string(), json!("user@example.com"));
        assert!(engine.classify(&data).is_empty());
    }

    #[test]
    fn test_threshold_filters_weak_signals() {
        let mut config = PiiConfig::default();
        config.confidence_threshold = 0.9;
        let engine = PiiEngine::new(config).unwrap();
        let mut data = HashMap::new();
        // Field-name-only signal for "name" scores 0.7, below 0.9.
        data.insert("name".to_string(), json!("Alice"));
        assert!(engine.classify(&data).is_empty());
    }
}
