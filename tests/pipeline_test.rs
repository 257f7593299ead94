//! End-to-end pipeline tests: consent, PII anonymization, retention,
//! rights dispatch, and the audit trail they leave behind.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use consentry::audit::{AuditEventType, AuditFilter, AuditResult, AuditSink, InMemoryAuditSink};
use consentry::consent::{legal_basis, ConsentRequest, InMemoryConsentRepository};
use consentry::retention::InMemoryRetentionRepository;
use consentry::{
    ComplianceConfig, ComplianceEngine, ComplianceError, DataRightRequest, DataRightType, PiiType,
    RequestContext, RightsRequestStatus,
};

struct Harness {
    engine: ComplianceEngine,
    audit_sink: Arc<InMemoryAuditSink>,
}

fn harness_with(configure: impl FnOnce(&mut ComplianceConfig)) -> Harness {
    let mut config = ComplianceConfig::default();
    config.retention.auto_delete = false;
    configure(&mut config);

    let audit_sink = Arc::new(InMemoryAuditSink::new());
    let engine = ComplianceEngine::with_backends(
        config,
        Arc::new(InMemoryConsentRepository::new()),
        Arc::new(InMemoryRetentionRepository::new()),
        audit_sink.clone(),
    )
    .expect("engine construction");

    Harness { engine, audit_sink }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn grant(subject: &str, purpose: &str) -> ConsentRequest {
    ConsentRequest::grant(subject, purpose, legal_basis::CONSENT)
}

fn sample_record() -> HashMap<String, serde_json::Value> {
    let mut data = HashMap::new();
    data.insert("email".to_string(), json!("user@example.com"));
    data.insert("age".to_string(), json!(30));
    data
}

#[tokio::test]
async fn consented_record_is_anonymized_and_tracked() {
    let h = harness();
    let ctx = RequestContext::new().with_user("operator-1");

    h.engine
        .record_consent(&ctx, grant("u1", "analytics"))
        .await
        .unwrap();

    let processed = h
        .engine
        .process_data(&ctx, "u1", "analytics", sample_record())
        .await
        .unwrap();

    // Email replaced by a 64-char hex digest; non-PII untouched.
    let email = processed.data["email"].as_str().unwrap();
    assert_eq!(email.len(), 64);
    assert!(email.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(processed.data["age"], json!(30));

    assert_eq!(processed.classifications.len(), 1);
    assert_eq!(processed.classifications[0].pii_type, PiiType::Email);
    assert!(processed.consent.as_ref().unwrap().valid);

    // Identity-bearing record opened a user_data retention window.
    assert_eq!(processed.retention_records.len(), 1);
    assert_eq!(processed.retention_records[0].category, "user_data");
}

#[tokio::test]
async fn processing_without_consent_is_blocked_and_audited() {
    let h = harness();
    let ctx = RequestContext::new();

    let err = h
        .engine
        .process_data(&ctx, "u1", "marketing", sample_record())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "no valid consent for purpose: marketing");

    let blocked = h
        .audit_sink
        .query(&AuditFilter {
            result: Some(AuditResult::Blocked),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].processing_type.as_deref(), Some("consent_denied"));
}

#[tokio::test]
async fn grant_requires_legal_basis() {
    let h = harness();
    let mut request = grant("u1", "marketing");
    request.legal_basis = String::new();

    let err = h
        .engine
        .record_consent(&RequestContext::new(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::Validation { .. }));
}

#[tokio::test]
async fn withdrawal_blocks_subsequent_processing() {
    let h = harness();
    let ctx = RequestContext::new();
    h.engine
        .record_consent(&ctx, grant("u1", "marketing"))
        .await
        .unwrap();

    let response = h
        .engine
        .handle_rights_request(
            &ctx,
            DataRightRequest::new(DataRightType::WithdrawConsent, "u1")
                .with_data("purpose", json!("marketing")),
        )
        .await
        .unwrap();
    assert_eq!(response.status, RightsRequestStatus::Completed);

    let err = h
        .engine
        .process_data(&ctx, "u1", "marketing", sample_record())
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::ConsentDenied { .. }));
}

#[tokio::test]
async fn withdrawal_without_purpose_rejected() {
    let h = harness();
    let ctx = RequestContext::new();
    h.engine
        .record_consent(&ctx, grant("u1", "marketing"))
        .await
        .unwrap();

    let err = h
        .engine
        .handle_rights_request(
            &ctx,
            DataRightRequest::new(DataRightType::WithdrawConsent, "u1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::Validation { .. }));
}

#[tokio::test]
async fn access_report_includes_consents_and_retention() {
    let h = harness();
    let ctx = RequestContext::new();
    h.engine
        .record_consent(&ctx, grant("u1", "analytics"))
        .await
        .unwrap();
    h.engine
        .process_data(&ctx, "u1", "analytics", sample_record())
        .await
        .unwrap();

    let response = h
        .engine
        .handle_rights_request(&ctx, DataRightRequest::new(DataRightType::Access, "u1"))
        .await
        .unwrap();

    let data = response.data.unwrap();
    assert_eq!(data["subject_id"], json!("u1"));
    assert_eq!(data["consents"].as_array().unwrap().len(), 1);
    assert_eq!(data["retention"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn erasure_removes_subject_state() {
    let h = harness();
    let ctx = RequestContext::new();
    h.engine
        .record_consent(&ctx, grant("u1", "analytics"))
        .await
        .unwrap();
    h.engine
        .process_data(&ctx, "u1", "analytics", sample_record())
        .await
        .unwrap();

    let response = h
        .engine
        .handle_rights_request(&ctx, DataRightRequest::new(DataRightType::Erasure, "u1"))
        .await
        .unwrap();
    assert_eq!(response.status, RightsRequestStatus::Completed);

    // Consent gone, so further processing is denied.
    let err = h
        .engine
        .process_data(&ctx, "u1", "analytics", sample_record())
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::ConsentDenied { .. }));
}

#[tokio::test]
async fn erasure_deferred_under_legal_hold() {
    let h = harness();
    let ctx = RequestContext::new();
    h.engine
        .record_consent(&ctx, grant("u1", "analytics"))
        .await
        .unwrap();
    h.engine
        .process_data(&ctx, "u1", "analytics", sample_record())
        .await
        .unwrap();
    h.engine
        .retention()
        .place_legal_hold(&ctx, "u1", "regulatory inquiry")
        .await
        .unwrap();

    let response = h
        .engine
        .handle_rights_request(&ctx, DataRightRequest::new(DataRightType::Erasure, "u1"))
        .await
        .unwrap();
    assert_eq!(response.status, RightsRequestStatus::Partial);
    assert!(response.message.contains("legal hold"));

    // Consent state survives the deferred erasure.
    assert!(h
        .engine
        .consent()
        .validate("u1", "analytics")
        .await
        .unwrap()
        .valid);

    let partial = h
        .audit_sink
        .query(&AuditFilter {
            result: Some(AuditResult::Partial),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(partial.len(), 1);
}

#[tokio::test]
async fn unsupported_rights_fail_with_typed_error() {
    let h = harness();
    let ctx = RequestContext::new();

    for right in [DataRightType::Restriction, DataRightType::Objection] {
        let err = h
            .engine
            .handle_rights_request(&ctx, DataRightRequest::new(right, "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ComplianceError::UnsupportedRightType { .. }));
    }

    let failures = h
        .audit_sink
        .query(&AuditFilter {
            event_type: Some(AuditEventType::RightsRequest),
            result: Some(AuditResult::Failure),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failures.len(), 2);
}

#[tokio::test]
async fn successful_pipeline_leaves_attempt_and_success_stages() {
    let h = harness();
    let ctx = RequestContext::new();
    h.engine
        .record_consent(&ctx, grant("u1", "analytics"))
        .await
        .unwrap();
    h.engine
        .process_data(&ctx, "u1", "analytics", sample_record())
        .await
        .unwrap();

    let processing = h
        .audit_sink
        .query(&AuditFilter {
            event_type: Some(AuditEventType::DataProcessing),
            ..Default::default()
        })
        .await
        .unwrap();
    let stages: Vec<&str> = processing
        .iter()
        .filter_map(|e| e.processing_type.as_deref())
        .collect();
    assert_eq!(stages, vec!["attempt", "success"]);
}

#[tokio::test]
async fn encrypted_audit_details_round_trip() {
    let h = harness_with(|config| {
        config.audit.encryption_enabled = true;
        config.audit.encryption_key = Some("0f".repeat(32));
    });
    let ctx = RequestContext::new();
    h.engine
        .record_consent(&ctx, grant("u1", "analytics"))
        .await
        .unwrap();
    h.engine
        .process_data(&ctx, "u1", "analytics", sample_record())
        .await
        .unwrap();

    let detected = h
        .audit_sink
        .query(&AuditFilter {
            event_type: Some(AuditEventType::PiiDetected),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(detected.len(), 1);
    assert!(detected[0].encrypted);

    let details = h.engine.audit().decrypt_details(&detected[0]).unwrap();
    assert!(details.contains_key("classifications"));
}

#[tokio::test]
async fn status_reports_component_state() {
    let h = harness();
    let status = h.engine.compliance_status().await.unwrap();
    assert!(status.enabled);
    assert!(status.audit_enabled);
    assert!(status.retention_policies >= 2);
    assert_eq!(status.audit_events, 0);
}

#[tokio::test]
async fn engine_with_sweeper_shuts_down() {
    let h = harness_with(|config| {
        config.retention.auto_delete = true;
    });
    h.engine.shutdown().await.unwrap();
}
