pub mod audit;
pub mod config;
pub mod consent;
pub mod context;
pub mod engine;
pub mod error;
pub mod pii;
pub mod retention;

pub use config::{AuditConfig, ComplianceConfig, ConsentConfig, DetailLevel, PiiConfig, RetentionConfig};
pub use context::RequestContext;
pub use error::{ComplianceError, Result};

// Re-export engine types for convenience
pub use engine::{
    ComplianceEngine, ComplianceStatus, DataRightRequest, DataRightResponse, DataRightType,
    ProcessedData, RightsRequestStatus,
};

// Re-export PII types
pub use pii::{
    AnonymizationMethod, Anonymizer, Detection, PiiClassification, PiiDetector, PiiEngine,
    PiiType, Sensitivity, Signal,
};

// Re-export consent types
pub use consent::{
    ConsentLedger, ConsentRecord, ConsentRepository, ConsentRequest, ConsentSource, ConsentStatus,
    ConsentValidation, InMemoryConsentRepository,
};

// Re-export retention types
pub use retention::{
    InMemoryRetentionRepository, RetentionAction, RetentionLedger, RetentionPolicy,
    RetentionRecord, RetentionRepository, RetentionScheduler, RetentionStatus, SweepReport,
};

// Re-export audit types
pub use audit::{
    AuditCipher, AuditEvent, AuditEventType, AuditFilter, AuditRecorder, AuditResult, AuditSink,
    InMemoryAuditSink,
};
