use thiserror::Error;

/// Errors surfaced by the compliance engine and its components.
///
/// The taxonomy distinguishes caller mistakes (`Validation`), policy
/// outcomes (`ConsentDenied`), missing ledger state (`NotFound`) and
/// internal component failures. Best-effort paths (retention
/// application, audit emission) log their errors instead of returning
/// them to the pipeline caller.
#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("no valid consent for purpose: {purpose}")]
    ConsentDenied { purpose: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    #[error("PII processing failed: {message}")]
    Pii { message: String },

    #[error("audit error: {message}")]
    Audit { message: String },

    #[error("retention error: {message}")]
    Retention { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("crypto error: {message}")]
    Crypto { message: String },

    #[error("unsupported data right type: {request_type}")]
    UnsupportedRightType { request_type: String },

    #[error("{subsystem} is disabled")]
    Disabled { subsystem: String },

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl ComplianceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ComplianceError>;
