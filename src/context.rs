use crate::error::{ComplianceError, Result};
use chrono::{DateTime, Duration, Utc};

/// Caller-supplied request context carried through the pipeline.
///
/// Identifies the acting user/session for audit enrichment and carries an
/// optional wall-clock deadline that ledger mutations check before touching
/// storage. A context with no deadline never expires.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Utc::now() + timeout);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Utc::now() > d)
    }

    /// Fails with `DeadlineExceeded` once the deadline has passed.
    pub fn check_deadline(&self) -> Result<()> {
        if self.is_expired() {
            return Err(ComplianceError::DeadlineExceeded);
        }
        Ok(())
    }
}
