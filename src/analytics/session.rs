use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AnalyticsError, AnalyticsResult};

/// Credentials scoped to a single role, valid for one unit of work.
///
/// Sessions are acquired per call and never cached across calls.
#[derive(Clone)]
pub struct DelegatedSession {
    pub role: String,
    token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DelegatedSession {
    pub fn new(role: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl std::fmt::Debug for DelegatedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedSession")
            .field("role", &self.role)
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Acquires delegated sessions for a role.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn assume_role(&self, role: &str) -> AnalyticsResult<DelegatedSession>;
}

/// Hands out the same bearer token for every role.
///
/// For local runs and tests where the analytics endpoint is not behind
/// per-account credentials.
#[derive(Clone)]
pub struct StaticSessionProvider {
    token: Option<String>,
}

impl StaticSessionProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A provider that refuses every role.
    pub fn unavailable() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn assume_role(&self, role: &str) -> AnalyticsResult<DelegatedSession> {
        if role.is_empty() {
            return Err(AnalyticsError::Session {
                role: role.to_string(),
                message: "role identifier is empty".to_string(),
            });
        }
        match &self.token {
            Some(token) => Ok(DelegatedSession::new(role, token.clone())),
            None => Err(AnalyticsError::Session {
                role: role.to_string(),
                message: "no session credentials available".to_string(),
            }),
        }
    }
}
