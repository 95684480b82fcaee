use chrono::{DateTime, Utc};

use crate::error::FeedError;

/// Credentials handed to a tick source when it opens
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn anonymous() -> Self {
        Self {
            token: None,
            issued_at: Utc::now(),
        }
    }
}

/// Acquires and refreshes upstream credentials
///
/// Kept apart from the feed so credential storage and prompting stay
/// outside the engine.
#[allow(async_fn_in_trait)]
pub trait Authenticator {
    async fn acquire(&mut self) -> Result<AuthSession, FeedError>;

    /// Called once when the upstream reports an expired session
    async fn renew(&mut self) -> Result<AuthSession, FeedError>;

    async fn disconnect(&mut self);
}

/// Authenticator backed by a fixed API token from configuration
///
/// `None` means the upstream needs no credentials (replay, synthetic).
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    token: Option<String>,
    active: bool,
}

impl StaticTokenAuthenticator {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn issue(&mut self) -> Result<AuthSession, FeedError> {
        if let Some(token) = &self.token {
            if token.trim().is_empty() {
                return Err(FeedError::Authentication("empty API token".to_string()));
            }
        }
        self.active = true;
        Ok(AuthSession {
            token: self.token.clone(),
            issued_at: Utc::now(),
        })
    }
}

impl Authenticator for StaticTokenAuthenticator {
    async fn acquire(&mut self) -> Result<AuthSession, FeedError> {
        self.issue()
    }

    async fn renew(&mut self) -> Result<AuthSession, FeedError> {
        tracing::info!("Renewing upstream session");
        self.issue()
    }

    async fn disconnect(&mut self) {
        self.active = false;
    }
}
