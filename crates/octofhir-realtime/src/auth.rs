//! Auth coordinator.
//!
//! Holds the current bearer credential and the caller-supplied
//! [`TokenProvider`]. Server auth rejections are counted; below the limit a
//! fresh token is requested and the connection is forced to reconnect, at the
//! limit the session is given up with an `auth_failed` notification. A
//! `welcome` frame resets the counter.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::protocol::ServerError;

/// Supplies bearer tokens on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn fetch_token(&self) -> Result<String, AuthError>;
}

/// What the connection task should do after an auth rejection.
pub(crate) enum AuthDecision {
    /// Ask this provider for a new token, then reconnect.
    Refresh(Arc<dyn TokenProvider>),
    /// Emit `auth_failed` and disconnect.
    GiveUp(AuthError),
}

pub(crate) struct AuthCoordinator {
    provider: Option<Arc<dyn TokenProvider>>,
    token: Option<String>,
    max_retries: u32,
    failures: u32,
}

impl AuthCoordinator {
    pub(crate) fn new(provider: Option<Arc<dyn TokenProvider>>, max_retries: u32) -> Self {
        Self {
            provider,
            token: None,
            max_retries,
            failures: 0,
        }
    }

    pub(crate) fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub(crate) fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub(crate) fn provider(&self) -> Option<Arc<dyn TokenProvider>> {
        self.provider.clone()
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn reset(&mut self) {
        self.failures = 0;
    }

    pub(crate) fn on_rejected(&mut self, error: &ServerError) -> AuthDecision {
        self.failures += 1;
        if self.failures >= self.max_retries {
            return AuthDecision::GiveUp(AuthError::RetriesExhausted {
                failures: self.failures,
            });
        }
        match &self.provider {
            Some(provider) => AuthDecision::Refresh(Arc::clone(provider)),
            None => AuthDecision::GiveUp(AuthError::Rejected {
                code: error.code.as_str().to_string(),
            }),
        }
    }
}
