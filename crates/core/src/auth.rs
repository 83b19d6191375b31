use filewatchd_api::{AuthToken, AuthTokenProvider};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Rejected tokens remembered before the oldest is forgotten.
const REJECTED_HISTORY: usize = 16;

/// Latest-token lookup with one refresh per distinct rejected token, among
/// the last `REJECTED_HISTORY` rejected tokens.
pub struct AuthTokenCache {
    provider: Option<Arc<dyn AuthTokenProvider>>,
    rejected: Mutex<VecDeque<AuthToken>>,
}

impl AuthTokenCache {
    pub fn new(provider: Arc<dyn AuthTokenProvider>) -> Self {
        Self {
            provider: Some(provider),
            rejected: Mutex::new(VecDeque::new()),
        }
    }

    /// Requests go out unauthenticated.
    pub fn anonymous() -> Self {
        Self {
            provider: None,
            rejected: Mutex::new(VecDeque::new()),
        }
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.provider.as_ref().and_then(|p| p.latest_token())
    }

    /// Marks `token` rejected. Returns true if this call triggered the provider refresh.
    pub fn invalidate(&self, token: &AuthToken) -> bool {
        let Some(provider) = &self.provider else {
            return false;
        };
        let first = {
            let mut rejected = self.rejected.lock().unwrap_or_else(PoisonError::into_inner);
            if rejected.contains(token) {
                false
            } else {
                if rejected.len() == REJECTED_HISTORY {
                    rejected.pop_front();
                }
                rejected.push_back(token.clone());
                true
            }
        };
        if first {
            tracing::info!("Auth token rejected by server, requesting a new one");
            provider.on_token_rejected(token);
        }
        first
    }
}
