use std::fmt;

/// Opaque bearer credential.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Supplies tokens from outside the daemon (IDE session, token file, ...).
pub trait AuthTokenProvider: Send + Sync {
    /// Must not block.
    fn latest_token(&self) -> Option<AuthToken>;

    /// Called at most once per rejected token value.
    fn on_token_rejected(&self, token: &AuthToken);
}
