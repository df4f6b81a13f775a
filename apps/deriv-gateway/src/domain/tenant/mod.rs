//! Tenant Identity
//!
//! A tenant is an isolated credential context: either a user-supplied
//! API token or the shared anonymous context. Each tenant owns at most
//! one connection in the pool, and tenants never share state.

/// Key identifying one credential context.
///
/// The `Debug` and `Display` implementations redact the token so tenant
/// keys are safe to log.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TenantKey {
    /// The shared credential-less context. Limited to public endpoints.
    Anonymous,
    /// A user-supplied API token.
    Token(String),
}

impl TenantKey {
    /// Build a key from an optional token.
    #[must_use]
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(t) if !t.is_empty() => Self::Token(t),
            _ => Self::Anonymous,
        }
    }

    /// The credential to authorize with, if this tenant carries one.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Token(t) => Some(t),
        }
    }

    /// Whether this is the shared anonymous context.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl std::fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "TenantKey::Anonymous"),
            Self::Token(_) => write!(f, "TenantKey::Token([REDACTED])"),
        }
    }
}

impl std::fmt::Display for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Token(_) => write!(f, "token([REDACTED])"),
        }
    }
}
