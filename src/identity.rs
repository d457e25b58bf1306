//! Identity Module
//!
//! The cache partitions entries per principal. Where the principal comes from
//! (an auth client, a request header) is outside the cache's concern.

/// Owner used for keys when no principal is signed in.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Supplies the currently authenticated principal, if any.
pub trait IdentityProvider: Send + Sync {
    fn current_principal(&self) -> Option<String>;
}

/// A fixed identity. Used per request by the HTTP layer and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    principal: Option<String>,
}

impl StaticIdentity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Builds an identity from an optional header value; blank values count as
    /// signed out.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(p) if !p.is_empty() => Self::new(p),
            _ => Self::anonymous(),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_principal(&self) -> Option<String> {
        self.principal.clone()
    }
}
