//! Per-request context and the verified caller identity it carries.

use crate::claims::Claims;

/// Verified caller identity extracted from a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub tenant_id: String,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            tenant_id: claims.tenant_id,
            roles: claims.roles,
            scopes: claims.scopes,
        }
    }
}

/// Per-request values derived by the gateway's interceptors.
///
/// Created when a request enters the chain and scoped to that request only.
/// Stages never mutate a context in place: enrichment returns a new record
/// that keeps every field already set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
    identity: Option<Identity>,
}

impl RequestContext {
    /// Starts a context for a request with an already-established id.
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            identity: None,
        }
    }

    /// Returns a context carrying `identity`.
    ///
    /// The identity is set at most once: if this context is already
    /// authenticated the existing identity is kept.
    #[must_use]
    pub fn with_identity(&self, identity: Identity) -> Self {
        Self {
            request_id: self.request_id.clone(),
            identity: Some(self.identity.clone().unwrap_or(identity)),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Tenant of the authenticated caller, empty when unauthenticated.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        self.identity.as_ref().map_or("", |i| i.tenant_id.as_str())
    }

    #[must_use]
    pub fn roles(&self) -> &[String] {
        self.identity.as_ref().map_or(&[], |i| i.roles.as_slice())
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        self.identity.as_ref().map_or(&[], |i| i.scopes.as_slice())
    }
}
