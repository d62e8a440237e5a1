//! Per-request context carried through extensions.
//!
//! Populated by the middleware chain: the request id by the request-id
//! layer, the tenant by the tenancy layer, identity and role by the role
//! extractor. Handlers read it back from request extensions to make
//! authorisation decisions and to stamp audit events.

use crate::error::ApiError;
use std::time::Instant;

/// The role a request acts under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Anonymous,
    Operator,
    /// An authenticated identity without operator rights.
    Named(String),
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub tenant: String,
    pub role: Role,
    /// Stable identity used as the audit actor and approval principal.
    pub principal: String,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(request_id: String) -> Self {
        RequestContext {
            request_id,
            tenant: "default".to_string(),
            role: Role::Anonymous,
            principal: "anonymous".to_string(),
            started_at: Instant::now(),
        }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }

    /// Gate for mutation endpoints: 401 without identity, 403 without the
    /// operator role.
    pub fn require_operator(&self) -> Result<(), ApiError> {
        match &self.role {
            Role::Operator => Ok(()),
            Role::Anonymous => Err(ApiError::Unauthorised {
                message: "identity required".into(),
            }),
            Role::Named(role) => Err(ApiError::forbidden(format!(
                "role '{role}' may not perform this operation"
            ))),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        RequestContext::new(uuid::Uuid::new_v4().to_string())
    }
}
