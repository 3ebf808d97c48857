//! Request Context
//!
//! Identity and scope of the caller, resolved from the session token.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{RoleType, SessionableType};
use crate::error::AppError;

/// Authenticated caller, inserted into request extensions by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Session row backing this request
    pub session_id: Uuid,

    /// Kind of principal that owns the session
    pub sessionable_type: SessionableType,

    /// User or agent id
    pub principal_id: Uuid,

    /// Organization scope of the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,

    /// Role of a user principal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_type: Option<RoleType>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl AuthContext {
    pub fn new(session_id: Uuid, sessionable_type: SessionableType, principal_id: Uuid) -> Self {
        Self {
            session_id,
            sessionable_type,
            principal_id,
            organization_id: None,
            role_type: None,
            correlation_id: None,
        }
    }

    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_role(mut self, role_type: RoleType) -> Self {
        self.role_type = Some(role_type);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Organization the caller acts within; organization-scoped actions need one.
    pub fn organization(&self) -> Result<Uuid, AppError> {
        self.organization_id
            .ok_or_else(|| AppError::Unauthorized("session has no organization scope".to_string()))
    }

    /// The calling user's id; agent sessions are rejected.
    pub fn user(&self) -> Result<Uuid, AppError> {
        match self.sessionable_type {
            SessionableType::User => Ok(self.principal_id),
            SessionableType::Agent => Err(AppError::Forbidden(
                "action requires a user session".to_string(),
            )),
        }
    }

    pub fn require_role(&self, role: RoleType) -> Result<(), AppError> {
        if self.role_type == Some(role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("action requires role {role}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let session_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let organization_id = Uuid::new_v4();

        let context = AuthContext::new(session_id, SessionableType::User, user_id)
            .with_organization(organization_id)
            .with_role(RoleType::Employee);

        assert_eq!(context.user().unwrap(), user_id);
        assert_eq!(context.organization().unwrap(), organization_id);
        assert!(context.require_role(RoleType::Employee).is_ok());
        assert!(matches!(
            context.require_role(RoleType::Employer),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_agent_session_is_not_a_user() {
        let context = AuthContext::new(Uuid::new_v4(), SessionableType::Agent, Uuid::new_v4());
        assert!(matches!(context.user(), Err(AppError::Forbidden(_))));
        assert!(matches!(context.organization(), Err(AppError::Unauthorized(_))));
    }
}
