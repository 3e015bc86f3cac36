use serde::Serialize;
use thiserror::Error;

use tessera_core::{AccountId, EmployeeId};

use crate::{AccessClaims, Permission, Role};

/// The caller behind a validated token.
///
/// Built from claims alone; no lookup against the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: AccountId,
    pub email: Option<String>,
    pub full_name: String,
    pub employee_id: Option<EmployeeId>,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn from_claims(claims: &AccessClaims) -> Self {
        Self {
            subject: claims.sub.clone(),
            email: claims.email.clone(),
            full_name: claims.full_name.clone(),
            employee_id: claims.employee_id.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
        }
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.is(name))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Check that the principal holds `required` (or the wildcard).
///
/// - No IO
/// - No panics
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.permissions.iter().any(|held| held.grants(required)) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
