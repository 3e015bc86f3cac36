use tessera_auth::{AccessClaims, Principal};

/// Authenticated caller for a request, inserted by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
    token_expires_at: i64,
}

impl PrincipalContext {
    pub fn from_claims(claims: &AccessClaims) -> Self {
        Self {
            principal: Principal::from_claims(claims),
            token_expires_at: claims.exp,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// `exp` of the presented token, seconds since the epoch.
    pub fn expires_at(&self) -> i64 {
        self.token_expires_at
    }
}
