use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tessera_core::{AccountId, EmployeeId};

use crate::{Permission, Role};

/// Claims carried by an access token.
///
/// Times are whole seconds since the Unix epoch, as registered JWT claims are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub aud: String,

    /// Account the token was issued to.
    pub sub: AccountId,

    /// Unique token id.
    pub jti: String,

    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default)]
    pub full_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<EmployeeId>,

    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl AccessClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported signing algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("no published key matches the token")]
    UnknownKey,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token issuer is not trusted")]
    InvalidIssuer,

    #[error("token audience is not accepted")]
    InvalidAudience,

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("token was issued before its signing key became valid")]
    KeyNotMature,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate the time claims against `now`.
///
/// Zero clock skew: the token is valid through its `exp` second and rejected
/// from the next one.
pub fn validate_claims(claims: &AccessClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.nbf {
        return Err(TokenValidationError::NotYetValid);
    }
    if now > claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Trim entries, drop blanks and remove case-insensitive duplicates, keeping
/// the first spelling seen.
pub fn normalize_claim_values<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter_map(|value| {
            let trimmed = value.as_ref().trim();
            (!trimmed.is_empty() && seen.insert(trimmed.to_lowercase())).then(|| trimmed.to_owned())
        })
        .collect()
}
