//! Token issuance (identity service only).

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, Header};
use rand::RngCore;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use tessera_core::{AccountId, EmployeeId};

use crate::claims::{AccessClaims, normalize_claim_values};
use crate::keys::{KeyStoreError, SigningKeyStore};
use crate::{Permission, Role};

/// Length of the random refresh token before base64url encoding.
pub const REFRESH_TOKEN_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerSettings {
    pub issuer: String,
    pub audience: String,
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
}

impl Default for IssuerSettings {
    fn default() -> Self {
        Self {
            issuer: "tessera-identity".into(),
            audience: "tessera".into(),
            access_token_lifetime: Duration::minutes(60),
            refresh_token_lifetime: Duration::days(7),
        }
    }
}

/// Who the token is for and what it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub subject: AccountId,
    pub full_name: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub employee_id: Option<EmployeeId>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl TokenRequest {
    pub fn new(subject: AccountId, full_name: impl Into<String>) -> Self {
        Self {
            subject,
            full_name: full_name.into(),
            email: None,
            username: None,
            employee_id: None,
            roles: Vec::new(),
            permissions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub key_id: String,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Signs RS256 access tokens with the store's current key.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    keys: Arc<SigningKeyStore>,
    settings: IssuerSettings,
}

impl TokenIssuer {
    /// Fails when the store has no key that can sign right now, so a
    /// misconfigured identity service refuses to start.
    pub fn new(keys: Arc<SigningKeyStore>, settings: IssuerSettings) -> Result<Self, IssueError> {
        keys.current_key()?;
        Ok(Self { keys, settings })
    }

    pub fn settings(&self) -> &IssuerSettings {
        &self.settings
    }

    pub fn issue(&self, request: &TokenRequest) -> Result<IssuedToken, IssueError> {
        self.issue_at(request, Utc::now())
    }

    pub fn issue_at(&self, request: &TokenRequest, now: DateTime<Utc>) -> Result<IssuedToken, IssueError> {
        let key = self.keys.current_key_at(now)?;
        let encoding = key.encoding_key().ok_or(KeyStoreError::NoIssuableKey)?;

        let iat = now.timestamp();
        let exp = (now + self.settings.access_token_lifetime).timestamp();
        let claims = AccessClaims {
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            sub: request.subject.clone(),
            jti: Uuid::now_v7().to_string(),
            iat,
            nbf: iat,
            exp,
            email: request.email.clone(),
            full_name: request.full_name.clone(),
            preferred_username: request.username.clone(),
            employee_id: request.employee_id.clone(),
            roles: normalize_claim_values(&request.roles).into_iter().map(Role::new).collect(),
            permissions: normalize_claim_values(&request.permissions)
                .into_iter()
                .map(Permission::new)
                .collect(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.id().to_owned());
        let access_token = jsonwebtoken::encode(&header, &claims, encoding)?;

        debug!(kid = key.id(), sub = %claims.sub, jti = %claims.jti, "issued access token");

        Ok(IssuedToken {
            access_token,
            expires_at: DateTime::from_timestamp(exp, 0).unwrap_or(now + self.settings.access_token_lifetime),
            key_id: key.id().to_owned(),
            refresh_token: refresh_token(),
            refresh_expires_at: now + self.settings.refresh_token_lifetime,
        })
    }
}

fn refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
