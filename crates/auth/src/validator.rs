//! Stateless RS256 token validation.
//!
//! A validator never calls the issuer. It resolves verification keys through a
//! [`KeyResolver`] (the local key store on the issuing service, a cached JWKS
//! document everywhere else) and checks signature, issuer, audience, time
//! window and key maturity. Any failure is a terminal rejection.
//!
//! Key lookup is two-phase: the key named by the token's `kid` header first,
//! then every known key. The second phase keeps tokens valid when a key is
//! re-published under a different id during rotation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use tracing::debug;

use crate::claims::{AccessClaims, TokenValidationError, validate_claims};

/// Key material able to verify signatures, plus the maturity bound.
#[derive(Clone)]
pub struct ValidationKey {
    kid: String,
    decoding: DecodingKey,
    not_before: Option<DateTime<Utc>>,
}

impl ValidationKey {
    pub fn new(kid: impl Into<String>, decoding: DecodingKey, not_before: Option<DateTime<Utc>>) -> Self {
        Self {
            kid: kid.into(),
            decoding,
            not_before,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }
}

impl core::fmt::Debug for ValidationKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValidationKey")
            .field("kid", &self.kid)
            .field("not_before", &self.not_before)
            .finish_non_exhaustive()
    }
}

/// Source of verification keys.
pub trait KeyResolver: Send + Sync {
    /// With `Some(kid)`, only keys published under that id (possibly none).
    /// With `None`, every known key.
    fn resolve_validation_keys(&self, kid: Option<&str>) -> Vec<Arc<ValidationKey>>;
}

impl<R> KeyResolver for Arc<R>
where
    R: KeyResolver + ?Sized,
{
    fn resolve_validation_keys(&self, kid: Option<&str>) -> Vec<Arc<ValidationKey>> {
        (**self).resolve_validation_keys(kid)
    }
}

/// Validates bearer tokens. Object-safe so HTTP layers can hold `Arc<dyn JwtValidator>`.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenValidationError>;
}

/// Accepted issuers and audiences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSettings {
    issuers: Vec<String>,
    audiences: Vec<String>,
}

impl ValidationSettings {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuers: vec![issuer.into()],
            audiences: vec![audience.into()],
        }
    }

    /// Also accept tokens from these issuers. Blank entries are ignored.
    pub fn with_additional_issuers<I, S>(mut self, issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.issuers, issuers);
        self
    }

    /// Also accept tokens for these audiences. Blank entries are ignored.
    pub fn with_additional_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.audiences, audiences);
        self
    }

    pub fn issuers(&self) -> &[String] {
        &self.issuers
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }
}

fn extend_unique<I, S>(target: &mut Vec<String>, values: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for value in values {
        let value: String = value.into();
        let value = value.trim();
        if !value.is_empty() && !target.iter().any(|existing| existing == value) {
            target.push(value.to_owned());
        }
    }
}

enum Attempt {
    /// A key verified the signature; this is the final answer.
    Verified(Result<AccessClaims, TokenValidationError>),
    NoMatch,
}

pub struct Rs256JwtValidator<R> {
    resolver: R,
    settings: ValidationSettings,
    validation: Validation,
}

impl<R: KeyResolver> Rs256JwtValidator<R> {
    pub fn new(resolver: R, settings: ValidationSettings) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        // Time claims are checked against the caller's `now` in `check_times`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        validation.set_issuer(settings.issuers());
        validation.set_audience(settings.audiences());

        Self {
            resolver,
            settings,
            validation,
        }
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    fn try_keys(
        &self,
        token: &str,
        keys: &[Arc<ValidationKey>],
        tried: &mut HashSet<String>,
        now: DateTime<Utc>,
    ) -> Attempt {
        for key in keys {
            if !tried.insert(key.kid.clone()) {
                continue;
            }
            match jsonwebtoken::decode::<AccessClaims>(token, &key.decoding, &self.validation) {
                Ok(data) => return Attempt::Verified(check_times(data.claims, key, now)),
                Err(err) if is_signature_mismatch(err.kind()) => {
                    debug!(kid = %key.kid, "signature did not verify with key");
                }
                Err(err) => return Attempt::Verified(Err(map_error(err.kind()))),
            }
        }
        Attempt::NoMatch
    }
}

impl<R: KeyResolver> JwtValidator for Rs256JwtValidator<R> {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenValidationError> {
        let header = jsonwebtoken::decode_header(token).map_err(|err| map_error(err.kind()))?;
        if header.alg != Algorithm::RS256 {
            return Err(TokenValidationError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let mut tried = HashSet::new();
        let mut kid_known = false;
        if let Some(kid) = header.kid.as_deref() {
            let targeted = self.resolver.resolve_validation_keys(Some(kid));
            kid_known = !targeted.is_empty();
            if let Attempt::Verified(result) = self.try_keys(token, &targeted, &mut tried, now) {
                return result;
            }
            debug!(kid, kid_known, "falling back to every published key");
        }

        let all = self.resolver.resolve_validation_keys(None);
        match self.try_keys(token, &all, &mut tried, now) {
            Attempt::Verified(result) => result,
            Attempt::NoMatch if tried.is_empty() => Err(TokenValidationError::UnknownKey),
            Attempt::NoMatch if header.kid.is_some() && !kid_known => Err(TokenValidationError::UnknownKey),
            Attempt::NoMatch => Err(TokenValidationError::InvalidSignature),
        }
    }
}

fn check_times(
    claims: AccessClaims,
    key: &ValidationKey,
    now: DateTime<Utc>,
) -> Result<AccessClaims, TokenValidationError> {
    validate_claims(&claims, now)?;
    if let Some(not_before) = key.not_before {
        if claims.iat < not_before.timestamp() {
            return Err(TokenValidationError::KeyNotMature);
        }
    }
    Ok(claims)
}

fn is_signature_mismatch(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::InvalidSignature | ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat | ErrorKind::Crypto(_)
    )
}

fn map_error(kind: &ErrorKind) -> TokenValidationError {
    match kind {
        ErrorKind::InvalidSignature | ErrorKind::InvalidRsaKey(_) | ErrorKind::Crypto(_) => {
            TokenValidationError::InvalidSignature
        }
        ErrorKind::InvalidIssuer => TokenValidationError::InvalidIssuer,
        ErrorKind::InvalidAudience => TokenValidationError::InvalidAudience,
        ErrorKind::ExpiredSignature => TokenValidationError::Expired,
        ErrorKind::ImmatureSignature => TokenValidationError::NotYetValid,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName | ErrorKind::MissingAlgorithm => {
            TokenValidationError::UnsupportedAlgorithm(format!("{kind:?}"))
        }
        other => TokenValidationError::Malformed(format!("{other:?}")),
    }
}
