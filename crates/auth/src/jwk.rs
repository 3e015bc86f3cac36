//! JSON Web Keys and the discovery document built from them.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::validator::{KeyResolver, ValidationKey};

pub const KEY_TYPE_RSA: &str = "RSA";
pub const KEY_USE_SIGNATURE: &str = "sig";
pub const ALGORITHM_RS256: &str = "RS256";

/// Public half of an RSA signing key, as published for validators.
///
/// The type has no fields for private material, so serializing it can never
/// leak a private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(rename = "use", default = "default_use")]
    pub key_use: String,
    #[serde(default = "default_alg")]
    pub alg: String,
    pub kid: String,
    /// Modulus, base64url without padding.
    pub n: String,
    /// Public exponent, base64url without padding.
    pub e: String,
    /// Key maturity: tokens signed with this key must not carry an `iat`
    /// before this instant (seconds since the epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

fn default_use() -> String {
    KEY_USE_SIGNATURE.to_owned()
}

fn default_alg() -> String {
    ALGORITHM_RS256.to_owned()
}

impl JsonWebKey {
    pub fn from_rsa_public(kid: impl Into<String>, key: &RsaPublicKey) -> Self {
        Self {
            kty: KEY_TYPE_RSA.to_owned(),
            key_use: default_use(),
            alg: default_alg(),
            kid: kid.into(),
            n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
            nbf: None,
        }
    }

    pub fn with_not_before(mut self, not_before: Option<DateTime<Utc>>) -> Self {
        self.nbf = not_before.map(|at| at.timestamp());
        self
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.nbf.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Whether this key can verify RS256 signatures.
    pub fn is_rs256_signing_key(&self) -> bool {
        self.kty == KEY_TYPE_RSA && self.key_use == KEY_USE_SIGNATURE && self.alg == ALGORITHM_RS256
    }

    pub fn decoding_key(&self) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
        DecodingKey::from_rsa_components(&self.n, &self.e)
    }
}

/// A JWKS document: `{"keys": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    pub fn find(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// Point-in-time, read-only view of the key store for publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoverySnapshot {
    /// Key new tokens are signed with, when one is issuable.
    pub current_key_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub jwks: JsonWebKeySet,
}

/// Validation keys decoded from a fetched JWKS document.
#[derive(Debug, Clone, Default)]
pub struct ResolvedKeySet {
    keys: Vec<Arc<ValidationKey>>,
}

impl ResolvedKeySet {
    /// Decode every usable key; unusable entries are logged and skipped.
    pub fn from_jwks(set: &JsonWebKeySet) -> Self {
        let keys = set
            .keys
            .iter()
            .filter_map(|jwk| {
                if !jwk.is_rs256_signing_key() {
                    warn!(kid = %jwk.kid, kty = %jwk.kty, alg = %jwk.alg, "skipping non-RS256 signing key");
                    return None;
                }
                match jwk.decoding_key() {
                    Ok(decoding) => Some(Arc::new(ValidationKey::new(jwk.kid.clone(), decoding, jwk.not_before()))),
                    Err(err) => {
                        warn!(kid = %jwk.kid, error = %err, "skipping undecodable key");
                        None
                    }
                }
            })
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyResolver for ResolvedKeySet {
    fn resolve_validation_keys(&self, kid: Option<&str>) -> Vec<Arc<ValidationKey>> {
        match kid {
            Some(kid) => self.keys.iter().filter(|key| key.kid() == kid).cloned().collect(),
            None => self.keys.clone(),
        }
    }
}
