//! Signing key store: the configured RSA key set and current-key selection.
//!
//! The store is built once from configuration and never mutated. Rotation is a
//! configuration change: add the new key flagged `current`, keep the old one
//! (public half at least) until every token it signed has expired, then drop
//! it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::EncodingKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::jwk::{DiscoverySnapshot, JsonWebKey, JsonWebKeySet};
use crate::validator::{KeyResolver, ValidationKey};

/// One `[[jwt.keys]]` entry.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SigningKeyConfig {
    pub id: String,
    #[serde(default)]
    pub current: bool,
    /// PKCS#8 or PKCS#1 PEM. Absent on keys kept only for validation.
    #[serde(default)]
    pub private_key_pem: Option<String>,
    /// SPKI or PKCS#1 PEM. Derived from the private key when absent.
    #[serde(default)]
    pub public_key_pem: Option<String>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub not_after: Option<DateTime<Utc>>,
}

impl core::fmt::Debug for SigningKeyConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigningKeyConfig")
            .field("id", &self.id)
            .field("current", &self.current)
            .field("private_key_pem", &self.private_key_pem.as_ref().map(|_| "<redacted>"))
            .field("public_key_pem", &self.public_key_pem.is_some())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("no signing keys configured")]
    NoKeysConfigured,

    #[error("signing key #{0} has an empty id")]
    EmptyKeyId(usize),

    #[error("signing key id `{0}` is configured more than once")]
    DuplicateKeyId(String),

    #[error("more than one signing key is flagged current: {0:?}")]
    MultipleCurrentKeys(Vec<String>),

    #[error("signing key `{0}` has neither private nor public key material")]
    MissingKeyMaterial(String),

    #[error("signing key `{kid}`: {reason}")]
    InvalidKeyMaterial { kid: String, reason: String },

    #[error("signing key `{0}` has not_after at or before not_before")]
    InvalidValidityWindow(String),

    #[error("no signing key is currently usable for issuing tokens")]
    NoIssuableKey,
}

/// A loaded key.
pub struct SigningKey {
    id: String,
    current: bool,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    encoding: Option<EncodingKey>,
    validation: Arc<ValidationKey>,
    jwk: JsonWebKey,
}

impl SigningKey {
    fn from_config(config: &SigningKeyConfig, position: usize) -> Result<Self, KeyStoreError> {
        let id = config.id.trim();
        if id.is_empty() {
            return Err(KeyStoreError::EmptyKeyId(position));
        }
        if let (Some(not_before), Some(not_after)) = (config.not_before, config.not_after) {
            if not_after <= not_before {
                return Err(KeyStoreError::InvalidValidityWindow(id.to_owned()));
            }
        }

        let private = non_blank(&config.private_key_pem)
            .map(|pem| parse_private_key(id, pem))
            .transpose()?;
        let declared_public = non_blank(&config.public_key_pem)
            .map(|pem| parse_public_key(id, pem))
            .transpose()?;

        let public = match (&private, declared_public) {
            (Some(private), Some(public)) => {
                if public != private.to_public_key() {
                    return Err(invalid(id, "public key does not match private key"));
                }
                public
            }
            (Some(private), None) => private.to_public_key(),
            (None, Some(public)) => public,
            (None, None) => return Err(KeyStoreError::MissingKeyMaterial(id.to_owned())),
        };

        let encoding = private
            .map(|private| {
                let der = private
                    .to_pkcs1_der()
                    .map_err(|err| invalid(id, format!("cannot encode private key: {err}")))?;
                Ok::<_, KeyStoreError>(EncodingKey::from_rsa_der(der.as_bytes()))
            })
            .transpose()?;

        let jwk = JsonWebKey::from_rsa_public(id, &public).with_not_before(config.not_before);
        let decoding = jwk
            .decoding_key()
            .map_err(|err| invalid(id, format!("cannot build verification key: {err}")))?;

        Ok(Self {
            id: id.to_owned(),
            current: config.current,
            not_before: config.not_before,
            not_after: config.not_after,
            encoding,
            validation: Arc::new(ValidationKey::new(id, decoding, config.not_before)),
            jwk,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether configuration flags this key as the one to sign with.
    pub fn is_flagged_current(&self) -> bool {
        self.current
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }

    pub fn can_sign(&self) -> bool {
        self.encoding.is_some()
    }

    pub fn is_within_window(&self, at: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|not_before| at >= not_before)
            && self.not_after.is_none_or(|not_after| at < not_after)
    }

    /// Usable for signing new tokens at `at`.
    pub fn is_issuable_at(&self, at: DateTime<Utc>) -> bool {
        self.can_sign() && self.is_within_window(at)
    }

    pub fn jwk(&self) -> &JsonWebKey {
        &self.jwk
    }

    pub(crate) fn encoding_key(&self) -> Option<&EncodingKey> {
        self.encoding.as_ref()
    }
}

impl core::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("current", &self.current)
            .field("can_sign", &self.can_sign())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|pem| !pem.trim().is_empty())
}

fn invalid(kid: &str, reason: impl Into<String>) -> KeyStoreError {
    KeyStoreError::InvalidKeyMaterial {
        kid: kid.to_owned(),
        reason: reason.into(),
    }
}

fn parse_private_key(kid: &str, pem: &str) -> Result<RsaPrivateKey, KeyStoreError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|err| invalid(kid, format!("unreadable private key PEM: {err}")))
}

fn parse_public_key(kid: &str, pem: &str) -> Result<RsaPublicKey, KeyStoreError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|err| invalid(kid, format!("unreadable public key PEM: {err}")))
}

/// Immutable set of signing keys in configuration order.
#[derive(Debug)]
pub struct SigningKeyStore {
    keys: Vec<SigningKey>,
    index: HashMap<String, usize>,
}

impl SigningKeyStore {
    pub fn from_config(configs: &[SigningKeyConfig]) -> Result<Self, KeyStoreError> {
        if configs.is_empty() {
            return Err(KeyStoreError::NoKeysConfigured);
        }

        let flagged: Vec<String> = configs
            .iter()
            .filter(|config| config.current)
            .map(|config| config.id.trim().to_owned())
            .collect();
        if flagged.len() > 1 {
            return Err(KeyStoreError::MultipleCurrentKeys(flagged));
        }

        let mut keys = Vec::with_capacity(configs.len());
        let mut index = HashMap::with_capacity(configs.len());
        for (position, config) in configs.iter().enumerate() {
            let key = SigningKey::from_config(config, position)?;
            if index.insert(key.id.clone(), position).is_some() {
                return Err(KeyStoreError::DuplicateKeyId(key.id));
            }
            keys.push(key);
        }

        Ok(Self { keys, index })
    }

    /// Key to sign new tokens with right now.
    pub fn current_key(&self) -> Result<&SigningKey, KeyStoreError> {
        self.current_key_at(Utc::now())
    }

    /// Key to sign new tokens with at `now`.
    ///
    /// The flagged key wins when it is issuable. Otherwise the first issuable
    /// key in configuration order is used, which with no flag set is simply
    /// the first configured key.
    pub fn current_key_at(&self, now: DateTime<Utc>) -> Result<&SigningKey, KeyStoreError> {
        if let Some(flagged) = self.keys.iter().find(|key| key.current) {
            if flagged.is_issuable_at(now) {
                return Ok(flagged);
            }
            warn!(
                kid = %flagged.id,
                can_sign = flagged.can_sign(),
                "signing key flagged current is not issuable; falling back to configuration order"
            );
        }

        self.keys
            .iter()
            .find(|key| key.is_issuable_at(now))
            .ok_or(KeyStoreError::NoIssuableKey)
    }

    /// Every key, in configuration order.
    pub fn all_keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.index.get(kid).map(|position| &self.keys[*position])
    }

    /// Public JWKS plus current key id as of `now`.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> DiscoverySnapshot {
        DiscoverySnapshot {
            current_key_id: self.current_key_at(now).ok().map(|key| key.id.clone()),
            generated_at: now,
            jwks: JsonWebKeySet {
                keys: self.keys.iter().map(|key| key.jwk.clone()).collect(),
            },
        }
    }

    pub fn snapshot(&self) -> DiscoverySnapshot {
        self.snapshot_at(Utc::now())
    }
}

impl KeyResolver for SigningKeyStore {
    fn resolve_validation_keys(&self, kid: Option<&str>) -> Vec<Arc<ValidationKey>> {
        match kid {
            Some(kid) => self
                .get(kid)
                .map(|key| vec![Arc::clone(&key.validation)])
                .unwrap_or_default(),
            None => self.keys.iter().map(|key| Arc::clone(&key.validation)).collect(),
        }
    }
}
