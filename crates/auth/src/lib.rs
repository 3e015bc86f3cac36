//! `tessera-auth`: distributed token trust. Signing keys, issuance,
//! publication and stateless validation.
//!
//! This crate is intentionally decoupled from HTTP and storage. The identity
//! service owns a [`SigningKeyStore`] and a [`TokenIssuer`]; every other
//! service only needs a [`KeyResolver`] and an [`Rs256JwtValidator`].

pub mod authorize;
pub mod claims;
pub mod issuer;
pub mod jwk;
pub mod keys;
pub mod permissions;
pub mod roles;
pub mod validator;

pub use authorize::{AuthzError, Principal, authorize};
pub use claims::{AccessClaims, TokenValidationError, normalize_claim_values, validate_claims};
pub use issuer::{IssueError, IssuedToken, IssuerSettings, TokenIssuer, TokenRequest};
pub use jwk::{DiscoverySnapshot, JsonWebKey, JsonWebKeySet, ResolvedKeySet};
pub use keys::{KeyStoreError, SigningKey, SigningKeyConfig, SigningKeyStore};
pub use permissions::Permission;
pub use roles::Role;
pub use validator::{JwtValidator, KeyResolver, Rs256JwtValidator, ValidationKey, ValidationSettings};

#[cfg(test)]
pub(crate) mod test_keys {
    use rsa::RsaPublicKey;
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;

    use crate::SigningKeyConfig;

    pub const K1_PRIVATE: &str = include_str!("../tests/fixtures/k1_private.pem");
    pub const K1_PUBLIC: &str = include_str!("../tests/fixtures/k1_public.pem");
    pub const K2_PRIVATE: &str = include_str!("../tests/fixtures/k2_private.pem");
    pub const K2_PUBLIC: &str = include_str!("../tests/fixtures/k2_public.pem");

    pub fn config(id: &str, private_pem: &str, current: bool) -> SigningKeyConfig {
        SigningKeyConfig {
            id: id.into(),
            current,
            private_key_pem: Some(private_pem.into()),
            ..Default::default()
        }
    }

    pub fn k1_public() -> RsaPublicKey {
        RsaPublicKey::from_public_key_pem(K1_PUBLIC).unwrap()
    }

    pub fn k2_public() -> RsaPublicKey {
        RsaPublicKey::from_pkcs1_pem(K2_PUBLIC).unwrap()
    }
}
