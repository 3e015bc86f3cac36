use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{EncodingKey, Header};

use tessera_auth::{
    IssuerSettings, JsonWebKeySet, JwtValidator, KeyStoreError, ResolvedKeySet, Rs256JwtValidator,
    SigningKeyConfig, SigningKeyStore, TokenIssuer, TokenRequest, TokenValidationError, ValidationSettings,
};
use tessera_core::{AccountId, EmployeeId};

const K1_PRIVATE: &str = include_str!("fixtures/k1_private.pem");
const K1_PUBLIC: &str = include_str!("fixtures/k1_public.pem");
const K2_PRIVATE: &str = include_str!("fixtures/k2_private.pem");
const K3_PRIVATE: &str = include_str!("fixtures/k3_private.pem");

fn private(id: &str, pem: &str, current: bool) -> SigningKeyConfig {
    SigningKeyConfig {
        id: id.into(),
        current,
        private_key_pem: Some(pem.into()),
        ..Default::default()
    }
}

fn public(id: &str, pem: &str) -> SigningKeyConfig {
    SigningKeyConfig {
        id: id.into(),
        public_key_pem: Some(pem.into()),
        ..Default::default()
    }
}

fn store(keys: &[SigningKeyConfig]) -> Arc<SigningKeyStore> {
    Arc::new(SigningKeyStore::from_config(keys).unwrap())
}

fn issuer(keys: Arc<SigningKeyStore>) -> TokenIssuer {
    TokenIssuer::new(keys, IssuerSettings::default()).unwrap()
}

fn validator(keys: Arc<SigningKeyStore>) -> Rs256JwtValidator<Arc<SigningKeyStore>> {
    Rs256JwtValidator::new(keys, ValidationSettings::new("tessera-identity", "tessera"))
}

fn request() -> TokenRequest {
    let mut request = TokenRequest::new(AccountId::parse("acc-1").unwrap(), "Ada Lovelace");
    request.email = Some("ada@x".into());
    request.employee_id = Some(EmployeeId::parse("E1").unwrap());
    request.roles = vec!["Employee".into(), " employee ".into(), "HR Admin".into()];
    request.permissions = vec!["hr.employees.read".into(), "".into()];
    request
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

#[test]
fn freshly_issued_token_validates_with_its_claims() {
    let keys = store(&[private("k1", K1_PRIVATE, true)]);
    let token = issuer(keys.clone()).issue_at(&request(), noon()).unwrap();

    assert_eq!(token.key_id, "k1");
    assert_eq!(token.expires_at, noon() + Duration::minutes(60));
    assert_eq!(token.refresh_expires_at, noon() + Duration::days(7));
    assert!(token.refresh_token.len() >= 85);

    let claims = validator(keys).validate(&token.access_token, noon()).unwrap();
    assert_eq!(claims.sub.as_str(), "acc-1");
    assert_eq!(claims.email.as_deref(), Some("ada@x"));
    assert_eq!(claims.employee_id.as_ref().map(EmployeeId::as_str), Some("E1"));
    let roles: Vec<&str> = claims.roles.iter().map(|r| r.as_str()).collect();
    assert_eq!(roles, ["Employee", "HR Admin"]);
    assert_eq!(claims.permissions.len(), 1);
}

#[test]
fn header_carries_the_signing_key_id() {
    let keys = store(&[private("k1", K1_PRIVATE, true)]);
    let token = issuer(keys).issue_at(&request(), noon()).unwrap();
    let header = jsonwebtoken::decode_header(&token.access_token).unwrap();
    assert_eq!(header.kid.as_deref(), Some("k1"));
    assert_eq!(header.alg, jsonwebtoken::Algorithm::RS256);
}

#[test]
fn token_is_rejected_one_second_after_expiry() {
    let keys = store(&[private("k1", K1_PRIVATE, true)]);
    let token = issuer(keys.clone()).issue_at(&request(), noon()).unwrap();
    let validator = validator(keys);

    assert!(validator.validate(&token.access_token, token.expires_at).is_ok());
    assert_eq!(
        validator.validate(&token.access_token, token.expires_at + Duration::seconds(1)),
        Err(TokenValidationError::Expired)
    );
}

#[test]
fn rotation_keeps_old_tokens_valid_and_signs_new_ones_with_the_new_key() {
    let before = store(&[private("k1", K1_PRIVATE, true)]);
    let old_token = issuer(before).issue_at(&request(), noon()).unwrap();

    let after = store(&[private("k2", K2_PRIVATE, true), private("k1", K1_PRIVATE, false)]);
    let new_token = issuer(after.clone())
        .issue_at(&request(), noon() + Duration::minutes(5))
        .unwrap();
    assert_eq!(new_token.key_id, "k2");

    let validator = validator(after);
    let later = noon() + Duration::minutes(10);
    assert!(validator.validate(&old_token.access_token, later).is_ok());
    assert!(validator.validate(&new_token.access_token, later).is_ok());
}

#[test]
fn rotated_out_kid_still_validates_through_the_all_keys_fallback() {
    let token = issuer(store(&[private("k1", K1_PRIVATE, true)]))
        .issue_at(&request(), noon())
        .unwrap();

    // k1's public half is still published, but under a new id.
    let republished = store(&[private("k2", K2_PRIVATE, true), public("k1-archived", K1_PUBLIC)]);
    assert!(validator(republished).validate(&token.access_token, noon()).is_ok());
}

#[test]
fn fully_removed_key_fails_validation() {
    let token = issuer(store(&[private("k1", K1_PRIVATE, true)]))
        .issue_at(&request(), noon())
        .unwrap();

    let removed = store(&[private("k2", K2_PRIVATE, true)]);
    assert_eq!(
        validator(removed).validate(&token.access_token, noon()),
        Err(TokenValidationError::UnknownKey)
    );
}

#[test]
fn wrong_material_under_a_known_kid_is_an_invalid_signature() {
    let token = issuer(store(&[private("k1", K1_PRIVATE, true)]))
        .issue_at(&request(), noon())
        .unwrap();

    let impostor = store(&[private("k1", K3_PRIVATE, true)]);
    assert_eq!(
        validator(impostor).validate(&token.access_token, noon()),
        Err(TokenValidationError::InvalidSignature)
    );
}

#[test]
fn issuer_and_audience_must_be_trusted() {
    let keys = store(&[private("k1", K1_PRIVATE, true)]);
    let foreign = TokenIssuer::new(
        keys.clone(),
        IssuerSettings {
            issuer: "someone-else".into(),
            audience: "elsewhere".into(),
            ..IssuerSettings::default()
        },
    )
    .unwrap();
    let token = foreign.issue_at(&request(), noon()).unwrap();

    assert_eq!(
        validator(keys.clone()).validate(&token.access_token, noon()),
        Err(TokenValidationError::InvalidIssuer)
    );

    let issuer_only = Rs256JwtValidator::new(
        keys.clone(),
        ValidationSettings::new("tessera-identity", "tessera").with_additional_issuers(["someone-else"]),
    );
    assert_eq!(
        issuer_only.validate(&token.access_token, noon()),
        Err(TokenValidationError::InvalidAudience)
    );

    let both = Rs256JwtValidator::new(
        keys,
        ValidationSettings::new("tessera-identity", "tessera")
            .with_additional_issuers(["someone-else", " "])
            .with_additional_audiences(["elsewhere"]),
    );
    assert!(both.validate(&token.access_token, noon()).is_ok());
    assert_eq!(both.settings().issuers().len(), 2);
}

#[test]
fn token_signed_before_the_key_matured_is_rejected() {
    let issuing = store(&[private("k2", K2_PRIVATE, true)]);
    let token = issuer(issuing).issue_at(&request(), noon()).unwrap();

    let mut scheduled = private("k2", K2_PRIVATE, true);
    scheduled.not_before = Some(noon() + Duration::hours(1));
    let validating = store(&[private("k1", K1_PRIVATE, false), scheduled]);

    assert_eq!(
        validator(validating).validate(&token.access_token, noon() + Duration::minutes(1)),
        Err(TokenValidationError::KeyNotMature)
    );
}

#[test]
fn published_key_set_carries_maturity_to_remote_validators() {
    let issuing = store(&[private("k2", K2_PRIVATE, true)]);
    let token = issuer(issuing).issue_at(&request(), noon()).unwrap();

    let mut scheduled = private("k2", K2_PRIVATE, true);
    scheduled.not_before = Some(noon() + Duration::hours(1));
    let identity = store(&[scheduled]);

    // What a validating service sees after fetching the discovery document.
    let wire = serde_json::to_string(&identity.snapshot_at(noon()).jwks).unwrap();
    let fetched: JsonWebKeySet = serde_json::from_str(&wire).unwrap();
    let remote = Rs256JwtValidator::new(
        ResolvedKeySet::from_jwks(&fetched),
        ValidationSettings::new("tessera-identity", "tessera"),
    );

    let at = noon() + Duration::minutes(1);
    assert_eq!(
        validator(identity).validate(&token.access_token, at),
        Err(TokenValidationError::KeyNotMature)
    );
    assert_eq!(
        remote.validate(&token.access_token, at),
        Err(TokenValidationError::KeyNotMature)
    );
}

#[test]
fn tokens_are_not_valid_before_issue_time() {
    let keys = store(&[private("k1", K1_PRIVATE, true)]);
    let token = issuer(keys.clone()).issue_at(&request(), noon()).unwrap();
    assert_eq!(
        validator(keys).validate(&token.access_token, noon() - Duration::seconds(1)),
        Err(TokenValidationError::NotYetValid)
    );
}

#[test]
fn symmetric_and_garbage_tokens_are_rejected() {
    let keys = store(&[private("k1", K1_PRIVATE, true)]);
    let validator = validator(keys);

    let hs256 = jsonwebtoken::encode(
        &Header::default(),
        &serde_json::json!({ "sub": "acc-1", "exp": 4_000_000_000i64 }),
        &EncodingKey::from_secret(b"shared"),
    )
    .unwrap();
    assert!(matches!(
        validator.validate(&hs256, noon()),
        Err(TokenValidationError::UnsupportedAlgorithm(_))
    ));
    assert!(matches!(
        validator.validate("not.a.token", noon()),
        Err(TokenValidationError::Malformed(_))
    ));
}

#[test]
fn tampered_payload_fails_signature_check() {
    let keys = store(&[private("k1", K1_PRIVATE, true)]);
    let token = issuer(keys.clone()).issue_at(&request(), noon()).unwrap();

    let mut parts: Vec<String> = token.access_token.split('.').map(str::to_owned).collect();
    let other = issuer(keys.clone())
        .issue_at(&TokenRequest::new(AccountId::parse("acc-2").unwrap(), "Eve"), noon())
        .unwrap();
    parts[1] = other.access_token.split('.').nth(1).unwrap().to_owned();

    assert_eq!(
        validator(keys).validate(&parts.join("."), noon()),
        Err(TokenValidationError::InvalidSignature)
    );
}

#[test]
fn issuer_refuses_to_start_without_a_signing_key() {
    let keys = store(&[public("k1", K1_PUBLIC)]);
    let err = TokenIssuer::new(keys, IssuerSettings::default()).unwrap_err();
    assert!(matches!(err, tessera_auth::IssueError::KeyStore(KeyStoreError::NoIssuableKey)));
}
