//! Credential issuance and login secret checks.
//!
//! Credentials are compact HS256 JWTs (`header.claims.signature`, base64url
//! without padding) carrying `sub`, `iat` and `exp`. Nothing is stored:
//! verification depends only on the token, the signing key and the clock.
//!
//! Login secrets, when checked at all, are compared against SHA-256 hashes
//! from configuration so plaintext secrets never sit in config files.

use crate::config::{AuthConfig, DroneCredential, MAX_TOKEN_TTL_SECS};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed credential: {0}")]
    Malformed(String),

    #[error("credential signature mismatch")]
    BadSignature,

    #[error("credential expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("invalid signing key")]
    InvalidKey,

    #[error("credential lifetime must be between 1 and {max_secs} seconds")]
    InvalidLifetime { max_secs: u64 },
}

/// Signed claims carried by a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity the credential was issued to.
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds. Valid strictly before this instant.
    pub exp: i64,
}

/// An issued credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    token: String,
}

impl Credential {
    /// Returns the signed wire representation.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns whether the credential is no longer valid at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns the time left before expiry, zero if already expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Mints and verifies credentials with a process-wide key.
#[derive(Clone)]
pub struct TokenIssuer {
    mac: HmacSha256,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl_secs", &self.ttl.num_seconds())
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Creates an issuer signing with `secret`.
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Result<Self, TokenError> {
        let mac =
            HmacSha256::new_from_slice(secret.as_ref()).map_err(|_| TokenError::InvalidKey)?;
        if ttl.as_secs() > MAX_TOKEN_TTL_SECS {
            return Err(TokenError::InvalidLifetime {
                max_secs: MAX_TOKEN_TTL_SECS,
            });
        }
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| TokenError::InvalidLifetime {
            max_secs: MAX_TOKEN_TTL_SECS,
        })?;
        Ok(Self { mac, ttl })
    }

    /// Creates an issuer from auth configuration.
    pub fn from_config(config: &AuthConfig) -> Result<Self, TokenError> {
        Self::new(config.jwt_secret.as_bytes(), config.token_ttl())
    }

    /// Returns the credential lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(Duration::ZERO)
    }

    /// Issues a credential for `identity` valid from now.
    pub fn issue(&self, identity: &str) -> Credential {
        self.issue_at(identity, Utc::now())
    }

    /// Issues a credential as if the current time were `now`.
    pub fn issue_at(&self, identity: &str, now: DateTime<Utc>) -> Credential {
        let iat = now.timestamp();
        let exp = iat + self.ttl.num_seconds();

        let claims = serde_json::json!({ "sub": identity, "iat": iat, "exp": exp });
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(JWT_HEADER),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes()));

        Credential {
            subject: identity.to_string(),
            issued_at: timestamp(iat),
            expires_at: timestamp(exp),
            token: format!("{}.{}", signing_input, signature),
        }
    }

    /// Verifies a token against the current time and returns its subject.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.verify_at(token, Utc::now()).map(|claims| claims.sub)
    }

    /// Verifies a token as if the current time were `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => return Err(TokenError::Malformed("expected three segments".to_string())),
            };

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| TokenError::Malformed(format!("signature: {}", e)))?;

        let mut mac = self.mac.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let header: serde_json::Value = decode_segment(header_b64, "header")?;
        if header["alg"] != "HS256" {
            return Err(TokenError::Malformed(format!(
                "unsupported algorithm {}",
                header["alg"]
            )));
        }

        let claims: Claims = decode_segment(claims_b64, "claims")?;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired {
                expired_at: timestamp(claims.exp),
            });
        }

        Ok(claims)
    }

    fn sign(&self, signing_input: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(signing_input);
        mac.finalize().into_bytes().to_vec()
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(format!("{}: {}", what, e)))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("{}: {}", what, e)))
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Checks LOGIN secrets against configured SHA-256 hashes.
#[derive(Debug, Clone, Default)]
pub struct SecretValidator {
    /// identity -> SHA-256 hex of the secret.
    hashes: HashMap<String, String>,
}

impl SecretValidator {
    /// Creates a validator from configured drone credentials.
    pub fn new(drones: impl IntoIterator<Item = DroneCredential>) -> Self {
        Self {
            hashes: drones
                .into_iter()
                .map(|d| (d.identity, d.secret_hash.to_lowercase()))
                .collect(),
        }
    }

    /// Returns the number of known identities.
    pub fn identity_count(&self) -> usize {
        self.hashes.len()
    }

    /// Returns whether `secret` is the configured secret for `identity`.
    pub fn validate(&self, identity: &str, secret: &str) -> bool {
        match self.hashes.get(identity) {
            Some(expected) => *expected == Self::hash_secret(secret),
            None => false,
        }
    }

    /// Hashes a secret using SHA-256, returning a lowercase hex string.
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THIRTY_MINUTES: Duration = Duration::from_secs(30 * 60);

    fn issuer() -> TokenIssuer {
        TokenIssuer::new("test-secret", THIRTY_MINUTES).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_issue_embeds_identity_and_expiry() {
        let credential = issuer().issue_at("drone1", at(1_000_000));

        assert_eq!(credential.subject, "drone1");
        assert_eq!(credential.issued_at, at(1_000_000));
        assert_eq!(credential.expires_at, at(1_000_000 + 1800));
        assert_eq!(credential.token().split('.').count(), 3);
    }

    #[test]
    fn test_verify_roundtrip() {
        let issuer = issuer();
        let credential = issuer.issue("drone1");
        assert_eq!(issuer.verify(credential.token()).unwrap(), "drone1");
    }

    #[test]
    fn test_expiry_boundary() {
        let issuer = issuer();
        let credential = issuer.issue_at("drone1", at(1_000_000));
        let expiry = 1_000_000 + 1800;

        let claims = issuer
            .verify_at(credential.token(), at(expiry - 1))
            .unwrap();
        assert_eq!(claims.sub, "drone1");
        assert_eq!(claims.exp, expiry);

        assert_eq!(
            issuer.verify_at(credential.token(), at(expiry)),
            Err(TokenError::Expired {
                expired_at: at(expiry)
            })
        );
        assert!(credential.is_expired_at(at(expiry)));
        assert!(!credential.is_expired_at(at(expiry - 1)));
    }

    #[test]
    fn test_lifetime_bounds() {
        assert!(TokenIssuer::new("key", Duration::from_secs(MAX_TOKEN_TTL_SECS)).is_ok());

        let err = TokenIssuer::new("key", Duration::from_secs(u64::MAX)).unwrap_err();
        assert_eq!(
            err,
            TokenError::InvalidLifetime {
                max_secs: MAX_TOKEN_TTL_SECS
            }
        );
        assert!(err.to_string().contains("lifetime"));
    }

    #[test]
    fn test_remaining_lifetime() {
        let credential = issuer().issue_at("drone1", at(1_000_000));
        assert_eq!(
            credential.remaining_at(at(1_000_000 + 1700)),
            Duration::from_secs(100)
        );
        assert_eq!(credential.remaining_at(at(2_000_000)), Duration::ZERO);
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let issuer = issuer();
        let credential = issuer.issue_at("drone1", at(1_000_000));
        let parts: Vec<_> = credential.token().split('.').collect();

        let forged_claims = URL_SAFE_NO_PAD
            .encode(r#"{"sub":"drone2","iat":1000000,"exp":99999999999}"#);
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);

        assert_eq!(
            issuer.verify_at(&forged, at(1_000_001)),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let credential = issuer().issue("drone1");
        let other = TokenIssuer::new("other-secret", THIRTY_MINUTES).unwrap();
        assert_eq!(
            other.verify(credential.token()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let issuer = issuer();
        for token in ["", "abc", "a.b", "a.b.c.d", "a.b.!!!"] {
            assert!(
                matches!(issuer.verify(token), Err(TokenError::Malformed(_))),
                "token {:?} should be malformed",
                token
            );
        }
        // Valid base64 but wrong signature
        assert_eq!(issuer.verify("a.b.c2ln"), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_hash_secret() {
        let hash = SecretValidator::hash_secret("333");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, SecretValidator::hash_secret("333"));
        assert_ne!(hash, SecretValidator::hash_secret("334"));
    }

    #[test]
    fn test_secret_validation() {
        let validator = SecretValidator::new(vec![DroneCredential {
            identity: "drone1".to_string(),
            secret_hash: SecretValidator::hash_secret("333").to_uppercase(),
        }]);

        assert_eq!(validator.identity_count(), 1);
        assert!(validator.validate("drone1", "333"));
        assert!(!validator.validate("drone1", "wrong"));
        assert!(!validator.validate("drone2", "333"));
    }
}
