//! # Token Verifier
//!
//! Stateless verification of HS256-signed bearer tokens. The verifier owns
//! the decoding key derived from the shared secret and checks exactly one
//! algorithm; tokens advertising anything else in their header are refused
//! before any claims are read.
//!
//! Expiry is compared against a caller-supplied timestamp rather than the
//! library's system clock, so the same token and the same `now` always
//! produce the same outcome. A token whose `exp` equals `now` is already
//! expired.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use thiserror::Error;

use crate::core::types::Claims;

/// Why a presented token was rejected.
///
/// The three cases deliberately stay coarse. Callers map them onto client
/// responses and must not leak which byte of the token was wrong.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// The token could not be parsed into header, payload, and signature,
    /// or its payload is missing required claim fields.
    #[error("token is malformed")]
    Malformed,

    /// The signature does not match the configured secret, or the token
    /// was signed with an algorithm other than HS256.
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The token parsed and verified but its `exp` is not in the future.
    #[error("token has expired")]
    Expired,
}

/// Verifies bearer tokens against a single shared HS256 secret.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier for the given shared secret.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the caller's clock, not the
        // library's SystemTime, so disable the built-in exp validation.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a compact JWT and return its claims.
    ///
    /// `now` is the authoritative clock for the expiry check: a token with
    /// `exp <= now` is rejected as [`VerifyError::Expired`]. Verification
    /// never mutates state, so repeated calls with the same inputs return
    /// the same result.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, VerifyError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    VerifyError::InvalidSignature
                }
                _ => VerifyError::Malformed,
            },
        )?;

        if data.claims.is_expired(now) {
            return Err(VerifyError::Expired);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Plan, Role};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::Duration;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn claims_expiring_at(exp: DateTime<Utc>) -> Claims {
        Claims {
            sub: "user-123".to_string(),
            email: "person@example.com".to_string(),
            role: Role::User,
            plan: Plan::Professional,
            iat: (exp - Duration::hours(1)).timestamp(),
            exp: exp.timestamp(),
        }
    }

    fn mint(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips_every_claim() {
        let now = Utc::now();
        let claims = claims_expiring_at(now + Duration::hours(1));
        let token = mint(&claims, SECRET);

        let verifier = TokenVerifier::new(SECRET);
        let verified = verifier.verify(&token, now).unwrap();

        assert_eq!(verified.sub, "user-123");
        assert_eq!(verified.email, "person@example.com");
        assert_eq!(verified.role, Role::User);
        assert_eq!(verified.plan, Plan::Professional);
        assert_eq!(verified.exp, claims.exp);
        assert_eq!(verified.iat, claims.iat);
    }

    #[test]
    fn verification_is_repeatable() {
        let now = Utc::now();
        let token = mint(&claims_expiring_at(now + Duration::minutes(5)), SECRET);
        let verifier = TokenVerifier::new(SECRET);

        let first = verifier.verify(&token, now).unwrap();
        let second = verifier.verify(&token, now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let token = mint(&claims_expiring_at(now - Duration::seconds(1)), SECRET);

        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(verifier.verify(&token, now), Err(VerifyError::Expired));
    }

    #[test]
    fn token_expiring_exactly_now_is_already_expired() {
        let now = Utc::now();
        let token = mint(&claims_expiring_at(now), SECRET);

        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(verifier.verify(&token, now), Err(VerifyError::Expired));
    }

    #[test]
    fn wrong_secret_is_an_invalid_signature() {
        let now = Utc::now();
        let token = mint(&claims_expiring_at(now + Duration::hours(1)), "other-secret");

        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(
            verifier.verify(&token, now),
            Err(VerifyError::InvalidSignature)
        );
    }

    #[test]
    fn tampered_payload_breaks_the_signature() {
        let now = Utc::now();
        let mut claims = claims_expiring_at(now + Duration::hours(1));
        let token = mint(&claims, SECRET);

        // Re-encode the payload with an upgraded plan but keep the original
        // signature, the classic privilege-escalation attempt.
        claims.plan = Plan::Enterprise;
        let parts: Vec<&str> = token.split('.').collect();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(
            verifier.verify(&forged, now),
            Err(VerifyError::InvalidSignature)
        );
    }

    #[test]
    fn structural_garbage_is_malformed() {
        let verifier = TokenVerifier::new(SECRET);
        let now = Utc::now();

        for garbage in ["", "not-a-token", "a.b", "a.b.c.d", "....."] {
            assert_eq!(
                verifier.verify(garbage, now),
                Err(VerifyError::Malformed),
                "expected {:?} to be malformed",
                garbage
            );
        }
    }

    #[test]
    fn payload_missing_required_fields_is_malformed() {
        let now = Utc::now();
        let token = encode(
            &Header::default(),
            &serde_json::json!({ "sub": "user-123", "exp": (now + Duration::hours(1)).timestamp() }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(verifier.verify(&token, now), Err(VerifyError::Malformed));
    }

    #[test]
    fn unknown_payload_fields_are_ignored() {
        let now = Utc::now();
        let token = encode(
            &Header::default(),
            &serde_json::json!({
                "sub": "user-123",
                "email": "person@example.com",
                "role": "admin",
                "plan": "enterprise",
                "iat": now.timestamp(),
                "exp": (now + Duration::hours(1)).timestamp(),
                "issuer": "legacy-auth",
                "scopes": ["read", "write"],
            }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let verifier = TokenVerifier::new(SECRET);
        let verified = verifier.verify(&token, now).unwrap();
        assert_eq!(verified.role, Role::Admin);
        assert_eq!(verified.plan, Plan::Enterprise);
    }

    #[test]
    fn non_hs256_algorithm_is_refused() {
        let now = Utc::now();
        let claims = claims_expiring_at(now + Duration::hours(1));
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(
            verifier.verify(&token, now),
            Err(VerifyError::InvalidSignature)
        );
    }
}
