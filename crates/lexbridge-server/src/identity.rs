//! Identity verification against the token issuer's Ed25519 key.

use axum::http::HeaderMap;
use chrono::Utc;
use tracing::debug;

use lexbridge_shared::error::AuthError;
use lexbridge_shared::identity::{
    decode_credential, verify_identity_token, Identity, IdentityVerifier,
};

/// Verifies credentials signed by the configured issuer.
#[derive(Clone)]
pub struct TokenVerifier {
    issuer_pubkey: [u8; 32],
}

impl TokenVerifier {
    pub fn new(issuer_pubkey: [u8; 32]) -> Self {
        Self { issuer_pubkey }
    }
}

impl IdentityVerifier for TokenVerifier {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let token = decode_credential(credential)?;
        let identity = verify_identity_token(&token, &self.issuer_pubkey, Utc::now())?;
        debug!(user = %identity.user_id, role = %identity.role, "credential verified");
        Ok(identity)
    }
}

/// The credential a request carries: `Authorization: Bearer <c>` wins over
/// a `token` query parameter.
pub fn credential_from(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());

    bearer
        .or(query_token.filter(|t| !t.is_empty()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use lexbridge_shared::identity::{create_identity_token, encode_credential};
    use lexbridge_shared::types::{Role, UserId};
    use rand::rngs::OsRng;

    fn issue(key: &SigningKey, expires_in: Duration) -> (Identity, String) {
        let identity = Identity {
            user_id: UserId::new(),
            role: Role::Citizen,
            active: true,
        };
        let token = create_identity_token(identity, Utc::now() + expires_in, key);
        (identity, encode_credential(&token))
    }

    #[test]
    fn test_valid_credential() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = TokenVerifier::new(key.verifying_key().to_bytes());
        let (identity, credential) = issue(&key, Duration::hours(1));
        assert_eq!(verifier.verify(&credential).unwrap(), identity);
    }

    #[test]
    fn test_expired_credential() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = TokenVerifier::new(key.verifying_key().to_bytes());
        let (_, credential) = issue(&key, Duration::seconds(-5));
        assert_eq!(verifier.verify(&credential), Err(AuthError::Expired));
    }

    #[test]
    fn test_foreign_issuer() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let verifier = TokenVerifier::new(other.verifying_key().to_bytes());
        let (_, credential) = issue(&key, Duration::hours(1));
        assert!(verifier.verify(&credential).is_err());
        assert!(verifier.verify("garbage").is_err());
    }

    #[test]
    fn test_credential_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(credential_from(&headers, Some("q")), Some("q".to_string()));
        assert_eq!(credential_from(&headers, Some("")), None);

        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(credential_from(&headers, Some("q")), Some("abc".to_string()));
    }
}
