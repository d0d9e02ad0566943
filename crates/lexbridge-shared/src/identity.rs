use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::{Role, UserId};

/// Who is behind a live connection or an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
    pub active: bool,
}

/// Turns a bearer credential into an [`Identity`].
///
/// Credential issuance lives outside this system; the gateway and the HTTP
/// layer only ever consume this trait.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

// Token signed by the identity issuer, presented by clients as their credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityToken {
    pub user_id: UserId,
    pub role: Role,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl IdentityToken {
    // payload = user_id (16 bytes) || role || active || expires_at (rfc3339)
    fn signing_payload(user_id: &UserId, role: Role, active: bool, expires_at: &DateTime<Utc>) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(user_id.0.as_bytes());
        payload.extend_from_slice(role.as_str().as_bytes());
        payload.push(active as u8);
        payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
        payload
    }

    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            role: self.role,
            active: self.active,
        }
    }
}

/// Encode a token as the opaque string clients send (URL-safe base64 of JSON).
pub fn encode_credential(token: &IdentityToken) -> String {
    // Serializing plain data with derived impls cannot fail.
    let json = serde_json::to_vec(token).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

pub fn decode_credential(credential: &str) -> Result<IdentityToken, AuthError> {
    let credential = credential.trim();
    if credential.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(credential)
        .map_err(|e| AuthError::Malformed(format!("base64: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed(format!("json: {e}")))
}

/// Check expiry and signature of a token against the issuer's public key.
///
/// The `active` flag is carried through untouched: an inactive but otherwise
/// valid identity is still an identity, and callers decide what it may do.
pub fn verify_identity_token(
    token: &IdentityToken,
    issuer_pubkey: &[u8; 32],
    now: DateTime<Utc>,
) -> Result<Identity, AuthError> {
    if now > token.expires_at {
        return Err(AuthError::Expired);
    }

    let verifying_key =
        VerifyingKey::from_bytes(issuer_pubkey).map_err(|_| AuthError::InvalidIssuerKey)?;

    let payload =
        IdentityToken::signing_payload(&token.user_id, token.role, token.active, &token.expires_at);

    let signature = Signature::from_slice(&token.signature).map_err(|_| AuthError::BadSignature)?;

    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| AuthError::BadSignature)?;

    Ok(token.identity())
}

/// Issue a token. Used by the issuer side and by tests.
pub fn create_identity_token(
    identity: Identity,
    expires_at: DateTime<Utc>,
    issuer_signing_key: &ed25519_dalek::SigningKey,
) -> IdentityToken {
    use ed25519_dalek::Signer;

    let payload =
        IdentityToken::signing_payload(&identity.user_id, identity.role, identity.active, &expires_at);
    let signature = issuer_signing_key.sign(&payload);

    IdentityToken {
        user_id: identity.user_id,
        role: identity.role,
        active: identity.active,
        expires_at,
        signature: signature.to_bytes().to_vec(),
    }
}
