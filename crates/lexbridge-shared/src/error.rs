use thiserror::Error;

/// Why a presented credential could not be turned into an identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing credential")]
    MissingCredential,

    #[error("Malformed credential: {0}")]
    Malformed(String),

    #[error("Credential expired")]
    Expired,

    #[error("Invalid credential signature")]
    BadSignature,

    #[error("Invalid issuer key")]
    InvalidIssuerKey,
}

/// A stored or transmitted enum value that does not name any variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
