use thiserror::Error;

use lexbridge_store::StoreError;

/// Failures of the matching state machines.
///
/// Precondition and access errors are final. [`CaseError::Conflict`] and
/// [`CaseError::StoreUnavailable`] are transient and may be retried by the
/// caller.
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("Not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    #[error("An active proposal between these parties already exists")]
    AlreadyOffered,

    #[error("Already resolved")]
    AlreadyResolved,

    #[error("Case is not accepting proposals")]
    NotAvailable,

    #[error("Connection is blocked")]
    Blocked,

    #[error("Concurrent update, retries exhausted")]
    Conflict,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl CaseError {
    /// Stable machine-readable code, used on the wire and in API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CaseError::NotFound => "not_found",
            CaseError::Forbidden(_) => "forbidden",
            CaseError::AlreadyOffered => "already_offered",
            CaseError::AlreadyResolved => "already_resolved",
            CaseError::NotAvailable => "not_available",
            CaseError::Blocked => "blocked",
            CaseError::Conflict => "conflict",
            CaseError::StoreUnavailable(_) => "store_unavailable",
            CaseError::InvalidInput(_) => "invalid_input",
            CaseError::Store(_) => "internal",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CaseError::Conflict | CaseError::StoreUnavailable(_))
    }
}

impl From<StoreError> for CaseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CaseError::NotFound,
            StoreError::Conflict { .. } => CaseError::Conflict,
            StoreError::Unavailable(reason) => CaseError::StoreUnavailable(reason),
            StoreError::Poisoned => CaseError::StoreUnavailable(e.to_string()),
            other => CaseError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        assert!(matches!(CaseError::from(StoreError::NotFound), CaseError::NotFound));
        assert!(matches!(
            CaseError::from(StoreError::Conflict { expected: 2 }),
            CaseError::Conflict
        ));
        let unavailable = CaseError::from(StoreError::Unavailable("timed out".into()));
        assert_eq!(unavailable.code(), "store_unavailable");
        assert!(unavailable.is_transient());
        assert!(!CaseError::AlreadyResolved.is_transient());
    }
}
