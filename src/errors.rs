//! Typed error hierarchy for taskboard.
//!
//! Two top-level enums cover the two halves of the system:
//! - `ServiceError`: task service, auth gateway and store failures (server side)
//! - `ClientError`: failures observed by the board client when calling the service

use thiserror::Error;
use uuid::Uuid;

/// Errors from the task service and its auth gateway.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Missing or invalid bearer credential")]
    Unauthorized,

    /// Also used when the task exists but belongs to someone else, so that
    /// existence is never leaked across owners.
    #[error("Task {id} not found")]
    TaskNotFound { id: Uuid },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Email {email} is already registered")]
    EmailTaken { email: String },

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced to the board client by a `TaskApi` implementation.
///
/// Every variant is recoverable: the board converts them into notifications.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Credential missing, expired or revoked. The UI should ask for a new login.
    #[error("Authentication required: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected by server: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl ClientError {
    /// True when the failure means the stored credential is no longer usable.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_task_not_found_carries_id() {
        let id = Uuid::new_v4();
        let err = ServiceError::TaskNotFound { id };
        match &err {
            ServiceError::TaskNotFound { id: got } => assert_eq!(*got, id),
            _ => panic!("Expected TaskNotFound"),
        }
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn service_error_converts_from_anyhow() {
        let err: ServiceError = anyhow::anyhow!("disk full").into();
        match &err {
            ServiceError::Other(inner) => assert_eq!(inner.to_string(), "disk full"),
            _ => panic!("Expected Other"),
        }
    }

    #[test]
    fn service_error_variants_are_distinct() {
        let unauthorized = ServiceError::Unauthorized;
        let invalid = ServiceError::InvalidCredentials;
        assert!(matches!(unauthorized, ServiceError::Unauthorized));
        assert!(!matches!(invalid, ServiceError::Unauthorized));
    }

    #[test]
    fn client_error_auth_is_flagged() {
        assert!(ClientError::Auth("expired".into()).is_auth());
        assert!(!ClientError::NotFound("x".into()).is_auth());
        assert!(!ClientError::Network("refused".into()).is_auth());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ServiceError::LockPoisoned);
        assert_std_error(&ClientError::Unknown("boom".into()));
    }
}
