//! Domain error representation shared across adapters.
//!
//! Keep this module free from HTTP or framework concerns so the same error
//! shape can be mapped by any adapter (HTTP handlers, queue workers, webhook
//! processing).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request is malformed or fails validation.
    InvalidRequest,
    /// Authentication failed or is missing.
    Unauthorized,
    /// The requested resource does not exist.
    NotFound,
    /// The request conflicts with current state.
    Conflict,
    /// A downstream dependency is unavailable.
    ServiceUnavailable,
    /// An unexpected error occurred on the server.
    InternalError,
}

/// Domain error payload consumed by adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct Error {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl Error {
    /// Create a new error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message returned to clients.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Supplementary error details for clients.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Attach structured details to the error.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convenience constructor for [`ErrorCode::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Convenience constructor for [`ErrorCode::Unauthorized`].
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Convenience constructor for [`ErrorCode::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Convenience constructor for [`ErrorCode::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Convenience constructor for [`ErrorCode::ServiceUnavailable`].
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Convenience constructor for [`ErrorCode::InternalError`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Redact server-side details so the payload is safe to expose to clients.
    ///
    /// Internal errors keep their code but replace the message with a generic
    /// explanation and drop structured details.
    pub fn redacted_for_clients(&self) -> Self {
        if !matches!(self.code, ErrorCode::InternalError) {
            return self.clone();
        }
        Self {
            code: self.code,
            message: "Internal server error".to_string(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn constructors_set_expected_codes() {
        assert_eq!(Error::invalid_request("x").code(), ErrorCode::InvalidRequest);
        assert_eq!(Error::not_found("x").code(), ErrorCode::NotFound);
        assert_eq!(
            Error::service_unavailable("x").code(),
            ErrorCode::ServiceUnavailable
        );
        assert_eq!(Error::internal("x").code(), ErrorCode::InternalError);
    }

    #[rstest]
    fn internal_errors_are_redacted_for_clients() {
        let error = Error::internal("database password rejected")
            .with_details(json!({ "host": "db-primary" }));

        let redacted = error.redacted_for_clients();

        assert_eq!(redacted.message(), "Internal server error");
        assert!(redacted.details().is_none());
    }

    #[rstest]
    fn non_internal_errors_pass_through_redaction() {
        let error = Error::not_found("no such contact");

        let redacted = error.redacted_for_clients();

        assert_eq!(redacted, error);
    }
}
