//! Error types and retry classification for the tracker client.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`crate::TrackerClient`] operations.
#[derive(Error, Debug)]
pub enum RestError {
    /// The remote returned 404 for the addressed resource. Kept distinct
    /// from other statuses because callers routinely treat "not there
    /// yet" as a degraded-but-fine outcome.
    #[error("{operation}: resource not found")]
    NotFound { operation: String },

    /// A non-success status other than 404.
    #[error("{operation}: status {status}: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
        /// Response headers, kept for failure reports (rate-limit
        /// windows and the like live here).
        headers: Vec<(String, String)>,
    },

    /// Transport-level failure.
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote replied with a body we could not decode.
    #[error("{operation}: invalid response: {message}")]
    InvalidResponse { operation: String, message: String },
}

impl RestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RestError::NotFound { .. })
    }

    /// Whether the response body names the given field, the way
    /// validation errors do.
    pub fn mentions_field(&self, field: &str) -> bool {
        match self {
            RestError::Status { message, .. } => message.contains(&format!("\"{field}\"")),
            _ => false,
        }
    }
}

/// What to do about a failed attempt. Classification is a pure function
/// over the error value so it stays trivially testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry after the fixed delay.
    Transient,
    /// Give up and surface the error to the caller.
    Terminal,
}

/// Default delay between retry attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

pub fn classify(error: &RestError) -> RetryClass {
    match error {
        // Not found is final; the caller decides whether that is fatal.
        RestError::NotFound { .. } => RetryClass::Terminal,
        RestError::Status { status, message, .. } => match *status {
            // Credential/token races resolve themselves; give them a
            // couple of seconds.
            401 | 403 => RetryClass::Transient,
            // The remote's own quota rejection: retrying here would
            // amplify load. Admission control upstream of the client is
            // the mitigation.
            429 => RetryClass::Terminal,
            // A 4xx naming the assignee field means we tried to assign
            // an inactive or misconfigured user; resubmitting the same
            // payload cannot succeed.
            400..=499 if message.contains("\"assignee\"") => RetryClass::Terminal,
            500..=599 => RetryClass::Transient,
            _ => RetryClass::Terminal,
        },
        RestError::Network(_) | RestError::InvalidResponse { .. } => RetryClass::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16, message: &str) -> RestError {
        RestError::Status {
            operation: "op".to_string(),
            status,
            message: message.to_string(),
            headers: Vec::new(),
        }
    }

    #[test]
    fn auth_and_server_errors_are_transient() {
        assert_eq!(classify(&status_error(401, "")), RetryClass::Transient);
        assert_eq!(classify(&status_error(403, "")), RetryClass::Transient);
        assert_eq!(classify(&status_error(500, "")), RetryClass::Transient);
        assert_eq!(classify(&status_error(503, "")), RetryClass::Transient);
    }

    #[test]
    fn quota_and_not_found_are_terminal() {
        assert_eq!(classify(&status_error(429, "")), RetryClass::Terminal);
        assert_eq!(
            classify(&RestError::NotFound { operation: "op".to_string() }),
            RetryClass::Terminal
        );
    }

    #[test]
    fn known_bad_assignee_is_terminal() {
        let body = r#"{"errors":{"assignee":"User cannot be assigned issues."}}"#;
        assert_eq!(classify(&status_error(400, body)), RetryClass::Terminal);
        // other 400s are terminal too, just not for the same reason
        assert_eq!(classify(&status_error(400, "bad request")), RetryClass::Terminal);
    }
}
