//! Agent transport trait and error classification.

use async_trait::async_trait;

use crate::message::{AgentRequest, AgentResponse};

/// Result type for agent calls.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors talking to the agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The API answered with an error status.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status
        status: u16,
        /// Error type reported by the API, e.g. `rate_limit_error`
        error_type: Option<String>,
        /// Error message
        message: String,
    },

    /// Network or TLS failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A success response that could not be decoded.
    #[error("malformed agent response: {0}")]
    Decode(String),
}

/// What the session runner does with a failed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Wait, then retry the same turn.
    RateLimited,
    /// Stop everything; retrying cannot help.
    Fatal(FatalReason),
    /// Fail this session; the loop may retry later.
    Recoverable,
}

/// Why an error is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// Credentials rejected.
    Authentication,
    /// Credit balance exhausted or billing problem.
    Billing,
}

impl std::fmt::Display for FatalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalReason::Authentication => f.write_str("API authentication failed, check the API key"),
            FatalReason::Billing => f.write_str("API credits exhausted or billing problem, check the account balance"),
        }
    }
}

impl AgentError {
    /// Classify the error.
    pub fn class(&self) -> ErrorClass {
        let AgentError::Api {
            status, error_type, ..
        } = self
        else {
            return ErrorClass::Recoverable;
        };

        let error_type = error_type.as_deref().unwrap_or_default();
        let text = self.to_string().to_lowercase();
        let mentions_billing = ["credit", "billing", "balance"].iter().any(|w| text.contains(w));

        if *status == 401 || error_type == "authentication_error" {
            ErrorClass::Fatal(FatalReason::Authentication)
        } else if *status == 402 || mentions_billing {
            ErrorClass::Fatal(FatalReason::Billing)
        } else if *status == 429 || error_type == "rate_limit_error" {
            ErrorClass::RateLimited
        } else {
            ErrorClass::Recoverable
        }
    }

    /// Human-readable message for fatal errors.
    pub fn fatal_message(&self) -> Option<String> {
        match self.class() {
            ErrorClass::Fatal(reason) => Some(format!("{}. Detail: {}", reason, self)),
            _ => None,
        }
    }
}

/// A turn-based agent with tool use.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Run one turn.
    async fn send(&self, request: &AgentRequest) -> Result<AgentResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, error_type: &str, message: &str) -> AgentError {
        AgentError::Api {
            status,
            error_type: Some(error_type.to_string()),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_authentication_is_fatal() {
        assert_eq!(
            api(401, "authentication_error", "invalid x-api-key").class(),
            ErrorClass::Fatal(FatalReason::Authentication)
        );
    }

    #[test]
    fn test_billing_is_fatal() {
        assert_eq!(
            api(400, "invalid_request_error", "Your credit balance is too low").class(),
            ErrorClass::Fatal(FatalReason::Billing)
        );
        assert_eq!(api(402, "billing_error", "payment required").class(), ErrorClass::Fatal(FatalReason::Billing));
        assert_eq!(
            api(403, "permission_error", "Billing is disabled for this org").class(),
            ErrorClass::Fatal(FatalReason::Billing)
        );
    }

    #[test]
    fn test_rate_limit() {
        assert_eq!(api(429, "rate_limit_error", "slow down").class(), ErrorClass::RateLimited);
    }

    #[test]
    fn test_server_errors_are_recoverable() {
        assert_eq!(api(500, "api_error", "Internal server error").class(), ErrorClass::Recoverable);
        assert_eq!(api(529, "overloaded_error", "Overloaded").class(), ErrorClass::Recoverable);
        assert_eq!(AgentError::Decode("eof".into()).class(), ErrorClass::Recoverable);
        assert!(api(500, "api_error", "boom").fatal_message().is_none());
    }

    #[test]
    fn test_fatal_message() {
        let msg = api(401, "authentication_error", "invalid x-api-key").fatal_message().unwrap();
        assert!(msg.starts_with("API authentication failed"));
        assert!(msg.contains("invalid x-api-key"));
    }
}
