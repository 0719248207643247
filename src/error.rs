use crate::domain::payment::PaymentId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid payment ID {input:?}: {source}")]
    InvalidIdentifier {
        input: String,
        #[source]
        source: uuid::Error,
    },
    #[error("Payment {0} not found")]
    NotFound(PaymentId),
    #[error("Payment with reference {0:?} already exists")]
    Conflict(String),
    #[error("Persistence error: {0}")]
    Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker error: {0}")]
    Infrastructure(#[from] BrokerError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaymentError {
    /// Wraps any store-side failure.
    pub fn persistence<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Persistence(err.into())
    }

    /// Whether redelivering or retrying the operation can change the outcome.
    ///
    /// Only store and broker failures qualify. Bad input, missing rows and
    /// duplicates fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Infrastructure(_))
    }

    /// Stable numeric code exposed to intake callers.
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidIdentifier { .. } | Self::Csv(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Persistence(_) | Self::Io(_) => 500,
            Self::Infrastructure(_) => 503,
        }
    }

    /// Short, stable message for the error kind.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation failed",
            Self::InvalidIdentifier { .. } => "Invalid payment ID format",
            Self::NotFound(_) => "Payment not found",
            Self::Conflict(_) => "Payment with this reference already exists",
            Self::Persistence(_) => "Failed to access payment storage",
            Self::Infrastructure(_) => "Message broker unavailable",
            Self::Csv(_) => "invalid request body",
            Self::Io(_) => "internal server error",
        }
    }
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker connection is closed")]
    Closed,
    #[error("queue {0:?} has not been declared")]
    QueueNotFound(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Structured error payload returned to intake callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl From<&PaymentError> for ErrorResponse {
    fn from(err: &PaymentError) -> Self {
        Self {
            code: err.code(),
            message: err.message().to_string(),
            description: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_infrastructure_failures_are_retryable() {
        assert!(PaymentError::persistence("connection reset").is_retryable());
        assert!(PaymentError::Infrastructure(BrokerError::Closed).is_retryable());

        assert!(!PaymentError::Validation("bad".into()).is_retryable());
        assert!(!PaymentError::NotFound(PaymentId::new()).is_retryable());
        assert!(!PaymentError::Conflict("r1".into()).is_retryable());

        let parse_err = "nope".parse::<PaymentId>().unwrap_err();
        assert!(!parse_err.is_retryable());
    }

    #[test]
    fn test_error_response_payload() {
        let err = PaymentError::Conflict("r1".to_string());
        let response = ErrorResponse::from(&err);

        assert_eq!(response.code, 409);
        assert_eq!(response.message, "Payment with this reference already exists");
        assert!(response.description.contains("r1"));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["code"], 409);
    }
}
