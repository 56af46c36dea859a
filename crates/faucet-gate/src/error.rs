//! Error handling for the faucet gate.

use crate::gate::Rejection;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Faucet gate error types
#[derive(Error, Debug)]
pub enum GateError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    QuotaExceeded(Rejection),

    #[error("Identity score {score} is below the required {threshold}")]
    InsufficientScore { score: f64, threshold: f64 },

    #[error("Score lookup failed: {0}")]
    ScoreUnavailable(String),

    #[error("Transfer failed: {0}")]
    UpstreamTransferFailed(String),

    #[error("No transfer executor is configured")]
    TransferNotConfigured,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sled::Error> for GateError {
    fn from(e: sled::Error) -> Self {
        GateError::StorageUnavailable(e.to_string())
    }
}

impl From<bincode::Error> for GateError {
    fn from(e: bincode::Error) -> Self {
        GateError::StorageUnavailable(format!("corrupt record: {}", e))
    }
}

impl GateError {
    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::InvalidArgument(_) | GateError::QuotaExceeded(_) => StatusCode::BAD_REQUEST,
            GateError::InsufficientScore { .. } => StatusCode::FORBIDDEN,
            GateError::ScoreUnavailable(_) | GateError::UpstreamTransferFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            GateError::StorageUnavailable(_) | GateError::TransferNotConfigured => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GateError::ConfigError(_) | GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to a client.
    ///
    /// Caller-facing outcomes keep their detail; infrastructure failures are
    /// collapsed to a generic message and only logged in full.
    pub fn public_message(&self) -> String {
        match self {
            GateError::InvalidArgument(_)
            | GateError::QuotaExceeded(_)
            | GateError::InsufficientScore { .. }
            | GateError::TransferNotConfigured => self.to_string(),
            GateError::UpstreamTransferFailed(_) => "Token transfer failed".to_string(),
            GateError::ScoreUnavailable(_) => "Identity score lookup failed".to_string(),
            GateError::StorageUnavailable(_) => {
                "Storage unavailable, please retry later".to_string()
            }
            GateError::ConfigError(_) => "Configuration error".to_string(),
            GateError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Whether this is an expected, user-facing outcome rather than a failure
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GateError::InvalidArgument(_)
                | GateError::QuotaExceeded(_)
                | GateError::InsufficientScore { .. }
        )
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.public_message(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Result type alias for gate operations
pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::QuotaDimension;

    #[test]
    fn test_status_codes() {
        let rejection = Rejection {
            dimension: QuotaDimension::Identity,
            would_be_total: 105,
            limit: 100,
        };

        assert_eq!(
            GateError::InvalidArgument("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GateError::QuotaExceeded(rejection).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GateError::StorageUnavailable("disk".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GateError::UpstreamTransferFailed("rpc".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_infrastructure_detail_is_hidden() {
        let err = GateError::StorageUnavailable("/var/lib/faucet: permission denied".into());
        assert!(!err.public_message().contains("permission denied"));
        assert!(!err.is_rejection());

        let err = GateError::InvalidArgument("amount must be a positive integer".into());
        assert_eq!(err.public_message(), "amount must be a positive integer");
        assert!(err.is_rejection());
    }

    #[test]
    fn test_quota_message_carries_totals() {
        let err = GateError::QuotaExceeded(Rejection {
            dimension: QuotaDimension::Destination,
            would_be_total: 105,
            limit: 100,
        });
        let message = err.public_message();
        assert!(message.contains("destination quota exceeded"));
        assert!(message.contains("105"));
        assert!(message.contains("100"));
    }
}
