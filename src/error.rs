use std::time::Duration;
use thiserror::Error;

use crate::http::{ApiResponse, TransportError};
use crate::token_store::TokenStoreError;

/// Failures surfaced to callers of the gateway
#[derive(Error, Debug)]
pub enum ApiError {
    /// Bad credentials, or the session expired and could not be refreshed
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// 4xx with a message meant to be shown to the user as-is
    #[error("{0}")]
    Validation(String),
    /// No response was received
    #[error("Network error: {0}")]
    Network(#[from] TransportError),
    #[error("Upload timed out after {}s, the file may be too large; try a smaller file", .0.as_secs())]
    Timeout(Duration),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Server rejected the request ({status}): {detail}")]
    ServerRejected { status: u16, detail: String },
    #[error("Request cancelled")]
    Cancelled,
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Token storage error: {0}")]
    TokenStore(#[from] TokenStoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Classify a non-success response; `fallback` is used when the body carries no detail
    pub fn from_response(response: &ApiResponse, fallback: &str) -> Self {
        let detail = response
            .error_detail()
            .unwrap_or_else(|| fallback.to_string());

        match response.status {
            401 | 403 => ApiError::Auth(detail),
            404 => ApiError::NotFound(detail),
            400..=499 => ApiError::Validation(detail),
            status => ApiError::ServerRejected { status, detail },
        }
    }

    /// True when the caller should treat the user as logged out
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_classification() {
        let unauthorized = ApiResponse::new(401, "");
        assert!(ApiError::from_response(&unauthorized, "Non authentifié").is_auth());

        let missing = ApiResponse::json_body(404, &json!({"detail": "Archive non trouvée"}));
        match ApiError::from_response(&missing, "fallback") {
            ApiError::NotFound(detail) => assert_eq!(detail, "Archive non trouvée"),
            other => panic!("Expected NotFound, got {:?}", other),
        }

        let invalid = ApiResponse::json_body(422, &json!({"detail": "Titre trop court"}));
        match ApiError::from_response(&invalid, "fallback") {
            ApiError::Validation(detail) => assert_eq!(detail, "Titre trop court"),
            other => panic!("Expected Validation, got {:?}", other),
        }

        let broken = ApiResponse::new(500, "oops");
        match ApiError::from_response(&broken, "Erreur de chargement") {
            ApiError::ServerRejected { status, detail } => {
                assert_eq!(status, 500);
                assert_eq!(detail, "Erreur de chargement");
            }
            other => panic!("Expected ServerRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = ApiError::Validation("Email déjà utilisé".to_string());
        assert_eq!(err.to_string(), "Email déjà utilisé");
    }

    #[test]
    fn test_timeout_message_mentions_size() {
        let err = ApiError::Timeout(Duration::from_secs(600));
        let message = err.to_string();
        assert!(message.contains("600s"));
        assert!(message.contains("too large"));
    }
}
