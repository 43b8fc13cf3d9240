use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;

/// Error body returned by the Cloud Logging API.
///
/// See <https://cloud.google.com/logging/docs/reference/v2/rest/v2/entries/write#response-body>.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub error: ResponseErrorInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseErrorInner {
    pub code: Option<i64>,
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("ReqwestError: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Google error: {:?}", .0)]
    Response(ResponseErrorInner),
    #[error("Service Account: {}", .0)]
    Auth(#[from] AuthError),
    #[error("Serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid entry metadata: {0}")]
    InvalidMetadata(String),
    #[error("payload nests deeper than {0} levels")]
    PayloadTooDeep(usize),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl LoggingError {
    /// Whether the transport may retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            LoggingError::Reqwest(err) => err.is_connect() || err.is_timeout(),
            LoggingError::Response(inner) => matches!(inner.code, Some(429) | Some(500..=599)),
            _ => false,
        }
    }
}

pub type Result<T, E = LoggingError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: i64) -> LoggingError {
        LoggingError::Response(ResponseErrorInner {
            code: Some(code),
            message: "boom".to_owned(),
            status: "UNAVAILABLE".to_owned(),
        })
    }

    #[test]
    fn retryable_codes() {
        assert!(response(429).is_retryable());
        assert!(response(503).is_retryable());
        assert!(!response(400).is_retryable());
        assert!(!LoggingError::Unsupported("tail").is_retryable());
    }

    #[test]
    fn parses_api_error_body() {
        let body = r#"{"error":{"code":403,"message":"denied","status":"PERMISSION_DENIED"}}"#;
        let ResponseError { error } = serde_json::from_str(body).unwrap();
        assert_eq!(error.code, Some(403));
        assert_eq!(error.status, "PERMISSION_DENIED");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoggingError>();
    }
}
