use std::time::SystemTimeError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("failed to read key: {0}")]
    ReadKey(String),
    #[error("invalid credential: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("invalid private key encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("{0}")]
    RsaKeyPair(String),
    #[error("failed to sign token: {0}")]
    RsaSign(String),
    #[error("token exchange failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("clock error: {0}")]
    SystemTime(#[from] SystemTimeError),
    #[error("no project id could be resolved")]
    MissingProjectId,
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
