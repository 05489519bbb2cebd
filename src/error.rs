//! Error types for the onedrive_transfer crate.

use thiserror::Error;

use crate::models::ApiErrorResponse;

/// Errors that can occur while transferring content to or from OneDrive.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Error occurred while creating an upload session for file {}/{}", .path.trim_end_matches('/'), .name)]
    SessionCreation { path: String, name: String },

    #[error("Upload session expired at {0}")]
    SessionExpired(chrono::DateTime<chrono::Utc>),

    #[error(
        "Invalid chunk size {0}: must be a positive multiple of 320 KiB (327,680 bytes) and at most 60 MiB (62,914,560 bytes)"
    )]
    InvalidChunkSize(u64),

    #[error("End of stream reached before uploading could start")]
    EmptyUpload,

    #[error("Source length changed during upload: expected {expected} bytes, read {actual}")]
    SourceLengthMismatch { expected: u64, actual: u64 },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("Invalid seek to a negative position")]
    InvalidSeek,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to decode token blob: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

impl From<DriveError> for std::io::Error {
    fn from(err: DriveError) -> Self {
        use std::io::ErrorKind;

        match err {
            DriveError::Io(e) => e,
            DriveError::NotSupported(_) => std::io::Error::new(ErrorKind::Unsupported, err),
            DriveError::InvalidSeek => std::io::Error::new(ErrorKind::InvalidInput, err),
            DriveError::Cancelled => std::io::Error::new(ErrorKind::Interrupted, err),
            other => std::io::Error::other(other),
        }
    }
}

/// Result type alias for DriveError.
pub type Result<T> = std::result::Result<T, DriveError>;

/// Turn a non-success response into an `ApiError`, preferring the message
/// from the Graph error envelope when the body carries one.
pub(crate) async fn api_error(response: reqwest::Response) -> DriveError {
    let status = response.status().as_u16();
    let error_body = response.text().await.unwrap_or_default();

    let message = match serde_json::from_str::<ApiErrorResponse>(&error_body) {
        Ok(api_error) => format!("{}: {}", api_error.error.code, api_error.error.message),
        Err(_) => error_body,
    };

    DriveError::ApiError { status, message }
}
