//! onedrive_transfer - Large file transfers to and from OneDrive.
//!
//! This library provides:
//! - Chunked uploads through upload sessions, with validated chunk sizes
//! - Seekable streaming downloads backed by ranged `GET` requests
//! - Access tokens that refresh themselves between requests
//! - The authorization-code bootstrap that produces the first token
//!
//! # Example
//!
//! ```no_run
//! use onedrive_transfer::{ClientConfig, ClientInfo, OneDriveClient, StoredToken, UploadMetadata};
//! use tokio::io::AsyncReadExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let token = StoredToken::from_file("token.json")?;
//!     let client = OneDriveClient::from_token(token, ClientInfo::from_env()?, ClientConfig::default())?;
//!
//!     let mut file = tokio::fs::File::open("backup.tar").await?;
//!     let item = client.upload(&UploadMetadata::new("/Backups", "backup.tar"), &mut file).await?;
//!
//!     let mut stream = client.open_download_stream(&item.id).await?;
//!     let mut content = Vec::new();
//!     stream.read_to_end(&mut content).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod models;
pub mod upload;

// Re-exports for convenience
pub use auth::{exchange_code, Authorization, ExpiringCredential};
pub use client::OneDriveClient;
pub use config::{ClientConfig, ClientInfo, StoredToken};
pub use download::DriveItemStream;
pub use error::{DriveError, Result};
pub use models::{ConflictBehavior, DriveItem, UploadMetadata, User};
pub use upload::{ChunkSize, UploadClient, UploadSession};
