//! OneDrive client tying credentials, uploads and downloads together.

use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

use crate::auth::{Authorization, ExpiringCredential};
use crate::config::{ClientConfig, ClientInfo, StoredToken};
use crate::download::DriveItemStream;
use crate::error::{api_error, Result};
use crate::models::{DriveItem, UploadMetadata, User};
use crate::upload::{UploadClient, UploadSession};

/// Client for transferring file content to and from OneDrive.
pub struct OneDriveClient {
    http: reqwest::Client,
    auth: Authorization,
    config: ClientConfig,
    uploads: UploadClient,
}

impl OneDriveClient {
    /// Create a new client against the public Graph API.
    ///
    /// # Arguments
    /// * `auth` - Source of bearer tokens for every authenticated request
    pub fn new(auth: impl Into<Authorization>) -> Result<Self> {
        Self::with_config(auth, ClientConfig::default())
    }

    /// Create a new client with explicit endpoints and transport settings.
    pub fn with_config(auth: impl Into<Authorization>, config: ClientConfig) -> Result<Self> {
        let http = config.http_client()?;
        Ok(Self::from_parts(http, auth.into(), config))
    }

    /// Create a client whose token refreshes through `config.token_endpoint`.
    ///
    /// The refresh requests share the client's HTTP connection pool.
    pub fn from_token(token: StoredToken, client_info: ClientInfo, config: ClientConfig) -> Result<Self> {
        let http = config.http_client()?;
        let credential =
            ExpiringCredential::new(token, client_info, config.token_endpoint.clone(), http.clone());
        Ok(Self::from_parts(http, credential.into(), config))
    }

    fn from_parts(http: reqwest::Client, auth: Authorization, config: ClientConfig) -> Self {
        let uploads = UploadClient::new(http.clone(), auth.clone(), config.api_base.clone());
        Self {
            http,
            auth,
            config,
            uploads,
        }
    }

    pub fn authorization(&self) -> &Authorization {
        &self.auth
    }

    /// The upload engine, e.g. to drive a session created earlier.
    pub fn uploads(&self) -> &UploadClient {
        &self.uploads
    }

    /// Size in bytes of the parts of a file uploaded at a time.
    pub fn chunk_size(&self) -> u64 {
        self.uploads.chunk_size()
    }

    /// Set the upload chunk size; see [`crate::upload::ChunkSize`] for the rules.
    pub fn set_chunk_size(&mut self, bytes: u64) -> Result<()> {
        self.uploads.set_chunk_size(bytes)
    }

    /// Retry failed chunk uploads up to `retries` times.
    pub fn with_chunk_retries(mut self, retries: u32) -> Self {
        self.uploads = self.uploads.with_chunk_retries(retries);
        self
    }

    /// Get the signed-in user. Also a cheap way to check that the
    /// credential is accepted.
    pub async fn current_user(&self) -> Result<User> {
        let token = self.auth.bearer_token().await?;

        let response = self
            .http
            .get(format!("{}/me", self.config.api_base))
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }

    /// Create a new upload session.
    pub async fn create_upload_session(&self, metadata: &UploadMetadata) -> Result<UploadSession> {
        self.uploads.create_session(metadata).await
    }

    /// Upload a stream to the app folder by creating a session and sending
    /// the stream to it in chunks.
    pub async fn upload<S>(&self, metadata: &UploadMetadata, source: &mut S) -> Result<DriveItem>
    where
        S: AsyncRead + AsyncSeek + Unpin,
    {
        self.uploads.upload(metadata, source).await
    }

    /// Open a seekable stream over the content of an item.
    pub async fn open_download_stream(&self, item_id: &str) -> Result<DriveItemStream> {
        DriveItemStream::open(self.http.clone(), self.auth.clone(), &self.config.api_base, item_id).await
    }

    /// Copy the content of an item to `writer`, returning the bytes written.
    pub async fn download_to<W>(&self, item_id: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = self.open_download_stream(item_id).await?;
        let copied = tokio::io::copy(&mut stream, writer).await?;
        tracing::info!(id = %item_id, bytes = copied, "download complete");
        Ok(copied)
    }
}
