//! Chunked upload through server-side upload sessions.
//!
//! A session is created with a metadata POST and then fed with sequential
//! `PUT` requests, each carrying one chunk and a `Content-Range` header. The
//! response to the final chunk describes the created item.

use std::io::SeekFrom;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE};
use reqwest::{Client, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::auth::Authorization;
use crate::error::{api_error, DriveError, Result};
use crate::models::{DriveItem, UploadMetadata, UploadSessionRequest, UploadSessionResponse};

/// Chunk sizes must be a multiple of 320 KiB.
pub const CHUNK_ALIGNMENT: u64 = 327_680;

/// Largest chunk the service accepts (60 MiB).
pub const MAX_CHUNK_SIZE: u64 = 62_914_560;

/// Default chunk size (7.5 MiB), inside the recommended 5-10 MiB band.
pub const DEFAULT_CHUNK_SIZE: u64 = 7_864_320;

/// First delay between chunk retries; doubles on each attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// A validated upload chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSize(u64);

impl ChunkSize {
    /// Validate a chunk size in bytes.
    ///
    /// Accepts positive multiples of [`CHUNK_ALIGNMENT`] up to [`MAX_CHUNK_SIZE`].
    pub fn new(bytes: u64) -> Result<Self> {
        if bytes == 0 || bytes % CHUNK_ALIGNMENT != 0 || bytes > MAX_CHUNK_SIZE {
            return Err(DriveError::InvalidChunkSize(bytes));
        }
        Ok(Self(bytes))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(DEFAULT_CHUNK_SIZE)
    }
}

impl TryFrom<u64> for ChunkSize {
    type Error = DriveError;

    fn try_from(bytes: u64) -> Result<Self> {
        Self::new(bytes)
    }
}

/// A zero-indexed byte range the server still expects, e.g. `0-26` or `27-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end; `None` means "to the end of the file".
    pub end: Option<u64>,
}

impl ByteRange {
    fn parse(raw: &str) -> Option<Self> {
        let (start, end) = raw.trim().split_once('-')?;
        let start = start.parse().ok()?;
        let end = match end {
            "" => None,
            end => Some(end.parse().ok()?),
        };
        Some(Self { start, end })
    }
}

/// A server-allocated upload target for one file.
#[derive(Debug, Clone)]
pub struct UploadSession {
    upload_url: String,
    expires_at: Option<DateTime<Utc>>,
    next_expected_ranges: Vec<ByteRange>,
}

impl UploadSession {
    /// Build a session from a createUploadSession response.
    ///
    /// Fails with [`DriveError::SessionCreation`] when the response carries no
    /// usable upload URL.
    pub fn from_response(response: UploadSessionResponse, metadata: &UploadMetadata) -> Result<Self> {
        let upload_url = response
            .upload_url
            .filter(|url| reqwest::Url::parse(url).is_ok())
            .ok_or_else(|| DriveError::SessionCreation {
                path: metadata.path.clone(),
                name: metadata.name.clone(),
            })?;

        let next_expected_ranges = response
            .next_expected_ranges
            .iter()
            .filter_map(|raw| ByteRange::parse(raw))
            .collect();

        Ok(Self {
            upload_url,
            expires_at: response.expiration_date_time,
            next_expected_ranges,
        })
    }

    /// URL that accepts `PUT` requests for byte ranges of the file.
    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Instant after which the server discards the session.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Byte ranges the server reported as missing when the session was created.
    pub fn next_expected_ranges(&self) -> &[ByteRange] {
        &self.next_expected_ranges
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Progress cursor within one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOffset {
    sent: u64,
    total: u64,
}

impl TransferOffset {
    pub fn new(total: u64) -> Self {
        Self { sent: 0, total }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.sent == self.total
    }

    /// `Content-Range` value for the next `count` bytes.
    pub fn content_range(&self, count: u64) -> Result<String> {
        let end = self.sent + count;
        if count == 0 || end > self.total {
            return Err(DriveError::SourceLengthMismatch {
                expected: self.total,
                actual: end,
            });
        }
        Ok(format!("bytes {}-{}/{}", self.sent, end - 1, self.total))
    }

    fn advance(&mut self, count: u64) {
        self.sent += count;
    }
}

/// Drives byte sources through upload sessions.
#[derive(Debug, Clone)]
pub struct UploadClient {
    http: Client,
    auth: Authorization,
    api_base: String,
    chunk_size: ChunkSize,
    chunk_retries: u32,
}

impl UploadClient {
    /// Create an upload client.
    ///
    /// # Arguments
    /// * `http` - HTTP client used for every request
    /// * `auth` - Authorization for session creation
    /// * `api_base` - Graph API base URL without trailing slash
    pub fn new(http: Client, auth: Authorization, api_base: impl Into<String>) -> Self {
        Self {
            http,
            auth,
            api_base: api_base.into(),
            chunk_size: ChunkSize::default(),
            chunk_retries: 0,
        }
    }

    /// Size in bytes of the parts of a file uploaded at a time.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.get()
    }

    /// Set the chunk size. Invalid sizes are rejected, never clamped.
    pub fn set_chunk_size(&mut self, bytes: u64) -> Result<()> {
        self.chunk_size = ChunkSize::new(bytes)?;
        Ok(())
    }

    /// Re-send a chunk up to `retries` times after a network error or 5xx response.
    pub fn with_chunk_retries(mut self, retries: u32) -> Self {
        self.chunk_retries = retries;
        self
    }

    /// Create a new upload session.
    pub async fn create_session(&self, metadata: &UploadMetadata) -> Result<UploadSession> {
        let token = self.auth.bearer_token().await?;
        let url = session_url(&self.api_base, metadata);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&UploadSessionRequest { item: metadata })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let body: UploadSessionResponse = response.json().await?;
        let session = UploadSession::from_response(body, metadata)?;

        tracing::info!(
            path = %metadata.path,
            name = %metadata.name,
            expires_at = ?session.expires_at(),
            "upload session created"
        );

        Ok(session)
    }

    /// Create a session for `metadata` and upload `source` to it.
    pub async fn upload<S>(&self, metadata: &UploadMetadata, source: &mut S) -> Result<DriveItem>
    where
        S: AsyncRead + AsyncSeek + Unpin,
    {
        let session = self.create_session(metadata).await?;
        self.upload_to_session(session, source).await
    }

    /// Upload a seekable source to `session`, starting from its first byte.
    ///
    /// The source is rewound before its length is measured, so a partially
    /// consumed source is uploaded in full.
    pub async fn upload_to_session<S>(&self, session: UploadSession, source: &mut S) -> Result<DriveItem>
    where
        S: AsyncRead + AsyncSeek + Unpin,
    {
        let total = source.seek(SeekFrom::End(0)).await?;
        source.seek(SeekFrom::Start(0)).await?;
        self.upload_sized(session, source, total).await
    }

    /// Upload exactly `total` bytes read from a forward-only source.
    ///
    /// A source that ends early or runs past `total` fails with
    /// [`DriveError::SourceLengthMismatch`]. An overlong source is detected
    /// before the final chunk is sent; `actual` then only says that more
    /// than `total` bytes were available.
    pub async fn upload_sized<R>(&self, session: UploadSession, source: &mut R, total: u64) -> Result<DriveItem>
    where
        R: AsyncRead + Unpin,
    {
        if session.is_expired_at(Utc::now()) {
            return Err(DriveError::SessionExpired(session.expires_at.unwrap_or_else(Utc::now)));
        }

        let buffer_len = self.chunk_size.get().min(total.max(1));
        let mut buffer = vec![0u8; usize::try_from(buffer_len).unwrap_or(usize::MAX)];
        let mut offset = TransferOffset::new(total);
        let mut last_response: Option<Response> = None;
        let mut chunks = 0u64;

        loop {
            let count = fill_buffer(source, &mut buffer).await?;
            if count == 0 {
                break;
            }

            let range = offset.content_range(count as u64)?;

            // Leftover bytes must be caught before the final chunk completes the item.
            if offset.sent() + count as u64 == total && has_more(source).await? {
                return Err(DriveError::SourceLengthMismatch {
                    expected: total,
                    actual: total + 1,
                });
            }

            tracing::debug!(chunk = chunks, range = %range, "uploading chunk");

            let chunk = Bytes::copy_from_slice(&buffer[..count]);
            last_response = Some(self.put_chunk(&session.upload_url, chunk, &range).await?);

            offset.advance(count as u64);
            chunks += 1;
        }

        let response = last_response.ok_or(DriveError::EmptyUpload)?;
        if !offset.is_complete() {
            return Err(DriveError::SourceLengthMismatch {
                expected: total,
                actual: offset.sent(),
            });
        }

        let item: DriveItem = response.json().await?;
        tracing::info!(id = %item.id, bytes = total, chunks, "upload complete");
        Ok(item)
    }

    async fn put_chunk(&self, url: &str, chunk: Bytes, range: &str) -> Result<Response> {
        let mut attempt = 0;
        let mut delay = RETRY_BASE_DELAY;

        loop {
            let result = self
                .http
                .put(url)
                .header(CONTENT_LENGTH, chunk.len())
                .header(CONTENT_RANGE, range)
                .body(chunk.clone())
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(e) => !e.is_builder(),
            };

            if !retryable || attempt >= self.chunk_retries {
                let response = result?;
                if !response.status().is_success() {
                    return Err(api_error(response).await);
                }
                return Ok(response);
            }

            attempt += 1;
            tracing::warn!(range = %range, attempt, "chunk upload failed, retrying");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}

/// Path of the createUploadSession endpoint for a file under the app root.
fn session_url(api_base: &str, metadata: &UploadMetadata) -> String {
    let folder = metadata.path.trim_matches('/');
    if folder.is_empty() {
        format!(
            "{}/me/drive/special/approot:/{}:/createUploadSession",
            api_base, metadata.name
        )
    } else {
        format!(
            "{}/me/drive/special/approot:/{}/{}:/createUploadSession",
            api_base, folder, metadata.name
        )
    }
}

/// Whether `source` still yields at least one byte. Consumes that byte.
async fn has_more<R: AsyncRead + Unpin>(source: &mut R) -> Result<bool> {
    let mut extra = [0u8; 1];
    Ok(source.read(&mut extra).await? > 0)
}

/// Read until `buffer` is full or the source is exhausted.
async fn fill_buffer<R: AsyncRead + Unpin>(source: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = source.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
