//! Seekable, read-only streaming over remote item content.
//!
//! Every read issues one ranged `GET`; nothing beyond the caller's buffer is
//! held in memory.

use std::io::SeekFrom;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::auth::Authorization;
use crate::error::{api_error, DriveError, Result};
use crate::models::DownloadableItem;

/// Where range requests are sent.
#[derive(Debug, Clone)]
enum ContentSource {
    /// Short-lived pre-authenticated URL; requests carry no credential.
    PreSigned(String),
    /// Graph content endpoint; each request carries a fresh bearer token.
    Authorized { url: String, auth: Authorization },
}

impl ContentSource {
    fn url(&self) -> &str {
        match self {
            ContentSource::PreSigned(url) => url,
            ContentSource::Authorized { url, .. } => url,
        }
    }
}

/// `Range` header value for reading `count` bytes at `position`.
///
/// When the request would run past the last byte the range is left
/// open-ended so the server returns everything up to the end.
pub fn range_header(position: u64, count: u64, length: u64) -> String {
    let last = position.saturating_add(count.max(1) - 1);
    if last >= length {
        format!("bytes={}-", position)
    } else {
        format!("bytes={}-{}", position, last)
    }
}

/// Fetch the id, size and download URL of an item.
pub(crate) async fn fetch_downloadable_item(
    http: &Client,
    auth: &Authorization,
    api_base: &str,
    item_id: &str,
) -> Result<DownloadableItem> {
    let token = auth.bearer_token().await?;

    let response = http
        .get(format!("{}/drive/items/{}", api_base, item_id))
        .bearer_auth(&token)
        .query(&[("select", "id,@microsoft.graph.downloadUrl,size")])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    Ok(response.json().await?)
}

/// The byte content of a drive item as a seekable stream.
///
/// Implements [`AsyncRead`] and [`AsyncSeek`], so it works with
/// `tokio::io::copy`, `AsyncReadExt::read_to_end` and friends. Reads are
/// partial: each returns at most what one range request delivered.
pub struct DriveItemStream {
    http: Client,
    source: ContentSource,
    item_id: String,
    length: u64,
    position: u64,
    pending: Option<BoxFuture<'static, Result<Bytes>>>,
}

impl DriveItemStream {
    /// Build a stream from already resolved item metadata.
    ///
    /// Items without a pre-signed download URL are read through the
    /// authenticated `/content` endpoint under `api_base`.
    pub fn from_item(http: Client, auth: Authorization, api_base: &str, item: DownloadableItem) -> Self {
        let source = match item.download_url {
            Some(url) => ContentSource::PreSigned(url),
            None => ContentSource::Authorized {
                url: format!("{}/me/drive/items/{}/content", api_base, item.id),
                auth,
            },
        };

        Self {
            http,
            source,
            item_id: item.id,
            length: item.size,
            position: 0,
            pending: None,
        }
    }

    /// Resolve the item's size and download URL, then open a stream at position 0.
    pub async fn open(http: Client, auth: Authorization, api_base: &str, item_id: &str) -> Result<Self> {
        let item = fetch_downloadable_item(&http, &auth, api_base, item_id).await?;
        tracing::debug!(
            id = %item.id,
            size = item.size,
            pre_signed = item.download_url.is_some(),
            "resolved download stream"
        );
        Ok(Self::from_item(http, auth, api_base, item))
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Total content length, fixed when the stream was opened.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read up to `buf.len()` bytes at the current position.
    ///
    /// Returns 0 without a network call at or past the end of the content.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.position >= self.length || buf.is_empty() {
            return Ok(0);
        }

        // Any request started through poll_read is superseded by this one.
        self.pending = None;
        let range = range_header(self.position, buf.len() as u64, self.length);
        let body = self.range_request(range).await?;
        Ok(self.consume(&body, buf))
    }

    /// Like [`DriveItemStream::read`], but aborts the request when `cancel` fires.
    ///
    /// A cancelled read leaves the position unchanged.
    pub async fn read_cancellable(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DriveError::Cancelled),
            result = self.read(buf) => result,
        }
    }

    /// Move the read position. Positions past the end are allowed; reads
    /// there return 0.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
        };

        self.position = target.ok_or(DriveError::InvalidSeek)?;
        self.pending = None;
        Ok(self.position)
    }

    pub fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(DriveError::NotSupported("write on a read-only download stream"))
    }

    pub fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(DriveError::NotSupported("set_len on a read-only download stream"))
    }

    pub fn flush(&mut self) -> Result<()> {
        Err(DriveError::NotSupported("flush on a read-only download stream"))
    }

    fn range_request(&self, range: String) -> BoxFuture<'static, Result<Bytes>> {
        let http = self.http.clone();
        let source = self.source.clone();
        let item_id = self.item_id.clone();
        let position = self.position;

        async move {
            tracing::debug!(id = %item_id, range = %range, "ranged read");

            let mut request = http.get(source.url()).header(RANGE, range);
            if let ContentSource::Authorized { auth, .. } = &source {
                request = request.bearer_auth(auth.bearer_token().await?);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(api_error(response).await);
            }

            let body = response.bytes().await?;

            // A plain 200 is the whole resource from byte 0.
            if status == StatusCode::OK && position > 0 {
                let skip = usize::try_from(position).unwrap_or(usize::MAX).min(body.len());
                return Ok(body.slice(skip..));
            }
            Ok(body)
        }
        .boxed()
    }

    fn consume(&mut self, body: &[u8], buf: &mut [u8]) -> usize {
        let n = body.len().min(buf.len());
        buf[..n].copy_from_slice(&body[..n]);
        self.position += n as u64;
        n
    }
}

impl std::fmt::Debug for DriveItemStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveItemStream")
            .field("item_id", &self.item_id)
            .field("length", &self.length)
            .field("position", &self.position)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

impl AsyncRead for DriveItemStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if this.pending.is_none() {
            if this.position >= this.length || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            let range = range_header(this.position, buf.remaining() as u64, this.length);
            this.pending = Some(this.range_request(range));
        }

        let Some(pending) = this.pending.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        match pending.poll_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.pending = None;
                match result {
                    Ok(body) => {
                        let n = body.len().min(buf.remaining());
                        buf.put_slice(&body[..n]);
                        this.position += n as u64;
                        Poll::Ready(Ok(()))
                    }
                    Err(e) => Poll::Ready(Err(e.into())),
                }
            }
        }
    }
}

impl AsyncSeek for DriveItemStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        self.get_mut().seek(position)?;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Poll::Ready(Ok(self.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(length: u64) -> DriveItemStream {
        DriveItemStream::from_item(
            Client::new(),
            Authorization::Static("tok".to_string()),
            "http://127.0.0.1:9",
            DownloadableItem {
                id: "item".to_string(),
                size: length,
                download_url: Some("http://127.0.0.1:9/content".to_string()),
            },
        )
    }

    #[test]
    fn test_range_header_bounded() {
        assert_eq!(range_header(0, 10, 100), "bytes=0-9");
        assert_eq!(range_header(90, 10, 100), "bytes=90-99");
    }

    #[test]
    fn test_range_header_open_ended() {
        assert_eq!(range_header(95, 10, 100), "bytes=95-");
        assert_eq!(range_header(0, 29, 28), "bytes=0-");
    }

    #[test]
    fn test_seek_origins() {
        let mut s = stream(100);
        assert_eq!(s.seek(SeekFrom::Start(10)).unwrap(), 10);
        assert_eq!(s.seek(SeekFrom::Current(5)).unwrap(), 15);
        assert_eq!(s.seek(SeekFrom::End(-3)).unwrap(), 97);
        assert_eq!(s.seek(SeekFrom::End(20)).unwrap(), 120);
        assert!(matches!(s.seek(SeekFrom::Current(-500)), Err(DriveError::InvalidSeek)));
        assert_eq!(s.position(), 120);
    }

    #[tokio::test]
    async fn test_read_at_end_needs_no_network() {
        // The URL points at a closed port, so any request would fail.
        let mut s = stream(28);
        s.seek(SeekFrom::End(0)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(s.read(&mut buf).await.unwrap(), 0);

        s.seek(SeekFrom::Start(1000)).unwrap();
        assert_eq!(s.read(&mut buf).await.unwrap(), 0);
    }

    #[test]
    fn test_write_operations_not_supported() {
        let mut s = stream(10);
        assert!(matches!(s.write(b"x"), Err(DriveError::NotSupported(_))));
        assert!(matches!(s.set_len(5), Err(DriveError::NotSupported(_))));
        assert!(matches!(s.flush(), Err(DriveError::NotSupported(_))));
    }

    #[tokio::test]
    async fn test_cancelled_read_keeps_position() {
        let mut s = stream(100);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut buf = [0u8; 10];
        let result = s.read_cancellable(&mut buf, &cancel).await;
        assert!(matches!(result, Err(DriveError::Cancelled)));
        assert_eq!(s.position(), 0);
    }
}
