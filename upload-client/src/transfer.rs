//! Streaming file bytes to an open upload session, one chunk per PUT.

use crate::credential::Credential;
use crate::error::UploadError;
use crate::platform::PlatformAdapter;
use crate::session::UploadSession;
use bytes::Bytes;
use http::StatusCode;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Default bound on a single chunk PUT.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// The platform's answer to the last chunk, which some platforms use as the finalize response.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Reported once per chunk the platform has confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    pub index: usize,
    pub total_chunks: usize,
    pub range: Range<u64>,
    /// Session offset after this chunk.
    pub confirmed_bytes: u64,
    pub total_bytes: u64,
    pub status: StatusCode,
}

/// Sends the chunks of an [`UploadSession`] strictly in order.
#[derive(Debug)]
pub struct TransferEngine<'a, P> {
    adapter: &'a P,
    http: &'a reqwest::Client,
    chunk_timeout: Duration,
}

impl<'a, P: PlatformAdapter> TransferEngine<'a, P> {
    pub fn new(adapter: &'a P, http: &'a reqwest::Client) -> Self {
        Self {
            adapter,
            http,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Uploads every chunk from the session's confirmed offset onward.
    ///
    /// A fresh session starts at chunk 0. A session that already has confirmed chunks resumes
    /// at the chunk beginning at its offset; whether the platform still honours that session is
    /// the caller's problem.
    ///
    /// Chunk `k + 1` is not sent until chunk `k` has been answered with a status the adapter
    /// accepts. Anything else stops the transfer with [`UploadError::Transfer`] and leaves the
    /// session offset at the last confirmed chunk.
    #[instrument(skip_all, fields(
        platform = %self.adapter.platform(),
        session_id = session.session_id.as_str(),
        path = %path.display(),
    ))]
    pub async fn transfer(
        &self,
        credential: &Credential,
        session: &mut UploadSession,
        path: &Path,
        mut on_progress: impl FnMut(&ChunkProgress),
    ) -> Result<TransferReceipt, UploadError> {
        let platform = self.adapter.platform();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::media(path, "stat media file", e))?;
        if metadata.len() != session.total_bytes() {
            return Err(UploadError::Media {
                path: path.to_path_buf(),
                source: None,
                message: format!(
                    "file is {} bytes but the session was opened for {}",
                    metadata.len(),
                    session.total_bytes()
                ),
            });
        }

        let offset = session.offset();
        let Some(first) = session.plan.chunk_starting_at(offset) else {
            return Err(UploadError::SessionState {
                platform,
                session_id: session.session_id.clone(),
                message: if session.is_complete() {
                    "every chunk has already been transferred".to_string()
                } else {
                    format!("confirmed offset {offset} is not on a chunk boundary")
                },
            });
        };
        if first > 0 {
            tracing::info!(chunk = first, offset, "resuming transfer");
        }

        let total = session.total_bytes();
        let total_chunks = session.chunk_count();
        let chunks = session.plan.chunks()[first..].to_vec();
        let mut receipt = None;
        for chunk in chunks {
            let is_last = chunk.index + 1 == total_chunks;
            let (status, body) = self
                .put_chunk(credential, session, path, &chunk, is_last)
                .await?;
            session.confirm(chunk.end);

            let progress = ChunkProgress {
                index: chunk.index,
                total_chunks,
                range: chunk.range(),
                confirmed_bytes: session.offset(),
                total_bytes: total,
                status,
            };
            on_progress(&progress);
            receipt = Some(TransferReceipt { status, body });
        }

        // the plan is never empty, so at least one chunk went out
        receipt.ok_or_else(|| UploadError::Transfer {
            platform,
            chunk_index: first,
            http_status: None,
            message: "no chunks to transfer".to_string(),
        })
    }

    #[instrument(skip_all, fields(chunk = chunk.index, range = %chunk.content_range(session.total_bytes())))]
    async fn put_chunk(
        &self,
        credential: &Credential,
        session: &UploadSession,
        path: &Path,
        chunk: &crate::plan::Chunk,
        is_last: bool,
    ) -> Result<(StatusCode, Bytes), UploadError> {
        let platform = self.adapter.platform();
        let transfer_error = |http_status, message| UploadError::Transfer {
            platform,
            chunk_index: chunk.index,
            http_status,
            message,
        };

        // a separate handle per chunk keeps the body stream 'static
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UploadError::media(path, "open media file", e))?;
        file.seek(std::io::SeekFrom::Start(chunk.start))
            .await
            .map_err(|e| UploadError::media(path, "seek media file", e))?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file.take(chunk.len())));

        let mut request = self.http.put(&session.upload_url).timeout(self.chunk_timeout);
        if self.adapter.chunk_needs_auth() {
            request = request.header("Authorization", credential.bearer());
        }
        let response = request
            .header(http::header::CONTENT_TYPE, self.adapter.media_type())
            .header(http::header::CONTENT_LENGTH, chunk.len())
            .header(
                http::header::CONTENT_RANGE,
                chunk.content_range(session.total_bytes()),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| transfer_error(None, format!("send chunk: {e}")))?;

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(%status, error = %e, "chunk response body unreadable");
                return Err(transfer_error(Some(status), format!("read chunk response: {e}")));
            }
        };
        if !self.adapter.accepts_chunk_status(status, is_last) {
            let message = String::from_utf8_lossy(&body).into_owned();
            tracing::warn!(%status, "chunk rejected");
            return Err(transfer_error(Some(status), message));
        }
        tracing::debug!(%status, "chunk accepted");
        Ok((status, body))
    }
}
