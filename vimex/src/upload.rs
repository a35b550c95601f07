//! Resumable uploads over the TUS protocol.
//!
//! An upload has two phases:
//!
//! 1. [`VimeoClient::create_upload_session`] asks Vimeo to create the video and returns the
//!    per-upload TUS link together with the video's resource URI.
//! 2. [`VimeoClient::upload_chunks`] PATCHes the file to that link chunk by chunk. After every
//!    chunk the offset is taken from the server's `Upload-Offset` header, not from the number of
//!    bytes sent, so a partially written chunk is simply resent from where the server stopped.
//!
//! The [`PendingUpload`] yielded after each chunk is everything needed to resume later, e.g. with
//! a fresh client after a crash. [`VimeoClient::resume_upload`] asks the server for the offset it
//! actually has.
//!
//! See <https://developer.vimeo.com/api/upload/videos#resumable-approach> and
//! <https://tus.io/protocols/resumable-upload>.

use crate::client::{BlockingVimeoClient, VimeoClient};
use crate::error::{Error, Result};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio_stream::{Stream, StreamExt};
use tracing::instrument;

/// Version of the TUS protocol spoken with the upload link.
pub const TUS_VERSION: &str = "1.0.0";

const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// How Vimeo should receive the video file.
///
/// Only [`UploadApproach::Tus`] is driven by this crate's chunk engine; the others can still be
/// used to create a session whose link is handed to something else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadApproach {
    #[default]
    Tus,
    Post,
    Pull,
    Streaming,
}

impl fmt::Display for UploadApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadApproach::Tus => "tus",
            UploadApproach::Post => "post",
            UploadApproach::Pull => "pull",
            UploadApproach::Streaming => "streaming",
        })
    }
}

/// Who can watch the uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyView {
    Anybody,
    Contacts,
    Disable,
    Nobody,
    Password,
    Unlisted,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privacy {
    pub view: PrivacyView,
}

/// Optional details of the video, sent along when the upload session is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<Privacy>,
}

impl VideoMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_privacy(mut self, view: PrivacyView) -> Self {
        self.privacy = Some(Privacy { view });
        self
    }
}

#[derive(Debug, Serialize)]
struct CreateVideo<'a> {
    upload: UploadParameters,
    #[serde(flatten)]
    metadata: &'a VideoMetadata,
}

#[derive(Debug, Serialize)]
struct UploadParameters {
    approach: UploadApproach,
    // Vimeo takes the size as a decimal string
    size: String,
}

impl<'a> CreateVideo<'a> {
    fn new(size: u64, approach: UploadApproach, metadata: &'a VideoMetadata) -> Self {
        Self {
            upload: UploadParameters {
                approach,
                size: size.to_string(),
            },
            metadata,
        }
    }
}

/// A negotiated upload: where to send the bytes, and the video they will become.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_link: String,
    pub resource_uri: String,
}

impl UploadSession {
    /// Reads a video creation response, insisting on `upload.upload_link` and `uri`.
    pub fn from_response(status: StatusCode, payload: &str) -> Result<Self> {
        if !status.is_success() {
            return Err(Error::upload(
                format!("video creation rejected with status {status}"),
                payload,
            ));
        }
        let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
            Error::upload(format!("video creation response is not JSON: {e}"), payload)
        })?;
        let upload_link = lookup_str(&value, &["upload", "upload_link"])
            .map_err(|reason| Error::upload(reason, payload))?;
        let resource_uri =
            lookup_str(&value, &["uri"]).map_err(|reason| Error::upload(reason, payload))?;
        Ok(Self {
            upload_link: upload_link.to_string(),
            resource_uri: resource_uri.to_string(),
        })
    }
}

/// Follows `path` through nested JSON objects to a string, with no defaulting.
fn lookup_str<'v>(value: &'v serde_json::Value, path: &[&str]) -> Result<&'v str, String> {
    let mut current = value;
    for (depth, key) in path.iter().enumerate() {
        current = current
            .get(key)
            .ok_or_else(|| format!("no {} in response", path[..=depth].join(".")))?;
    }
    current
        .as_str()
        .ok_or_else(|| format!("{} in response is not a string", path.join(".")))
}

/// Progress of an upload, and everything needed to resume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub upload_link: String,
    pub resource_uri: String,
    pub total_size: u64,
    /// Bytes the server has acknowledged.
    pub offset: u64,
}

impl PendingUpload {
    pub fn new(session: UploadSession, total_size: u64) -> Self {
        Self {
            upload_link: session.upload_link,
            resource_uri: session.resource_uri,
            total_size,
            offset: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.offset >= self.total_size
    }

    /// Length of the next chunk; no chunk size (or zero) means all remaining bytes.
    fn next_chunk_len(&self, chunk_size: Option<u64>) -> u64 {
        let remaining = self.total_size.saturating_sub(self.offset);
        match chunk_size {
            Some(size) if size > 0 => size.min(remaining),
            _ => remaining,
        }
    }

    /// Moves the offset to what the server reports having after a chunk.
    fn acknowledge(&mut self, headers: &HeaderMap) -> Result<()> {
        let offset = headers
            .get(UPLOAD_OFFSET)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::upload("response carries no valid Upload-Offset header", ""))?;
        if offset <= self.offset {
            return Err(Error::upload(
                format!(
                    "server acknowledged no new bytes (offset {} after sending from {})",
                    offset, self.offset
                ),
                "",
            ));
        }
        self.offset = offset;
        Ok(())
    }
}

fn patch_headers(offset: u64, len: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(offset));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(OFFSET_OCTET_STREAM));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    headers
}

fn chunk_buffer(len: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(len)
        .map_err(|_| Error::upload(format!("chunk of {len} bytes does not fit in memory"), ""))?;
    Ok(vec![0; len])
}

fn rejected(what: &str, offset: u64, status: StatusCode, payload: String) -> Error {
    Error::upload(
        format!("{what} at offset {offset} rejected with status {status}"),
        payload,
    )
}

fn offset_from_probe(status: StatusCode, headers: &HeaderMap) -> Result<u64> {
    if !status.is_success() {
        return Err(Error::upload(
            format!("upload offset probe rejected with status {status}"),
            "",
        ));
    }
    headers
        .get(UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| Error::upload("probe response carries no valid Upload-Offset header", ""))
}

/// Number of bytes from the current position to the end of `stream`.
///
/// The position is restored afterwards; the stream need not be at its start.
pub fn remaining_len<S: Seek + ?Sized>(stream: &mut S) -> io::Result<u64> {
    let start = stream.stream_position()?;
    let end = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(start))?;
    Ok(end.saturating_sub(start))
}

/// Async counterpart of [`remaining_len`].
pub async fn remaining_len_async<S: AsyncSeek + Unpin + ?Sized>(stream: &mut S) -> io::Result<u64> {
    let start = stream.stream_position().await?;
    let end = stream.seek(SeekFrom::End(0)).await?;
    stream.seek(SeekFrom::Start(start)).await?;
    Ok(end.saturating_sub(start))
}

async fn read_chunk<R>(file: &mut R, position: u64, len: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut chunk = chunk_buffer(len)?;
    file.seek(SeekFrom::Start(position)).await?;
    file.read_exact(&mut chunk).await?;
    Ok(chunk)
}

fn read_chunk_blocking<R: Read + Seek>(file: &mut R, position: u64, len: u64) -> Result<Vec<u8>> {
    let mut chunk = chunk_buffer(len)?;
    file.seek(SeekFrom::Start(position))?;
    file.read_exact(&mut chunk)?;
    Ok(chunk)
}

impl VimeoClient {
    /// Creates the video and negotiates where its bytes go.
    ///
    /// Fails with [`Error::Upload`] if Vimeo rejects the request or its answer lacks the upload
    /// link or the resource URI.
    #[instrument(skip(self, metadata))]
    pub async fn create_upload_session(
        &self,
        size: u64,
        approach: UploadApproach,
        metadata: &VideoMetadata,
    ) -> Result<UploadSession> {
        let request = self
            .request(Method::POST, self.endpoints.videos.clone())
            .json(&CreateVideo::new(size, approach, metadata))
            .build()?;
        let response = self.execute(request).await?;
        let status = response.status();
        let payload = response.text().await?;
        let session = UploadSession::from_response(status, &payload)?;
        tracing::debug!(resource_uri = session.resource_uri, "created upload session");
        Ok(session)
    }

    /// Uploads `file` chunk by chunk, yielding the progress after each chunk.
    ///
    /// Bytes are read relative to the position `file` is at when the stream starts, so the
    /// `pending.offset` of a resumed upload must match a file opened at the same position as the
    /// original. The stream ends after the last chunk, or after the first error.
    pub fn upload_chunks<'a, R>(
        &'a self,
        mut file: R,
        mut pending: PendingUpload,
        chunk_size: Option<u64>,
    ) -> impl Stream<Item = Result<PendingUpload>> + Send + 'a
    where
        R: AsyncRead + AsyncSeek + Unpin + Send + 'a,
    {
        async_stream::try_stream! {
            let base = file.stream_position().await?;
            while !pending.is_complete() {
                let len = pending.next_chunk_len(chunk_size);
                let chunk = read_chunk(&mut file, base + pending.offset, len).await?;
                self.patch_chunk(&mut pending, chunk).await?;
                tracing::debug!(
                    offset = pending.offset,
                    total = pending.total_size,
                    "uploaded chunk"
                );
                yield pending.clone();
            }
        }
    }

    /// Sends everything that remains of `file` in a single PATCH.
    #[instrument(skip(self, file))]
    pub async fn upload<R>(&self, mut file: R, mut pending: PendingUpload) -> Result<PendingUpload>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        if !pending.is_complete() {
            let base = file.stream_position().await?;
            let len = pending.next_chunk_len(None);
            let chunk = read_chunk(&mut file, base + pending.offset, len).await?;
            self.patch_chunk(&mut pending, chunk).await?;
        }
        Ok(pending)
    }

    /// Asks the upload link how many bytes it already has.
    #[instrument(skip(self))]
    pub async fn resume_offset(&self, upload_link: &str) -> Result<u64> {
        let response = self
            .http
            .head(upload_link)
            .header(TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await?;
        offset_from_probe(response.status(), response.headers())
    }

    /// Rebuilds the progress of an interrupted upload from the server's view of it.
    pub async fn resume_upload(
        &self,
        session: UploadSession,
        total_size: u64,
    ) -> Result<PendingUpload> {
        let offset = self.resume_offset(&session.upload_link).await?;
        let mut pending = PendingUpload::new(session, total_size);
        pending.offset = offset;
        Ok(pending)
    }

    /// Creates a TUS upload session for the rest of `file` and uploads it, returning the new
    /// video's resource URI.
    #[instrument(skip(self, file, metadata))]
    pub async fn tus_upload<R>(
        &self,
        mut file: R,
        chunk_size: Option<u64>,
        metadata: &VideoMetadata,
    ) -> Result<String>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let size = remaining_len_async(&mut file).await?;
        let session = self
            .create_upload_session(size, UploadApproach::Tus, metadata)
            .await?;
        let resource_uri = session.resource_uri.clone();

        let chunks = self.upload_chunks(file, PendingUpload::new(session, size), chunk_size);
        let mut chunks = std::pin::pin!(chunks);
        while let Some(progress) = chunks.next().await {
            let progress = progress?;
            tracing::info!(
                offset = progress.offset,
                total = progress.total_size,
                "upload progress"
            );
        }
        Ok(resource_uri)
    }

    async fn patch_chunk(&self, pending: &mut PendingUpload, chunk: Vec<u8>) -> Result<()> {
        let response = self
            .http
            .patch(&pending.upload_link)
            .headers(patch_headers(pending.offset, chunk.len() as u64))
            .body(chunk)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let payload = response.text().await.unwrap_or_default();
            return Err(rejected("chunk", pending.offset, status, payload));
        }
        pending.acknowledge(response.headers())
    }
}

/// Blocking chunk upload, yielding the progress after each chunk.
///
/// Created by [`BlockingVimeoClient::upload_chunks`].
#[derive(Debug)]
pub struct ChunkUpload<'a, R> {
    client: &'a BlockingVimeoClient,
    file: R,
    pending: PendingUpload,
    chunk_size: Option<u64>,
    base: Option<u64>,
    failed: bool,
}

impl<R: Read + Seek> ChunkUpload<'_, R> {
    /// Progress as of the last acknowledged chunk.
    pub fn pending(&self) -> &PendingUpload {
        &self.pending
    }

    fn transfer_next(&mut self) -> Result<()> {
        let base = match self.base {
            Some(base) => base,
            None => *self.base.insert(self.file.stream_position()?),
        };
        let len = self.pending.next_chunk_len(self.chunk_size);
        let chunk = read_chunk_blocking(&mut self.file, base + self.pending.offset, len)?;
        self.client.patch_chunk(&mut self.pending, chunk)
    }
}

impl<R: Read + Seek> Iterator for ChunkUpload<'_, R> {
    type Item = Result<PendingUpload>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pending.is_complete() {
            return None;
        }
        match self.transfer_next() {
            Ok(()) => {
                tracing::debug!(
                    offset = self.pending.offset,
                    total = self.pending.total_size,
                    "uploaded chunk"
                );
                Some(Ok(self.pending.clone()))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl BlockingVimeoClient {
    /// Blocking counterpart of [`VimeoClient::create_upload_session`].
    #[instrument(skip(self, metadata))]
    pub fn create_upload_session(
        &self,
        size: u64,
        approach: UploadApproach,
        metadata: &VideoMetadata,
    ) -> Result<UploadSession> {
        let request = self
            .request(Method::POST, self.endpoints.videos.clone())
            .json(&CreateVideo::new(size, approach, metadata))
            .build()?;
        let response = self.execute(request)?;
        let status = response.status();
        let payload = response.text()?;
        let session = UploadSession::from_response(status, &payload)?;
        tracing::debug!(resource_uri = session.resource_uri, "created upload session");
        Ok(session)
    }

    /// Blocking counterpart of [`VimeoClient::upload_chunks`].
    pub fn upload_chunks<R: Read + Seek>(
        &self,
        file: R,
        pending: PendingUpload,
        chunk_size: Option<u64>,
    ) -> ChunkUpload<'_, R> {
        ChunkUpload {
            client: self,
            file,
            pending,
            chunk_size,
            base: None,
            failed: false,
        }
    }

    /// Blocking counterpart of [`VimeoClient::upload`].
    #[instrument(skip(self, file))]
    pub fn upload<R: Read + Seek>(
        &self,
        mut file: R,
        mut pending: PendingUpload,
    ) -> Result<PendingUpload> {
        if !pending.is_complete() {
            let base = file.stream_position()?;
            let len = pending.next_chunk_len(None);
            let chunk = read_chunk_blocking(&mut file, base + pending.offset, len)?;
            self.patch_chunk(&mut pending, chunk)?;
        }
        Ok(pending)
    }

    /// Blocking counterpart of [`VimeoClient::resume_offset`].
    #[instrument(skip(self))]
    pub fn resume_offset(&self, upload_link: &str) -> Result<u64> {
        let response = self
            .http
            .head(upload_link)
            .header(TUS_RESUMABLE, TUS_VERSION)
            .send()?;
        offset_from_probe(response.status(), response.headers())
    }

    /// Blocking counterpart of [`VimeoClient::resume_upload`].
    pub fn resume_upload(&self, session: UploadSession, total_size: u64) -> Result<PendingUpload> {
        let offset = self.resume_offset(&session.upload_link)?;
        let mut pending = PendingUpload::new(session, total_size);
        pending.offset = offset;
        Ok(pending)
    }

    /// Blocking counterpart of [`VimeoClient::tus_upload`].
    #[instrument(skip(self, file, metadata))]
    pub fn tus_upload<R: Read + Seek>(
        &self,
        mut file: R,
        chunk_size: Option<u64>,
        metadata: &VideoMetadata,
    ) -> Result<String> {
        let size = remaining_len(&mut file)?;
        let session = self.create_upload_session(size, UploadApproach::Tus, metadata)?;
        let resource_uri = session.resource_uri.clone();
        for progress in self.upload_chunks(file, PendingUpload::new(session, size), chunk_size) {
            let progress = progress?;
            tracing::info!(
                offset = progress.offset,
                total = progress.total_size,
                "upload progress"
            );
        }
        Ok(resource_uri)
    }

    fn patch_chunk(&self, pending: &mut PendingUpload, chunk: Vec<u8>) -> Result<()> {
        let response = self
            .http
            .patch(&pending.upload_link)
            .headers(patch_headers(pending.offset, chunk.len() as u64))
            .body(chunk)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let payload = response.text().unwrap_or_default();
            return Err(rejected("chunk", pending.offset, status, payload));
        }
        pending.acknowledge(response.headers())
    }
}
