//! Google Drive v3 provider.
//!
//! Talks to the Drive REST API with a bearer token taken from the
//! [`SessionProvider`]. Uploads use the resumable protocol so large
//! snapshots go up in fixed-size chunks with progress between them.

use crate::client::{percent_of, CloudStorageClient, ProgressFn, UploadRequest};
use crate::error::{CloudError, CloudResult};
use crate::metadata::{BackupMetadata, FOLDER_MIME_TYPE};
use crate::session::{require_session, SessionProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Drive requires resumable chunks to be multiples of this size.
pub const UPLOAD_CHUNK_ALIGN: usize = 256 * 1024;

const FILE_FIELDS: &str = "id,name,createdTime,size";

/// Consecutive "incomplete" replies without progress before an upload gives up.
const MAX_STALLED_CHUNKS: u32 = 3;

/// Configuration for [`DriveClient`].
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// Base URL of the metadata API.
    pub api_base: String,
    /// Base URL of the upload API.
    pub upload_base: String,
    /// Timeout for metadata requests and for each upload chunk.
    pub request_timeout: Duration,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Upload chunk size, a multiple of [`UPLOAD_CHUNK_ALIGN`].
    pub chunk_size: usize,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".into(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".into(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            chunk_size: 4 * UPLOAD_CHUNK_ALIGN,
        }
    }
}

impl DriveConfig {
    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the upload chunk size, rounded up to the required alignment.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1).div_ceil(UPLOAD_CHUNK_ALIGN) * UPLOAD_CHUNK_ALIGN;
        self
    }

    /// Points both API bases at `base` (used against local test servers).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.api_base = format!("{base}/drive/v3");
        self.upload_base = format!("{base}/upload/drive/v3");
        self
    }
}

/// File resource as returned by the Drive API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    created_time: DateTime<Utc>,
    /// Drive encodes int64 fields as strings. Folders have no size.
    #[serde(default)]
    size: Option<String>,
}

impl From<DriveFile> for BackupMetadata {
    fn from(file: DriveFile) -> Self {
        BackupMetadata {
            size_bytes: file.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            id: file.id,
            name: file.name,
            created_time: file.created_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedFolder {
    id: String,
}

/// Reply to one chunk of a resumable upload.
#[derive(Debug)]
enum ChunkReply {
    /// The server holds bytes `0..next_offset` and wants the rest.
    Incomplete { next_offset: u64 },
    /// The object was created.
    Done(BackupMetadata),
}

/// [`CloudStorageClient`] backed by Google Drive.
pub struct DriveClient {
    http: Client,
    config: DriveConfig,
    sessions: Arc<dyn SessionProvider>,
}

impl DriveClient {
    /// Creates a client.
    pub fn new(config: DriveConfig, sessions: Arc<dyn SessionProvider>) -> CloudResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            // 308 is "resume incomplete" in the upload protocol, not a redirect.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CloudError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            sessions,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// URL of the file resource `file_id`, with the id percent-encoded.
    fn file_url(&self, file_id: &str) -> CloudResult<Url> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| CloudError::Protocol(format!("invalid API base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| CloudError::Protocol("API base URL cannot have a path".into()))?
            .pop_if_empty()
            .push("files")
            .push(file_id);
        Ok(url)
    }

    async fn token(&self) -> CloudResult<String> {
        Ok(require_session(self.sessions.as_ref()).await?.access_token)
    }

    async fn send(&self, request: RequestBuilder) -> CloudResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        self.check(response).await
    }

    /// Passes successful responses through and maps the rest to errors.
    async fn check(&self, response: Response) -> CloudResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            self.sessions.invalidate().await;
        }
        tracing::debug!(status = status.as_u16(), body = %body, "drive request failed");
        Err(status_error(status, &body))
    }

    async fn find_folders(&self, token: &str, name: &str) -> CloudResult<Vec<DriveFile>> {
        let request = self
            .http
            .get(format!("{}/files", self.config.api_base))
            .bearer_auth(token)
            .timeout(self.config.request_timeout)
            .query(&[
                ("q", folder_query(name).as_str()),
                ("fields", "files(id,name,createdTime)"),
                ("spaces", "drive"),
            ]);
        let list: FileList = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(decode_error)?;
        Ok(list.files)
    }

    async fn start_upload(&self, token: &str, request: &UploadRequest<'_>) -> CloudResult<String> {
        let body = json!({
            "name": request.name,
            "mimeType": request.mime_type,
            "parents": [request.folder_id],
        });
        let response = self
            .send(
                self.http
                    .post(format!("{}/files", self.config.upload_base))
                    .bearer_auth(token)
                    .timeout(self.config.request_timeout)
                    .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
                    .header("X-Upload-Content-Type", request.mime_type)
                    .header("X-Upload-Content-Length", request.length)
                    .json(&body),
            )
            .await?;

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CloudError::Protocol("resumable session without Location".into()))
    }

    async fn put_chunk(
        &self,
        session_url: &str,
        chunk: Vec<u8>,
        content_range: String,
    ) -> CloudResult<ChunkReply> {
        let response = self
            .http
            .put(session_url)
            .timeout(self.config.request_timeout)
            .header(header::CONTENT_RANGE, content_range)
            .body(chunk)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::PERMANENT_REDIRECT {
            let next_offset = acknowledged_bytes(response.headers())?;
            return Ok(ChunkReply::Incomplete { next_offset });
        }
        let file: DriveFile = self.check(response).await?.json().await.map_err(decode_error)?;
        Ok(ChunkReply::Done(file.into()))
    }
}

/// Escapes a value for use inside a single-quoted Drive query literal.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn folder_query(name: &str) -> String {
    format!(
        "name = '{}' and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false",
        escape_query(name)
    )
}

fn children_query(folder_id: &str, mime_type: &str) -> String {
    format!(
        "'{}' in parents and mimeType = '{}' and trashed = false",
        escape_query(folder_id),
        escape_query(mime_type)
    )
}

/// Formats the `Content-Range` header of a chunk starting at `start`.
fn content_range(start: u64, len: usize, total: u64) -> String {
    if len == 0 {
        return format!("bytes */{total}");
    }
    format!("bytes {}-{}/{}", start, start + len as u64 - 1, total)
}

/// Number of bytes the server kept, from the `Range: bytes=0-N` header of
/// a 308 reply. No header means nothing was kept.
fn acknowledged_bytes(headers: &HeaderMap) -> CloudResult<u64> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(0);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().strip_prefix("bytes=0-"))
        .and_then(|last| last.parse::<u64>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| CloudError::Protocol(format!("unexpected Range header {value:?}")))
}

fn status_error(status: StatusCode, body: &str) -> CloudError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::UNAUTHORIZED => CloudError::Auth(detail),
        StatusCode::NOT_FOUND => CloudError::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => CloudError::Network(detail),
        StatusCode::FORBIDDEN if body.contains("storageQuotaExceeded") => {
            CloudError::Quota(detail)
        }
        StatusCode::FORBIDDEN if body.contains("ateLimitExceeded") => CloudError::Network(detail),
        StatusCode::FORBIDDEN => CloudError::Auth(detail),
        StatusCode::REQUEST_TIMEOUT => CloudError::Timeout,
        s if s.is_server_error() => CloudError::Network(detail),
        _ => CloudError::Protocol(detail),
    }
}

fn transport_error(e: reqwest::Error) -> CloudError {
    if e.is_timeout() {
        CloudError::Timeout
    } else {
        CloudError::Network(e.to_string())
    }
}

fn decode_error(e: reqwest::Error) -> CloudError {
    if e.is_timeout() {
        CloudError::Timeout
    } else if e.is_decode() {
        CloudError::Protocol(format!("unexpected response body: {e}"))
    } else {
        CloudError::Network(e.to_string())
    }
}

/// Reads until `buf` is full or the source is exhausted.
async fn fill_chunk(
    source: &mut (dyn AsyncRead + Send + Unpin),
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> CloudResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CloudError::Cancelled),
            read = source.read(&mut buf[filled..]) => read?,
        };
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[async_trait]
impl CloudStorageClient for DriveClient {
    async fn get_or_create_folder(&self, name: &str) -> CloudResult<String> {
        let token = self.token().await?;

        let mut existing = self.find_folders(&token, name).await?;
        if existing.len() > 1 {
            tracing::warn!(folder = name, count = existing.len(), "multiple backup folders, using the oldest");
            existing.sort_by(|a, b| a.created_time.cmp(&b.created_time));
        }
        if let Some(folder) = existing.into_iter().next() {
            return Ok(folder.id);
        }

        let request = self
            .http
            .post(format!("{}/files", self.config.api_base))
            .bearer_auth(&token)
            .timeout(self.config.request_timeout)
            .query(&[("fields", "id")])
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME_TYPE }));
        let created: CreatedFolder = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(decode_error)?;
        tracing::info!(folder = name, id = %created.id, "created backup folder");
        Ok(created.id)
    }

    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: &str,
    ) -> CloudResult<Vec<BackupMetadata>> {
        let token = self.token().await?;
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let query = children_query(folder_id, mime_type);

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("spaces", "drive"),
                ("pageSize", "100"),
            ];
            if let Some(page) = page_token.as_deref() {
                params.push(("pageToken", page));
            }

            let request = self
                .http
                .get(format!("{}/files", self.config.api_base))
                .bearer_auth(&token)
                .timeout(self.config.request_timeout)
                .query(&params);
            let page: serde_json::Value = self
                .send(request)
                .await?
                .json()
                .await
                .map_err(decode_error)?;

            let next = page
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let list: FileList = serde_json::from_value(page)
                .map_err(|e| CloudError::Protocol(format!("unexpected file list: {e}")))?;
            files.extend(list.files.into_iter().map(BackupMetadata::from));

            match next {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(files)
    }

    async fn upload(
        &self,
        request: UploadRequest<'_>,
        source: &mut (dyn AsyncRead + Send + Unpin),
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<BackupMetadata> {
        let token = self.token().await?;
        let session_url = self.start_upload(&token, &request).await?;

        // `buf` holds the bytes from offset `sent` that the server has not
        // acknowledged yet.
        let chunk_size = self.config.chunk_size;
        let mut buf: Vec<u8> = Vec::with_capacity(chunk_size);
        let mut sent = 0u64;
        let mut exhausted = false;
        let mut stalled = 0;
        loop {
            if !exhausted && buf.len() < chunk_size {
                let start = buf.len();
                buf.resize(chunk_size, 0);
                let read = fill_chunk(source, &mut buf[start..], cancel).await?;
                buf.truncate(start + read);
                exhausted = buf.len() < chunk_size;
            }

            let range = content_range(sent, buf.len(), request.length);
            let put = self.put_chunk(&session_url, buf.clone(), range);
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CloudError::Cancelled),
                reply = put => reply?,
            };

            let next_offset = match reply {
                ChunkReply::Done(meta) => {
                    let total = sent + buf.len() as u64;
                    progress(percent_of(total, request.length.max(total)), total);
                    tracing::debug!(id = %meta.id, bytes = total, "upload complete");
                    return Ok(meta);
                }
                ChunkReply::Incomplete { next_offset } => next_offset,
            };

            if next_offset < sent || next_offset > sent + buf.len() as u64 {
                return Err(CloudError::Protocol(format!(
                    "server acknowledged {next_offset} bytes after {sent} were confirmed"
                )));
            }
            if next_offset == sent {
                stalled += 1;
                if stalled >= MAX_STALLED_CHUNKS || (exhausted && buf.is_empty()) {
                    return Err(CloudError::Protocol(format!(
                        "upload session stuck at {sent} of {} bytes",
                        request.length
                    )));
                }
                continue;
            }

            stalled = 0;
            buf.drain(..(next_offset - sent) as usize);
            sent = next_offset;
            progress(percent_of(sent, request.length.max(sent)), sent);
        }
    }

    async fn download(
        &self,
        file_id: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CloudResult<()> {
        let token = self.token().await?;
        let request = self
            .http
            .get(self.file_url(file_id)?)
            .bearer_auth(&token)
            .query(&[("alt", "media")]);
        let mut response = self.send(request).await?;
        let total = response.content_length().unwrap_or(0);

        let mut done = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CloudError::Cancelled),
                chunk = response.chunk() => chunk.map_err(transport_error)?,
            };
            let Some(chunk) = chunk else { break };

            dest.write_all(&chunk).await?;
            done += chunk.len() as u64;
            progress(percent_of(done, total.max(done)), done);
        }
        dest.flush().await?;
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> CloudResult<()> {
        let token = self.token().await?;
        let request = self
            .http
            .delete(self.file_url(file_id)?)
            .bearer_auth(&token)
            .timeout(self.config.request_timeout);

        match self.send(request).await {
            Ok(_) | Err(CloudError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::BACKUP_MIME_TYPE;
    use crate::session::{Session, StaticSessionProvider};
    use mockito::{Matcher, Server, ServerGuard};
    use parking_lot::Mutex;

    fn signed_in() -> Arc<StaticSessionProvider> {
        Arc::new(StaticSessionProvider::signed_in(Session::new("me", "token")))
    }

    fn client_for(server: &ServerGuard, sessions: Arc<StaticSessionProvider>) -> DriveClient {
        DriveClient::new(
            DriveConfig::default()
                .with_base_url(&server.url())
                .with_chunk_size(UPLOAD_CHUNK_ALIGN),
            sessions,
        )
        .unwrap()
    }

    #[test]
    fn query_literals_are_escaped() {
        assert_eq!(escape_query("it's"), "it\\'s");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
        assert_eq!(
            folder_query("Backups"),
            "name = 'Backups' and mimeType = 'application/vnd.google-apps.folder' and trashed = false"
        );
        assert!(children_query("f1", "application/octet-stream").starts_with("'f1' in parents"));
    }

    #[test]
    fn content_range_formats() {
        assert_eq!(content_range(0, 10, 25), "bytes 0-9/25");
        assert_eq!(content_range(20, 5, 25), "bytes 20-24/25");
        assert_eq!(content_range(0, 0, 0), "bytes */0");
    }

    #[test]
    fn chunk_size_is_aligned() {
        let config = DriveConfig::default().with_chunk_size(1);
        assert_eq!(config.chunk_size, UPLOAD_CHUNK_ALIGN);
        let config = DriveConfig::default().with_chunk_size(UPLOAD_CHUNK_ALIGN + 1);
        assert_eq!(config.chunk_size, 2 * UPLOAD_CHUNK_ALIGN);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            CloudError::Auth(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, ""),
            CloudError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, r#"{"reason":"storageQuotaExceeded"}"#),
            CloudError::Quota(_)
        ));
        assert!(status_error(StatusCode::FORBIDDEN, r#"{"reason":"userRateLimitExceeded"}"#)
            .is_retryable());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "bad"),
            CloudError::Protocol(_)
        ));
    }

    #[test]
    fn drive_file_parses_string_size() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"abc","name":"dict.db","createdTime":"2024-05-01T10:00:00.000Z","size":"2048"}"#,
        )
        .unwrap();
        let meta = BackupMetadata::from(file);
        assert_eq!(meta.id, "abc");
        assert_eq!(meta.size_bytes, 2048);
    }

    #[test]
    fn base_url_override() {
        let config = DriveConfig::default().with_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.api_base, "http://127.0.0.1:9000/drive/v3");
        assert_eq!(config.upload_base, "http://127.0.0.1:9000/upload/drive/v3");
    }

    #[tokio::test]
    async fn signed_out_fails_before_any_request() {
        let client = DriveClient::new(
            DriveConfig::default().with_base_url("http://127.0.0.1:9"),
            Arc::new(StaticSessionProvider::signed_out()),
        )
        .unwrap();
        assert!(matches!(
            client.delete("x").await,
            Err(CloudError::Auth(_))
        ));
    }

    #[test]
    fn range_header_gives_next_offset() {
        let mut headers = HeaderMap::new();
        assert_eq!(acknowledged_bytes(&headers).unwrap(), 0);
        headers.insert(header::RANGE, "bytes=0-524287".parse().unwrap());
        assert_eq!(acknowledged_bytes(&headers).unwrap(), 524_288);
        headers.insert(header::RANGE, "bytes=10-20".parse().unwrap());
        assert!(matches!(
            acknowledged_bytes(&headers),
            Err(CloudError::Protocol(_))
        ));
    }

    #[test]
    fn file_ids_are_percent_encoded() {
        let client = DriveClient::new(
            DriveConfig::default().with_base_url("http://127.0.0.1:9"),
            signed_in(),
        )
        .unwrap();
        assert_eq!(
            client.file_url("a/b c").unwrap().as_str(),
            "http://127.0.0.1:9/drive/v3/files/a%2Fb%20c"
        );
    }

    #[tokio::test]
    async fn list_files_follows_page_tokens() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/drive/v3/files")
            // Four parameters: no page token yet.
            .match_query(Matcher::Regex(r"^[^&]+(&[^&]+){3}$".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"nextPageToken":"p2","files":[{"id":"a","name":"a.db","createdTime":"2024-01-01T00:00:00Z","size":"3"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "p2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"files":[{"id":"b","name":"b.db","createdTime":"2024-02-01T00:00:00Z","size":"5"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, signed_in());
        let files = client.list_files("folder", BACKUP_MIME_TYPE).await.unwrap();

        let ids: Vec<_> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(files[1].size_bytes, 5);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn upload_resumes_from_acknowledged_offset() {
        let mut server = Server::new_async().await;
        let total = UPLOAD_CHUNK_ALIGN + UPLOAD_CHUNK_ALIGN / 2;
        let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        let session_url = format!("{}/upload/session/abc", server.url());

        let start = server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "resumable".into()))
            .with_status(200)
            .with_header("location", &session_url)
            .create_async()
            .await;
        // The server keeps only half of the first chunk.
        let partial = server
            .mock("PUT", "/upload/session/abc")
            .match_header("content-range", "bytes 0-262143/393216")
            .with_status(308)
            .with_header("range", "bytes=0-131071")
            .expect(1)
            .create_async()
            .await;
        let rest = server
            .mock("PUT", "/upload/session/abc")
            .match_header("content-range", "bytes 131072-393215/393216")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"up1","name":"dict.db","createdTime":"2024-05-01T10:00:00Z","size":"393216"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, signed_in());
        let seen = Mutex::new(Vec::new());
        let progress = |_: u8, bytes: u64| seen.lock().push(bytes);
        let meta = client
            .upload(
                UploadRequest {
                    folder_id: "folder",
                    name: "dict.db",
                    mime_type: BACKUP_MIME_TYPE,
                    length: total as u64,
                },
                &mut &data[..],
                &progress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(meta.id, "up1");
        assert_eq!(meta.size_bytes, total as i64);
        assert_eq!(*seen.lock(), vec![131_072, 393_216]);
        start.assert_async().await;
        partial.assert_async().await;
        rest.assert_async().await;
    }

    #[tokio::test]
    async fn delete_of_missing_file_succeeds() {
        let mut server = Server::new_async().await;
        let gone = server
            .mock("DELETE", "/drive/v3/files/gone")
            .with_status(404)
            .with_body(r#"{"error":{"code":404}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, signed_in());
        client.delete("gone").await.unwrap();
        gone.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_invalidates_session() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("expired")
            .create_async()
            .await;

        let sessions = signed_in();
        let client = client_for(&server, sessions.clone());
        assert!(matches!(
            client.list_files("folder", BACKUP_MIME_TYPE).await,
            Err(CloudError::Auth(_))
        ));
        assert!(sessions.current_session().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_folders_resolve_to_the_oldest() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"files":[
                    {"id":"newer","name":"Backups","createdTime":"2024-06-01T00:00:00Z"},
                    {"id":"older","name":"Backups","createdTime":"2023-01-01T00:00:00Z"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server, signed_in());
        assert_eq!(client.get_or_create_folder("Backups").await.unwrap(), "older");
    }

    #[tokio::test]
    async fn missing_folder_is_created() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"files":[]}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/drive/v3/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"fresh"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, signed_in());
        assert_eq!(client.get_or_create_folder("Backups").await.unwrap(), "fresh");
        create.assert_async().await;
    }
}
