//! HTTP seam between the gateway and the backend.
//!
//! Requests are immutable descriptors ([`ApiRequest`]); every physical attempt wraps the
//! descriptor in a fresh [`OutgoingRequest`] carrying that attempt's headers, so a retry
//! never sees state mutated by the attempt before it.

use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::config::ClientConfig;

/// Size of the slices an upload body is streamed in; one progress event per slice
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Called with (bytes sent, total bytes) while a request body streams out
pub type ByteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Request timed out")]
    TimedOut,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Where the bytes of an upload come from
#[derive(Clone, Debug)]
pub enum UploadSource {
    Memory(Arc<[u8]>),
    /// Read in slices while the request streams; never loaded whole
    Disk(PathBuf),
}

/// A file picked for upload
#[derive(Clone, Debug)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: Option<String>,
    source: UploadSource,
    len: u64,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type,
            len: bytes.len() as u64,
            source: UploadSource::Memory(bytes.into()),
        }
    }

    /// Refer to a file on disk, keeping its name and guessing its MIME type.
    /// Only the size is read here; the content is streamed at upload time.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string());
        Ok(Self {
            file_name,
            mime_type,
            source: UploadSource::Disk(path.to_path_buf()),
            len: metadata.len(),
        })
    }

    pub fn source(&self) -> &UploadSource {
        &self.source
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Multipart body: the file under `file`, serialized metadata under `data`
#[derive(Clone, Debug)]
pub struct MultipartPayload {
    pub file: UploadFile,
    pub data: String,
}

#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Pre-serialized JSON
    Json(Vec<u8>),
    Multipart(MultipartPayload),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }
}

/// Immutable description of one logical API call
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API root, e.g. `archives/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = RequestBody::Json(serde_json::to_vec(body)?);
        Ok(self)
    }

    pub fn with_multipart(mut self, payload: MultipartPayload) -> Self {
        self.body = RequestBody::Multipart(payload);
        self
    }
}

/// One physical attempt at an [`ApiRequest`]
#[derive(Clone)]
pub struct OutgoingRequest<'a> {
    pub request: &'a ApiRequest,
    pub headers: Vec<(&'static str, String)>,
    pub progress: Option<ByteProgress>,
}

impl<'a> OutgoingRequest<'a> {
    /// Headers for one attempt: bearer credential if any, and a JSON content type unless
    /// the body is multipart (the transport then sets its own boundary-aware type)
    pub fn new(request: &'a ApiRequest, bearer: Option<&str>) -> Self {
        let mut headers = Vec::new();
        if let Some(token) = bearer {
            headers.push(("authorization", format!("Bearer {}", token)));
        }
        if !request.body.is_multipart() {
            headers.push(("content-type", JSON_CONTENT_TYPE.to_string()));
        }
        Self {
            request,
            headers,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ByteProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Fully buffered response
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// FastAPI error body: `detail` is either a message or a list of validation errors
#[derive(serde::Deserialize)]
struct ErrorBody {
    detail: ErrorDetail,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Message(String),
    Items(Vec<ErrorItem>),
}

#[derive(serde::Deserialize)]
struct ErrorItem {
    msg: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn json_body<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        Self {
            status,
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Human-readable message from a structured error body, if the body has one
    pub fn error_detail(&self) -> Option<String> {
        let parsed: ErrorBody = serde_json::from_slice(&self.body).ok()?;
        let message = match parsed.detail {
            ErrorDetail::Message(message) => message,
            ErrorDetail::Items(items) => items
                .into_iter()
                .map(|item| item.msg)
                .collect::<Vec<_>>()
                .join("; "),
        };
        (!message.trim().is_empty()).then_some(message)
    }
}

/// Trait for HTTP exchanges (allows mocking for tests)
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: OutgoingRequest<'_>) -> Result<ApiResponse, TransportError>;
}

/// Production transport over reqwest
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        // No overall timeout on the client: uploads carry their own, far longer deadline
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, TransportError> {
        let raw = self.config.endpoint(&request.path);
        let mut url = Url::parse(&raw)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", raw, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    fn multipart_form(
        payload: &MultipartPayload,
        progress: Option<ByteProgress>,
    ) -> Result<Form, TransportError> {
        let file = &payload.file;
        let body = Body::wrap_stream(upload_stream(file, progress));
        let mut part = Part::stream_with_length(body, file.len()).file_name(file.file_name.clone());
        if let Some(mime) = &file.mime_type {
            part = part
                .mime_str(mime)
                .map_err(|e| TransportError::InvalidRequest(format!("MIME type {}: {}", mime, e)))?;
        }

        Ok(Form::new().part("file", part).text("data", payload.data.clone()))
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, outgoing: OutgoingRequest<'_>) -> Result<ApiResponse, TransportError> {
        let request = outgoing.request;
        let url = self.url_for(request)?;

        debug!("📡 {} {}", request.method, url.path());

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &outgoing.headers {
            builder = builder.header(*name, value);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder.body(bytes.clone()),
            RequestBody::Multipart(payload) => {
                builder.multipart(Self::multipart_form(payload, outgoing.progress.clone())?)
            }
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        debug!("Response status: {} ({} bytes)", status, body.len());

        Ok(ApiResponse {
            status,
            content_type,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::Request(e)
    }
}

type UploadStream = BoxStream<'static, Result<Vec<u8>, std::io::Error>>;

/// Body stream for an upload, reporting bytes handed to the connection as each slice is polled
fn upload_stream(file: &UploadFile, progress: Option<ByteProgress>) -> UploadStream {
    match file.source() {
        UploadSource::Memory(bytes) => memory_stream(bytes.clone(), progress),
        UploadSource::Disk(path) => disk_stream(path.clone(), file.len(), progress),
    }
}

fn memory_stream(bytes: Arc<[u8]>, progress: Option<ByteProgress>) -> UploadStream {
    let total = bytes.len() as u64;
    let slices = (0..bytes.len()).step_by(UPLOAD_CHUNK_SIZE);

    stream::iter(slices.map(move |start| {
        let end = (start + UPLOAD_CHUNK_SIZE).min(bytes.len());
        let chunk = bytes[start..end].to_vec();
        if let Some(progress) = &progress {
            trace!("upload slice {}..{} of {}", start, end, total);
            progress(end as u64, total);
        }
        Ok(chunk)
    }))
    .boxed()
}

fn disk_stream(path: PathBuf, total: u64, progress: Option<ByteProgress>) -> UploadStream {
    // The file is opened on first poll, so nothing is read before the request starts
    stream::try_unfold(DiskCursor::new(path), move |cursor| {
        cursor.next_slice(total, progress.clone())
    })
    .boxed()
}

struct DiskCursor {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    sent: u64,
}

impl DiskCursor {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            sent: 0,
        }
    }

    async fn next_slice(
        mut self,
        total: u64,
        progress: Option<ByteProgress>,
    ) -> Result<Option<(Vec<u8>, Self)>, std::io::Error> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => tokio::fs::File::open(&self.path).await?,
        };

        let mut chunk = vec![0u8; UPLOAD_CHUNK_SIZE];
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            return Ok(None);
        }
        chunk.truncate(read);

        self.sent += read as u64;
        if let Some(progress) = &progress {
            trace!("upload read {} of {} from {}", self.sent, total, self.path.display());
            progress(self.sent.min(total), total);
        }
        self.file = Some(file);
        Ok(Some((chunk, self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (ByteProgress, Arc<Mutex<Vec<(u64, u64)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ByteProgress = Arc::new(move |loaded, total| {
            sink.lock().unwrap().push((loaded, total));
        });
        (progress, seen)
    }

    #[test]
    fn test_outgoing_headers_for_json() {
        let request = ApiRequest::get("auth/me");
        let outgoing = OutgoingRequest::new(&request, Some("tok"));
        assert_eq!(outgoing.header("authorization"), Some("Bearer tok"));
        assert_eq!(outgoing.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_outgoing_headers_for_multipart() {
        let request = ApiRequest::post("archives/").with_multipart(MultipartPayload {
            file: UploadFile::new("a.txt", None, b"abc".to_vec()),
            data: "{}".to_string(),
        });
        let outgoing = OutgoingRequest::new(&request, None);
        assert_eq!(outgoing.header("authorization"), None);
        assert_eq!(outgoing.header("content-type"), None);
    }

    #[test]
    fn test_error_detail_message() {
        let response = ApiResponse::json_body(400, &serde_json::json!({"detail": "Titre requis"}));
        assert_eq!(response.error_detail().as_deref(), Some("Titre requis"));
    }

    #[test]
    fn test_error_detail_validation_list() {
        let response = ApiResponse::json_body(
            422,
            &serde_json::json!({"detail": [{"msg": "field required", "loc": ["title"]}, {"msg": "too short"}]}),
        );
        assert_eq!(
            response.error_detail().as_deref(),
            Some("field required; too short")
        );
    }

    #[test]
    fn test_error_detail_unparseable() {
        let response = ApiResponse::new(502, "<html>Bad Gateway</html>");
        assert_eq!(response.error_detail(), None);
    }

    #[tokio::test]
    async fn test_memory_stream_reports_each_slice() {
        let size = UPLOAD_CHUNK_SIZE * 2 + 10;
        let file = UploadFile::new("a.bin", None, vec![7u8; size]);
        let (progress, seen) = recorder();

        let chunks: Vec<_> = upload_stream(&file, Some(progress)).collect().await;
        let total_len: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total_len, size);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last(), Some(&(size as u64, size as u64)));
    }

    #[tokio::test]
    async fn test_disk_file_is_streamed_not_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("field-recording.mp4");
        let content: Vec<u8> = (0..UPLOAD_CHUNK_SIZE * 3 + 123).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let file = UploadFile::from_path(&path).await.unwrap();
        assert_eq!(file.file_name, "field-recording.mp4");
        assert_eq!(file.mime_type.as_deref(), Some("video/mp4"));
        assert_eq!(file.len(), content.len() as u64);
        assert!(matches!(file.source(), UploadSource::Disk(p) if p == &path));

        let (progress, seen) = recorder();
        let chunks: Vec<_> = upload_stream(&file, Some(progress)).collect().await;
        let streamed: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap()).collect();
        assert_eq!(streamed, content);

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 4);
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(seen.last(), Some(&(content.len() as u64, content.len() as u64)));
    }

    #[tokio::test]
    async fn test_missing_disk_file_fails_the_stream() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gone.mp4");
        std::fs::write(&path, b"abc").unwrap();
        let file = UploadFile::from_path(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let first = upload_stream(&file, None).next().await.unwrap();
        assert!(first.is_err());
    }

    #[tokio::test]
    async fn test_from_path_rejects_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = UploadFile::from_path(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_url_keeps_trailing_slash_and_query() {
        let transport = ReqwestTransport::new(&ClientConfig::default()).unwrap();
        let request = ApiRequest::get("archives/search/")
            .with_query(vec![("q".to_string(), "pêche & chants".to_string())]);
        let url = transport.url_for(&request).unwrap();
        assert_eq!(url.path(), "/api/v1/archives/search/");
        assert_eq!(
            url.query_pairs().next().map(|(k, v)| (k.into_owned(), v.into_owned())),
            Some(("q".to_string(), "pêche & chants".to_string()))
        );
    }

    #[test]
    fn test_url_matches_config_endpoint() {
        let config = ClientConfig {
            base_url: "https://archive.example.org/".to_string(),
            api_prefix: "/api/v2/".to_string(),
            ..ClientConfig::default()
        };
        let transport = ReqwestTransport::new(&config).unwrap();
        let url = transport.url_for(&ApiRequest::get("/territories/stats")).unwrap();
        assert_eq!(url.as_str(), config.endpoint("territories/stats"));
        assert_eq!(url.as_str(), "https://archive.example.org/api/v2/territories/stats");
    }
}
