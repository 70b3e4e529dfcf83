// Test support utilities for both unit and integration tests

use crate::http::{
    ApiResponse, HttpTransport, OutgoingRequest, RequestBody, TransportError,
};
use crate::models::{Archive, MediaType, Territory};
use reqwest::Method;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the mock does for one request
#[derive(Clone, Debug)]
pub enum MockReply {
    Respond(ApiResponse),
    /// Fail as if the connection dropped
    NetworkFailure(String),
    /// Wait, then act as the inner reply
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        MockReply::Respond(ApiResponse::new(status, Vec::new()))
    }

    pub fn json(status: u16, value: serde_json::Value) -> Self {
        MockReply::Respond(ApiResponse::json_body(status, &value))
    }

    pub fn body(status: u16, body: impl Into<Vec<u8>>) -> Self {
        MockReply::Respond(ApiResponse::new(status, body))
    }

    pub fn tokens(access: &str, refresh: &str) -> Self {
        Self::json(
            200,
            serde_json::json!({
                "access_token": access,
                "refresh_token": refresh,
                "token_type": "bearer"
            }),
        )
    }

    pub fn after(self, delay: Duration) -> Self {
        MockReply::Delayed(delay, Box::new(self))
    }
}

/// What the mock saw of one request
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub json: Option<serde_json::Value>,
    /// Multipart `data` field and file name, for uploads
    pub multipart: Option<(String, String)>,
}

impl RecordedRequest {
    pub fn bearer(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockReply + Send + Sync>;

enum Route {
    Queue(VecDeque<MockReply>),
    Handler(Handler),
}

/// In-memory transport for testing
///
/// Replies are scripted per path, either as a FIFO queue or as a handler that sees
/// the request. Unscripted paths answer 404. Every request is recorded.
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
    /// Number of progress events simulated for uploads
    progress_steps: u64,
}

impl Default for MockTransport {
    fn default() -> Self {
        MockTransport {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            progress_steps: 4,
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for the next request to `path` (without query string)
    pub fn enqueue(&self, path: &str, reply: MockReply) -> &Self {
        let mut routes = self.routes.lock().unwrap();
        match routes
            .entry(path.to_string())
            .or_insert_with(|| Route::Queue(VecDeque::new()))
        {
            Route::Queue(queue) => queue.push_back(reply),
            Route::Handler(_) => panic!("{} already has a handler", path),
        }
        self
    }

    /// Answer every request to `path` with `handler`
    pub fn on<F>(&self, path: &str, handler: F) -> &Self
    where
        F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Route::Handler(Arc::new(handler)));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests sent to `path`
    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    fn record(outgoing: &OutgoingRequest<'_>) -> RecordedRequest {
        let request = outgoing.request;
        let (json, multipart) = match &request.body {
            RequestBody::Empty => (None, None),
            RequestBody::Json(bytes) => (serde_json::from_slice(bytes).ok(), None),
            RequestBody::Multipart(payload) => (
                None,
                Some((payload.data.clone(), payload.file.file_name.clone())),
            ),
        };

        RecordedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            authorization: outgoing.header("authorization").map(str::to_string),
            content_type: outgoing.header("content-type").map(str::to_string),
            json,
            multipart,
        }
    }

    fn reply_for(&self, recorded: &RecordedRequest) -> MockReply {
        let handler = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&recorded.path) {
                Some(Route::Queue(queue)) => {
                    return queue.pop_front().unwrap_or_else(|| {
                        MockReply::body(599, format!("no reply left for {}", recorded.path))
                    })
                }
                Some(Route::Handler(handler)) => handler.clone(),
                None => return MockReply::json(404, serde_json::json!({"detail": "Not Found"})),
            }
        };
        // Called unlocked so handlers may inspect the mock
        handler(recorded)
    }
}

#[async_trait::async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, outgoing: OutgoingRequest<'_>) -> Result<ApiResponse, TransportError> {
        let recorded = Self::record(&outgoing);
        self.requests.lock().unwrap().push(recorded.clone());

        // Uploads stream their body before any reply arrives
        if let (Some(progress), RequestBody::Multipart(payload)) =
            (&outgoing.progress, &outgoing.request.body)
        {
            let total = payload.file.len();
            for step in 1..=self.progress_steps {
                progress(total * step / self.progress_steps, total);
                tokio::task::yield_now().await;
            }
        }

        let mut reply = self.reply_for(&recorded);
        loop {
            match reply {
                MockReply::Respond(response) => return Ok(response),
                MockReply::NetworkFailure(message) => {
                    return Err(TransportError::Connection(message))
                }
                MockReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

/// Territory fixtures used across tests
pub fn sample_territories() -> Vec<Territory> {
    vec![
        Territory::new("Dakar", "Senegal"),
        Territory::new("Dak", "Chad"),
        Territory::new("Saint-Louis", "Sénégal"),
    ]
}

/// JSON for an archive as the backend returns it
pub fn archive_json(id: uuid::Uuid, title: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": title,
        "slug": title.to_lowercase().replace(' ', "-"),
        "description": null,
        "media_type": MediaType::Audio,
        "file_size_bytes": 2048,
        "duration_seconds": null,
        "mime_type": "audio/wav",
        "territory_id": null,
        "recording_date": null,
        "recording_location": "Dakar",
        "language_spoken": "wo",
        "tags": ["pêche"],
        "context_notes": null,
        "participants": null,
        "license_type": "all-rights-reserved",
        "rights_holder": null,
        "access_level": "restricted",
        "consent_obtained": true,
        "status": "draft",
        "is_featured": false,
        "author_id": uuid::Uuid::nil(),
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-01T10:00:00Z",
        "file_url": null,
        "thumbnail_url": null
    })
}

/// Parse an archive fixture, for comparing against client results
pub fn sample_archive(id: uuid::Uuid, title: &str) -> Archive {
    serde_json::from_value(archive_json(id, title)).expect("archive fixture must parse")
}
