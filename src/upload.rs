use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::ApiError;
use crate::http::{
    ApiRequest, ByteProgress, HttpTransport, MultipartPayload, OutgoingRequest, TransportError,
    UploadFile,
};
use crate::models::Archive;
use crate::token_store::TokenStore;

pub const ARCHIVES_PATH: &str = "archives/";

const REJECTED_FALLBACK: &str = "Upload was rejected by the server";

/// Receives whole upload percentages (0-100)
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Converts byte counts into percentages for a caller's callback.
///
/// Values handed to the callback never decrease and each is emitted at most once,
/// whatever order byte events arrive in. The comparison and the callback run under one
/// lock, so events recorded from several threads are still delivered in order.
pub struct UploadProgress {
    callback: ProgressCallback,
    last: Mutex<Option<u8>>,
}

impl UploadProgress {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback,
            last: Mutex::new(None),
        }
    }

    /// floor(loaded / total * 100)
    pub fn percent(loaded: u64, total: u64) -> u8 {
        if total == 0 {
            return 100;
        }
        ((loaded.min(total) as u128 * 100) / total as u128) as u8
    }

    pub fn record(&self, loaded: u64, total: u64) {
        self.emit(Self::percent(loaded, total));
    }

    /// Emit 100 unless it was already reported
    pub fn finish(&self) {
        self.emit(100);
    }

    pub fn last_emitted(&self) -> Option<u8> {
        self.last.lock().ok().and_then(|last| *last)
    }

    fn emit(&self, percent: u8) {
        let Ok(mut last) = self.last.lock() else {
            warn!("Upload progress lock poisoned, dropping {}%", percent);
            return;
        };
        if last.is_some_and(|previous| percent <= previous) {
            return;
        }
        *last = Some(percent);
        if percent % 25 == 0 {
            debug!("Upload progress: {}%", percent);
        }
        (self.callback)(percent);
    }
}

/// Long-running multipart uploads of a file plus its metadata.
///
/// Uploads deliberately bypass the dispatcher's 401 refresh retry: the body may be
/// gigabytes, so an expired session surfaces as [`ApiError::ServerRejected`] and the
/// caller restarts after logging in again.
pub struct UploadTransport {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenStore>,
    timeout: Duration,
}

impl UploadTransport {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<dyn TokenStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            tokens,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upload `file` with `metadata` serialized as the `data` field and return the created archive.
    ///
    /// The whole exchange is bounded by the configured timeout ([`ApiError::Timeout`]).
    /// Transport failures are [`ApiError::Network`]; non-success statuses are
    /// [`ApiError::ServerRejected`] carrying the server's detail when it sent one.
    pub async fn upload<M: Serialize + ?Sized>(
        &self,
        metadata: &M,
        file: UploadFile,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Archive, ApiError> {
        let data = serde_json::to_string(metadata)?;
        let file_name = file.file_name.clone();
        let size = file.len();
        let request =
            ApiRequest::post(ARCHIVES_PATH).with_multipart(MultipartPayload { file, data });

        let bearer = self.tokens.get()?.map(|pair| pair.access);
        let progress = on_progress.map(|callback| Arc::new(UploadProgress::new(callback)));

        let mut outgoing = OutgoingRequest::new(&request, bearer.as_deref());
        if let Some(progress) = &progress {
            let progress = progress.clone();
            let on_bytes: ByteProgress = Arc::new(move |loaded, total| progress.record(loaded, total));
            outgoing = outgoing.with_progress(on_bytes);
        }

        info!("⬆ Uploading {} ({} bytes)", file_name, size);

        let response = match tokio::time::timeout(self.timeout, self.transport.execute(outgoing)).await
        {
            Err(_elapsed) => {
                warn!("✗ Upload of {} timed out after {:?}", file_name, self.timeout);
                return Err(ApiError::Timeout(self.timeout));
            }
            Ok(Err(TransportError::TimedOut)) => {
                warn!("✗ Upload of {} timed out in transport", file_name);
                return Err(ApiError::Timeout(self.timeout));
            }
            Ok(Err(e)) => {
                warn!("✗ Upload of {} failed: {}", file_name, e);
                return Err(ApiError::Network(e));
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            let detail = response
                .error_detail()
                .unwrap_or_else(|| REJECTED_FALLBACK.to_string());
            warn!("✗ Upload of {} rejected ({}): {}", file_name, response.status, detail);
            return Err(ApiError::ServerRejected {
                status: response.status,
                detail,
            });
        }

        let archive: Archive = response.json()?;
        if let Some(progress) = &progress {
            progress.finish();
        }

        info!("✓ Uploaded {} as archive {}", file_name, archive.id);
        Ok(archive)
    }

    /// [`upload`](Self::upload), abandoned as soon as `cancel` fires
    pub async fn upload_with_cancel<M: Serialize + ?Sized>(
        &self,
        metadata: &M,
        file: UploadFile,
        on_progress: Option<ProgressCallback>,
        cancel: &CancelToken,
    ) -> Result<Archive, ApiError> {
        cancel.run(self.upload(metadata, file, on_progress)).await
    }
}
