use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dispatcher::RequestDispatcher;
use crate::error::ApiError;
use crate::http::ApiRequest;
use crate::models::ArchiveQuery;

pub const EXPORT_CSV_PATH: &str = "archives/export/csv";

/// Where a downloaded file ends up (the native stand-in for a browser save)
pub trait SaveTarget: Send + Sync {
    /// Persist the staged file under `file_name` and return its final location
    fn save(&self, staged: &Path, file_name: &str) -> std::io::Result<PathBuf>;
}

/// Copies downloads into a directory, creating it when needed
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    dir: PathBuf,
}

impl DirectoryTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SaveTarget for DirectoryTarget {
    fn save(&self, staged: &Path, file_name: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let destination = self.dir.join(file_name);
        std::fs::copy(staged, &destination)?;
        Ok(destination)
    }
}

/// Fetches the metadata CSV export and hands it to a [`SaveTarget`].
///
/// The body is staged in a temporary file that is removed when the call returns,
/// whether the save succeeded or not.
pub struct ExportDownloader {
    dispatcher: Arc<RequestDispatcher>,
    staging_dir: PathBuf,
    file_name: String,
}

impl ExportDownloader {
    pub fn new(
        dispatcher: Arc<RequestDispatcher>,
        staging_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            staging_dir: staging_dir.into(),
            file_name: file_name.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub async fn download_csv(
        &self,
        query: &ArchiveQuery,
        target: &dyn SaveTarget,
    ) -> Result<PathBuf, ApiError> {
        let request = ApiRequest::get(EXPORT_CSV_PATH).with_query(query.to_pairs());
        let response = self.dispatcher.send(&request).await?;

        if !response.is_success() {
            warn!("✗ CSV export failed with status {}", response.status);
            return Err(ApiError::from_response(&response, "CSV export failed"));
        }

        debug!("CSV export received ({} bytes)", response.body.len());

        // Removed from disk when `staged` drops, on every path out of this function
        let mut staged = tempfile::Builder::new()
            .prefix("archive-export-")
            .suffix(".csv")
            .tempfile_in(&self.staging_dir)?;
        staged.write_all(&response.body)?;
        staged.flush()?;

        let saved = target.save(staged.path(), &self.file_name).map_err(|e| {
            warn!("✗ Could not save {}: {}", self.file_name, e);
            e
        })?;

        info!("✓ Exported archive metadata to {}", saved.display());
        Ok(saved)
    }
}
