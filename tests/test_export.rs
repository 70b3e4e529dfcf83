#![cfg(feature = "test-utils")]

mod support;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::support::{dispatcher_with, tracing_init};
use archive_gateway::config::DEFAULT_EXPORT_FILE_NAME;
use archive_gateway::dispatcher::REFRESH_PATH;
use archive_gateway::export::EXPORT_CSV_PATH;
use archive_gateway::models::{ArchiveQuery, MediaType};
use archive_gateway::test_support::MockReply;
use archive_gateway::{ApiError, DirectoryTarget, ExportDownloader, SaveTarget, TokenPair};
use serde_json::json;
use tempfile::TempDir;

const CSV: &str = "ID,Titre,Type\n1,Chant de pêche,audio\n";

/// Refuses every save, remembering where the staged file was
#[derive(Default)]
struct FailingTarget {
    staged: Mutex<Vec<PathBuf>>,
}

impl SaveTarget for FailingTarget {
    fn save(&self, staged: &Path, _file_name: &str) -> std::io::Result<PathBuf> {
        assert!(staged.exists());
        self.staged.lock().unwrap().push(staged.to_path_buf());
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "download folder is read-only",
        ))
    }
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_export_saves_csv_under_fixed_name() {
    tracing_init();
    let staging = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();
    let (dispatcher, transport, _tokens) = dispatcher_with(Some(TokenPair::new("a1", "r1")));
    transport.enqueue(EXPORT_CSV_PATH, MockReply::body(200, CSV));

    let exporter = ExportDownloader::new(dispatcher, staging.path(), DEFAULT_EXPORT_FILE_NAME);
    let saved = exporter
        .download_csv(&ArchiveQuery::default(), &DirectoryTarget::new(downloads.path()))
        .await
        .unwrap();

    assert_eq!(saved, downloads.path().join("archives-metadonnees.csv"));
    assert_eq!(std::fs::read_to_string(&saved).unwrap(), CSV);
    assert_eq!(entries(staging.path()), 0);
}

#[tokio::test]
async fn test_export_forwards_filters() {
    tracing_init();
    let staging = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();
    let (dispatcher, transport, _tokens) = dispatcher_with(Some(TokenPair::new("a1", "r1")));
    transport.enqueue(EXPORT_CSV_PATH, MockReply::body(200, CSV));

    let query = ArchiveQuery {
        media_type: Some(MediaType::Audio),
        status: Some("published".to_string()),
        ..ArchiveQuery::default()
    };
    let exporter = ExportDownloader::new(dispatcher, staging.path(), DEFAULT_EXPORT_FILE_NAME);
    exporter
        .download_csv(&query, &DirectoryTarget::new(downloads.path()))
        .await
        .unwrap();

    let sent = &transport.requests()[0];
    assert_eq!(sent.bearer(), Some("a1"));
    assert_eq!(
        sent.query,
        vec![
            ("media_type".to_string(), "audio".to_string()),
            ("status".to_string(), "published".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_failed_save_leaves_nothing_staged() {
    tracing_init();
    let staging = TempDir::new().unwrap();
    let (dispatcher, transport, _tokens) = dispatcher_with(Some(TokenPair::new("a1", "r1")));
    for _ in 0..3 {
        transport.enqueue(EXPORT_CSV_PATH, MockReply::body(200, CSV));
    }

    let exporter = ExportDownloader::new(dispatcher, staging.path(), DEFAULT_EXPORT_FILE_NAME);
    let target = FailingTarget::default();

    for _ in 0..3 {
        let result = exporter.download_csv(&ArchiveQuery::default(), &target).await;
        assert!(matches!(result, Err(ApiError::Io(_))));
        assert_eq!(entries(staging.path()), 0);
    }

    let staged = target.staged.lock().unwrap();
    assert_eq!(staged.len(), 3);
    assert!(staged.iter().all(|path| !path.exists()));
}

#[tokio::test]
async fn test_export_error_status_is_reported() {
    tracing_init();
    let staging = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();
    let (dispatcher, transport, _tokens) = dispatcher_with(Some(TokenPair::new("a1", "r1")));
    transport.enqueue(
        EXPORT_CSV_PATH,
        MockReply::json(403, json!({"detail": "Admin role required"})),
    );

    let exporter = ExportDownloader::new(dispatcher, staging.path(), DEFAULT_EXPORT_FILE_NAME);
    let result = exporter
        .download_csv(&ArchiveQuery::default(), &DirectoryTarget::new(downloads.path()))
        .await;

    match result {
        Err(ApiError::Auth(detail)) => assert_eq!(detail, "Admin role required"),
        other => panic!("expected auth error, got {:?}", other),
    }
    assert_eq!(entries(downloads.path()), 0);
    assert_eq!(entries(staging.path()), 0);
}

#[tokio::test]
async fn test_export_refreshes_expired_session() {
    tracing_init();
    let staging = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();
    let (dispatcher, transport, _tokens) = dispatcher_with(Some(TokenPair::new("a1", "r1")));
    transport
        .enqueue(EXPORT_CSV_PATH, MockReply::status(401))
        .enqueue(EXPORT_CSV_PATH, MockReply::body(200, CSV));
    transport.enqueue(REFRESH_PATH, MockReply::tokens("a2", "r2"));

    let exporter = ExportDownloader::new(dispatcher, staging.path(), DEFAULT_EXPORT_FILE_NAME);
    let saved = exporter
        .download_csv(&ArchiveQuery::default(), &DirectoryTarget::new(downloads.path()))
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(saved).unwrap(), CSV);
    assert_eq!(transport.requests()[2].bearer(), Some("a2"));
}
