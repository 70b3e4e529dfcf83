// Library exports for the archive gateway and its integration tests

pub mod cancel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod export;
pub mod http;
pub mod models;
pub mod territory_matcher;
pub mod token_store;
pub mod upload;

// Test support (only available with test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use cancel::CancelToken;
pub use client::ArchiveClient;
pub use config::ClientConfig;
pub use dispatcher::{RequestDispatcher, SessionState};
pub use error::ApiError;
pub use export::{DirectoryTarget, ExportDownloader, SaveTarget};
pub use http::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, UploadFile, UploadSource};
pub use models::{Archive, ArchiveMetadata, Territory, TokenPair};
pub use territory_matcher::{match_territory, MatchResult, TerritoryAutofill};
pub use token_store::{KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use upload::{ProgressCallback, UploadTransport};
