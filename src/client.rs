use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::dispatcher::{RequestDispatcher, SessionState};
use crate::error::ApiError;
use crate::export::{ExportDownloader, SaveTarget};
use crate::http::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, UploadFile};
use crate::models::{
    Archive, ArchivePage, ArchiveQuery, ArchiveUpdate, MessageResponse, NewTerritory, NewUser,
    Report, Territory, TerritoryWithStats, TokenPair, TokenResponse, UploadUrl, UploadUrlRequest,
    User,
};
use crate::token_store::{KeyringTokenStore, TokenStore};
use crate::upload::{ProgressCallback, UploadTransport};

/// Typed access to the archive backend.
///
/// Every authenticated call goes through the [`RequestDispatcher`]; archive creation goes
/// through the [`UploadTransport`]; the CSV export through the [`ExportDownloader`].
pub struct ArchiveClient {
    dispatcher: Arc<RequestDispatcher>,
    uploader: UploadTransport,
    exporter: ExportDownloader,
}

impl ArchiveClient {
    /// Client over reqwest with tokens kept in the system keychain
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let transport = Arc::new(ReqwestTransport::new(config)?);
        let tokens = Arc::new(KeyringTokenStore::new(&config.keyring_service)?);
        Ok(Self::new(config, transport, tokens))
    }

    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let dispatcher = Arc::new(RequestDispatcher::new(transport.clone(), tokens.clone()));
        let uploader = UploadTransport::new(transport, tokens, config.upload_timeout);
        let exporter = ExportDownloader::new(
            dispatcher.clone(),
            config.staging_dir.clone(),
            config.export_file_name.clone(),
        );

        Self {
            dispatcher,
            uploader,
            exporter,
        }
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    pub fn uploader(&self) -> &UploadTransport {
        &self.uploader
    }

    pub fn is_authenticated(&self) -> bool {
        self.dispatcher.tokens().is_authenticated()
    }

    pub fn session_state(&self) -> SessionState {
        self.dispatcher.session_state()
    }

    // ── Auth ────────────────────────────────────

    /// Log in and store the returned token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ApiError> {
        let request = ApiRequest::post("auth/login")
            .with_json(&serde_json::json!({ "email": email, "password": password }))?;
        let response = self.dispatcher.send_public(&request).await?;

        if !response.is_success() {
            warn!("✗ Login refused with status {}", response.status);
            return Err(match response.status {
                401 | 403 => ApiError::Auth("Invalid credentials".to_string()),
                _ => ApiError::from_response(&response, "Invalid credentials"),
            });
        }

        let pair: TokenPair = response.json::<TokenResponse>()?.into();
        self.dispatcher.establish_session(&pair)?;
        info!("✓ Logged in as {}", email);
        Ok(pair)
    }

    /// Create an account. The backend answers with the user, not with tokens.
    pub async fn register(&self, new_user: &NewUser) -> Result<User, ApiError> {
        let request = ApiRequest::post("auth/register").with_json(new_user)?;
        let response = self.dispatcher.send_public(&request).await?;
        parse(response, "Registration failed")
    }

    /// Create an account, then log in with the same credentials
    pub async fn register_and_login(&self, new_user: &NewUser) -> Result<User, ApiError> {
        let user = self.register(new_user).await?;
        self.login(&new_user.email, &new_user.password).await?;
        Ok(user)
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        let response = self.dispatcher.send(&ApiRequest::get("auth/me")).await?;
        parse(response, "Not authenticated")
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        self.dispatcher.end_session()
    }

    /// Ask for a password reset link; the answer is the same whether or not the email exists
    pub async fn forgot_password(&self, email: &str) -> Result<String, ApiError> {
        let request = ApiRequest::post("auth/forgot-password")
            .with_json(&serde_json::json!({ "email": email }))?;
        let response = self.dispatcher.send_public(&request).await?;
        parse::<MessageResponse>(response, "Password reset request failed").map(|m| m.message)
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<String, ApiError> {
        let request = ApiRequest::post("auth/reset-password")
            .with_json(&serde_json::json!({ "token": token, "new_password": new_password }))?;
        let response = self.dispatcher.send_public(&request).await?;
        parse::<MessageResponse>(response, "Password reset failed").map(|m| m.message)
    }

    // ── Archives ────────────────────────────────

    pub async fn list_archives(&self, query: &ArchiveQuery) -> Result<ArchivePage, ApiError> {
        let request = ApiRequest::get("archives/").with_query(query.to_pairs());
        let response = self.dispatcher.send(&request).await?;
        parse(response, "Could not load archives")
    }

    pub async fn get_archive(&self, id: Uuid) -> Result<Archive, ApiError> {
        let response = self
            .dispatcher
            .send(&ApiRequest::get(format!("archives/{}", id)))
            .await?;
        parse(response, "Archive not found")
    }

    pub async fn update_archive(&self, id: Uuid, update: &ArchiveUpdate) -> Result<Archive, ApiError> {
        let request = ApiRequest::patch(format!("archives/{}", id)).with_json(update)?;
        let response = self.dispatcher.send(&request).await?;
        parse(response, "Could not update archive")
    }

    pub async fn delete_archive(&self, id: Uuid) -> Result<(), ApiError> {
        let response = self
            .dispatcher
            .send(&ApiRequest::delete(format!("archives/{}", id)))
            .await?;
        expect_success(&response, "Could not delete archive")
    }

    /// Full-text search; `query` adds paging and filters
    pub async fn search_archives(&self, q: &str, query: &ArchiveQuery) -> Result<ArchivePage, ApiError> {
        let mut pairs = vec![("q".to_string(), q.to_string())];
        pairs.extend(query.to_pairs());
        let request = ApiRequest::get("archives/search/").with_query(pairs);
        let response = self.dispatcher.send(&request).await?;
        parse(response, "Search failed")
    }

    /// Upload a file with its metadata; see [`UploadTransport::upload`]
    pub async fn create_archive<M: serde::Serialize + ?Sized>(
        &self,
        metadata: &M,
        file: UploadFile,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Archive, ApiError> {
        self.uploader.upload(metadata, file, on_progress).await
    }

    /// Pre-signed URL for uploading a large file straight to object storage
    pub async fn request_upload_url(
        &self,
        filename: &str,
        content_type: &str,
        file_size: u64,
    ) -> Result<UploadUrl, ApiError> {
        let request = ApiRequest::post("archives/upload-url").with_json(&UploadUrlRequest {
            filename,
            content_type,
            file_size,
        })?;
        let response = self.dispatcher.send(&request).await?;
        parse(response, "Could not obtain an upload URL")
    }

    /// Flag an archive for moderation
    pub async fn report_archive(&self, id: Uuid, reason: &str) -> Result<Report, ApiError> {
        let request = ApiRequest::post(format!("archives/{}/report", id))
            .with_json(&serde_json::json!({ "reason": reason }))?;
        let response = self.dispatcher.send(&request).await?;
        parse(response, "Could not report archive")
    }

    /// Download the metadata CSV and save it through `target`
    pub async fn export_csv(
        &self,
        query: &ArchiveQuery,
        target: &dyn SaveTarget,
    ) -> Result<PathBuf, ApiError> {
        self.exporter.download_csv(query, target).await
    }

    // ── Territories ─────────────────────────────

    pub async fn list_territories(&self) -> Result<Vec<Territory>, ApiError> {
        let response = self.dispatcher.send(&ApiRequest::get("territories/")).await?;
        parse(response, "Could not load territories")
    }

    pub async fn territories_with_stats(&self) -> Result<Vec<TerritoryWithStats>, ApiError> {
        let response = self
            .dispatcher
            .send(&ApiRequest::get("territories/stats"))
            .await?;
        parse(response, "Could not load territories")
    }

    pub async fn get_territory(&self, id: Uuid) -> Result<Territory, ApiError> {
        let response = self
            .dispatcher
            .send(&ApiRequest::get(format!("territories/{}", id)))
            .await?;
        parse(response, "Territory not found")
    }

    pub async fn create_territory(&self, territory: &NewTerritory) -> Result<Territory, ApiError> {
        let request = ApiRequest::post("territories/").with_json(territory)?;
        let response = self.dispatcher.send(&request).await?;
        parse(response, "Could not create territory")
    }
}

fn expect_success(response: &ApiResponse, fallback: &str) -> Result<(), ApiError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(ApiError::from_response(response, fallback))
    }
}

fn parse<T: DeserializeOwned>(response: ApiResponse, fallback: &str) -> Result<T, ApiError> {
    expect_success(&response, fallback)?;
    Ok(response.json()?)
}
