use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access/refresh credential pair issued by the backend
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    pub fn has_refresh(&self) -> bool {
        !self.refresh.is_empty()
    }
}

// Token values stay out of logs
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Body of login and refresh responses
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenResponse> for TokenPair {
    fn from(response: TokenResponse) -> Self {
        TokenPair::new(response.access_token, response.refresh_token)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub organization: Option<String>,
    pub role: String,
    pub language: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Registration payload
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub language: String,
}

/// Named geographic entity archives can be attached to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Territory {
    pub id: Uuid,
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub partner_institution: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Territory {
    /// Minimal territory, mostly useful for fixtures and offline matching
    pub fn new(name: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            country: country.into(),
            slug: None,
            region: None,
            description: None,
            latitude: None,
            longitude: None,
            partner_institution: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerritoryWithStats {
    #[serde(flatten)]
    pub territory: Territory,
    #[serde(default)]
    pub archive_count: u64,
}

/// Payload for creating a territory
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewTerritory {
    pub name: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_institution: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Video,
    Audio,
    Image,
    Document,
}

impl MediaType {
    /// Classify a MIME type; anything that isn't video, audio or image is a document
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("video/") {
            MediaType::Video
        } else if mime.starts_with("audio/") {
            MediaType::Audio
        } else if mime.starts_with("image/") {
            MediaType::Image
        } else {
            MediaType::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Image => "image",
            MediaType::Document => "document",
        }
    }
}

/// Metadata submitted alongside an uploaded file.
/// The gateway only packages it; the backend validates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveMetadata {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub territory_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_spoken: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_notes: Option<String>,
    pub license_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rights_holder: Option<String>,
    pub access_level: String,
    pub consent_obtained: bool,
}

impl Default for ArchiveMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: None,
            media_type: MediaType::Video,
            territory_id: None,
            recording_date: None,
            recording_location: None,
            language_spoken: Some("fr".to_string()),
            tags: Vec::new(),
            context_notes: None,
            license_type: "all-rights-reserved".to_string(),
            rights_holder: None,
            access_level: "restricted".to_string(),
            consent_obtained: false,
        }
    }
}

impl ArchiveMetadata {
    /// Defaults pre-filled from a picked file: title from the file name, media type from MIME
    pub fn for_file(file_name: &str, mime_type: Option<&str>) -> Self {
        Self {
            title: title_from_file_name(file_name),
            media_type: mime_type.map(MediaType::from_mime).unwrap_or(MediaType::Document),
            ..Self::default()
        }
    }

    /// Split a comma separated tag field, dropping blanks
    pub fn set_tags_from_csv(&mut self, raw: &str) {
        self.tags = raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
    }
}

/// "my_field-recording.final.mp4" -> "my field recording.final"
fn title_from_file_name(file_name: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => stem,
        _ => file_name,
    };
    stem.replace(['-', '_'], " ")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Archive {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub description: Option<String>,
    pub media_type: MediaType,
    pub file_size_bytes: Option<u64>,
    pub duration_seconds: Option<f64>,
    pub mime_type: Option<String>,
    pub territory_id: Option<Uuid>,
    pub recording_date: Option<DateTime<Utc>>,
    pub recording_location: Option<String>,
    pub language_spoken: Option<String>,
    pub tags: Option<Vec<String>>,
    pub context_notes: Option<String>,
    pub participants: Option<Vec<serde_json::Value>>,
    pub license_type: String,
    pub rights_holder: Option<String>,
    pub access_level: String,
    pub consent_obtained: bool,
    pub status: String,
    #[serde(default)]
    pub is_featured: bool,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Partial update; only set fields are sent
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub territory_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_spoken: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rights_holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_obtained: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivePage {
    pub items: Vec<Archive>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Filters and paging shared by list, search and export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub media_type: Option<MediaType>,
    pub status: Option<String>,
    pub territory_id: Option<Uuid>,
}

impl ArchiveQuery {
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page: Some(page),
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    /// Query string pairs; unset filters are omitted
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            pairs.push(("page_size".to_string(), page_size.to_string()));
        }
        if let Some(media_type) = self.media_type {
            pairs.push(("media_type".to_string(), media_type.as_str().to_string()));
        }
        if let Some(status) = &self.status {
            pairs.push(("status".to_string(), status.clone()));
        }
        if let Some(territory_id) = self.territory_id {
            pairs.push(("territory_id".to_string(), territory_id.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct UploadUrlRequest<'a> {
    pub filename: &'a str,
    pub content_type: &'a str,
    pub file_size: u64,
}

/// Pre-signed direct upload target for large files
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UploadUrl {
    pub upload_url: String,
    pub object_key: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Report {
    pub id: Uuid,
    pub archive_id: Uuid,
    pub reporter_id: Uuid,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub archive_title: Option<String>,
    #[serde(default)]
    pub reporter_name: Option<String>,
}

/// `{"message": "..."}` bodies of the password endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageResponse {
    pub message: String,
}
