use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_API_PREFIX: &str = "/api/v1";
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 600;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// File name the CSV export is saved under.
pub const DEFAULT_EXPORT_FILE_NAME: &str = "archives-metadonnees.csv";

/// Client configuration
/// Loads from a .env file when one is present, then from ARCHIVE_* environment variables
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Scheme and host of the backend, e.g. `https://archive.example.org`
    pub base_url: String,
    /// Versioned REST prefix every endpoint lives under
    pub api_prefix: String,
    /// Hard limit on a whole multipart upload
    pub upload_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Keychain service the token pair is stored under
    pub keyring_service: String,
    pub export_file_name: String,
    /// Where `export` drops the CSV by default
    pub download_dir: PathBuf,
    /// Where export bodies are staged before being handed to the save target
    pub staging_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: format!("archive-gateway/{}", env!("CARGO_PKG_VERSION")),
            keyring_service: "archive-gateway".to_string(),
            export_file_name: DEFAULT_EXPORT_FILE_NAME.to_string(),
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            staging_dir: std::env::temp_dir(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from .env (if present) and the environment
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        } else {
            debug!("Config: no .env file found, using environment only");
        }

        Self::from_env()
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("ARCHIVE_API_URL") {
            config.base_url = url;
        }
        if let Some(prefix) = lookup("ARCHIVE_API_PREFIX") {
            config.api_prefix = prefix;
        }
        if let Some(secs) = parse_secs(&lookup, "ARCHIVE_UPLOAD_TIMEOUT_SECS") {
            config.upload_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_secs(&lookup, "ARCHIVE_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(service) = lookup("ARCHIVE_KEYRING_SERVICE") {
            config.keyring_service = service;
        }
        if let Some(dir) = lookup("ARCHIVE_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }

        debug!(
            "Config: api root {}, upload timeout {:?}",
            config.api_root(),
            config.upload_timeout
        );

        config
    }

    /// Base URL joined with the API prefix, without a trailing slash
    pub fn api_root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, prefix)
        }
    }

    /// Absolute URL for a path relative to the API root.
    /// A trailing slash on `path` is kept: `archives/` and `archives` are different routes.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_root(), path.trim_start_matches('/'))
    }
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(e) => {
            warn!("Config: ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.upload_timeout, Duration::from_secs(600));
        assert_eq!(config.export_file_name, "archives-metadonnees.csv");
        assert_eq!(config.api_root(), "http://localhost:8000/api/v1");
    }

    #[test]
    fn test_endpoint_keeps_trailing_slash() {
        let config = ClientConfig {
            base_url: "https://archive.example.org/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.endpoint("archives/"),
            "https://archive.example.org/api/v1/archives/"
        );
        assert_eq!(
            config.endpoint("/auth/login"),
            "https://archive.example.org/api/v1/auth/login"
        );
    }

    #[test]
    fn test_empty_prefix() {
        let config = ClientConfig {
            api_prefix: "/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(config.endpoint("territories/"), "http://localhost:8000/territories/");
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("ARCHIVE_API_URL", "https://api.test"),
            ("ARCHIVE_UPLOAD_TIMEOUT_SECS", "30"),
            ("ARCHIVE_KEYRING_SERVICE", "archive-test"),
        ]));
        assert_eq!(config.base_url, "https://api.test");
        assert_eq!(config.upload_timeout, Duration::from_secs(30));
        assert_eq!(config.keyring_service, "archive-test");
    }

    #[test]
    fn test_bad_timeout_keeps_default() {
        let config =
            ClientConfig::from_lookup(lookup_from(&[("ARCHIVE_UPLOAD_TIMEOUT_SECS", "ten")]));
        assert_eq!(config.upload_timeout, Duration::from_secs(600));
    }
}
