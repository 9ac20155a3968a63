// src/models/config.rs

use std::path::PathBuf;

use serde::Deserialize;

/// Default shavar lists tracked when the configuration names none.
pub const DEFAULT_LISTS: &[&str] = &["goog-malware-shavar", "googpub-phish-shavar"];

/// Client configuration.
///
/// Immutable once handed to [`crate::SafeBrowsing::new`]; the client keeps
/// its own copy and never consults process-wide state.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Provider API key.
    pub api_key: String,

    /// Client name sent in every request.
    pub client_name: String,

    /// Client application version sent in every request.
    pub app_version: String,

    /// Protocol version sent in every request.
    pub protocol_version: String,

    /// Base URL of the provider, without a trailing slash.
    pub server_url: String,

    /// Directory holding the per-list chunk journals. Must exist and be
    /// writable before the client is constructed.
    pub data_dir: PathBuf,

    /// Threat lists to track. The server may advertise more; unsupported
    /// names are ignored.
    pub supported_lists: Vec<String>,

    /// When set, never contact the provider; serve lookups from the
    /// persisted journals only.
    pub offline: bool,

    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            client_name: "api".to_string(),
            app_version: "1.0".to_string(),
            protocol_version: "2.2".to_string(),
            server_url: "https://safebrowsing.clients.google.com/safebrowsing".to_string(),
            data_dir: PathBuf::from("."),
            supported_lists: DEFAULT_LISTS.iter().map(|s| s.to_string()).collect(),
            offline: false,
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// Create a configuration with the given key and data directory and
    /// defaults for everything else.
    pub fn new(api_key: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_key: api_key.into(),
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Journal path for a list.
    pub fn journal_path(&self, list_name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.dat", list_name))
    }

    /// Query string shared by every provider endpoint.
    pub fn query_string(&self) -> String {
        format!(
            "client={}&key={}&appver={}&pver={}",
            self.client_name, self.api_key, self.app_version, self.protocol_version
        )
    }

    /// Full URL for a provider endpoint such as `list` or `downloads`.
    pub fn endpoint(&self, name: &str) -> String {
        format!("{}/{}?{}", self.server_url, name, self.query_string())
    }
}
