// src/config.rs

//! Configuration loading utilities.

use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;

impl Config {
    /// Load a configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.supported_lists.is_empty() {
            return Err(AppError::config("no supported lists configured"));
        }
        if self.server_url.ends_with('/') {
            return Err(AppError::config("server_url must not end with a slash"));
        }
        if !self.offline && self.api_key.is_empty() {
            return Err(AppError::config("api_key is required in online mode"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_from_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "api_key = \"secret\"\ndata_dir = \"/tmp/sb\"\nsupported_lists = [\"goog-malware-shavar\"]"
        )
        .unwrap();

        let config = Config::from_toml_file(file.path()).unwrap();
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.supported_lists, vec!["goog-malware-shavar"]);
        // unspecified fields fall back to defaults
        assert_eq!(config.protocol_version, "2.2");
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let config = Config::new("", "/tmp/sb");
        assert!(config.validate().is_err());

        let mut offline = Config::new("", "/tmp/sb");
        offline.offline = true;
        assert!(offline.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_trailing_slash() {
        let mut config = Config::new("k", "/tmp/sb");
        config.server_url.push('/');
        assert!(config.validate().is_err());
    }
}
