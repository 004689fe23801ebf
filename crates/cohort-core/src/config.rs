//! Configuration management for Cohort.
//!
//! Loads configuration from ${COHORT_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::upload::DEFAULT_MAX_SIZE_MB;

/// Environment variable overriding `server_url`.
pub const SERVER_URL_ENV: &str = "COHORT_SERVER_URL";

pub mod paths {
    //! Path resolution for Cohort configuration and data.
    //!
    //! COHORT_HOME resolution order:
    //! 1. COHORT_HOME environment variable (if set)
    //! 2. ~/.config/cohort (default)
    //! 3. ./.cohort when no home directory can be determined

    use std::path::PathBuf;

    /// Returns the Cohort home directory.
    pub fn cohort_home() -> PathBuf {
        if let Ok(home) = std::env::var("COHORT_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".cohort"),
            |h| h.join(".config").join("cohort"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        cohort_home().join("config.toml")
    }

    /// Returns the path to the session history file.
    pub fn sessions_path() -> PathBuf {
        cohort_home().join("sessions.json")
    }

    /// Returns the log directory.
    pub fn logs_dir() -> PathBuf {
        cohort_home().join("logs")
    }
}

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
/// To update, run `cargo xtask update-default-config`.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Attachment limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest file accepted for upload, in megabytes
    pub max_size_mb: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_mb: DEFAULT_MAX_SIZE_MB,
        }
    }
}

impl UploadConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the agent backend
    pub server_url: String,
    /// Use the demo stream endpoint instead of the real agents
    pub demo: bool,
    /// Connect timeout in seconds (0 disables)
    pub connect_timeout_secs: u64,
    pub upload: UploadConfig,
}

impl Config {
    pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
    const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Resolves the backend URL with precedence: env > config > default.
    ///
    /// # Errors
    /// Returns an error if the chosen URL is malformed.
    pub fn resolve_server_url(&self) -> Result<String> {
        let from_env = std::env::var(SERVER_URL_ENV).ok();
        let candidates = [from_env.as_deref(), Some(self.server_url.as_str())];

        for candidate in candidates.into_iter().flatten() {
            let trimmed = candidate.trim();
            if !trimmed.is_empty() {
                url::Url::parse(trimmed)
                    .with_context(|| format!("Invalid server URL: {trimmed}"))?;
                return Ok(trimmed.trim_end_matches('/').to_string());
            }
        }

        Ok(Self::DEFAULT_SERVER_URL.to_string())
    }

    /// Connect timeout, or `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    ///
    /// # Errors
    /// Returns an error if the file exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Generates a fresh config TOML from Rust defaults.
    ///
    /// Used by `xtask update-default-config` to keep `default_config.toml`
    /// in sync. Comments come from the embedded template, values from
    /// `Config::default()`.
    ///
    /// # Errors
    /// Returns an error if the template or the defaults fail to parse.
    pub fn generate() -> Result<String> {
        use toml_edit::DocumentMut;

        let generated_toml = toml::to_string(&Config::default())
            .context("Failed to serialize default config to TOML")?;

        let mut doc: DocumentMut = default_config_template()
            .parse()
            .context("Failed to parse default config template")?;
        let generated_doc: DocumentMut = generated_toml
            .parse()
            .context("Failed to parse generated config")?;

        merge_items(doc.as_table_mut(), generated_doc.as_table());

        Ok(doc.to_string())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: Self::DEFAULT_SERVER_URL.to_string(),
            demo: false,
            connect_timeout_secs: Self::DEFAULT_CONNECT_TIMEOUT_SECS,
            upload: UploadConfig::default(),
        }
    }
}

/// Recursively overlays values from `source` onto `target`, keeping
/// the comments and layout of `target`.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source.iter() {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(arr) => {
                target[key] = Item::ArrayOfTables(arr.clone());
            }
            Item::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server_url, "http://localhost:8000");
        assert_eq!(config.upload.max_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(&config_path, "demo = true\n[upload]\nmax_size_mb = 2\n").unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert!(config.demo);
        assert_eq!(config.upload.max_size_mb, 2);
        assert_eq!(config.server_url, Config::DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "demo = [").unwrap();

        assert!(Config::load_from(&config_path).is_err());
    }

    #[test]
    fn test_init_creates_config_from_template() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("server_url ="));
        assert!(contents.contains("[upload]"));
        let parsed = Config::load_from(&config_path).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_generate_keeps_template_comments() {
        let generated = Config::generate().unwrap();
        assert!(generated.contains("# Base URL of the agent backend"));
        let parsed: Config = toml::from_str(&generated).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_server_url_from_config_is_validated() {
        let config = Config {
            server_url: "not a url".to_string(),
            ..Config::default()
        };
        // Only meaningful when the override is unset in the test environment.
        if std::env::var(SERVER_URL_ENV).is_err() {
            assert!(config.resolve_server_url().is_err());
        }
    }

    #[test]
    fn test_server_url_trailing_slash_trimmed() {
        let config = Config {
            server_url: "http://example.com:9000/".to_string(),
            ..Config::default()
        };
        if std::env::var(SERVER_URL_ENV).is_err() {
            assert_eq!(
                config.resolve_server_url().unwrap(),
                "http://example.com:9000"
            );
        }
    }

    #[test]
    fn test_connect_timeout_zero_disables() {
        let config = Config {
            connect_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.connect_timeout(), None);
        assert_eq!(
            Config::default().connect_timeout(),
            Some(Duration::from_secs(10))
        );
    }
}
