//! CLI configuration handling.

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use liftpass_core::{ApiConfig, StorageBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `api_url`.
pub const API_URL_ENV: &str = "LIFTPASS_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Base URL of the liftpass server.
    pub api_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Where the session is kept between runs.
    pub storage: StorageBackend,

    /// Directory for file-backed session storage.
    pub data_dir: PathBuf,

    /// Logging level.
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".liftpass"));

        Self {
            api_url: "http://localhost:3333".to_string(),
            request_timeout_secs: 30,
            storage: StorageBackend::default(),
            data_dir,
            log_level: "info".to_string(),
            config_path: PathBuf::new(),
        }
    }
}

impl CliConfig {
    /// Replace `api_url` when an override is set and non-blank.
    pub fn override_api_url(&mut self, api_url: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_url = url;
        }
    }

    /// Connection settings for the API client.
    pub fn api_config(&self) -> Result<ApiConfig> {
        let config = ApiConfig::new(&self.api_url)
            .with_context(|| format!("Invalid api_url {:?} in {:?}", self.api_url, self.config_path))?;
        Ok(config.with_timeout(Duration::from_secs(self.request_timeout_secs)))
    }
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file at the default location means defaults; a missing file
/// passed explicitly is an error. `LIFTPASS_API_URL` wins over the file.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let config_path = match path {
        Some(path) => {
            if !path.exists() {
                bail!("Config file {:?} does not exist", path);
            }
            path.to_path_buf()
        }
        None => default_config_path(),
    };

    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path;
    config.override_api_url(std::env::var(API_URL_ENV).ok());

    if config.storage != StorageBackend::Memory {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;
    }

    Ok(config)
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("liftpass.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "liftpass", "liftpass")
}
