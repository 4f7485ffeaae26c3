use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

/// Environment variable overriding `api.base_url`.
pub const API_URL_ENV: &str = "STUDIO_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Re-fetch cadence while any job is still in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Attempts per artifact URL within one session. Only deliveries that
    /// fell back to the external opener are ever attempted again.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Hand the URL to the desktop opener when the fetch fails.
    #[serde(default = "default_open_on_failure")]
    pub open_on_failure: bool,
}

/// User-configurable paths for downloads and session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory generated audio is saved into.
    /// Defaults to `~/studio-downloads` (or portable `downloads/` on Windows).
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            open_on_failure: default_open_on_failure(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            downloads_dir: default_downloads_dir(),
            session_file: default_session_file(),
        }
    }
}

impl ApiConfig {
    /// Base URL joined with the API prefix, without a trailing slash.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, prefix)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    2
}

fn default_open_on_failure() -> bool {
    true
}

fn default_downloads_dir() -> PathBuf {
    // On Windows, check for portable downloads directory in executable directory
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_downloads = exe_dir.join("downloads");
                if portable_downloads.exists() {
                    return portable_downloads;
                }
            }
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("studio-downloads")
}

fn default_session_file() -> PathBuf {
    platform::data_dir().join("session.json")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        let mut config = if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            config
        } else {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        };

        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            polling: PollingConfig::default(),
            delivery: DeliveryConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.endpoint(), "http://localhost:5000/api/v1");
        assert_eq!(config.polling.interval(), Duration::from_secs(30));
        assert_eq!(config.delivery.max_attempts, 2);
        assert!(config.delivery.open_on_failure);
        assert!(config.paths.downloads_dir.ends_with("studio-downloads"));
        assert!(config.paths.session_file.ends_with("studio/session.json"));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [polling]
            interval_secs = 5

            [api]
            base_url = "https://songs.example.com/"
            api_prefix = ""
            "#,
        )
        .unwrap();
        assert_eq!(config.polling.interval(), Duration::from_secs(5));
        assert_eq!(config.api.endpoint(), "https://songs.example.com");
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.delivery.max_attempts, 2);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let polling = PollingConfig { interval_secs: 0 };
        assert_eq!(polling.interval(), Duration::from_secs(1));
    }
}
