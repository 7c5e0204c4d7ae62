use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::monitor::MonitorConfig;
use crate::platform;
use crate::selector::SelectorOptions;
use crate::sources::SourceConfig;

pub const CONFIG_PATH_ENV: &str = "RADIO_STREAMD_CONFIG";
pub const STREAM_URL_ENV: &str = "RADIO_STREAM_URL";
pub const BACKUP_STREAM_URL_ENV: &str = "RADIO_BACKUP_STREAM_URL";
pub const FALLBACK_URLS_ENV: &str = "RADIO_FALLBACK_URLS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub sources: SourceConfig,
    #[serde(default)]
    pub selector: SelectorOptions,
    #[serde(default)]
    pub monitor: MonitorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// JSON file holding the admin-managed stream settings.
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// Player-facing TCP socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    /// Start the health monitor when the daemon boots.
    #[serde(default = "default_true")]
    pub autostart: bool,
    #[serde(flatten)]
    pub settings: MonitorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_socket_port(),
        }
    }
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            autostart: true,
            settings: MonitorConfig::default(),
        }
    }
}

fn default_settings_file() -> PathBuf {
    platform::data_dir().join("stream-settings.json")
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("streamd.log")
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    platform::ADMIN_HTTP_PORT
}

fn default_socket_port() -> u16 {
    platform::PLAYER_TCP_PORT
}

impl Config {
    /// Load from the default location, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => platform::config_dir().join("config.toml"),
        }
    }

    /// Overlay stream URLs from the process environment.  Read once at
    /// startup.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_blank = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = non_blank(STREAM_URL_ENV) {
            self.sources.primary_url = Some(url);
        }
        if let Some(url) = non_blank(BACKUP_STREAM_URL_ENV) {
            self.sources.backup_url = Some(url);
        }
        if let Some(list) = non_blank(FALLBACK_URLS_ENV) {
            self.sources.additional_urls = list
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8989);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.socket.port, 9876);
        assert!(config.monitor.autostart);
        assert_eq!(config.monitor.settings.check_interval_ms, 60_000);
        assert_eq!(config.sources.default_urls.len(), 2);
        assert!(config
            .daemon
            .settings_file
            .ends_with("radio-streamd/stream-settings.json"));
    }

    #[test]
    fn first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.selector, SelectorOptions::default());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.monitor.settings, config.monitor.settings);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[http]
port = 9999

[monitor]
autostart = false
failure_threshold = 5

[sources]
backup_url = "https://backup.example/live"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.http.port, 9999);
        assert!(config.http.enabled);
        assert!(!config.monitor.autostart);
        assert_eq!(config.monitor.settings.failure_threshold, 5);
        assert_eq!(config.monitor.settings.recovery_threshold, 2);
        assert_eq!(
            config.sources.backup_url.as_deref(),
            Some("https://backup.example/live")
        );
        assert_eq!(config.sources.default_urls.len(), 2);
    }

    #[test]
    fn env_overlay() {
        let env: HashMap<&str, &str> = [
            (STREAM_URL_ENV, " https://primary.example/live "),
            (BACKUP_STREAM_URL_ENV, "   "),
            (FALLBACK_URLS_ENV, "https://x.example/a, ,https://y.example/b,"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.sources.backup_url = Some("https://from-file.example/live".into());
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.sources.primary_url.as_deref(),
            Some("https://primary.example/live")
        );
        assert_eq!(
            config.sources.backup_url.as_deref(),
            Some("https://from-file.example/live")
        );
        assert_eq!(
            config.sources.additional_urls,
            vec!["https://x.example/a", "https://y.example/b"]
        );
    }
}
