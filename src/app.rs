use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::model::Platform;
use crate::utils::normalize_url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub page_size: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self { base_url: "http://localhost:8003".into(), page_size: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveSettings {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8004".into(),
            max_reconnect_attempts: 5,
            reconnect_base_ms: 3000,
        }
    }
}

impl LiveSettings {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self { interval_secs: 15 }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Backend channel id for each platform. Deployments disagree on these, so
/// they live in config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelTable {
    pub whatsapp: i64,
    pub instagram: i64,
    pub gmail: i64,
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self { whatsapp: 1, instagram: 2, gmail: 3 }
    }
}

impl ChannelTable {
    pub fn platform_for(&self, channel_id: i64) -> Option<Platform> {
        Platform::ALL.into_iter().find(|p| self.id_for(*p) == channel_id)
    }

    pub fn id_for(&self, platform: Platform) -> i64 {
        match platform {
            Platform::Whatsapp => self.whatsapp,
            Platform::Instagram => self.instagram,
            Platform::Gmail => self.gmail,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ids = [self.whatsapp, self.instagram, self.gmail];
        if ids[0] == ids[1] || ids[0] == ids[2] || ids[1] == ids[2] {
            return Err(ConfigError::Invalid(format!("channel ids must be distinct, got {ids:?}")));
        }
        Ok(())
    }
}

/// Operator session handed to the pipeline explicitly instead of being read
/// from a global store at call sites.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Session {
    pub user: String,
    pub token: Option<String>,
}

impl Session {
    pub fn display_name(&self) -> &str {
        let name = self.user.trim();
        if name.is_empty() { "Usuario" } else { name }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api: ApiSettings,
    pub live: LiveSettings,
    pub polling: PollingSettings,
    pub channels: ChannelTable,
    pub session: Session,
}

impl Config {
    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("unified-inbox.toml"))
    }

    /// Loads from the platform config dir, falling back to defaults when no
    /// file exists, then applies `INBOX_API_URL` / `INBOX_WS_URL`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::toml_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(std::env::var("INBOX_API_URL").ok(), std::env::var("INBOX_WS_URL").ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::toml_path()
            .ok_or_else(|| ConfigError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "No config dir")))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn apply_overrides(&mut self, api_url: Option<String>, ws_url: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api.base_url = url;
        }
        if let Some(url) = ws_url.filter(|u| !u.trim().is_empty()) {
            self.live.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channels.validate()?;
        self.base_url()?;
        self.live_url()?;
        if self.api.page_size == 0 {
            return Err(ConfigError::Invalid("api.page_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_url(&normalize_url(&self.api.base_url))
    }

    pub fn live_url(&self) -> Result<Url, ConfigError> {
        let raw = self.live.url.trim();
        let raw = if raw.starts_with("ws://") || raw.starts_with("wss://") {
            raw.to_string()
        } else {
            format!("ws://{}", raw)
        };
        parse_url(&raw)
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::Url { url: raw.to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox.toml");
        fs::write(&path, "[api]\nbase_url = \"core.example.com\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api.page_size, 100);
        assert_eq!(config.live.max_reconnect_attempts, 5);
        assert_eq!(config.live.reconnect_base(), Duration::from_millis(3000));
        assert_eq!(config.channels, ChannelTable::default());
        assert_eq!(config.base_url().unwrap().as_str(), "https://core.example.com/");
    }

    #[test]
    fn channel_table_comes_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox.toml");
        fs::write(&path, "[channels]\nwhatsapp = 7\ninstagram = 8\ngmail = 9\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.channels.platform_for(8), Some(Platform::Instagram));
        assert_eq!(config.channels.platform_for(1), None);
    }

    #[test]
    fn duplicate_channel_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox.toml");
        fs::write(&path, "[channels]\nwhatsapp = 1\ninstagram = 1\ngmail = 3\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn save_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inbox.toml");
        let mut config = Config::default();
        config.session.user = "operadora".into();
        config.polling.interval_secs = 30;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn overrides_win_and_ws_scheme_is_added() {
        let mut config = Config::default();
        config.apply_overrides(Some("http://api.local:9000".into()), Some("push.local:9001/ws".into()));
        assert_eq!(config.base_url().unwrap().as_str(), "http://api.local:9000/");
        assert_eq!(config.live_url().unwrap().as_str(), "ws://push.local:9001/ws");
    }

    #[test]
    fn empty_session_user_displays_fallback() {
        assert_eq!(Session::default().display_name(), "Usuario");
    }
}
