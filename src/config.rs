use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Start with the network treated as unreachable (every write is queued)
  #[serde(default)]
  pub offline: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the campus API (e.g., "https://campus.example.edu")
  pub url: String,
  #[serde(default = "default_upload_path")]
  pub upload_path: String,
  #[serde(default = "default_download_path")]
  pub download_path: String,
  /// Direct (online) fee payment endpoint
  #[serde(default = "default_payment_path")]
  pub payment_path: String,
  /// Direct (online) attendance endpoint
  #[serde(default = "default_attendance_path")]
  pub attendance_path: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl ServerConfig {
  /// Config pointing at `url` with every endpoint at its default path.
  pub fn with_url(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      upload_path: default_upload_path(),
      download_path: default_download_path(),
      payment_path: default_payment_path(),
      attendance_path: default_attendance_path(),
      timeout_secs: default_timeout_secs(),
    }
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/campus-sync/store.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Seconds between timer-triggered sync cycles in `watch` mode
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval_secs(),
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs.max(1))
  }
}

fn default_upload_path() -> String {
  "/api/sync/upload".to_string()
}

fn default_download_path() -> String {
  "/api/sync/download".to_string()
}

fn default_payment_path() -> String {
  "/api/fees/pay".to_string()
}

fn default_attendance_path() -> String {
  "/api/attendance".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_interval_secs() -> u64 {
  300
}

/// Environment variables checked for the bearer token, in order.
const TOKEN_VARS: [&str; 2] = ["CAMPUS_SYNC_TOKEN", "CAMPUS_API_TOKEN"];

impl Config {
  /// Load the explicit file, or the first file found on the search path.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if !p.exists() => return Err(eyre!("Config file not found: {}", p.display())),
      Some(p) => p.to_path_buf(),
      None => Self::search_paths()
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| {
          eyre!("No configuration file found. Create ./campus-sync.yaml or ~/.config/campus-sync/config.yaml")
        })?,
    };

    let contents = std::fs::read_to_string(&path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::from_yaml(&contents).map_err(|e| eyre!("Invalid config in {}: {}", path.display(), e))
  }

  /// Candidate locations when no path is given: the working directory, then
  /// `$XDG_CONFIG_HOME/campus-sync/config.yaml`.
  fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("campus-sync.yaml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join("campus-sync").join("config.yaml")));
    paths
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Directory for the local store and log files.
  pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
      .map(|dir| dir.join("campus-sync"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }

  /// Resolved path of the local store database.
  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("store.db")),
    }
  }

  /// First non-blank token among [`TOKEN_VARS`].
  pub fn get_api_token() -> Result<String> {
    TOKEN_VARS
      .iter()
      .find_map(|var| std::env::var(var).ok().filter(|t| !t.trim().is_empty()))
      .ok_or_else(|| eyre!("API token not found. Set {} or {}.", TOKEN_VARS[0], TOKEN_VARS[1]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("server:\n  url: https://campus.example.edu\n").unwrap();

    assert_eq!(config.server.url, "https://campus.example.edu");
    assert_eq!(config.server.upload_path, "/api/sync/upload");
    assert_eq!(config.server.download_path, "/api/sync/download");
    assert_eq!(config.server.timeout(), Duration::from_secs(30));
    assert_eq!(config.sync.interval(), Duration::from_secs(300));
    assert!(config.storage.path.is_none());
    assert!(!config.offline);
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
server:
  url: http://localhost:5000
  upload_path: /v2/offline/upload
  timeout_secs: 5
storage:
  path: /tmp/campus.db
sync:
  interval_secs: 0
offline: true
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.server.upload_path, "/v2/offline/upload");
    assert_eq!(config.server.payment_path, "/api/fees/pay");
    assert_eq!(config.store_path().unwrap(), PathBuf::from("/tmp/campus.db"));
    assert_eq!(config.sync.interval(), Duration::from_secs(1));
    assert!(config.offline);
  }

  #[test]
  fn test_missing_server_is_rejected() {
    assert!(Config::from_yaml("offline: true\n").is_err());
  }

  #[test]
  fn test_explicit_missing_path_errors() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_working_directory_is_searched_first() {
    let paths = Config::search_paths();
    assert_eq!(paths[0], PathBuf::from("campus-sync.yaml"));
    assert!(paths.iter().skip(1).all(|p| p.ends_with("campus-sync/config.yaml")));
  }

  #[test]
  fn test_load_explicit_file() {
    let dir = std::env::temp_dir().join(format!("campus-sync-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let good = dir.join("good.yaml");
    let bad = dir.join("bad.yaml");
    std::fs::write(&good, "server:\n  url: http://localhost:5000\noffline: true\n").unwrap();
    std::fs::write(&bad, "server: [\n").unwrap();

    let config = Config::load(Some(good.as_path())).unwrap();
    assert_eq!(config.server.url, "http://localhost:5000");
    assert!(config.offline);

    let err = Config::load(Some(bad.as_path())).unwrap_err();
    assert!(err.to_string().starts_with("Invalid config in"));

    let _ = std::fs::remove_dir_all(&dir);
  }
}
