use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{CacheNames, SqliteStorage};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Application name used in notifications and the offline page
  pub app_name: String,
  /// Origin of the hosted application; requests elsewhere pass through
  pub origin: String,
  /// Deployed version, encoded into the cache generation names
  pub version: String,
  pub cache_prefix: String,
  /// Paths fetched and stored unconditionally at install time
  pub precache: Vec<String>,
  /// API path substrings whose successful responses are kept for offline reads
  pub api_cache_patterns: Vec<String>,
  pub routes: RoutesConfig,
  /// Cache database (default: $XDG_DATA_HOME/shellcache/caches.db)
  pub database: Option<PathBuf>,
  /// Directory for daily rolling log files; stderr only when unset
  pub log_dir: Option<PathBuf>,
  pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
  pub api_prefix: String,
  pub static_prefix: String,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api/".into(),
      static_prefix: "/static/".into(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app_name: "NAMASTE-ICD11".into(),
      origin: "http://localhost:3000".into(),
      version: "1.0.0".into(),
      cache_prefix: "namaste-icd11".into(),
      precache: vec![
        "/".into(),
        "/static/js/bundle.js".into(),
        "/static/css/main.css".into(),
        "/manifest.json".into(),
        "/logo-template.svg".into(),
      ],
      api_cache_patterns: vec![
        "/api/stats".into(),
        "/api/search/autocomplete".into(),
        "/api/terminology".into(),
      ],
      routes: RoutesConfig::default(),
      database: None,
      log_dir: None,
      request_timeout_secs: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Check the values the worker relies on.
  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;

    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if self.cache_prefix.trim().is_empty() {
      return Err(eyre!("cache_prefix must not be empty"));
    }
    for prefix in [&self.routes.api_prefix, &self.routes.static_prefix] {
      if !prefix.starts_with('/') {
        return Err(eyre!("Route prefix '{}' must start with '/'", prefix));
      }
    }

    Ok(())
  }

  /// The application origin as a URL with an http(s) scheme and a host.
  pub fn origin_url(&self) -> Result<Url> {
    let url = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
      return Err(eyre!("Origin '{}' must be an http(s) URL with a host", self.origin));
    }

    Ok(url)
  }

  /// Registration scope: the origin root.
  pub fn scope(&self) -> Result<String> {
    Ok(self.origin_url()?.join("/")?.to_string())
  }

  pub fn cache_names(&self) -> CacheNames {
    CacheNames::versioned(&self.cache_prefix, &self.version)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    config.validate().unwrap();

    assert_eq!(config.precache.len(), 5);
    assert_eq!(config.precache[0], "/");
    assert_eq!(config.cache_names().shell, "namaste-icd11-v1.0.0");
    assert_eq!(config.cache_names().runtime, "namaste-icd11-runtime-v1.0.0");
    assert_eq!(config.scope().unwrap(), "http://localhost:3000/");
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: https://terminology.example.org
version: 2.1.0
routes:
  api_prefix: /v2/api/
"#,
    )
    .unwrap();

    assert_eq!(config.origin, "https://terminology.example.org");
    assert_eq!(config.cache_names().shell, "namaste-icd11-v2.1.0");
    assert_eq!(config.routes.api_prefix, "/v2/api/");
    assert_eq!(config.routes.static_prefix, "/static/");
    assert_eq!(config.api_cache_patterns.len(), 3);
  }

  #[test]
  fn test_rejects_non_http_origin() {
    let config = Config {
      origin: "file:///srv/app".into(),
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_rejects_relative_route_prefix() {
    let config = Config::from_yaml("routes:\n  static_prefix: static/\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/shellcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_explicit_database_path() {
    let config = Config::from_yaml("database: /tmp/caches.db\n").unwrap();
    assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/caches.db"));
  }
}
