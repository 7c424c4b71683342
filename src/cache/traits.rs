//! Core types for cache generations.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::Response;

/// Identity of a request inside a cache generation (method + URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: String,
  pub url: String,
}

impl CacheKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    Self {
      method: method.as_str().to_string(),
      url: url.as_str().to_string(),
    }
  }

  /// Stable fixed-length key used as the storage primary key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Names of the two live generations for one deployed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  /// Precached shell assets and cache-first static content
  pub shell: String,
  /// Opportunistically cached API responses
  pub runtime: String,
}

impl CacheNames {
  pub fn new(shell: impl Into<String>, runtime: impl Into<String>) -> Self {
    Self {
      shell: shell.into(),
      runtime: runtime.into(),
    }
  }

  /// `<prefix>-v<version>` and `<prefix>-runtime-v<version>`.
  pub fn versioned(prefix: &str, version: &str) -> Self {
    Self::new(
      format!("{}-v{}", prefix, version),
      format!("{}-runtime-v{}", prefix, version),
    )
  }

  /// Whether `name` belongs to this version.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.shell || name == self.runtime
  }
}

/// A response stored in a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Entry from the generation the strategy consults
  Cache,
  /// Network failed; the cached shell root document was served instead
  ShellFallback,
  /// Nothing available; response was built locally
  Synthesized,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::ShellFallback => "shell-fallback",
      Self::Synthesized => "synthesized",
    };
    f.write_str(s)
  }
}

/// Result of running a request through a strategy, including metadata about
/// the source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was cached (if from a cache generation)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  pub fn shell_fallback(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::ShellFallback,
      cached_at: Some(cached.cached_at),
    }
  }

  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
      cached_at: None,
    }
  }
}
