use std::borrow::Cow;

use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::cache::CacheKey;

/// How the request was issued by the hosted application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document load (typed URL, followed link, reload)
  Navigate,
  /// Subresource request issued by a page (script, stylesheet, XHR)
  #[default]
  Cors,
}

/// HTTP cache behaviour requested for the upstream fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  /// Bypass any intermediate HTTP cache and force a full reload
  Reload,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub cache: CacheMode,
}

impl Request {
  /// A plain subresource GET.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      cache: CacheMode::default(),
    }
  }

  /// A top-level navigation GET.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_cache(mut self, cache: CacheMode) -> Self {
    self.cache = cache;
    self
  }

  /// Resolve a path or absolute URL against the application origin.
  pub fn resolve(origin: &Url, target: &str) -> Result<Url> {
    if target.starts_with("http://") || target.starts_with("https://") {
      Url::parse(target).map_err(|e| eyre!("Invalid URL '{}': {}", target, e))
    } else {
      origin
        .join(target)
        .map_err(|e| eyre!("Cannot resolve '{}' against {}: {}", target, origin, e))
    }
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Identity of this request inside a cache generation.
  pub fn cache_key(&self) -> CacheKey {
    CacheKey::new(&self.method, &self.url)
  }
}

/// A response as seen by the hosted application, whether it came from the
/// network, a cache generation, or was synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    let status_text = StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or_default()
      .to_string();

    Self {
      status,
      status_text,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }
}
