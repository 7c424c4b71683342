//! Request classification.

use std::fmt;

use reqwest::Method;
use url::{Origin, Url};

use crate::config::RoutesConfig;
use crate::net::Request;

/// Which handling an intercepted request receives.
///
/// Every request maps to exactly one class, evaluated in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Not a GET: passed through untouched
  NonGet,
  /// Different origin: passed through untouched
  CrossOrigin,
  /// Under the API prefix: network-first
  Api,
  /// Under the static prefix, or has a file extension: cache-first
  StaticAsset,
  /// Top-level document load: navigation handler
  Navigation,
  /// Anything else: network-first
  Default,
}

impl fmt::Display for RequestClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::NonGet => "non-get (pass-through)",
      Self::CrossOrigin => "cross-origin (pass-through)",
      Self::Api => "api (network-first)",
      Self::StaticAsset => "static asset (cache-first)",
      Self::Navigation => "navigation (network, shell fallback)",
      Self::Default => "default (network-first)",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone)]
pub struct Router {
  origin: Origin,
  api_prefix: String,
  static_prefix: String,
}

impl Router {
  pub fn new(origin: &Url, routes: &RoutesConfig) -> Self {
    Self {
      origin: origin.origin(),
      api_prefix: routes.api_prefix.clone(),
      static_prefix: routes.static_prefix.clone(),
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.method != Method::GET {
      return RequestClass::NonGet;
    }

    if request.url.origin() != self.origin {
      return RequestClass::CrossOrigin;
    }

    // API before the extension check: /api/search.json is an API call
    let path = request.url.path();
    if path.starts_with(&self.api_prefix) {
      return RequestClass::Api;
    }

    if path.starts_with(&self.static_prefix) || path.contains('.') {
      return RequestClass::StaticAsset;
    }

    if request.is_navigation() {
      return RequestClass::Navigation;
    }

    RequestClass::Default
  }
}
