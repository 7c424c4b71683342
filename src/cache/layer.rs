//! Cache layer that orchestrates caching strategies with network fetching.

use std::mem;
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::Url;

use super::fallback;
use super::storage::CacheStorage;
use super::{CacheKey, CacheNames, CachedResponse, Served};
use crate::net::{Fetcher, Request, Response};

/// Whether a request path matches one of the API patterns worth keeping for
/// offline reads.
pub fn is_cacheable(path: &str, patterns: &[String]) -> bool {
  patterns.iter().any(|pattern| path.contains(pattern.as_str()))
}

/// Cache layer that runs requests through the caching strategies.
///
/// This layer sits between the intercepted request and the network. None of
/// its strategies fail outward: every failure degrades to a cached copy or a
/// synthesized response.
pub struct CacheLayer<F: Fetcher, S: CacheStorage> {
  fetcher: Arc<F>,
  storage: Arc<S>,
  names: Arc<CacheNames>,
  api_cache_patterns: Arc<[String]>,
  /// Key of the application shell document (`/`)
  shell_root: CacheKey,
  app_name: Arc<str>,
  /// Handles of detached revalidations and cache writes still running
  background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<F: Fetcher, S: CacheStorage> CacheLayer<F, S> {
  pub fn new(fetcher: Arc<F>, storage: Arc<S>, names: CacheNames, origin: &Url) -> Result<Self> {
    let root = origin
      .join("/")
      .map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;

    Ok(Self {
      fetcher,
      storage,
      names: Arc::new(names),
      api_cache_patterns: Arc::from(Vec::new()),
      shell_root: CacheKey::new(&Method::GET, &root),
      app_name: Arc::from("Application"),
      background: Arc::new(Mutex::new(Vec::new())),
    })
  }

  /// Set the API path patterns whose successful responses go into the runtime cache.
  pub fn with_api_cache_patterns(mut self, patterns: Vec<String>) -> Self {
    self.api_cache_patterns = Arc::from(patterns);
    self
  }

  /// Set the application name shown on the offline page.
  pub fn with_app_name(mut self, app_name: &str) -> Self {
    self.app_name = Arc::from(app_name);
    self
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn fetcher(&self) -> &Arc<F> {
    &self.fetcher
  }

  /// Whether a successful response to this request may be persisted to the
  /// runtime generation.
  pub fn should_cache(&self, request: &Request) -> bool {
    is_cacheable(request.url.path(), &self.api_cache_patterns)
  }

  /// Cache-first strategy for static assets.
  ///
  /// 1. Look up the shell generation
  /// 2. On a hit, revalidate in the background and return the cached copy
  /// 3. On a miss, fetch and store a copy if the status is exactly 200
  /// 4. If lookup or fetch fails, return a plain-text 503
  pub async fn cache_first(&self, request: &Request) -> Served {
    match self.try_cache_first(request).await {
      Ok(served) => served,
      Err(e) => {
        error!(url = %request.url, error = %e, "Cache-first strategy failed");
        Served::synthesized(fallback::unavailable())
      }
    }
  }

  async fn try_cache_first(&self, request: &Request) -> Result<Served> {
    let key = request.cache_key();

    if let Some(cached) = self.storage.match_request(&self.names.shell, &key)? {
      debug!(url = %request.url, "Cache hit, revalidating in background");
      self.revalidate(request.clone(), key);
      return Ok(Served::from_cache(cached));
    }

    // Not in cache, fetch from network
    let response = self.fetcher.fetch(request).await?;
    if response.status == 200 {
      if let Err(e) = self.storage.put(&self.names.shell, &key, &response) {
        warn!(url = %request.url, error = %e, "Failed to cache response");
      }
    }

    Ok(Served::from_network(response))
  }

  /// Refresh a shell entry without holding up the caller.
  ///
  /// Detached task: its errors are discarded and it cannot affect the
  /// response already returned.
  fn revalidate(&self, request: Request, key: CacheKey) {
    let fetcher = Arc::clone(&self.fetcher);
    let storage = Arc::clone(&self.storage);
    let names = Arc::clone(&self.names);

    self.detach(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.status == 200 => {
          if let Err(e) = storage.put(&names.shell, &key, &response) {
            debug!(url = %request.url, error = %e, "Background revalidation not stored");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "Background revalidation skipped");
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "Background revalidation failed");
        }
      }
    });
  }

  /// Network-first strategy for API and dynamic content.
  ///
  /// Falls back to the runtime generation, then (for navigations) the cached
  /// shell document, then a JSON 503.
  pub async fn network_first(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.status == 200 && self.should_cache(request) {
          self.store_runtime(request.cache_key(), response.clone());
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network request failed, trying cache");

        if let Some(cached) = self.lookup(&self.names.runtime, &request.cache_key()) {
          return Served::from_cache(cached);
        }

        if request.is_navigation() {
          return self.shell_or_offline_page();
        }

        Served::synthesized(fallback::offline_json())
      }
    }
  }

  /// Write a copy into the runtime generation without blocking the response.
  /// Errors are discarded.
  fn store_runtime(&self, key: CacheKey, response: Response) {
    let storage = Arc::clone(&self.storage);
    let names = Arc::clone(&self.names);

    self.detach(async move {
      if let Err(e) = storage.put(&names.runtime, &key, &response) {
        debug!(url = %key.url, error = %e, "Runtime cache write failed");
      }
    });
  }

  fn detach(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
    let handle = tokio::spawn(task);
    if let Ok(mut background) = self.background.lock() {
      background.retain(|h| !h.is_finished());
      background.push(handle);
    }
  }

  /// Wait for detached tasks spawned so far. Responses never wait on these;
  /// this is for hosts that are about to shut down.
  pub async fn wait_background(&self) {
    let handles = match self.background.lock() {
      Ok(mut background) => mem::take(&mut *background),
      Err(_) => return,
    };

    for handle in handles {
      // Detached task errors are discarded
      let _ = handle.await;
    }
  }

  /// Navigation handler for application routes.
  ///
  /// Network first with no caching side effect; on failure the cached shell
  /// document, and as a last resort the offline page.
  pub async fn navigate(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => Served::from_network(response),
      Err(e) => {
        debug!(url = %request.url, error = %e, "Navigation failed, serving shell");
        self.shell_or_offline_page()
      }
    }
  }

  fn shell_or_offline_page(&self) -> Served {
    match self.lookup(&self.names.shell, &self.shell_root) {
      Some(cached) => Served::shell_fallback(cached),
      None => Served::synthesized(fallback::offline_page(&self.app_name)),
    }
  }

  /// Cache lookup where a storage error counts as a miss.
  fn lookup(&self, name: &str, key: &CacheKey) -> Option<CachedResponse> {
    match self.storage.match_request(name, key) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(cache = name, url = %key.url, error = %e, "Cache lookup failed");
        None
      }
    }
  }
}

impl<F: Fetcher, S: CacheStorage> Clone for CacheLayer<F, S> {
  fn clone(&self) -> Self {
    Self {
      fetcher: Arc::clone(&self.fetcher),
      storage: Arc::clone(&self.storage),
      names: Arc::clone(&self.names),
      api_cache_patterns: Arc::clone(&self.api_cache_patterns),
      shell_root: self.shell_root.clone(),
      app_name: Arc::clone(&self.app_name),
      background: Arc::clone(&self.background),
    }
  }
}
