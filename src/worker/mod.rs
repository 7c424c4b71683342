//! The offline cache worker.
//!
//! The worker is driven by its host through one method per lifecycle event
//! (`ServiceWorker`). `OfflineWorker` is the implementation: it precaches the
//! application shell, cleans up stale generations on activation, and routes
//! every intercepted GET through the strategies in `crate::cache`.

mod events;
mod lifecycle;
mod registration;
mod router;

use std::future::Future;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::debug;
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, Served};
use crate::config::Config;
use crate::host::ClientHost;
use crate::net::{Fetcher, Request};

pub use lifecycle::InstallOutcome;
pub use registration::{Registration, RegistrationStore, WorkerState};
pub use router::{RequestClass, Router};

/// What the worker decided to do with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted; the host sends it to the network unmodified
  Passthrough,
  Respond(Served),
}

/// Lifecycle events a hosting runtime delivers to a worker.
pub trait ServiceWorker: Send + Sync {
  /// Version this worker was built for.
  fn version(&self) -> &str;

  fn on_install(&self) -> impl Future<Output = InstallOutcome> + Send;

  /// Returns the names of the generations that were deleted.
  fn on_activate(&self) -> impl Future<Output = Vec<String>> + Send;

  fn on_fetch(&self, request: Request) -> impl Future<Output = FetchOutcome> + Send;

  fn on_push(&self) -> impl Future<Output = ()> + Send;

  fn on_notification_click(&self, action: Option<&str>) -> impl Future<Output = ()> + Send;

  fn on_sync(&self, tag: &str) -> impl Future<Output = ()> + Send;
}

/// Offline cache worker over a network, a cache store and a host.
pub struct OfflineWorker<F: Fetcher, S: CacheStorage, H: ClientHost> {
  layer: CacheLayer<F, S>,
  router: Router,
  host: Arc<H>,
  /// Absolute URLs of the precache manifest, in order
  precache: Vec<Url>,
  version: String,
  app_name: String,
}

impl<F: Fetcher, S: CacheStorage, H: ClientHost> OfflineWorker<F, S, H> {
  pub fn new(config: &Config, fetcher: Arc<F>, storage: Arc<S>, host: Arc<H>) -> Result<Self> {
    let origin = config.origin_url()?;

    let precache = config
      .precache
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid precache entry '{}': {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let layer = CacheLayer::new(fetcher, storage, config.cache_names(), &origin)?
      .with_api_cache_patterns(config.api_cache_patterns.clone())
      .with_app_name(&config.app_name);

    Ok(Self {
      layer,
      router: Router::new(&origin, &config.routes),
      host,
      precache,
      version: config.version.clone(),
      app_name: config.app_name.clone(),
    })
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  pub fn layer(&self) -> &CacheLayer<F, S> {
    &self.layer
  }

  /// Classify and dispatch to the matching strategy.
  pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
    let class = self.router.classify(&request);
    debug!(method = %request.method, url = %request.url, class = ?class, "Routing request");

    let served = match class {
      RequestClass::NonGet | RequestClass::CrossOrigin => return FetchOutcome::Passthrough,
      RequestClass::Api | RequestClass::Default => self.layer.network_first(&request).await,
      RequestClass::StaticAsset => self.layer.cache_first(&request).await,
      RequestClass::Navigation => self.layer.navigate(&request).await,
    };

    FetchOutcome::Respond(served)
  }
}

impl<F: Fetcher, S: CacheStorage, H: ClientHost> ServiceWorker for OfflineWorker<F, S, H> {
  fn version(&self) -> &str {
    &self.version
  }

  async fn on_install(&self) -> InstallOutcome {
    self.install().await
  }

  async fn on_activate(&self) -> Vec<String> {
    self.activate().await
  }

  async fn on_fetch(&self, request: Request) -> FetchOutcome {
    self.handle_fetch(request).await
  }

  async fn on_push(&self) {
    self.push().await
  }

  async fn on_notification_click(&self, action: Option<&str>) {
    self.notification_click(action).await
  }

  async fn on_sync(&self, tag: &str) {
    self.sync(tag).await
  }
}
