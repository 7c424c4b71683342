//! Host-side registration: tracks one worker through install and activation
//! and decides whether fetches reach it.

use std::fmt;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use super::{FetchOutcome, InstallOutcome, ServiceWorker};
use crate::cache::Served;
use crate::net::{Fetcher, Request};

/// Persists which worker version is active for a scope.
pub trait RegistrationStore: Send + Sync {
  fn active_version(&self, scope: &str) -> Result<Option<String>>;

  fn set_active_version(&self, scope: &str, version: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  /// Installed and waiting for the previous version to go away
  Installed,
  Activating,
  Activated,
  /// Install failed; this worker never handles requests
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

pub struct Registration<W: ServiceWorker, R: RegistrationStore> {
  worker: W,
  store: Arc<R>,
  scope: String,
  state: WorkerState,
  /// Version active before this worker, if any
  previous: Option<String>,
}

impl<W: ServiceWorker, R: RegistrationStore> Registration<W, R> {
  /// Pick up the persisted registration: if this worker's version is already
  /// active it starts out activated.
  pub fn new(worker: W, store: Arc<R>, scope: impl Into<String>) -> Result<Self> {
    let scope = scope.into();
    let active = store.active_version(&scope)?;
    let state = if active.as_deref() == Some(worker.version()) {
      WorkerState::Activated
    } else {
      WorkerState::Parsed
    };

    Ok(Self {
      worker,
      store,
      scope,
      state,
      previous: active,
    })
  }

  pub fn worker(&self) -> &W {
    &self.worker
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Install the worker and, unless it must wait for a predecessor, activate it.
  ///
  /// A failed install is not an error: the worker becomes redundant and the
  /// previously active version (if any) keeps serving.
  pub async fn register(&mut self) -> Result<WorkerState> {
    if self.state == WorkerState::Activated {
      info!(version = self.worker.version(), "Already active");
      return Ok(self.state);
    }

    self.state = WorkerState::Installing;
    match self.worker.on_install().await {
      InstallOutcome::Installed { skip_waiting, .. } => {
        self.state = WorkerState::Installed;
        if skip_waiting || self.previous.is_none() {
          self.activate().await?;
        } else {
          info!(version = self.worker.version(), "Waiting for previous version to release clients");
        }
      }
      InstallOutcome::Failed { reason } => {
        warn!(version = self.worker.version(), reason = %reason, "Worker is redundant");
        self.state = WorkerState::Redundant;
      }
    }

    Ok(self.state)
  }

  /// Run activation and record this version as the active one.
  /// Returns the names of the deleted generations.
  ///
  /// Only an installed worker may activate; an already active one is left
  /// alone. Anything else would delete the generations still serving clients.
  pub async fn activate(&mut self) -> Result<Vec<String>> {
    match self.state {
      WorkerState::Installed => {}
      WorkerState::Activated => {
        info!(version = self.worker.version(), "Already active");
        return Ok(Vec::new());
      }
      state => {
        return Err(eyre!(
          "Cannot activate version {} while it is {}; install it first",
          self.worker.version(),
          state
        ));
      }
    }

    self.state = WorkerState::Activating;
    let deleted = self.worker.on_activate().await;

    self.store.set_active_version(&self.scope, self.worker.version())?;
    self.previous = Some(self.worker.version().to_string());
    self.state = WorkerState::Activated;

    Ok(deleted)
  }

  /// Deliver a request the way the runtime would: to the worker when it is
  /// active and intercepts it, straight to the network otherwise.
  pub async fn dispatch<N: Fetcher>(&self, request: Request, network: &N) -> Result<Served> {
    if self.state == WorkerState::Activated {
      match self.worker.on_fetch(request.clone()).await {
        FetchOutcome::Respond(served) => return Ok(served),
        FetchOutcome::Passthrough => {}
      }
    }

    let response = network.fetch(&request).await?;
    Ok(Served::from_network(response))
  }
}

#[cfg(test)]
mod tests {
  use super::super::tests::{worker, TestWorker};
  use super::*;
  use crate::cache::{CacheStorage, ResponseSource, SqliteStorage};
  use crate::config::Config;
  use crate::net::Response;
  use crate::testing::{url, StubFetcher};

  const SCOPE: &str = "http://localhost:3000/";

  fn register(
    worker: TestWorker,
    storage: &Arc<SqliteStorage>,
  ) -> Registration<TestWorker, SqliteStorage> {
    Registration::new(worker, Arc::clone(storage), SCOPE).unwrap()
  }

  fn respond_to_manifest(fetcher: &StubFetcher) {
    for path in &Config::default().precache {
      fetcher.respond(path, Response::new(200, path.as_bytes().to_vec()));
    }
  }

  #[tokio::test]
  async fn test_successful_install_activates() {
    let (worker, fetcher, storage, host) = worker();
    respond_to_manifest(&fetcher);
    let mut registration = register(worker, &storage);

    assert_eq!(registration.state(), WorkerState::Parsed);
    assert_eq!(registration.register().await.unwrap(), WorkerState::Activated);

    assert!(host.is_claimed());
    assert_eq!(storage.active_version(SCOPE).unwrap().as_deref(), Some("1.0.0"));
  }

  #[tokio::test]
  async fn test_failed_install_is_redundant_and_passes_through() {
    let (worker, fetcher, storage, host) = worker();
    respond_to_manifest(&fetcher);
    fetcher.fail("/logo-template.svg");
    let mut registration = register(worker, &storage);

    assert_eq!(registration.register().await.unwrap(), WorkerState::Redundant);
    assert!(!host.is_claimed());
    assert_eq!(storage.active_version(SCOPE).unwrap(), None);

    // Requests go to the network; the failure is not turned into a fallback
    let network = StubFetcher::new();
    assert!(registration
      .dispatch(Request::navigate(url("/search")), &network)
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_persisted_version_starts_activated() {
    let (worker, _, storage, _) = worker();
    storage.set_active_version(SCOPE, "1.0.0").unwrap();

    let registration = register(worker, &storage);

    assert_eq!(registration.state(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_dispatch_through_active_worker() {
    let (worker, fetcher, storage, _) = worker();
    respond_to_manifest(&fetcher);
    let mut registration = register(worker, &storage);
    registration.register().await.unwrap();

    // Shell assets are now served from the cache while offline
    fetcher.fail("/static/css/main.css");
    let network = StubFetcher::new();
    let served = registration
      .dispatch(Request::get(url("/static/css/main.css")), &network)
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.text(), "/static/css/main.css");
    assert!(network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_passthrough_goes_to_network() {
    let (worker, _, storage, _) = worker();
    storage.set_active_version(SCOPE, "1.0.0").unwrap();
    let registration = register(worker, &storage);
    let network = StubFetcher::new();
    network.respond("/api/mapping", Response::new(201, "created"));

    let request = Request::get(url("/api/mapping")).with_method(reqwest::Method::POST);
    let served = registration.dispatch(request, &network).await.unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.status, 201);
  }

  fn seed_previous_version(storage: &SqliteStorage) {
    let root = Request::get(url("/")).cache_key();
    storage
      .put("namaste-icd11-v0.9.0", &root, &Response::new(200, "old"))
      .unwrap();
    storage.open("namaste-icd11-runtime-v0.9.0").unwrap();
    storage.set_active_version(SCOPE, "0.9.0").unwrap();
  }

  #[tokio::test]
  async fn test_install_replaces_previous_version() {
    let (worker, fetcher, storage, _) = worker();
    seed_previous_version(&storage);
    respond_to_manifest(&fetcher);
    let mut registration = register(worker, &storage);

    assert_eq!(registration.register().await.unwrap(), WorkerState::Activated);

    assert_eq!(storage.keys().unwrap(), vec!["namaste-icd11-v1.0.0"]);
    assert_eq!(storage.active_version(SCOPE).unwrap().as_deref(), Some("1.0.0"));

    // Activating again changes nothing
    assert!(registration.activate().await.unwrap().is_empty());
    assert_eq!(registration.state(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_activate_without_install_is_refused() {
    let (worker, _, storage, host) = worker();
    seed_previous_version(&storage);
    let mut registration = register(worker, &storage);

    assert!(registration.activate().await.is_err());

    assert_eq!(registration.state(), WorkerState::Parsed);
    assert_eq!(storage.keys().unwrap().len(), 2);
    assert!(!host.is_claimed());
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_version_serving() {
    let (worker, fetcher, storage, host) = worker();
    seed_previous_version(&storage);
    respond_to_manifest(&fetcher);
    fetcher.fail("/logo-template.svg");
    let mut registration = register(worker, &storage);

    assert_eq!(registration.register().await.unwrap(), WorkerState::Redundant);
    assert!(registration.activate().await.is_err());

    assert_eq!(registration.state(), WorkerState::Redundant);
    assert_eq!(
      storage.keys().unwrap(),
      vec!["namaste-icd11-v0.9.0", "namaste-icd11-runtime-v0.9.0"]
    );
    assert!(storage
      .match_request("namaste-icd11-v0.9.0", &Request::get(url("/")).cache_key())
      .unwrap()
      .is_some());
    assert_eq!(storage.active_version(SCOPE).unwrap().as_deref(), Some("0.9.0"));
    assert!(!host.is_claimed());
  }
}
