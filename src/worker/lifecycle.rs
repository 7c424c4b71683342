//! Install and activate.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{error, info, warn};

use super::OfflineWorker;
use crate::cache::{CacheKey, CacheStorage};
use crate::host::ClientHost;
use crate::net::{CacheMode, Fetcher, Request, Response};

/// Result of an install attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
  /// Every manifest entry is stored.
  Installed {
    /// Supersede a waiting predecessor without waiting for clients to close
    skip_waiting: bool,
    precached: usize,
  },
  /// Nothing from the manifest was stored; the worker must not activate.
  Failed { reason: String },
}

impl<F: Fetcher, S: CacheStorage, H: ClientHost> OfflineWorker<F, S, H> {
  /// Precache the shell. All manifest entries are stored, or none are.
  pub(super) async fn install(&self) -> InstallOutcome {
    info!(version = %self.version, "Install event");

    match self.precache_shell().await {
      Ok(precached) => {
        info!(precached, "Installation complete");
        InstallOutcome::Installed {
          skip_waiting: true,
          precached,
        }
      }
      Err(e) => {
        error!(error = %e, "Installation failed");
        InstallOutcome::Failed {
          reason: e.to_string(),
        }
      }
    }
  }

  async fn precache_shell(&self) -> Result<usize> {
    let storage = self.layer.storage();
    let shell = &self.layer.names().shell;

    let existed = storage.keys()?.iter().any(|name| name == shell);
    let entries = self.fetch_manifest().await?;

    if let Err(e) = storage
      .open(shell)
      .and_then(|()| storage.put_all(shell, &entries))
    {
      // Leave no empty generation behind that we created ourselves
      if !existed {
        if let Err(delete_err) = storage.delete(shell) {
          warn!(cache = %shell, error = %delete_err, "Failed to remove incomplete cache");
        }
      }
      return Err(e);
    }

    Ok(entries.len())
  }

  /// Fetch every manifest entry, bypassing HTTP caches. Fails on the first
  /// network error or non-2xx status.
  async fn fetch_manifest(&self) -> Result<Vec<(CacheKey, Response)>> {
    let fetcher = self.layer.fetcher();
    info!(count = self.precache.len(), "Caching essential resources");

    let fetches = self.precache.iter().map(|url| {
      let request = Request::get(url.clone()).with_cache(CacheMode::Reload);
      async move {
        let response = fetcher.fetch(&request).await?;
        if !response.is_ok() {
          return Err(eyre!(
            "Precache request for {} returned status {}",
            request.url,
            response.status
          ));
        }
        Ok((request.cache_key(), response))
      }
    });

    try_join_all(fetches).await
  }

  /// Delete every generation that does not belong to this version, then take
  /// control of open clients.
  pub(super) async fn activate(&self) -> Vec<String> {
    info!(version = %self.version, "Activate event");
    let storage = self.layer.storage();
    let names = self.layer.names();

    let existing = match storage.keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "Failed to list caches");
        Vec::new()
      }
    };

    let mut deleted = Vec::new();
    for name in existing.into_iter().filter(|name| !names.is_current(name)) {
      info!(cache = %name, "Deleting old cache");
      match storage.delete(&name) {
        Ok(_) => deleted.push(name),
        Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
      }
    }

    if let Err(e) = self.host.claim() {
      warn!(error = %e, "Failed to claim clients");
    }

    info!(deleted = deleted.len(), "Activation complete");
    deleted
  }
}
