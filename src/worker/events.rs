//! Push, notification-click and background-sync events.

use tracing::{info, warn};

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::host::{ClientHost, Notification, NotificationAction};
use crate::net::Fetcher;

const UPDATE_TAG: &str = "terminology-update";
const VIEW_ACTION: &str = "view";
const DISMISS_ACTION: &str = "dismiss";

/// Background-sync tags the worker recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTag {
  /// Replay of search queries issued while offline
  Search,
  /// Replay of mapping requests issued while offline
  Mapping,
  Other(String),
}

impl SyncTag {
  pub fn parse(tag: &str) -> Self {
    match tag {
      "search-sync" => Self::Search,
      "mapping-sync" => Self::Mapping,
      other => Self::Other(other.to_string()),
    }
  }
}

impl<F: Fetcher, S: CacheStorage, H: ClientHost> OfflineWorker<F, S, H> {
  /// The "updates available" notification raised on push.
  pub fn update_notification(&self) -> Notification {
    Notification {
      title: format!("{} Update", self.app_name),
      body: "New medical terminology updates available".into(),
      icon: "/logo192.png".into(),
      badge: "/badge.png".into(),
      tag: UPDATE_TAG.into(),
      actions: vec![
        NotificationAction {
          action: VIEW_ACTION.into(),
          title: "View Updates".into(),
        },
        NotificationAction {
          action: DISMISS_ACTION.into(),
          title: "Dismiss".into(),
        },
      ],
    }
  }

  pub(super) async fn push(&self) {
    if let Err(e) = self.host.show_notification(self.update_notification()) {
      warn!(error = %e, "Failed to show notification");
    }
  }

  /// Close the notification; "view" brings the application up at its root.
  pub(super) async fn notification_click(&self, action: Option<&str>) {
    if let Err(e) = self.host.close_notification(UPDATE_TAG) {
      warn!(error = %e, "Failed to close notification");
    }

    if action == Some(VIEW_ACTION) {
      if let Err(e) = self.host.open_window("/") {
        warn!(error = %e, "Failed to open window");
      }
    }
  }

  pub(super) async fn sync(&self, tag: &str) {
    info!(tag, "Background sync");

    match SyncTag::parse(tag) {
      SyncTag::Search => self.sync_search_data().await,
      SyncTag::Mapping => self.sync_mapping_data().await,
      SyncTag::Other(tag) => info!(tag = %tag, "Ignoring unknown sync tag"),
    }
  }

  // No offline queue exists yet; there is nothing to replay.
  async fn sync_search_data(&self) {
    info!("Syncing search data");
  }

  async fn sync_mapping_data(&self) {
    info!("Syncing mapping data");
  }
}
