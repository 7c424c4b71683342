//! The runtime hosting the worker: open application clients and the
//! operating-system notification surface.

use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use url::Url;

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// An operating-system level notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Notifications with the same tag replace each other
  pub tag: String,
  pub actions: Vec<NotificationAction>,
}

/// Services the hosting runtime provides to the worker.
pub trait ClientHost: Send + Sync + 'static {
  /// Take control of every open application client immediately.
  fn claim(&self) -> Result<()>;

  /// Open (or focus) an application window at `path`.
  fn open_window(&self, path: &str) -> Result<()>;

  fn show_notification(&self, notification: Notification) -> Result<()>;

  fn close_notification(&self, tag: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct HostState {
  claimed: bool,
  windows: Vec<Url>,
  notifications: Vec<Notification>,
}

/// Host without a windowing system: logs every request and keeps track of
/// what a real runtime would be displaying.
pub struct HeadlessHost {
  origin: Url,
  state: Mutex<HostState>,
}

impl HeadlessHost {
  pub fn new(origin: Url) -> Self {
    Self {
      origin,
      state: Mutex::new(HostState::default()),
    }
  }

  fn with_state<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> Result<T> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut state))
  }

  pub fn is_claimed(&self) -> bool {
    self.with_state(|s| s.claimed).unwrap_or(false)
  }

  pub fn opened_windows(&self) -> Vec<Url> {
    self.with_state(|s| s.windows.clone()).unwrap_or_default()
  }

  /// Notifications currently on display.
  pub fn notifications(&self) -> Vec<Notification> {
    self.with_state(|s| s.notifications.clone()).unwrap_or_default()
  }
}

impl ClientHost for HeadlessHost {
  fn claim(&self) -> Result<()> {
    self.with_state(|s| s.claimed = true)?;
    info!(origin = %self.origin, "Claimed open clients");
    Ok(())
  }

  fn open_window(&self, path: &str) -> Result<()> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| eyre!("Cannot open window at '{}': {}", path, e))?;

    info!(url = %url, "Opening window");
    self.with_state(|s| s.windows.push(url))
  }

  fn show_notification(&self, notification: Notification) -> Result<()> {
    info!(title = %notification.title, tag = %notification.tag, "Showing notification");
    self.with_state(|s| {
      s.notifications.retain(|n| n.tag != notification.tag);
      s.notifications.push(notification);
    })
  }

  fn close_notification(&self, tag: &str) -> Result<()> {
    self.with_state(|s| s.notifications.retain(|n| n.tag != tag))
  }
}
