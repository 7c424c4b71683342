//! Test doubles for the network and storage seams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use tokio::sync::Notify;
use url::Url;

use crate::cache::{CacheKey, CacheStorage, CachedResponse, SqliteStorage};
use crate::net::{Fetcher, Request, Response};

pub const ORIGIN: &str = "http://localhost:3000";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
enum Reply {
  Respond(Response),
  Fail,
  /// Respond only after the gate is notified
  Gated(Response, Arc<Notify>),
}

/// Fetcher that answers from a fixed table. Unknown URLs fail like an
/// unreachable network.
#[derive(Default)]
pub struct StubFetcher {
  replies: Mutex<HashMap<String, Reply>>,
  calls: Mutex<Vec<Request>>,
}

impl StubFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, path: &str, response: Response) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Reply::Respond(response));
  }

  pub fn fail(&self, path: &str) {
    self.replies.lock().unwrap().insert(url(path).to_string(), Reply::Fail);
  }

  /// Respond with `response` once the returned gate is notified.
  pub fn gate(&self, path: &str, response: Response) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    self
      .replies
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Reply::Gated(response, Arc::clone(&gate)));
    gate
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, path: &str) -> usize {
    let target = url(path);
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url == target)
      .count()
  }
}

impl Fetcher for StubFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());
    let reply = self.replies.lock().unwrap().get(request.url.as_str()).cloned();

    match reply {
      Some(Reply::Respond(response)) => Ok(response),
      Some(Reply::Gated(response, gate)) => {
        gate.notified().await;
        Ok(response)
      }
      Some(Reply::Fail) | None => Err(eyre!("network unreachable: {}", request.url)),
    }
  }
}

/// Storage whose every operation fails, as when storage is unavailable.
pub struct FailingStorage;

impl CacheStorage for FailingStorage {
  fn open(&self, _name: &str) -> Result<()> {
    Err(eyre!("storage unavailable"))
  }

  fn keys(&self) -> Result<Vec<String>> {
    Err(eyre!("storage unavailable"))
  }

  fn delete(&self, _name: &str) -> Result<bool> {
    Err(eyre!("storage unavailable"))
  }

  fn match_request(&self, _name: &str, _key: &CacheKey) -> Result<Option<CachedResponse>> {
    Err(eyre!("storage unavailable"))
  }

  fn put(&self, _name: &str, _key: &CacheKey, _response: &Response) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn put_all(&self, _name: &str, _entries: &[(CacheKey, Response)]) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn entries(&self, _name: &str) -> Result<Vec<CacheKey>> {
    Err(eyre!("storage unavailable"))
  }
}

/// In-memory storage that rejects batch writes, as when quota runs out in the
/// middle of an install.
pub struct BatchRejectingStorage(pub SqliteStorage);

impl CacheStorage for BatchRejectingStorage {
  fn open(&self, name: &str) -> Result<()> {
    self.0.open(name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.0.keys()
  }

  fn delete(&self, name: &str) -> Result<bool> {
    self.0.delete(name)
  }

  fn match_request(&self, name: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.0.match_request(name, key)
  }

  fn put(&self, name: &str, key: &CacheKey, response: &Response) -> Result<()> {
    self.0.put(name, key, response)
  }

  fn put_all(&self, _name: &str, _entries: &[(CacheKey, Response)]) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn entries(&self, name: &str) -> Result<Vec<CacheKey>> {
    self.0.entries(name)
  }
}
