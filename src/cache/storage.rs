//! Cache storage trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CacheKey, CachedResponse};
use crate::net::Response;
use crate::worker::RegistrationStore;

/// Trait for cache storage backends.
///
/// Writes are idempotent replacements keyed by request identity; concurrent
/// writers to the same key are not serialized beyond the backend's own lock.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the generation if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of all generations, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a generation and everything in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up a stored response.
  fn match_request(&self, name: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Store (or replace) a single response, creating the generation if needed.
  fn put(&self, name: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Store a batch of responses in one transaction: all or nothing.
  fn put_all(&self, name: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Keys stored in a generation.
  fn entries(&self, name: &str) -> Result<Vec<CacheKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (creating if needed) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("caches.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named cache generations
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by generation and request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_hash)
);

-- Active worker version per scope
CREATE TABLE IF NOT EXISTS registrations (
    scope TEXT PRIMARY KEY,
    active_version TEXT NOT NULL,
    activated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Insert a single entry using an open connection or transaction.
fn insert_entry(conn: &Connection, name: &str, key: &CacheKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, request_hash, method, url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        key.cache_hash(),
        key.method,
        key.url,
        response.status,
        response.status_text,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url, name, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, name: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, status_text, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![name, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key.url, name, e))?;

    match row {
      Some((status, status_text, headers, body, cached_at_str)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;

        Ok(Some(CachedResponse {
          response: Response {
            status,
            status_text,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, name: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, name, key, response)
  }

  fn put_all(&self, name: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      insert_entry(&tx, name, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entries(&self, name: &str) -> Result<Vec<CacheKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE cache_name = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| {
        Ok(CacheKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    Ok(keys)
  }
}

impl RegistrationStore for SqliteStorage {
  fn active_version(&self, scope: &str) -> Result<Option<String>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT active_version FROM registrations WHERE scope = ?",
        params![scope],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read registration for {}: {}", scope, e))
  }

  fn set_active_version(&self, scope: &str, version: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO registrations (scope, active_version, activated_at)
         VALUES (?, ?, datetime('now'))",
        params![scope, version],
      )
      .map_err(|e| eyre!("Failed to record registration for {}: {}", scope, e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn key(path: &str) -> CacheKey {
    let url = Url::parse("http://localhost:3000").unwrap().join(path).unwrap();
    CacheKey::new(&Method::GET, &url)
  }

  #[test]
  fn test_put_then_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let response = Response::new(200, "body").with_header("Content-Type", "text/css");

    storage.put("shell-v1", &key("/static/css/main.css"), &response).unwrap();

    let cached = storage
      .match_request("shell-v1", &key("/static/css/main.css"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response, response);
    assert!(storage.match_request("shell-v1", &key("/other.css")).unwrap().is_none());
    assert!(storage
      .match_request("runtime-v1", &key("/static/css/main.css"))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_put_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let response = Response::new(200, r#"{"total":3}"#);

    storage.put("runtime-v1", &key("/api/stats"), &response).unwrap();
    let once = storage.match_request("runtime-v1", &key("/api/stats")).unwrap().unwrap();

    storage.put("runtime-v1", &key("/api/stats"), &response).unwrap();
    let twice = storage.match_request("runtime-v1", &key("/api/stats")).unwrap().unwrap();

    assert_eq!(once.response, twice.response);
    assert_eq!(storage.entries("runtime-v1").unwrap().len(), 1);
    assert_eq!(storage.keys().unwrap(), vec!["runtime-v1".to_string()]);
  }

  #[test]
  fn test_put_replaces_existing_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    storage.put("shell-v1", &key("/"), &Response::new(200, "old")).unwrap();
    storage.put("shell-v1", &key("/"), &Response::new(200, "new")).unwrap();

    let cached = storage.match_request("shell-v1", &key("/")).unwrap().unwrap();
    assert_eq!(cached.response.text(), "new");
  }

  #[test]
  fn test_keys_in_creation_order_and_delete() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("v0-shell").unwrap();
    storage.open("v0-runtime").unwrap();
    storage.put("v1-shell", &key("/"), &Response::new(200, "")).unwrap();

    assert_eq!(
      storage.keys().unwrap(),
      vec!["v0-shell", "v0-runtime", "v1-shell"]
    );

    assert!(storage.delete("v1-shell").unwrap());
    assert!(!storage.delete("v1-shell").unwrap());
    assert!(storage.entries("v1-shell").unwrap().is_empty());
    assert_eq!(storage.keys().unwrap(), vec!["v0-shell", "v0-runtime"]);
  }

  #[test]
  fn test_open_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("shell-v1").unwrap();
    storage.open("shell-v1").unwrap();
    assert_eq!(storage.keys().unwrap(), vec!["shell-v1"]);
  }

  #[test]
  fn test_put_all_stores_every_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![
      (key("/"), Response::new(200, "<html>")),
      (key("/manifest.json"), Response::new(200, "{}")),
    ];

    storage.put_all("shell-v1", &entries).unwrap();

    assert_eq!(storage.entries("shell-v1").unwrap().len(), 2);
  }

  #[test]
  fn test_registration_round_trip() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let scope = "http://localhost:3000/";

    assert_eq!(storage.active_version(scope).unwrap(), None);

    storage.set_active_version(scope, "1.0.0").unwrap();
    storage.set_active_version(scope, "1.1.0").unwrap();
    assert_eq!(storage.active_version(scope).unwrap().as_deref(), Some("1.1.0"));
  }
}
