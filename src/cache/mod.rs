//! Versioned cache generations and the strategies that read and fill them.
//!
//! This module provides:
//! - A durable store of named cache generations keyed by request identity
//! - Cache-first, network-first and navigation strategies over that store
//! - Synthesized fallback responses for when neither cache nor network can answer
//!
//! Two generations are live at a time: the shell generation, filled at install
//! time from the precache manifest, and the runtime generation, filled
//! opportunistically from successful API responses.

mod fallback;
mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheKey, CacheNames, CachedResponse, ResponseSource, Served};
