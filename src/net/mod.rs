//! Upstream network access.
//!
//! This module defines the request/response shapes that flow through the
//! worker, and the `Fetcher` seam the strategies use to reach the network.

pub mod client;
pub mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{CacheMode, Request, Response};
