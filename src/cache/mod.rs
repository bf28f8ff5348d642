//! Read-side caching for data persistence and offline support.
//!
//! This module provides:
//! - A TTL-bounded cache of response bodies, lazily evicted on read
//! - Per-entity snapshots used as a last-known-good fallback when offline
//! - Result metadata telling callers where the data came from

mod manager;
mod snapshot;
mod traits;

pub use manager::{request_key, CacheEntry, CacheManager};
pub use snapshot::{EntityKind, SnapshotBinding, SnapshotStore};
pub use traits::{CacheResult, CacheSource};
