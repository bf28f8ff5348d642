//! Offline-resilient data access for the rental-property API.
//!
//! Reads are served from a TTL cache and fall back to per-entity snapshots
//! when the network is gone. Writes that cannot reach the server are kept in a
//! durable outbox and replayed in order once connectivity returns.

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod http;
pub mod network;
pub mod outbox;
pub mod rental;
pub mod retry;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::{Result, SyncError};
