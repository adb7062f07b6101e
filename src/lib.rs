//! Offline-first bidirectional sync engine for a local embedded store and a
//! partitioned remote document store.
//!
//! - [`document`]: the `SyncDocument` contract every synchronized type
//!   implements.
//! - [`store::local`]: the embedded SQLite-backed store and its pending-change
//!   log.
//! - [`store::remote`]: the HTTPS remote store adapter.
//! - [`auth`]: token acquisition/caching and remote client construction.
//! - [`sync`]: the push/pull reconciler.

pub mod auth;
pub mod config;
pub mod document;
pub mod error;
pub mod store;
pub mod sync;

pub use config::{ConnectionMode, RemoteOptions, SyncConfig};
pub use document::SyncDocument;
pub use error::{SyncError, SyncResult};
pub use store::{DocumentStore, LocalWrite};
pub use sync::{SyncEngine, SyncReport};
