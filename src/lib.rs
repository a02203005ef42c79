//! Offline-first persistence and sync engine for a family budget.
//!
//! The [`StorageAdapter`] decides per operation whether a family is served
//! by the backend or by the on-device [`LocalStore`], queues mutations that
//! could not be delivered, and expands recurring templates into monthly
//! expenses. [`SyncEngine`] replays the queue once the backend is reachable.

pub mod adapter;
pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod logging;
pub mod mapper;
pub mod migrate;
pub mod model;
pub mod recurrence;
pub mod remote;
pub mod store;
pub mod sync;
pub mod sync_queue;
pub mod time;

pub use adapter::{ApplyOutcome, Route, StorageAdapter};
pub use config::Config;
pub use db::LocalStore;
pub use error::{AppError, AppResult};
pub use id::{EntityId, EntityKind, Origin};
pub use remote::{Connectivity, ConnectivityFlag, RemoteBackend, RemoteError};
pub use store::{RowMap, StoreName};
pub use sync::{DrainReport, SyncEngine};
pub use sync_queue::{Mutation, SyncAction, SyncQueue, SyncQueueItem};
