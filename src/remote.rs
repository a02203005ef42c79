//! Seam to the hosted backend and to the platform's connectivity signal.
//!
//! The backend is a generic row store addressed by entity kind. Rows are the
//! same snake_case objects the local store keeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::id::EntityKind;
use crate::store::RowMap;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport failure, timeout or an unreachable host.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered but refused the request.
    #[error("backend rejected request [{code}]: {message}")]
    Rejected { code: String, message: String },
}

impl RemoteError {
    pub fn code(&self) -> &str {
        match self {
            RemoteError::Unavailable(_) => "REMOTE/UNAVAILABLE",
            RemoteError::Rejected { .. } => "REMOTE/REJECTED",
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Rows of `kind` whose `field` equals `value`.
    async fn select(&self, kind: EntityKind, field: &str, value: &str) -> RemoteResult<Vec<RowMap>>;

    /// Every row of `kind` visible to the caller.
    async fn select_all(&self, kind: EntityKind) -> RemoteResult<Vec<RowMap>>;

    /// Inserts `row` and returns it as stored; the backend may assign a new id.
    async fn insert(&self, kind: EntityKind, row: &RowMap) -> RemoteResult<RowMap>;

    async fn update(&self, kind: EntityKind, id: &str, patch: &RowMap) -> RemoteResult<RowMap>;

    /// Applies `patch` to every row whose `field` equals `value`; returns the count.
    async fn update_where(
        &self,
        kind: EntityKind,
        field: &str,
        value: &str,
        patch: &RowMap,
    ) -> RemoteResult<u64>;

    async fn delete(&self, kind: EntityKind, id: &str) -> RemoteResult<()>;
}

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity state toggled by the host.
#[derive(Debug, Clone)]
pub struct ConnectivityFlag(Arc<AtomicBool>);

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Backend used when none is configured. Every call reports unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackend;

#[async_trait]
impl RemoteBackend for NoBackend {
    async fn select(&self, _: EntityKind, _: &str, _: &str) -> RemoteResult<Vec<RowMap>> {
        Err(RemoteError::Unavailable("no backend configured".into()))
    }

    async fn select_all(&self, _: EntityKind) -> RemoteResult<Vec<RowMap>> {
        Err(RemoteError::Unavailable("no backend configured".into()))
    }

    async fn insert(&self, _: EntityKind, _: &RowMap) -> RemoteResult<RowMap> {
        Err(RemoteError::Unavailable("no backend configured".into()))
    }

    async fn update(&self, _: EntityKind, _: &str, _: &RowMap) -> RemoteResult<RowMap> {
        Err(RemoteError::Unavailable("no backend configured".into()))
    }

    async fn update_where(&self, _: EntityKind, _: &str, _: &str, _: &RowMap) -> RemoteResult<u64> {
        Err(RemoteError::Unavailable("no backend configured".into()))
    }

    async fn delete(&self, _: EntityKind, _: &str) -> RemoteResult<()> {
        Err(RemoteError::Unavailable("no backend configured".into()))
    }
}
