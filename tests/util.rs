#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nestbudget_lib::remote::RemoteResult;
use nestbudget_lib::{
    ConnectivityFlag, EntityKind, LocalStore, RemoteBackend, RemoteError, RowMap, StorageAdapter,
};
use serde_json::Value;
use uuid::Uuid;

/// In-memory backend. Inserts always receive a fresh UUID, like a hosted
/// database would assign. Failures are scripted per call.
#[derive(Default)]
pub struct FakeRemote {
    tables: Mutex<HashMap<EntityKind, Vec<RowMap>>>,
    failing: Mutex<Option<RemoteError>>,
    calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with(&self, err: RemoteError) {
        *self.failing.lock().unwrap() = Some(err);
    }

    pub fn recover(&self) {
        *self.failing.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self, kind: EntityKind) -> Vec<RowMap> {
        self.tables
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Seeds a row as if another device had written it.
    pub fn seed(&self, kind: EntityKind, row: RowMap) {
        self.tables
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(row);
    }

    fn enter(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failing.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn matches(row: &RowMap, field: &str, value: &str) -> bool {
    match row.get(field) {
        Some(Value::String(s)) => s == value,
        Some(Value::Number(n)) => n.to_string() == value,
        _ => false,
    }
}

#[async_trait]
impl RemoteBackend for FakeRemote {
    async fn select(
        &self,
        kind: EntityKind,
        field: &str,
        value: &str,
    ) -> RemoteResult<Vec<RowMap>> {
        self.enter()?;
        Ok(self
            .rows(kind)
            .into_iter()
            .filter(|row| matches(row, field, value))
            .collect())
    }

    async fn select_all(&self, kind: EntityKind) -> RemoteResult<Vec<RowMap>> {
        self.enter()?;
        Ok(self.rows(kind))
    }

    async fn insert(&self, kind: EntityKind, row: &RowMap) -> RemoteResult<RowMap> {
        self.enter()?;
        let mut stored = row.clone();
        stored.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        self.seed(kind, stored.clone());
        Ok(stored)
    }

    async fn update(&self, kind: EntityKind, id: &str, patch: &RowMap) -> RemoteResult<RowMap> {
        self.enter()?;
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .entry(kind)
            .or_default()
            .iter_mut()
            .find(|row| matches(row, "id", id))
            .ok_or_else(|| RemoteError::Rejected {
                code: "PGRST116".into(),
                message: format!("no {kind} with id {id}"),
            })?;
        row.extend(patch.clone());
        Ok(row.clone())
    }

    async fn update_where(
        &self,
        kind: EntityKind,
        field: &str,
        value: &str,
        patch: &RowMap,
    ) -> RemoteResult<u64> {
        self.enter()?;
        let mut tables = self.tables.lock().unwrap();
        let mut count = 0;
        for row in tables.entry(kind).or_default().iter_mut() {
            if matches(row, field, value) {
                row.extend(patch.clone());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> RemoteResult<()> {
        self.enter()?;
        self.tables
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .retain(|row| !matches(row, "id", id));
        Ok(())
    }
}

pub struct Harness {
    pub adapter: StorageAdapter,
    pub remote: Arc<FakeRemote>,
    pub online: ConnectivityFlag,
}

pub async fn harness(online: bool) -> Harness {
    let store = LocalStore::open_in_memory()
        .await
        .expect("open in-memory store");
    let remote = FakeRemote::new();
    let flag = ConnectivityFlag::new(online);
    let adapter = StorageAdapter::new(store, remote.clone(), Arc::new(flag.clone()));
    Harness {
        adapter,
        remote,
        online: flag,
    }
}

pub fn row(value: Value) -> RowMap {
    value.as_object().cloned().expect("object literal")
}

pub fn unavailable() -> RemoteError {
    RemoteError::Unavailable("connection reset".into())
}
