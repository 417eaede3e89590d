//! Storage implementations for process notification logs and tracking
//!
//! This module provides both in-memory and persistent (RocksDB) implementations
//! of the ProcessStore trait, plus the factory that picks one from a
//! datastore URI.

use std::{collections::HashMap, path::Path, sync::Arc};

use async_trait::async_trait;
use rocksdb::{DB, Direction, IteratorMode, Options, WriteBatch};
use tokio::sync::{Mutex, RwLock};
use tracing::{Level, event};

use crate::{
    domain::{
        constant::store,
        error::RunnerError,
        identity::ProcessIdentity,
        notification::NotificationRecord
    },
    port::store::{CommitBatch, ProcessStore, StoreFactory}
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StoreType {
    #[serde(rename = "inmemory")]
    InMemory,
    #[serde(rename = "rocksdb")]
    RocksDb
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::InMemory => "inmemory",
            StoreType::RocksDb => "rocksdb"
        }
    }

    pub fn from_str(s: &str) -> Result<Self, RunnerError> {
        match s {
            "inmemory" => Ok(StoreType::InMemory),
            "rocksdb" => Ok(StoreType::RocksDb),
            other => Err(RunnerError::Configuration(format!("unknown storage backend: {}", other)))
        }
    }
}

/// Builds the store factory named by a datastore URI
///
/// `inmemory:` selects a process-local store that is lost on restart,
/// `rocksdb:<path>` opens (or creates) a RocksDB database shared by every
/// process instance under the runner.
pub fn store_factory_from_uri(uri: &str) -> Result<Arc<dyn StoreFactory>, RunnerError> {
    let (scheme, rest) = uri.split_once(':').unwrap_or((uri, ""));

    match StoreType::from_str(scheme)? {
        StoreType::InMemory => Ok(Arc::new(InMemoryStoreFactory::new())),
        StoreType::RocksDb => {
            let path = Some(rest.trim()).filter(|path| !path.is_empty()).ok_or_else(|| {
                RunnerError::Configuration("rocksdb datastore requires a path, e.g. rocksdb:/var/lib/procline".into())
            })?;
            Ok(Arc::new(RocksDbStoreFactory::open(path)?))
        }
    }
}

#[derive(Default)]
struct InMemoryInner {
    notifications: Vec<NotificationRecord>,
    tracking:      HashMap<String, u64>
}

/// In-memory process store implementation
/// Keeps the notification log and tracking table of one process instance in
/// process memory. Suitable for development and testing, but progress is
/// lost when the application restarts.
#[derive(Default)]
pub struct InMemoryProcessStore {
    inner: RwLock<InMemoryInner>
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload notifications, keeping the log sorted by id
    ///
    /// Intended for tests that stage an upstream log before a run starts.
    pub async fn seed_notifications(&self, notifications: Vec<NotificationRecord>) {
        let mut inner = self.inner.write().await;
        inner.notifications.extend(notifications);
        inner.notifications.sort_by_key(|notification| notification.id);
    }
}

#[async_trait]
impl ProcessStore for InMemoryProcessStore {
    async fn read_notifications(&self, after: u64, limit: usize) -> Result<Vec<NotificationRecord>, RunnerError> {
        let inner = self.inner.read().await;
        Ok(inner
            .notifications
            .iter()
            .filter(|notification| notification.id > after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn max_notification_id(&self) -> Result<u64, RunnerError> {
        let inner = self.inner.read().await;
        Ok(inner.notifications.last().map(|notification| notification.id).unwrap_or(0))
    }

    async fn tracking_position(&self, upstream_name: &str) -> Result<Option<u64>, RunnerError> {
        let inner = self.inner.read().await;
        Ok(inner.tracking.get(upstream_name).copied())
    }

    async fn commit(&self, batch: CommitBatch) -> Result<Vec<u64>, RunnerError> {
        let mut inner = self.inner.write().await;

        if let Some(tracking) = &batch.tracking {
            let recorded = inner.tracking.get(&tracking.upstream_name).copied().unwrap_or(0);
            if recorded >= tracking.notification_id {
                return Err(RunnerError::Conflict(format!(
                    "notification {} from '{}' is already tracked at {}",
                    tracking.notification_id, tracking.upstream_name, recorded
                )));
            }
        }

        let mut next_id = inner.notifications.last().map(|notification| notification.id).unwrap_or(0) + 1;
        let mut ids = Vec::with_capacity(batch.events.len());
        for new_event in &batch.events {
            inner.notifications.push(NotificationRecord::from_event(next_id, new_event, vec![]));
            ids.push(next_id);
            next_id += 1;
        }

        if let Some(tracking) = batch.tracking {
            inner.tracking.insert(tracking.upstream_name, tracking.notification_id);
        }

        Ok(ids)
    }
}

/// Hands out one shared in-memory store per (process, pipeline) instance
#[derive(Default)]
pub struct InMemoryStoreFactory {
    stores: Mutex<HashMap<ProcessIdentity, Arc<InMemoryProcessStore>>>
}

impl InMemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store an instance will receive, created on first use
    ///
    /// Lets tests seed or inspect a process's log from outside the runner.
    pub async fn store(&self, identity: &ProcessIdentity) -> Arc<InMemoryProcessStore> {
        let mut stores = self.stores.lock().await;
        stores.entry(identity.clone()).or_insert_with(|| Arc::new(InMemoryProcessStore::new())).clone()
    }
}

#[async_trait]
impl StoreFactory for InMemoryStoreFactory {
    async fn build(&self, identity: &ProcessIdentity) -> Result<Arc<dyn ProcessStore>, RunnerError> {
        Ok(self.store(identity).await)
    }
}

const CF_NOTIFICATIONS: &str = "notifications";
const CF_TRACKING: &str = "tracking";
const CF_SEQUENCES: &str = "sequences";

/// RocksDB-based process store implementation
/// Provides persistent storage so processes resume from their tracking
/// positions across application restarts. All instances under one runner
/// share a single DB, keyed apart by the instance scope.
///
/// Storage layout:
/// - `notifications` CF: `{scope}:{id:020}` -> NotificationRecord (JSON)
/// - `tracking` CF: `{scope}:{upstream}` -> u64 (last applied notification id)
/// - `sequences` CF: `{scope}` -> u64 (highest assigned notification id)
pub struct RocksDbProcessStore {
    db:         Arc<DB>,
    scope:      String,
    write_lock: Mutex<()>
}

impl RocksDbProcessStore {
    pub fn new(db: Arc<DB>, identity: &ProcessIdentity) -> Self {
        Self { db, scope: identity.scope(), write_lock: Mutex::new(()) }
    }
}

fn notification_key(scope: &str, id: u64) -> String {
    format!("{}:{:020}", scope, id)
}

fn tracking_key(scope: &str, upstream_name: &str) -> String {
    format!("{}:{}", scope, upstream_name)
}

fn column_family<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily, RunnerError> {
    db.cf_handle(name)
        .ok_or_else(|| RunnerError::Configuration(format!("missing column family '{}'", name)))
}

fn decode_counter(bytes: &[u8]) -> Result<u64, RunnerError> {
    let bytes: [u8; 8] =
        bytes.try_into().map_err(|_| RunnerError::Serialization("stored counter is not a u64".into()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl ProcessStore for RocksDbProcessStore {
    async fn read_notifications(&self, after: u64, limit: usize) -> Result<Vec<NotificationRecord>, RunnerError> {
        let db = self.db.clone();
        let scope = self.scope.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<NotificationRecord>, RunnerError> {
            let cf = column_family(&db, CF_NOTIFICATIONS)?;
            let start = notification_key(&scope, after.saturating_add(1));
            let prefix = format!("{}:", scope);

            let mut notifications = Vec::new();
            let iter = db.iterator_cf(cf, IteratorMode::From(start.as_bytes(), Direction::Forward));
            for item in iter {
                let (key, value) = item.map_err(|e| RunnerError::Operational(format!("rocksdb iterate: {}", e)))?;
                if !key.starts_with(prefix.as_bytes()) {
                    break;
                }
                notifications.push(serde_json::from_slice(&value)?);
                if notifications.len() >= limit {
                    break;
                }
            }

            Ok(notifications)
        })
        .await
        .map_err(|e| RunnerError::Operational(format!("storage task failed: {}", e)))?
    }

    async fn max_notification_id(&self) -> Result<u64, RunnerError> {
        let db = self.db.clone();
        let scope = self.scope.clone();

        tokio::task::spawn_blocking(move || -> Result<u64, RunnerError> {
            let cf = column_family(&db, CF_SEQUENCES)?;
            match db.get_cf(cf, scope.as_bytes()) {
                Ok(Some(bytes)) => decode_counter(&bytes),
                Ok(None) => Ok(0),
                Err(e) => Err(RunnerError::Operational(format!("rocksdb read: {}", e)))
            }
        })
        .await
        .map_err(|e| RunnerError::Operational(format!("storage task failed: {}", e)))?
    }

    async fn tracking_position(&self, upstream_name: &str) -> Result<Option<u64>, RunnerError> {
        let db = self.db.clone();
        let key = tracking_key(&self.scope, upstream_name);

        tokio::task::spawn_blocking(move || -> Result<Option<u64>, RunnerError> {
            let cf = column_family(&db, CF_TRACKING)?;
            match db.get_cf(cf, key.as_bytes()) {
                Ok(Some(bytes)) => Ok(Some(decode_counter(&bytes)?)),
                Ok(None) => Ok(None),
                Err(e) => Err(RunnerError::Operational(format!("rocksdb read: {}", e)))
            }
        })
        .await
        .map_err(|e| RunnerError::Operational(format!("storage task failed: {}", e)))?
    }

    async fn commit(&self, batch: CommitBatch) -> Result<Vec<u64>, RunnerError> {
        // Conflict check and id assignment must not interleave with another
        // commit against the same instance
        let _guard = self.write_lock.lock().await;

        let db = self.db.clone();
        let scope = self.scope.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<u64>, RunnerError> {
            let notifications = column_family(&db, CF_NOTIFICATIONS)?;
            let tracking = column_family(&db, CF_TRACKING)?;
            let sequences = column_family(&db, CF_SEQUENCES)?;

            if let Some(position) = &batch.tracking {
                let key = tracking_key(&scope, &position.upstream_name);
                let recorded = match db.get_cf(tracking, key.as_bytes()) {
                    Ok(Some(bytes)) => decode_counter(&bytes)?,
                    Ok(None) => 0,
                    Err(e) => return Err(RunnerError::Operational(format!("rocksdb read: {}", e)))
                };
                if recorded >= position.notification_id {
                    event!(Level::DEBUG, event = store::COMMIT_CONFLICT,
                           scope = %scope, upstream = %position.upstream_name,
                           notification_id = position.notification_id, recorded = recorded);
                    return Err(RunnerError::Conflict(format!(
                        "notification {} from '{}' is already tracked at {}",
                        position.notification_id, position.upstream_name, recorded
                    )));
                }
            }

            let last_id = match db.get_cf(sequences, scope.as_bytes()) {
                Ok(Some(bytes)) => decode_counter(&bytes)?,
                Ok(None) => 0,
                Err(e) => return Err(RunnerError::Operational(format!("rocksdb read: {}", e)))
            };

            let mut write = WriteBatch::default();
            let mut ids = Vec::with_capacity(batch.events.len());
            let mut next_id = last_id;

            for new_event in &batch.events {
                next_id += 1;
                let record = NotificationRecord::from_event(next_id, new_event, vec![]);
                write.put_cf(notifications, notification_key(&scope, next_id).as_bytes(), serde_json::to_vec(&record)?);
                ids.push(next_id);
            }

            if next_id > last_id {
                write.put_cf(sequences, scope.as_bytes(), next_id.to_be_bytes());
            }

            if let Some(position) = &batch.tracking {
                let key = tracking_key(&scope, &position.upstream_name);
                write.put_cf(tracking, key.as_bytes(), position.notification_id.to_be_bytes());
            }

            db.write(write).map_err(|e| RunnerError::Operational(format!("rocksdb write: {}", e)))?;
            Ok(ids)
        })
        .await
        .map_err(|e| RunnerError::Operational(format!("storage task failed: {}", e)))?
    }
}

/// Opens the shared RocksDB database and builds per-instance stores on it
pub struct RocksDbStoreFactory {
    db: Arc<DB>
}

impl RocksDbStoreFactory {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RunnerError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let db = DB::open_cf(&opts, path.as_ref(), [CF_NOTIFICATIONS, CF_TRACKING, CF_SEQUENCES])
            .map_err(|e| RunnerError::Operational(format!("failed to open rocksdb: {}", e)))?;

        event!(Level::DEBUG, event = store::STORE_OPENED, path = %path.as_ref().display());
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl StoreFactory for RocksDbStoreFactory {
    async fn build(&self, identity: &ProcessIdentity) -> Result<Arc<dyn ProcessStore>, RunnerError> {
        Ok(Arc::new(RocksDbProcessStore::new(self.db.clone(), identity)))
    }
}
