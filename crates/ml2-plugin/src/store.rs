//! In-memory transactional resource store.
//!
//! Stands in for the relational database the engine runs against: row
//! locks per resource, a staging area per transaction (shared with the
//! precommit hooks through [`TransactionHandle`]) and an all-or-nothing
//! commit.

use dashmap::DashMap;
use ml2_driver_api::{Ml2Error, ResourceKind, RowWrite, StagedWrites, TransactionHandle};
use ml2_types::{Network, NetworkSegment, Port, ResourceId, Subnet};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

/// Row lock identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub kind: ResourceKind,
    pub id: ResourceId,
}

impl LockKey {
    pub fn network(id: ResourceId) -> Self {
        Self {
            kind: ResourceKind::Network,
            id,
        }
    }

    pub fn subnet(id: ResourceId) -> Self {
        Self {
            kind: ResourceKind::Subnet,
            id,
        }
    }

    pub fn port(id: ResourceId) -> Self {
        Self {
            kind: ResourceKind::Port,
            id,
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Store failures. All of them are transient from the engine's view.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("timed out after {timeout:?} waiting for row lock {key}")]
    LockTimeout { key: LockKey, timeout: Duration },

    #[error("commit of transaction {txn} aborted: injected fault")]
    InjectedFault { txn: u64 },
}

impl From<StoreError> for Ml2Error {
    fn from(e: StoreError) -> Self {
        Ml2Error::transient(e.to_string())
    }
}

#[derive(Debug, Default)]
struct Tables {
    networks: BTreeMap<ResourceId, Network>,
    subnets: BTreeMap<ResourceId, Subnet>,
    ports: BTreeMap<ResourceId, Port>,
    extensions: BTreeMap<(String, ResourceId), Value>,
}

impl Tables {
    fn apply(&mut self, staged: StagedWrites) {
        for row in staged.rows {
            match row {
                RowWrite::PutNetwork(n) => {
                    self.networks.insert(n.id, n);
                }
                RowWrite::DeleteNetwork(id) => {
                    self.networks.remove(&id);
                    self.drop_extensions(id);
                }
                RowWrite::PutSubnet(s) => {
                    self.subnets.insert(s.id, s);
                }
                RowWrite::DeleteSubnet(id) => {
                    self.subnets.remove(&id);
                    self.drop_extensions(id);
                }
                RowWrite::PutPort(p) => {
                    self.ports.insert(p.id, p);
                }
                RowWrite::DeletePort(id) => {
                    self.ports.remove(&id);
                    self.drop_extensions(id);
                }
            }
        }
        for (key, value) in staged.extensions {
            match value {
                Some(v) => {
                    self.extensions.insert(key, v);
                }
                None => {
                    self.extensions.remove(&key);
                }
            }
        }
    }

    fn drop_extensions(&mut self, id: ResourceId) {
        self.extensions.retain(|(_, rid), _| *rid != id);
    }
}

/// The committed state plus the row-lock table.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    row_locks: DashMap<LockKey, Arc<Mutex<()>>>,
    lock_timeout: Duration,
    next_txn: AtomicU64,
    injected_faults: AtomicU32,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            row_locks: DashMap::new(),
            lock_timeout,
            next_txn: AtomicU64::new(1),
            injected_faults: AtomicU32::new(0),
        }
    }

    /// Opens a transaction holding the row locks for `keys`.
    ///
    /// Locks are taken in sorted order, so two transactions over
    /// overlapping key sets cannot deadlock.
    pub async fn begin(&self, mut keys: Vec<LockKey>) -> Result<Transaction<'_>, StoreError> {
        keys.sort();
        keys.dedup();

        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        let mut guards = Vec::with_capacity(keys.len());
        for (taken, &key) in keys.iter().enumerate() {
            let lock = self.row_locks.entry(key).or_default().clone();
            let acquired = tokio::time::timeout(self.lock_timeout, lock.lock_owned()).await;
            match acquired {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    warn!("Transaction {} timed out waiting for {}", id, key);
                    drop(guards);
                    self.prune_locks(&keys[..=taken]);
                    return Err(StoreError::LockTimeout {
                        key,
                        timeout: self.lock_timeout,
                    });
                }
            }
        }
        debug!("Transaction {} opened with {} row locks", id, guards.len());

        Ok(Transaction {
            store: self,
            handle: TransactionHandle::new(id),
            keys,
            guards,
        })
    }

    /// Drops lock table entries nobody holds or waits on. Holders and
    /// waiters each own a clone; `remove_if` runs under the shard lock.
    fn prune_locks(&self, keys: &[LockKey]) {
        for key in keys {
            self.row_locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    /// Number of row locks currently tracked.
    pub fn row_lock_count(&self) -> usize {
        self.row_locks.len()
    }

    /// Makes the next `count` commits fail with a transient error.
    pub fn inject_transient_faults(&self, count: u32) {
        self.injected_faults.store(count, Ordering::SeqCst);
    }

    fn take_fault(&self) -> bool {
        self.injected_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub async fn network(&self, id: ResourceId) -> Option<Network> {
        self.tables.read().await.networks.get(&id).cloned()
    }

    pub async fn networks(&self) -> Vec<Network> {
        self.tables.read().await.networks.values().cloned().collect()
    }

    pub async fn subnet(&self, id: ResourceId) -> Option<Subnet> {
        self.tables.read().await.subnets.get(&id).cloned()
    }

    pub async fn subnets_on(&self, network_id: ResourceId) -> Vec<Subnet> {
        self.tables
            .read()
            .await
            .subnets
            .values()
            .filter(|s| s.network_id == network_id)
            .cloned()
            .collect()
    }

    pub async fn port(&self, id: ResourceId) -> Option<Port> {
        self.tables.read().await.ports.get(&id).cloned()
    }

    pub async fn ports_on(&self, network_id: ResourceId) -> Vec<Port> {
        self.tables
            .read()
            .await
            .ports
            .values()
            .filter(|p| p.network_id == network_id)
            .cloned()
            .collect()
    }

    /// Committed driver extension state for a resource.
    pub async fn extension(&self, driver: &str, resource_id: ResourceId) -> Option<Value> {
        self.tables
            .read()
            .await
            .extensions
            .get(&(driver.to_string(), resource_id))
            .cloned()
    }

    /// Segments of every committed network.
    pub async fn live_segments(&self) -> Vec<NetworkSegment> {
        self.tables
            .read()
            .await
            .networks
            .values()
            .flat_map(|n| n.segments.iter().cloned())
            .collect()
    }
}

/// An open transaction. Dropping it without commit discards every staged write.
pub struct Transaction<'a> {
    store: &'a MemoryStore,
    handle: TransactionHandle,
    keys: Vec<LockKey>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        self.store.prune_locks(&self.keys);
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.handle.id())
            .field("locks", &self.keys)
            .finish()
    }
}

impl Transaction<'_> {
    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    /// Handle given to precommit hooks; shares this transaction's staging area.
    pub fn handle(&self) -> TransactionHandle {
        self.handle.clone()
    }

    pub async fn stage(&self, write: RowWrite) {
        self.handle.stage_row(write).await;
    }

    pub async fn network(&self, id: ResourceId) -> Option<Network> {
        for row in self.handle.staged_rows().await.into_iter().rev() {
            match row {
                RowWrite::PutNetwork(n) if n.id == id => return Some(n),
                RowWrite::DeleteNetwork(d) if d == id => return None,
                _ => {}
            }
        }
        self.store.network(id).await
    }

    pub async fn subnet(&self, id: ResourceId) -> Option<Subnet> {
        for row in self.handle.staged_rows().await.into_iter().rev() {
            match row {
                RowWrite::PutSubnet(s) if s.id == id => return Some(s),
                RowWrite::DeleteSubnet(d) if d == id => return None,
                _ => {}
            }
        }
        self.store.subnet(id).await
    }

    pub async fn port(&self, id: ResourceId) -> Option<Port> {
        for row in self.handle.staged_rows().await.into_iter().rev() {
            match row {
                RowWrite::PutPort(p) if p.id == id => return Some(p),
                RowWrite::DeletePort(d) if d == id => return None,
                _ => {}
            }
        }
        self.store.port(id).await
    }

    /// Applies every staged row and extension write atomically.
    ///
    /// On failure the staged writes are kept, so the commit can be retried.
    pub async fn commit(&self) -> Result<(), StoreError> {
        if self.store.take_fault() {
            return Err(StoreError::InjectedFault {
                txn: self.handle.id(),
            });
        }
        let mut tables = self.store.tables.write().await;
        let staged = self.handle.take_staged().await;
        let rows = staged.rows.len();
        tables.apply(staged);
        debug!("Transaction {} committed {} rows", self.handle.id(), rows);
        Ok(())
    }

    /// Discards the transaction.
    pub async fn rollback(self) {
        let discarded = self.handle.take_staged().await;
        debug!(
            "Transaction {} rolled back ({} rows discarded)",
            self.handle.id(),
            discarded.rows.len()
        );
    }
}
