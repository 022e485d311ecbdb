//! Per-operation lifecycle context and the transaction handle.

use ml2_types::{Network, NetworkSegment, Port, ResourceId, Subnet};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A row mutation staged inside an open transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum RowWrite {
    PutNetwork(Network),
    DeleteNetwork(ResourceId),
    PutSubnet(Subnet),
    DeleteSubnet(ResourceId),
    PutPort(Port),
    DeletePort(ResourceId),
}

/// Everything staged by one transaction; applied atomically on commit.
#[derive(Debug, Clone, Default)]
pub struct StagedWrites {
    pub rows: Vec<RowWrite>,
    /// (driver, resource) -> new extension value, `None` removes it.
    pub extensions: BTreeMap<(String, ResourceId), Option<Value>>,
}

impl StagedWrites {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.extensions.is_empty()
    }
}

/// Handle on an open transaction, passed to precommit hooks.
///
/// Cloning the handle shares the same staging area. Nothing staged here is
/// visible outside the transaction until the store commits it; a rollback
/// discards it all.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    id: u64,
    staged: Arc<Mutex<StagedWrites>>,
}

impl TransactionHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            staged: Arc::new(Mutex::new(StagedWrites::default())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stages driver-owned state for a resource.
    pub async fn stage_extension(&self, driver: &str, resource_id: ResourceId, value: Value) {
        self.staged
            .lock()
            .await
            .extensions
            .insert((driver.to_string(), resource_id), Some(value));
    }

    /// Stages removal of driver-owned state for a resource.
    pub async fn remove_extension(&self, driver: &str, resource_id: ResourceId) {
        self.staged
            .lock()
            .await
            .extensions
            .insert((driver.to_string(), resource_id), None);
    }

    /// Returns the extension value staged in this transaction, if any.
    pub async fn staged_extension(&self, driver: &str, resource_id: ResourceId) -> Option<Value> {
        self.staged
            .lock()
            .await
            .extensions
            .get(&(driver.to_string(), resource_id))
            .cloned()
            .flatten()
    }

    pub async fn stage_row(&self, write: RowWrite) {
        self.staged.lock().await.rows.push(write);
    }

    /// Returns a copy of the staged rows, in staging order.
    pub async fn staged_rows(&self) -> Vec<RowWrite> {
        self.staged.lock().await.rows.clone()
    }

    /// Drains the staging area.
    pub async fn take_staged(&self) -> StagedWrites {
        std::mem::take(&mut *self.staged.lock().await)
    }
}

/// State handed to every mechanism driver call of one operation.
///
/// Drivers must treat the context as a snapshot: unrelated resources may
/// have changed concurrently.
#[derive(Debug, Clone)]
pub struct LifecycleContext<R> {
    current: R,
    original: Option<R>,
    network: Option<Network>,
    txn: Option<TransactionHandle>,
}

pub type NetworkContext = LifecycleContext<Network>;
pub type SubnetContext = LifecycleContext<Subnet>;
pub type PortContext = LifecycleContext<Port>;

impl<R> LifecycleContext<R> {
    pub fn new(current: R) -> Self {
        Self {
            current,
            original: None,
            network: None,
            txn: None,
        }
    }

    /// Sets the state before an update (or the deleted state for a delete).
    pub fn with_original(mut self, original: R) -> Self {
        self.original = Some(original);
        self
    }

    /// Sets the parent network snapshot for subnet and port operations.
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_transaction(mut self, txn: TransactionHandle) -> Self {
        self.txn = Some(txn);
        self
    }

    pub fn current(&self) -> &R {
        &self.current
    }

    pub fn original(&self) -> Option<&R> {
        self.original.as_ref()
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    /// The open transaction; `None` during postcommit.
    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.txn.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Drops the transaction handle once the transaction has ended.
    pub fn detach_transaction(&mut self) -> Option<TransactionHandle> {
        self.txn.take()
    }
}

impl LifecycleContext<Network> {
    pub fn segments(&self) -> &[NetworkSegment] {
        &self.current.segments
    }
}

impl LifecycleContext<Port> {
    /// Segments of the parent network, empty if no snapshot was attached.
    pub fn segments(&self) -> &[NetworkSegment] {
        self.network.as_ref().map(|n| n.segments.as_slice()).unwrap_or(&[])
    }

    /// The segment the port is currently bound to.
    pub fn bound_segment(&self) -> Option<&NetworkSegment> {
        let index = self.current.binding.segment_index?;
        self.network.as_ref()?.segment(index)
    }

    /// Returns true if the host assignment changed relative to the original.
    pub fn host_changed(&self) -> bool {
        match &self.original {
            Some(orig) => orig.binding.host_id != self.current.binding.host_id,
            None => self.current.binding.host_id.is_some(),
        }
    }
}
