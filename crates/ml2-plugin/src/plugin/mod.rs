//! The orchestration engine.
//!
//! [`Ml2Plugin`] drives every lifecycle operation through the same protocol:
//!
//! 1. segments are validated/allocated (network creation only)
//! 2. a transaction is opened and the row write staged
//! 3. every mechanism driver's precommit runs, in registration order
//! 4. the transaction commits
//! 5. every mechanism driver's postcommit runs, in registration order
//! 6. the notifier publishes the resulting state
//!
//! A precommit failure rolls everything back, including the segment
//! allocation. A postcommit failure leaves the committed state in place,
//! except for creates, which are undone by a compensating delete.

mod agent;
mod network;
mod port;
mod subnet;
mod types;

pub use types::{
    NetworkRequest, NetworkUpdate, PortRequest, PortUpdate, SubnetRequest, SubnetUpdate,
};

use crate::agents::AgentRegistry;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::binding::BindingCoordinator;
use crate::config::Ml2Config;
use crate::mechanism_manager::MechanismManager;
use crate::notifier::{Notification, Notifier};
use crate::registry::{DriverRegistry, FactoryContext};
use crate::store::{LockKey, MemoryStore, Transaction};
use crate::type_manager::TypeManager;
use ml2_driver_api::{
    LifecycleContext, LifecycleEvent, Ml2Error, Ml2Result, NetworkContext, Operation, PortContext,
    ResourceKind, RetryPolicy, RowWrite, SubnetContext,
};
use ml2_types::ResourceId;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

const SOURCE: &str = "Ml2Plugin";

/// A lifecycle context that can be routed to the mechanism drivers.
trait Dispatchable {
    fn event(&self) -> LifecycleEvent<'_>;
    fn resource_id(&self) -> ResourceId;
}

impl Dispatchable for NetworkContext {
    fn event(&self) -> LifecycleEvent<'_> {
        LifecycleEvent::from(self)
    }

    fn resource_id(&self) -> ResourceId {
        self.current().id
    }
}

impl Dispatchable for SubnetContext {
    fn event(&self) -> LifecycleEvent<'_> {
        LifecycleEvent::from(self)
    }

    fn resource_id(&self) -> ResourceId {
        self.current().id
    }
}

impl Dispatchable for PortContext {
    fn event(&self) -> LifecycleEvent<'_> {
        LifecycleEvent::from(self)
    }

    fn resource_id(&self) -> ResourceId {
        self.current().id
    }
}

/// The ML2 engine: type manager, mechanism manager, store and notifier.
pub struct Ml2Plugin {
    type_manager: TypeManager,
    mechanism_manager: MechanismManager,
    binding: BindingCoordinator,
    store: MemoryStore,
    notifier: Notifier,
    agents: Arc<AgentRegistry>,
    retry: RetryPolicy,
    /// Shared from segment allocation until the network commits; pool
    /// reconciliation takes it exclusively.
    allocations: RwLock<()>,
}

impl std::fmt::Debug for Ml2Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ml2Plugin")
            .field("type_manager", &self.type_manager)
            .field("mechanism_manager", &self.mechanism_manager)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Ml2Plugin {
    /// Assembles an engine from already-built parts.
    pub fn new(
        type_manager: TypeManager,
        mechanism_manager: MechanismManager,
        store: MemoryStore,
        agents: Arc<AgentRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        let binding = BindingCoordinator::new(mechanism_manager.drivers().to_vec());
        Self {
            type_manager,
            mechanism_manager,
            binding,
            store,
            notifier: Notifier::new(),
            agents,
            retry,
            allocations: RwLock::new(()),
        }
    }

    /// Builds an engine from configuration, resolving driver names through `registry`.
    pub fn from_config(config: Ml2Config, registry: &DriverRegistry) -> Ml2Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let agents = Arc::new(AgentRegistry::new(config.agent_down_time()));
        let ctx = FactoryContext {
            config: config.clone(),
            agents: agents.clone(),
        };
        let type_manager = registry.build_type_manager(&config)?;
        let mechanism_manager = registry.build_mechanism_manager(&ctx)?;
        Ok(Self::new(
            type_manager,
            mechanism_manager,
            MemoryStore::new(config.lock_timeout()),
            agents,
            config.retry_policy(),
        ))
    }

    /// Initializes all drivers and reconciles the id pools with the store.
    pub async fn initialize(&self) -> Ml2Result<()> {
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "initialize_start")
            .with_outcome(AuditOutcome::InProgress);
        audit_log!(record);

        self.type_manager.initialize().await?;
        self.mechanism_manager.initialize().await?;
        self.sync_allocations().await;

        let record = AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "initialize_end")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "type_drivers": self.type_manager.network_types(),
                "mechanism_drivers": self.mechanism_manager.names(),
            }));
        audit_log!(record);
        info!("ML2 engine initialized");
        Ok(())
    }

    pub fn type_manager(&self) -> &TypeManager {
        &self.type_manager
    }

    pub fn mechanism_manager(&self) -> &MechanismManager {
        &self.mechanism_manager
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    /// Subscribes to post-commit notifications.
    pub fn subscribe(&self, filter: Option<ResourceKind>) -> mpsc::UnboundedReceiver<Notification> {
        self.notifier.subscribe(filter)
    }

    async fn begin(&self, keys: Vec<LockKey>) -> Ml2Result<Transaction<'_>> {
        self.retry
            .run("begin_transaction", move || {
                let keys = keys.clone();
                async move { self.store.begin(keys).await.map_err(Ml2Error::from) }
            })
            .await
    }

    async fn commit(&self, txn: &Transaction<'_>) -> Ml2Result<()> {
        self.retry
            .run("commit_transaction", move || async move {
                txn.commit().await.map_err(Ml2Error::from)
            })
            .await
    }

    /// Runs the precommit phase inside `txn` and commits it.
    ///
    /// Returns the context with its transaction handle detached, ready for
    /// postcommit, and the id of the committed transaction.
    async fn precommit_and_commit<R>(
        &self,
        txn: Transaction<'_>,
        operation: Operation,
        ctx: LifecycleContext<R>,
    ) -> Ml2Result<(LifecycleContext<R>, u64)>
    where
        LifecycleContext<R>: Dispatchable,
    {
        let mut ctx = ctx.with_transaction(txn.handle());
        if let Err(e) = self.mechanism_manager.precommit(operation, ctx.event()).await {
            txn.rollback().await;
            return Err(e);
        }
        self.commit(&txn).await?;
        let txn_id = txn.id();
        drop(txn);
        ctx.detach_transaction();
        Ok((ctx, txn_id))
    }

    /// Undoes a committed create whose postcommit failed.
    ///
    /// Delete hooks run on every driver; a driver refusing the delete is
    /// logged but cannot keep the resource alive. With `dependants_of` set,
    /// the delete is abandoned if ports or subnets of that network remain
    /// once its lock is held. Returns false if the row was not removed.
    async fn compensate_create<R>(
        &self,
        keys: Vec<LockKey>,
        row: RowWrite,
        ctx: LifecycleContext<R>,
        dependants_of: Option<ResourceId>,
        cause: &Ml2Error,
    ) -> bool
    where
        LifecycleContext<R>: Dispatchable,
    {
        let kind = ctx.event().resource_kind();
        let id = ctx.resource_id();
        let record = AuditRecord::new(AuditCategory::Compensation, SOURCE, format!("delete_{}", kind))
            .with_outcome(AuditOutcome::InProgress)
            .with_object_id(id.to_string())
            .with_object_type(kind.as_str())
            .with_details(serde_json::json!({ "cause": cause.to_string() }));
        audit_log!(record);

        let txn = match self.begin(keys).await {
            Ok(txn) => txn,
            Err(e) => {
                error!("Compensating delete of {} {} failed to start: {}", kind, id, e);
                return false;
            }
        };
        if let Some(network_id) = dependants_of {
            let ports = self.store.ports_on(network_id).await.len();
            let subnets = self.store.subnets_on(network_id).await.len();
            if ports + subnets > 0 {
                error!(
                    "Keeping network {} after failed create: {} ports and {} subnets still reference it",
                    network_id, ports, subnets
                );
                let record = AuditRecord::new(AuditCategory::Compensation, SOURCE, format!("delete_{}", kind))
                    .with_object_id(id.to_string())
                    .with_object_type(kind.as_str())
                    .with_correlation_id(txn.id().to_string())
                    .with_error(format!("{} ports and {} subnets attached", ports, subnets));
                audit_log!(record);
                txn.rollback().await;
                return false;
            }
        }
        txn.stage(row).await;

        let mut ctx = ctx.with_transaction(txn.handle());
        if let Err(e) = self.mechanism_manager.precommit(Operation::Delete, ctx.event()).await {
            warn!("Ignoring {} during compensating delete of {} {}", e, kind, id);
        }
        if let Err(e) = self.commit(&txn).await {
            error!("Compensating delete of {} {} failed to commit: {}", kind, id, e);
            let record = AuditRecord::new(AuditCategory::Compensation, SOURCE, format!("delete_{}", kind))
                .with_object_id(id.to_string())
                .with_object_type(kind.as_str())
                .with_correlation_id(txn.id().to_string())
                .with_error(e.to_string());
            audit_log!(record);
            return false;
        }
        let txn_id = txn.id();
        drop(txn);
        ctx.detach_transaction();

        if let Err(e) = self.mechanism_manager.postcommit(Operation::Delete, ctx.event()).await {
            warn!("Compensating delete of {} {}: {}", kind, id, e);
        }

        let record = AuditRecord::new(AuditCategory::Compensation, SOURCE, format!("delete_{}", kind))
            .with_outcome(AuditOutcome::Success)
            .with_object_id(id.to_string())
            .with_object_type(kind.as_str())
            .with_correlation_id(txn_id.to_string());
        audit_log!(record);
        true
    }

    fn publish<T: Serialize>(
        &self,
        kind: ResourceKind,
        operation: Operation,
        id: ResourceId,
        state: &T,
    ) {
        let state = serde_json::to_value(state).unwrap_or(Value::Null);
        self.notifier.publish(kind, operation, id, state);
    }

    fn audit_success(&self, operation: Operation, kind: ResourceKind, id: ResourceId, txn_id: u64) {
        audit_log!(success_record(operation, kind, id, txn_id));
    }
}

fn success_record(operation: Operation, kind: ResourceKind, id: ResourceId, txn_id: u64) -> AuditRecord {
    let category = match operation {
        Operation::Create => AuditCategory::ResourceCreate,
        Operation::Update => AuditCategory::ResourceModify,
        Operation::Delete => AuditCategory::ResourceDelete,
    };
    AuditRecord::new(category, SOURCE, format!("{}_{}", operation, kind))
        .with_outcome(AuditOutcome::Success)
        .with_object_id(id.to_string())
        .with_object_type(kind.as_str())
        .with_correlation_id(txn_id.to_string())
}
