//! Port lifecycle and binding.

use super::{Dispatchable, Ml2Plugin, PortRequest, PortUpdate};
use crate::store::LockKey;
use ml2_driver_api::{Ml2Error, Ml2Result, Operation, PortContext, ResourceKind, RowWrite};
use ml2_types::{Port, ResourceId};
use tracing::{info, instrument, warn};

impl Ml2Plugin {
    /// Creates a port, binding it first when a host is given.
    #[instrument(skip(self, request), fields(network_id = %request.network_id, host = ?request.host_id))]
    pub async fn create_port(&self, request: PortRequest) -> Ml2Result<Port> {
        let network = self.get_network(request.network_id).await?;

        let mut port = Port::new(network.id, request.tenant_id, request.name);
        if let Some(mac) = request.mac_address {
            port.mac_address = mac;
        }
        port.device_owner = request.device_owner;
        port.device_id = request.device_id;
        port.admin_state_up = request.admin_state_up;
        port.binding = self
            .binding
            .resolve_binding(&port, request.host_id.as_deref(), &network.segments)
            .await
            .into_binding();

        let keys = vec![LockKey::network(network.id), LockKey::port(port.id)];
        let txn = self.begin(keys.clone()).await?;
        let network = txn
            .network(network.id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Network, network.id))?;
        txn.stage(RowWrite::PutPort(port.clone())).await;

        let ctx = PortContext::new(port.clone()).with_network(network.clone());
        let (ctx, txn_id) = self
            .precommit_and_commit(txn, Operation::Create, ctx)
            .await?;

        if let Err(e) = self
            .mechanism_manager
            .postcommit(Operation::Create, ctx.event())
            .await
        {
            let delete_ctx = PortContext::new(port.clone())
                .with_original(port.clone())
                .with_network(network);
            if self
                .compensate_create(keys, RowWrite::DeletePort(port.id), delete_ctx, None, &e)
                .await
            {
                self.publish(ResourceKind::Port, Operation::Delete, port.id, &port);
            }
            return Err(e);
        }

        info!(
            "Created port {} on network {} (vif_type={})",
            port.id, port.network_id, port.binding.vif_type
        );
        self.audit_success(Operation::Create, ResourceKind::Port, port.id, txn_id);
        self.publish(ResourceKind::Port, Operation::Create, port.id, &port);
        Ok(port)
    }

    /// Updates a port. A changed host triggers binding resolution before the
    /// update transaction; the resulting binding is persisted with the update.
    #[instrument(skip(self, update))]
    pub async fn update_port(&self, id: ResourceId, update: PortUpdate) -> Ml2Result<Port> {
        self.apply_port_update(id, update, false).await
    }

    /// Re-runs binding resolution for a port on `host_id`.
    #[instrument(skip(self))]
    pub async fn bind_port(&self, id: ResourceId, host_id: &str) -> Ml2Result<Port> {
        self.apply_port_update(id, PortUpdate::host(host_id), true).await
    }

    async fn apply_port_update(
        &self,
        id: ResourceId,
        update: PortUpdate,
        force_rebind: bool,
    ) -> Ml2Result<Port> {
        let current = self.get_port(id).await?;
        let network = self.get_network(current.network_id).await?;

        let host = match &update.host_id {
            Some(host) => host.clone(),
            None => current.binding.host_id.clone(),
        };
        let binding = if force_rebind || host != current.binding.host_id {
            let outcome = self
                .binding
                .resolve_binding(&current, host.as_deref(), &network.segments)
                .await;
            Some(outcome.into_binding())
        } else {
            None
        };

        let txn = self
            .begin(vec![LockKey::network(network.id), LockKey::port(id)])
            .await?;
        let original = txn
            .port(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Port, id))?;
        let network = txn
            .network(original.network_id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Network, original.network_id))?;

        let mut port = original.clone();
        if let Some(name) = update.name {
            port.name = name;
        }
        if let Some(admin_state_up) = update.admin_state_up {
            port.admin_state_up = admin_state_up;
        }
        if let Some(device_owner) = update.device_owner {
            port.device_owner = device_owner;
        }
        if let Some(device_id) = update.device_id {
            port.device_id = device_id;
        }
        if let Some(binding) = binding {
            port.binding = binding;
        }
        txn.stage(RowWrite::PutPort(port.clone())).await;

        let ctx = PortContext::new(port.clone())
            .with_original(original)
            .with_network(network);
        let (ctx, txn_id) = self
            .precommit_and_commit(txn, Operation::Update, ctx)
            .await?;
        self.mechanism_manager
            .postcommit(Operation::Update, ctx.event())
            .await?;

        self.audit_success(Operation::Update, ResourceKind::Port, id, txn_id);
        self.publish(ResourceKind::Port, Operation::Update, id, &port);
        Ok(port)
    }

    #[instrument(skip(self))]
    pub async fn delete_port(&self, id: ResourceId) -> Ml2Result<()> {
        let current = self.get_port(id).await?;
        let txn = self
            .begin(vec![LockKey::network(current.network_id), LockKey::port(id)])
            .await?;
        let port = txn
            .port(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Port, id))?;
        txn.stage(RowWrite::DeletePort(id)).await;

        let mut ctx = PortContext::new(port.clone()).with_original(port.clone());
        if let Some(network) = txn.network(port.network_id).await {
            ctx = ctx.with_network(network);
        }
        let (ctx, txn_id) = self
            .precommit_and_commit(txn, Operation::Delete, ctx)
            .await?;

        if let Err(e) = self
            .mechanism_manager
            .postcommit(Operation::Delete, ctx.event())
            .await
        {
            warn!("Port {} deleted but a backend did not clean up: {}", id, e);
            return Err(e);
        }

        self.audit_success(Operation::Delete, ResourceKind::Port, id, txn_id);
        self.publish(ResourceKind::Port, Operation::Delete, id, &port);
        Ok(())
    }

    pub async fn get_port(&self, id: ResourceId) -> Ml2Result<Port> {
        self.store
            .port(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Port, id))
    }

    pub async fn list_ports(&self, network_id: ResourceId) -> Vec<Port> {
        self.store.ports_on(network_id).await
    }
}

