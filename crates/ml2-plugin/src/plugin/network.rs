//! Network lifecycle.

use super::{Dispatchable, Ml2Plugin, NetworkRequest, NetworkUpdate};
use crate::store::LockKey;
use ml2_driver_api::{Ml2Error, Ml2Result, NetworkContext, Operation, ResourceKind, RowWrite};
use ml2_types::{Network, ResourceId};
use tracing::{info, instrument, warn};

impl Ml2Plugin {
    /// Creates a network.
    ///
    /// Provider segments are validated and reserved in list order; an empty
    /// list allocates a tenant segment. Any failure before the commit
    /// releases every segment of the request.
    #[instrument(skip(self, request), fields(tenant = %request.tenant_id, name = %request.name))]
    pub async fn create_network(&self, request: NetworkRequest) -> Ml2Result<Network> {
        let allocating = self.allocations.read().await;
        let segments = self
            .type_manager
            .create_network_segments(&request.segments)
            .await?;
        let mut network = Network::new(request.tenant_id, request.name, segments);
        network.admin_state_up = request.admin_state_up;

        let committed = async {
            let txn = self.begin(vec![LockKey::network(network.id)]).await?;
            txn.stage(RowWrite::PutNetwork(network.clone())).await;
            self.precommit_and_commit(txn, Operation::Create, NetworkContext::new(network.clone()))
                .await
        }
        .await;
        let (ctx, txn_id) = match committed {
            Ok(committed) => committed,
            Err(e) => {
                self.type_manager
                    .release_network_segments(&network.segments)
                    .await;
                return Err(e);
            }
        };
        drop(allocating);

        if let Err(e) = self
            .mechanism_manager
            .postcommit(Operation::Create, ctx.event())
            .await
        {
            self.remove_dependants(network.id).await;
            let delete_ctx = NetworkContext::new(network.clone()).with_original(network.clone());
            let removed = self
                .compensate_create(
                    vec![LockKey::network(network.id)],
                    RowWrite::DeleteNetwork(network.id),
                    delete_ctx,
                    Some(network.id),
                    &e,
                )
                .await;
            if removed {
                self.type_manager
                    .release_network_segments(&network.segments)
                    .await;
                self.publish(ResourceKind::Network, Operation::Delete, network.id, &network);
            }
            return Err(e);
        }

        info!(
            "Created network {} with segments [{}]",
            network.id,
            network
                .segments
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.audit_success(Operation::Create, ResourceKind::Network, network.id, txn_id);
        self.publish(ResourceKind::Network, Operation::Create, network.id, &network);
        Ok(network)
    }

    /// Updates the name and/or admin state of a network.
    #[instrument(skip(self, update))]
    pub async fn update_network(&self, id: ResourceId, update: NetworkUpdate) -> Ml2Result<Network> {
        let txn = self.begin(vec![LockKey::network(id)]).await?;
        let original = txn
            .network(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Network, id))?;

        let mut network = original.clone();
        if let Some(name) = update.name {
            network.name = name;
        }
        if let Some(admin_state_up) = update.admin_state_up {
            network.admin_state_up = admin_state_up;
        }
        txn.stage(RowWrite::PutNetwork(network.clone())).await;

        let ctx = NetworkContext::new(network.clone()).with_original(original);
        let (ctx, txn_id) = self
            .precommit_and_commit(txn, Operation::Update, ctx)
            .await?;

        // committed state stays even if a backend could not apply it
        self.mechanism_manager
            .postcommit(Operation::Update, ctx.event())
            .await?;

        self.audit_success(Operation::Update, ResourceKind::Network, id, txn_id);
        self.publish(ResourceKind::Network, Operation::Update, id, &network);
        Ok(network)
    }

    /// Deletes a network and its subnets, then releases its segments.
    ///
    /// Fails with [`Ml2Error::NetworkInUse`] while ports reference it.
    #[instrument(skip(self))]
    pub async fn delete_network(&self, id: ResourceId) -> Ml2Result<()> {
        if self.store.network(id).await.is_none() {
            return Err(Ml2Error::not_found(ResourceKind::Network, id));
        }
        let ports = self.store.ports_on(id).await.len();
        if ports > 0 {
            return Err(Ml2Error::NetworkInUse { id, ports });
        }
        for subnet in self.store.subnets_on(id).await {
            match self.delete_subnet(subnet.id).await {
                Ok(()) | Err(Ml2Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let txn = self.begin(vec![LockKey::network(id)]).await?;
        let network = txn
            .network(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Network, id))?;
        // re-checked under the network lock; port creation takes it too
        let ports = self.store.ports_on(id).await.len();
        if ports > 0 {
            return Err(Ml2Error::NetworkInUse { id, ports });
        }
        if !self.store.subnets_on(id).await.is_empty() {
            return Err(Ml2Error::invalid_request(format!(
                "subnets were added to network {} while it was being deleted",
                id
            )));
        }
        txn.stage(RowWrite::DeleteNetwork(id)).await;

        let ctx = NetworkContext::new(network.clone()).with_original(network.clone());
        let (ctx, txn_id) = self
            .precommit_and_commit(txn, Operation::Delete, ctx)
            .await?;
        self.type_manager
            .release_network_segments(&network.segments)
            .await;

        if let Err(e) = self
            .mechanism_manager
            .postcommit(Operation::Delete, ctx.event())
            .await
        {
            warn!("Network {} deleted but a backend did not clean up: {}", id, e);
            return Err(e);
        }

        self.audit_success(Operation::Delete, ResourceKind::Network, id, txn_id);
        self.publish(ResourceKind::Network, Operation::Delete, id, &network);
        Ok(())
    }

    /// Deletes the ports and subnets attached to a network whose create is
    /// being undone. Each goes through its regular delete.
    async fn remove_dependants(&self, id: ResourceId) {
        for port in self.store.ports_on(id).await {
            match self.delete_port(port.id).await {
                Ok(()) | Err(Ml2Error::NotFound { .. }) => {}
                Err(e) => warn!("Port {} on network {} not removed: {}", port.id, id, e),
            }
        }
        for subnet in self.store.subnets_on(id).await {
            match self.delete_subnet(subnet.id).await {
                Ok(()) | Err(Ml2Error::NotFound { .. }) => {}
                Err(e) => warn!("Subnet {} on network {} not removed: {}", subnet.id, id, e),
            }
        }
    }

    pub async fn get_network(&self, id: ResourceId) -> Ml2Result<Network> {
        self.store
            .network(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Network, id))
    }

    pub async fn list_networks(&self) -> Vec<Network> {
        self.store.networks().await
    }
}
