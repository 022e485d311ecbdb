//! Subnet lifecycle.

use super::{Dispatchable, Ml2Plugin, SubnetRequest, SubnetUpdate};
use crate::store::LockKey;
use ml2_driver_api::{Ml2Error, Ml2Result, Operation, ResourceKind, RowWrite, SubnetContext};
use ml2_types::{ResourceId, Subnet};
use std::net::IpAddr;
use tracing::{info, instrument, warn};

fn check_gateway(subnet: &Subnet, gateway: Option<IpAddr>) -> Ml2Result<()> {
    match gateway {
        Some(ip) if !subnet.cidr.same_family(&ip) => {
            Err(Ml2Error::invalid_request(format!(
                "gateway {} does not match IPv{} subnet {}",
                ip, subnet.ip_version, subnet.cidr
            )))
        }
        _ => Ok(()),
    }
}

impl Ml2Plugin {
    #[instrument(skip(self, request), fields(network_id = %request.network_id, cidr = %request.cidr))]
    pub async fn create_subnet(&self, request: SubnetRequest) -> Ml2Result<Subnet> {
        let mut subnet = Subnet::new(
            request.network_id,
            request.tenant_id,
            request.name,
            request.cidr,
        );
        check_gateway(&subnet, request.gateway_ip)?;
        subnet.gateway_ip = request.gateway_ip;
        subnet.enable_dhcp = request.enable_dhcp;

        let keys = vec![LockKey::network(subnet.network_id), LockKey::subnet(subnet.id)];
        let txn = self.begin(keys.clone()).await?;
        let network = txn
            .network(subnet.network_id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Network, subnet.network_id))?;
        txn.stage(RowWrite::PutSubnet(subnet.clone())).await;

        let ctx = SubnetContext::new(subnet.clone()).with_network(network.clone());
        let (ctx, txn_id) = self
            .precommit_and_commit(txn, Operation::Create, ctx)
            .await?;

        if let Err(e) = self
            .mechanism_manager
            .postcommit(Operation::Create, ctx.event())
            .await
        {
            let delete_ctx = SubnetContext::new(subnet.clone())
                .with_original(subnet.clone())
                .with_network(network);
            if self
                .compensate_create(keys, RowWrite::DeleteSubnet(subnet.id), delete_ctx, None, &e)
                .await
            {
                self.publish(ResourceKind::Subnet, Operation::Delete, subnet.id, &subnet);
            }
            return Err(e);
        }

        info!("Created subnet {} ({}) on network {}", subnet.id, subnet.cidr, subnet.network_id);
        self.audit_success(Operation::Create, ResourceKind::Subnet, subnet.id, txn_id);
        self.publish(ResourceKind::Subnet, Operation::Create, subnet.id, &subnet);
        Ok(subnet)
    }

    #[instrument(skip(self, update))]
    pub async fn update_subnet(&self, id: ResourceId, update: SubnetUpdate) -> Ml2Result<Subnet> {
        let current = self.get_subnet(id).await?;
        let txn = self
            .begin(vec![LockKey::network(current.network_id), LockKey::subnet(id)])
            .await?;
        let original = txn
            .subnet(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Subnet, id))?;
        let network = txn
            .network(original.network_id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Network, original.network_id))?;

        let mut subnet = original.clone();
        if let Some(name) = update.name {
            subnet.name = name;
        }
        if let Some(gateway_ip) = update.gateway_ip {
            check_gateway(&subnet, gateway_ip)?;
            subnet.gateway_ip = gateway_ip;
        }
        if let Some(enable_dhcp) = update.enable_dhcp {
            subnet.enable_dhcp = enable_dhcp;
        }
        txn.stage(RowWrite::PutSubnet(subnet.clone())).await;

        let ctx = SubnetContext::new(subnet.clone())
            .with_original(original)
            .with_network(network);
        let (ctx, txn_id) = self
            .precommit_and_commit(txn, Operation::Update, ctx)
            .await?;
        self.mechanism_manager
            .postcommit(Operation::Update, ctx.event())
            .await?;

        self.audit_success(Operation::Update, ResourceKind::Subnet, id, txn_id);
        self.publish(ResourceKind::Subnet, Operation::Update, id, &subnet);
        Ok(subnet)
    }

    #[instrument(skip(self))]
    pub async fn delete_subnet(&self, id: ResourceId) -> Ml2Result<()> {
        let current = self.get_subnet(id).await?;
        let txn = self
            .begin(vec![LockKey::network(current.network_id), LockKey::subnet(id)])
            .await?;
        let subnet = txn
            .subnet(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Subnet, id))?;
        txn.stage(RowWrite::DeleteSubnet(id)).await;

        let mut ctx = SubnetContext::new(subnet.clone()).with_original(subnet.clone());
        if let Some(network) = txn.network(subnet.network_id).await {
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
            warn!("Subnet {} deleted but a backend did not clean up: {}", id, e);
            return Err(e);
        }

        self.audit_success(Operation::Delete, ResourceKind::Subnet, id, txn_id);
        self.publish(ResourceKind::Subnet, Operation::Delete, id, &subnet);
        Ok(())
    }

    pub async fn get_subnet(&self, id: ResourceId) -> Ml2Result<Subnet> {
        self.store
            .subnet(id)
            .await
            .ok_or_else(|| Ml2Error::not_found(ResourceKind::Subnet, id))
    }

    pub async fn list_subnets(&self, network_id: ResourceId) -> Vec<Subnet> {
        self.store.subnets_on(network_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_gateway() {
        let subnet = Subnet::new(ResourceId::new_v4(), "t", "s", "10.0.0.0/24".parse().unwrap());
        assert!(check_gateway(&subnet, None).is_ok());
        assert!(check_gateway(&subnet, Some("10.0.0.1".parse().unwrap())).is_ok());
        assert!(check_gateway(&subnet, Some("fe80::1".parse().unwrap())).is_err());
    }
}
