//! Logger mechanism driver: logs every lifecycle call and binds nothing.

use async_trait::async_trait;
use ml2_driver_api::{
    BindingRequest, BindingResult, DriverResult, MechanismDriver, NetworkContext, Operation, Phase,
    PortContext, ResourceKind, SubnetContext,
};
use ml2_types::ResourceId;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub const LOGGER_DRIVER: &str = "logger";

#[derive(Debug, Default)]
pub struct LoggerMechanismDriver {
    calls: AtomicU64,
}

impl LoggerMechanismDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lifecycle calls seen so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn log(&self, op: Operation, kind: ResourceKind, phase: Phase, id: ResourceId, in_txn: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        info!(
            driver = LOGGER_DRIVER,
            resource_id = %id,
            in_transaction = in_txn,
            "{}_{}_{} called",
            op,
            kind,
            phase
        );
    }

    fn network(&self, op: Operation, phase: Phase, ctx: &NetworkContext) -> DriverResult<()> {
        self.log(op, ResourceKind::Network, phase, ctx.current().id, ctx.in_transaction());
        Ok(())
    }

    fn subnet(&self, op: Operation, phase: Phase, ctx: &SubnetContext) -> DriverResult<()> {
        self.log(op, ResourceKind::Subnet, phase, ctx.current().id, ctx.in_transaction());
        Ok(())
    }

    fn port(&self, op: Operation, phase: Phase, ctx: &PortContext) -> DriverResult<()> {
        self.log(op, ResourceKind::Port, phase, ctx.current().id, ctx.in_transaction());
        Ok(())
    }
}

#[async_trait]
impl MechanismDriver for LoggerMechanismDriver {
    fn name(&self) -> &str {
        LOGGER_DRIVER
    }

    async fn initialize(&self) -> DriverResult<()> {
        info!("Logger mechanism driver initialized");
        Ok(())
    }

    async fn create_network_precommit(&self, ctx: &NetworkContext) -> DriverResult<()> {
        self.network(Operation::Create, Phase::Precommit, ctx)
    }

    async fn create_network_postcommit(&self, ctx: &NetworkContext) -> DriverResult<()> {
        self.network(Operation::Create, Phase::Postcommit, ctx)
    }

    async fn update_network_precommit(&self, ctx: &NetworkContext) -> DriverResult<()> {
        self.network(Operation::Update, Phase::Precommit, ctx)
    }

    async fn update_network_postcommit(&self, ctx: &NetworkContext) -> DriverResult<()> {
        self.network(Operation::Update, Phase::Postcommit, ctx)
    }

    async fn delete_network_precommit(&self, ctx: &NetworkContext) -> DriverResult<()> {
        self.network(Operation::Delete, Phase::Precommit, ctx)
    }

    async fn delete_network_postcommit(&self, ctx: &NetworkContext) -> DriverResult<()> {
        self.network(Operation::Delete, Phase::Postcommit, ctx)
    }

    async fn create_subnet_precommit(&self, ctx: &SubnetContext) -> DriverResult<()> {
        self.subnet(Operation::Create, Phase::Precommit, ctx)
    }

    async fn create_subnet_postcommit(&self, ctx: &SubnetContext) -> DriverResult<()> {
        self.subnet(Operation::Create, Phase::Postcommit, ctx)
    }

    async fn update_subnet_precommit(&self, ctx: &SubnetContext) -> DriverResult<()> {
        self.subnet(Operation::Update, Phase::Precommit, ctx)
    }

    async fn update_subnet_postcommit(&self, ctx: &SubnetContext) -> DriverResult<()> {
        self.subnet(Operation::Update, Phase::Postcommit, ctx)
    }

    async fn delete_subnet_precommit(&self, ctx: &SubnetContext) -> DriverResult<()> {
        self.subnet(Operation::Delete, Phase::Precommit, ctx)
    }

    async fn delete_subnet_postcommit(&self, ctx: &SubnetContext) -> DriverResult<()> {
        self.subnet(Operation::Delete, Phase::Postcommit, ctx)
    }

    async fn create_port_precommit(&self, ctx: &PortContext) -> DriverResult<()> {
        self.port(Operation::Create, Phase::Precommit, ctx)
    }

    async fn create_port_postcommit(&self, ctx: &PortContext) -> DriverResult<()> {
        self.port(Operation::Create, Phase::Postcommit, ctx)
    }

    async fn update_port_precommit(&self, ctx: &PortContext) -> DriverResult<()> {
        self.port(Operation::Update, Phase::Precommit, ctx)
    }

    async fn update_port_postcommit(&self, ctx: &PortContext) -> DriverResult<()> {
        self.port(Operation::Update, Phase::Postcommit, ctx)
    }

    async fn delete_port_precommit(&self, ctx: &PortContext) -> DriverResult<()> {
        self.port(Operation::Delete, Phase::Precommit, ctx)
    }

    async fn delete_port_postcommit(&self, ctx: &PortContext) -> DriverResult<()> {
        self.port(Operation::Delete, Phase::Postcommit, ctx)
    }

    async fn bind_port(&self, request: BindingRequest<'_>) -> Option<BindingResult> {
        info!(
            driver = LOGGER_DRIVER,
            port_id = %request.port.id,
            host_id = request.host_id,
            segments = request.segments.len(),
            "bind_port called"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml2_driver_api::LifecycleEvent;
    use ml2_types::{Network, Port};

    #[tokio::test]
    async fn test_every_hook_succeeds() {
        let driver = LoggerMechanismDriver::new();
        let net = Network::new("t", "n", vec![]);
        let net_ctx = NetworkContext::new(net.clone());
        let port_ctx = PortContext::new(Port::new(net.id, "t", "p"));

        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            for phase in [Phase::Precommit, Phase::Postcommit] {
                LifecycleEvent::Network(&net_ctx).deliver(&driver, op, phase).await.unwrap();
                LifecycleEvent::Port(&port_ctx).deliver(&driver, op, phase).await.unwrap();
            }
        }
        assert_eq!(driver.calls(), 12);
    }

    #[tokio::test]
    async fn test_never_binds() {
        let driver = LoggerMechanismDriver::new();
        let port = Port::new(ResourceId::new_v4(), "t", "p");
        let request = BindingRequest {
            port: &port,
            host_id: "compute-1",
            segments: &[],
        };
        assert!(driver.bind_port(request).await.is_none());
    }
}
