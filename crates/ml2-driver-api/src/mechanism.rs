//! Mechanism driver contract.

use crate::{DriverResult, NetworkContext, PortContext, SubnetContext};
use async_trait::async_trait;
use ml2_types::{NetworkSegment, Port, VifType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of resource an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Network,
    Subnet,
    Port,
}

impl ResourceKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Port => "port",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch phase relative to the transaction commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Precommit,
    Postcommit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Precommit => f.write_str("precommit"),
            Phase::Postcommit => f.write_str("postcommit"),
        }
    }
}

/// Input to [`MechanismDriver::bind_port`].
#[derive(Debug, Clone, Copy)]
pub struct BindingRequest<'a> {
    pub port: &'a Port,
    pub host_id: &'a str,
    /// Candidate segments of the port's network, in segment order.
    pub segments: &'a [NetworkSegment],
}

/// A driver's claim on a port binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingResult {
    pub vif_type: VifType,
    pub vif_details: BTreeMap<String, String>,
    pub segment_index: usize,
}

impl BindingResult {
    pub fn new(vif_type: VifType, segment_index: usize) -> Self {
        Self {
            vif_type,
            vif_details: BTreeMap::new(),
            segment_index,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vif_details.insert(key.into(), value.into());
        self
    }
}

/// A mechanism driver realizes networks and ports on devices or controllers.
///
/// Every hook has a no-op default so a driver only implements what it
/// cares about. Precommit hooks run inside the resource's transaction and
/// may stage state through [`LifecycleContext::transaction`]; an error
/// rolls the whole operation back. Postcommit hooks run after the commit
/// and are the place for calls into external systems.
///
/// [`LifecycleContext::transaction`]: crate::LifecycleContext::transaction
#[async_trait]
pub trait MechanismDriver: Send + Sync {
    /// Returns the driver name (for logging and error attribution).
    fn name(&self) -> &str;

    /// Called once after all drivers are registered.
    async fn initialize(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn create_network_precommit(&self, _ctx: &NetworkContext) -> DriverResult<()> {
        Ok(())
    }

    async fn create_network_postcommit(&self, _ctx: &NetworkContext) -> DriverResult<()> {
        Ok(())
    }

    async fn update_network_precommit(&self, _ctx: &NetworkContext) -> DriverResult<()> {
        Ok(())
    }

    async fn update_network_postcommit(&self, _ctx: &NetworkContext) -> DriverResult<()> {
        Ok(())
    }

    async fn delete_network_precommit(&self, _ctx: &NetworkContext) -> DriverResult<()> {
        Ok(())
    }

    async fn delete_network_postcommit(&self, _ctx: &NetworkContext) -> DriverResult<()> {
        Ok(())
    }

    async fn create_subnet_precommit(&self, _ctx: &SubnetContext) -> DriverResult<()> {
        Ok(())
    }

    async fn create_subnet_postcommit(&self, _ctx: &SubnetContext) -> DriverResult<()> {
        Ok(())
    }

    async fn update_subnet_precommit(&self, _ctx: &SubnetContext) -> DriverResult<()> {
        Ok(())
    }

    async fn update_subnet_postcommit(&self, _ctx: &SubnetContext) -> DriverResult<()> {
        Ok(())
    }

    async fn delete_subnet_precommit(&self, _ctx: &SubnetContext) -> DriverResult<()> {
        Ok(())
    }

    async fn delete_subnet_postcommit(&self, _ctx: &SubnetContext) -> DriverResult<()> {
        Ok(())
    }

    async fn create_port_precommit(&self, _ctx: &PortContext) -> DriverResult<()> {
        Ok(())
    }

    async fn create_port_postcommit(&self, _ctx: &PortContext) -> DriverResult<()> {
        Ok(())
    }

    async fn update_port_precommit(&self, _ctx: &PortContext) -> DriverResult<()> {
        Ok(())
    }

    async fn update_port_postcommit(&self, _ctx: &PortContext) -> DriverResult<()> {
        Ok(())
    }

    async fn delete_port_precommit(&self, _ctx: &PortContext) -> DriverResult<()> {
        Ok(())
    }

    async fn delete_port_postcommit(&self, _ctx: &PortContext) -> DriverResult<()> {
        Ok(())
    }

    /// Attempts to bind `request.port` on `request.host_id`.
    ///
    /// Returns `None` if this driver does not claim the host.
    async fn bind_port(&self, _request: BindingRequest<'_>) -> Option<BindingResult> {
        None
    }
}

/// A lifecycle event for one resource, routed to the matching driver hook.
#[derive(Debug, Clone, Copy)]
pub enum LifecycleEvent<'a> {
    Network(&'a NetworkContext),
    Subnet(&'a SubnetContext),
    Port(&'a PortContext),
}

impl<'a> From<&'a NetworkContext> for LifecycleEvent<'a> {
    fn from(ctx: &'a NetworkContext) -> Self {
        LifecycleEvent::Network(ctx)
    }
}

impl<'a> From<&'a SubnetContext> for LifecycleEvent<'a> {
    fn from(ctx: &'a SubnetContext) -> Self {
        LifecycleEvent::Subnet(ctx)
    }
}

impl<'a> From<&'a PortContext> for LifecycleEvent<'a> {
    fn from(ctx: &'a PortContext) -> Self {
        LifecycleEvent::Port(ctx)
    }
}

impl LifecycleEvent<'_> {
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            LifecycleEvent::Network(_) => ResourceKind::Network,
            LifecycleEvent::Subnet(_) => ResourceKind::Subnet,
            LifecycleEvent::Port(_) => ResourceKind::Port,
        }
    }

    /// Invokes `{operation}_{resource}_{phase}` on `driver`.
    pub async fn deliver(
        &self,
        driver: &dyn MechanismDriver,
        operation: Operation,
        phase: Phase,
    ) -> DriverResult<()> {
        use Operation::*;
        use Phase::*;

        match (*self, operation, phase) {
            (LifecycleEvent::Network(c), Create, Precommit) => driver.create_network_precommit(c).await,
            (LifecycleEvent::Network(c), Create, Postcommit) => driver.create_network_postcommit(c).await,
            (LifecycleEvent::Network(c), Update, Precommit) => driver.update_network_precommit(c).await,
            (LifecycleEvent::Network(c), Update, Postcommit) => driver.update_network_postcommit(c).await,
            (LifecycleEvent::Network(c), Delete, Precommit) => driver.delete_network_precommit(c).await,
            (LifecycleEvent::Network(c), Delete, Postcommit) => driver.delete_network_postcommit(c).await,
            (LifecycleEvent::Subnet(c), Create, Precommit) => driver.create_subnet_precommit(c).await,
            (LifecycleEvent::Subnet(c), Create, Postcommit) => driver.create_subnet_postcommit(c).await,
            (LifecycleEvent::Subnet(c), Update, Precommit) => driver.update_subnet_precommit(c).await,
            (LifecycleEvent::Subnet(c), Update, Postcommit) => driver.update_subnet_postcommit(c).await,
            (LifecycleEvent::Subnet(c), Delete, Precommit) => driver.delete_subnet_precommit(c).await,
            (LifecycleEvent::Subnet(c), Delete, Postcommit) => driver.delete_subnet_postcommit(c).await,
            (LifecycleEvent::Port(c), Create, Precommit) => driver.create_port_precommit(c).await,
            (LifecycleEvent::Port(c), Create, Postcommit) => driver.create_port_postcommit(c).await,
            (LifecycleEvent::Port(c), Update, Precommit) => driver.update_port_precommit(c).await,
            (LifecycleEvent::Port(c), Update, Postcommit) => driver.update_port_postcommit(c).await,
            (LifecycleEvent::Port(c), Delete, Precommit) => driver.delete_port_precommit(c).await,
            (LifecycleEvent::Port(c), Delete, Postcommit) => driver.delete_port_postcommit(c).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DriverError;
    use ml2_types::Network;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopDriver;

    #[async_trait]
    impl MechanismDriver for NoopDriver {
        fn name(&self) -> &str {
            "noop"
        }
    }

    struct RejectUpdates {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MechanismDriver for RejectUpdates {
        fn name(&self) -> &str {
            "reject-updates"
        }

        async fn update_network_precommit(&self, _ctx: &NetworkContext) -> DriverResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DriverError::rejected("read-only"))
        }
    }

    #[tokio::test]
    async fn test_defaults_are_noops() {
        let ctx = NetworkContext::new(Network::new("t", "n", vec![]));
        let event = LifecycleEvent::Network(&ctx);
        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            for phase in [Phase::Precommit, Phase::Postcommit] {
                assert!(event.deliver(&NoopDriver, op, phase).await.is_ok());
            }
        }
    }

    #[tokio::test]
    async fn test_deliver_routes_to_matching_hook() {
        let driver = RejectUpdates {
            calls: AtomicUsize::new(0),
        };
        let ctx = NetworkContext::new(Network::new("t", "n", vec![]));
        let event = LifecycleEvent::Network(&ctx);

        assert!(event.deliver(&driver, Operation::Create, Phase::Precommit).await.is_ok());
        assert!(event.deliver(&driver, Operation::Update, Phase::Postcommit).await.is_ok());
        assert_eq!(
            event.deliver(&driver, Operation::Update, Phase::Precommit).await,
            Err(DriverError::rejected("read-only"))
        );
        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(event.resource_kind(), ResourceKind::Network);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Operation::Delete.to_string(), "delete");
        assert_eq!(ResourceKind::Subnet.to_string(), "subnet");
        assert_eq!(Phase::Postcommit.to_string(), "postcommit");
    }
}
