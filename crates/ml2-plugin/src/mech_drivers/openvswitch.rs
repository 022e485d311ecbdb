//! Open vSwitch mechanism driver: agent-based port binding.
//!
//! A port is bound on a host when that host runs a live Open vSwitch agent
//! able to reach one of the network's segments: a bridge mapping for the
//! segment's physical network (flat, vlan), the segment's tunnel type
//! (gre, vxlan), or any local segment.

use crate::agents::{AgentRegistry, AgentState, OVS_AGENT_TYPE};
use async_trait::async_trait;
use ml2_driver_api::{BindingRequest, BindingResult, DriverResult, MechanismDriver, PortContext};
use ml2_types::{NetworkSegment, NetworkType, VifType};
use std::sync::Arc;
use tracing::{debug, info};

pub const OPENVSWITCH_DRIVER: &str = "openvswitch";

/// Integration bridge every OVS port is plugged into.
pub const INTEGRATION_BRIDGE: &str = "br-int";

#[derive(Debug)]
pub struct OpenvswitchMechanismDriver {
    agents: Arc<AgentRegistry>,
}

impl OpenvswitchMechanismDriver {
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self { agents }
    }

    fn can_reach(agent: &AgentState, segment: &NetworkSegment) -> bool {
        match segment.network_type {
            NetworkType::Local => true,
            NetworkType::Flat | NetworkType::Vlan => segment
                .physical_network
                .as_ref()
                .is_some_and(|p| agent.bridge_mappings.contains_key(p)),
            NetworkType::Gre | NetworkType::Vxlan => {
                agent.tunnel_types.contains(&segment.network_type)
            }
        }
    }
}

#[async_trait]
impl MechanismDriver for OpenvswitchMechanismDriver {
    fn name(&self) -> &str {
        OPENVSWITCH_DRIVER
    }

    async fn initialize(&self) -> DriverResult<()> {
        info!(
            "Open vSwitch mechanism driver initialized, {} agent(s) known",
            self.agents.list().len()
        );
        Ok(())
    }

    async fn update_port_postcommit(&self, ctx: &PortContext) -> DriverResult<()> {
        if ctx.host_changed() {
            debug!(
                "Port {} moved to {:?} (vif_type={})",
                ctx.current().id,
                ctx.current().binding.host_id,
                ctx.current().binding.vif_type
            );
        }
        Ok(())
    }

    async fn bind_port(&self, request: BindingRequest<'_>) -> Option<BindingResult> {
        let Some(agent) = self.agents.alive(request.host_id, OVS_AGENT_TYPE) else {
            debug!("No live Open vSwitch agent on {}", request.host_id);
            return None;
        };

        let segment = request
            .segments
            .iter()
            .find(|segment| Self::can_reach(&agent, segment))?;

        let mut result = BindingResult::new(VifType::Ovs, segment.segment_index)
            .with_detail("bridge_name", INTEGRATION_BRIDGE)
            .with_detail("port_filter", "true");
        if let Some(bridge) = segment
            .physical_network
            .as_ref()
            .and_then(|p| agent.bridge_mappings.get(p))
        {
            result = result.with_detail("physical_bridge", bridge.clone());
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml2_types::{Network, Port};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn driver_with(agent: AgentState) -> OpenvswitchMechanismDriver {
        let registry = Arc::new(AgentRegistry::new(Duration::from_secs(75)));
        registry.report(agent);
        OpenvswitchMechanismDriver::new(registry)
    }

    fn vlan_network() -> Network {
        Network::new(
            "t",
            "n",
            vec![
                NetworkSegment::new(NetworkType::Vxlan, None, Some(5000)),
                NetworkSegment::new(NetworkType::Vlan, Some("physnet1".into()), Some(100)),
            ],
        )
    }

    #[tokio::test]
    async fn test_binds_with_bridge_mapping() {
        let driver = driver_with(
            AgentState::new("compute-1", OVS_AGENT_TYPE).with_bridge_mapping("physnet1", "br-eth1"),
        );
        let net = vlan_network();
        let port = Port::new(net.id, "t", "p");
        let result = driver
            .bind_port(BindingRequest {
                port: &port,
                host_id: "compute-1",
                segments: &net.segments,
            })
            .await
            .unwrap();

        assert_eq!(result.vif_type, VifType::Ovs);
        assert_eq!(result.segment_index, 1);
        assert_eq!(result.vif_details.get("physical_bridge").map(String::as_str), Some("br-eth1"));
    }

    #[tokio::test]
    async fn test_prefers_first_reachable_segment() {
        let driver = driver_with(
            AgentState::new("compute-1", OVS_AGENT_TYPE)
                .with_bridge_mapping("physnet1", "br-eth1")
                .with_tunnel(NetworkType::Vxlan, "192.0.2.1".parse().unwrap()),
        );
        let net = vlan_network();
        let port = Port::new(net.id, "t", "p");
        let result = driver
            .bind_port(BindingRequest {
                port: &port,
                host_id: "compute-1",
                segments: &net.segments,
            })
            .await
            .unwrap();
        assert_eq!(result.segment_index, 0);
    }

    #[tokio::test]
    async fn test_no_mapping_no_binding() {
        let driver = driver_with(
            AgentState::new("compute-1", OVS_AGENT_TYPE).with_bridge_mapping("physnet2", "br-eth2"),
        );
        let net = vlan_network();
        let port = Port::new(net.id, "t", "p");
        let request = BindingRequest {
            port: &port,
            host_id: "compute-1",
            segments: &net.segments,
        };
        assert!(driver.bind_port(request).await.is_none());

        let request = BindingRequest {
            host_id: "compute-2",
            ..request
        };
        assert!(driver.bind_port(request).await.is_none());
    }
}
