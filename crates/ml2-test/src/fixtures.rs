//! Test fixtures for common engine setups
//!
//! Configuration presets mirror the deployments the integration suites
//! model; the engine helpers assemble an initialized [`Ml2Plugin`] around
//! them.

use ml2_driver_api::MechanismDriver;
use ml2_plugin::{
    AgentRegistry, AgentState, DriverRegistry, MechanismManager, MemoryStore, Ml2Config,
    Ml2Plugin, NetworkRequest, PortRequest, SubnetRequest, OVS_AGENT_TYPE,
};
use ml2_types::{ResourceId, SegmentSpec};
use std::sync::Arc;

pub const TENANT: &str = "tenant-a";
pub const PHYSNET: &str = "physnet1";
pub const COMPUTE_1: &str = "compute-1";
pub const COMPUTE_2: &str = "compute-2";

const VLAN_TENANT_TOML: &str = r#"
[ml2]
type_drivers = ["local", "flat", "vlan", "gre", "vxlan"]
tenant_network_types = ["vlan"]

[ml2_type_flat]
flat_networks = ["physnet1"]

[ml2_type_vlan]
network_vlan_ranges = ["physnet1:100:102", "physnet2"]

[ml2_type_gre]
tunnel_id_ranges = ["1:10"]

[ml2_type_vxlan]
vni_ranges = ["1000:1001"]

[engine]
postcommit_timeout_ms = 2000
lock_timeout_ms = 500
retry_max_attempts = 3
retry_initial_backoff_ms = 1
retry_max_backoff_ms = 5
"#;

/// Configuration presets
pub mod configs {
    use super::*;

    /// Every type enabled; tenant networks are VLANs from physnet1:100:102.
    pub fn vlan_tenant() -> Ml2Config {
        Ml2Config::from_toml(VLAN_TENANT_TOML).expect("preset parses")
    }

    /// Tenant networks try a one-id VLAN pool first, then VXLAN 1000:1001.
    pub fn vlan_then_vxlan() -> Ml2Config {
        let mut config = vlan_tenant();
        config.ml2.tenant_network_types = vec!["vlan".into(), "vxlan".into()];
        config.ml2_type_vlan.network_vlan_ranges = vec!["physnet1:100:100".into()];
        config
    }

    /// [`vlan_tenant`] with the built-in drivers enabled.
    pub fn with_builtin_drivers() -> Ml2Config {
        let mut config = vlan_tenant();
        config.ml2.mechanism_drivers = vec!["logger".into(), "openvswitch".into()];
        config
    }

    pub fn with_postcommit_timeout(mut config: Ml2Config, millis: u64) -> Ml2Config {
        config.engine.postcommit_timeout_ms = millis;
        config
    }

    pub fn with_lock_timeout(mut config: Ml2Config, millis: u64) -> Ml2Config {
        config.engine.lock_timeout_ms = millis;
        config
    }
}

/// Builds and initializes an engine running `drivers`, in order, on the
/// type drivers described by `config`.
pub async fn plugin_with(config: Ml2Config, drivers: Vec<Arc<dyn MechanismDriver>>) -> Ml2Plugin {
    let registry = DriverRegistry::new();
    let type_manager = registry
        .build_type_manager(&config)
        .expect("type drivers build");

    let mut mechanism_manager = MechanismManager::new(config.postcommit_timeout());
    for driver in drivers {
        mechanism_manager
            .register(driver)
            .expect("mechanism driver registers");
    }

    let plugin = Ml2Plugin::new(
        type_manager,
        mechanism_manager,
        MemoryStore::new(config.lock_timeout()),
        Arc::new(AgentRegistry::new(config.agent_down_time())),
        config.retry_policy(),
    );
    plugin.initialize().await.expect("engine initializes");
    plugin
}

/// Builds and initializes an engine the way `ml2d` does.
pub async fn plugin_from_config(config: Ml2Config) -> Ml2Plugin {
    let plugin =
        Ml2Plugin::from_config(config, &DriverRegistry::new()).expect("engine builds from config");
    plugin.initialize().await.expect("engine initializes");
    plugin
}

/// Request builders
pub mod requests {
    use super::*;

    pub fn tenant_network(name: &str) -> NetworkRequest {
        NetworkRequest::tenant(TENANT, name)
    }

    pub fn vlan_network(name: &str, vlan_id: u32) -> NetworkRequest {
        NetworkRequest::provider(TENANT, name, vec![SegmentSpec::vlan(PHYSNET, vlan_id)])
    }

    pub fn subnet(network_id: ResourceId, cidr: &str) -> SubnetRequest {
        SubnetRequest::new(
            network_id,
            TENANT,
            format!("subnet-{}", cidr),
            cidr.parse().expect("fixture cidr parses"),
        )
    }

    pub fn port(network_id: ResourceId, name: &str) -> PortRequest {
        PortRequest::new(network_id, TENANT, name)
    }

    pub fn port_on(network_id: ResourceId, name: &str, host: &str) -> PortRequest {
        port(network_id, name).on_host(host)
    }
}

/// Agent reports
pub mod agents {
    use super::*;
    use chrono::Utc;

    /// An Open vSwitch agent bridging `physnet` to `br-<physnet>`.
    pub fn ovs_agent(host: &str, physnet: &str) -> AgentState {
        AgentState::new(host, OVS_AGENT_TYPE).with_bridge_mapping(physnet, format!("br-{}", physnet))
    }

    /// `state` with its last heartbeat an hour ago.
    pub fn silent(mut state: AgentState) -> AgentState {
        state.heartbeat = Utc::now() - chrono::Duration::hours(1);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_ok, block_on};

    #[test]
    fn test_presets_validate() {
        assert_ok!(configs::vlan_tenant().validate());
        assert_ok!(configs::vlan_then_vxlan().validate());
        assert_ok!(configs::with_builtin_drivers().validate());
    }

    #[test]
    fn test_builtin_preset_builds_engine() {
        let plugin = block_on(plugin_from_config(configs::with_builtin_drivers()));
        assert_eq!(
            plugin.mechanism_manager().names(),
            vec!["logger", "openvswitch"]
        );
        assert_eq!(plugin.type_manager().network_types().len(), 5);
    }
}
