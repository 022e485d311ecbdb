//! Port binding and agent interaction through the built-in drivers

use ml2_driver_api::{Ml2Error, Operation, ResourceKind};
use ml2_plugin::{AgentState, PortUpdate, OVS_AGENT_TYPE};
use ml2_test::{
    agents, configs, plugin_from_config, plugin_with, requests, CallLog, ScriptedDriver,
    COMPUTE_1, COMPUTE_2, PHYSNET,
};
use ml2_types::{MacAddress, NetworkType, VifType};
use pretty_assertions::assert_eq;
use std::net::IpAddr;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_ovs_binds_with_bridge_mapping() {
    let plugin = plugin_from_config(configs::with_builtin_drivers()).await;
    assert!(plugin.report_agent_state(agents::ovs_agent(COMPUTE_1, PHYSNET)).await);

    let net = plugin
        .create_network(requests::vlan_network("net", 100))
        .await
        .unwrap();

    let bound = plugin
        .create_port(requests::port_on(net.id, "vm-1", COMPUTE_1))
        .await
        .unwrap();
    assert_eq!(bound.binding.vif_type, VifType::Ovs);
    assert_eq!(bound.binding.host_id.as_deref(), Some(COMPUTE_1));
    assert_eq!(bound.binding.segment_index, Some(0));
    assert_eq!(
        bound.binding.vif_details.get("physical_bridge").map(String::as_str),
        Some("br-physnet1")
    );
    assert_eq!(
        bound.binding.vif_details.get("bridge_name").map(String::as_str),
        Some("br-int")
    );

    // no agent on compute-2
    let unbound = plugin
        .create_port(requests::port_on(net.id, "vm-2", COMPUTE_2))
        .await
        .unwrap();
    assert_eq!(unbound.binding.vif_type, VifType::Unbound);
    assert_eq!(unbound.binding.host_id.as_deref(), Some(COMPUTE_2));
    assert_eq!(unbound.binding.segment_index, None);

    assert_eq!(plugin.get_port(bound.id).await.unwrap(), bound);
}

#[tokio::test]
async fn test_ovs_needs_matching_bridge_mapping() {
    let plugin = plugin_from_config(configs::with_builtin_drivers()).await;
    plugin
        .report_agent_state(agents::ovs_agent(COMPUTE_1, "physnet2"))
        .await;

    let net = plugin
        .create_network(requests::vlan_network("net", 101))
        .await
        .unwrap();
    let port = plugin
        .create_port(requests::port_on(net.id, "vm-1", COMPUTE_1))
        .await
        .unwrap();
    assert_eq!(port.binding.vif_type, VifType::Unbound);

    // an agent of another type on the same host does not count
    plugin
        .report_agent_state(
            AgentState::new(COMPUTE_1, "Linux bridge agent").with_bridge_mapping(PHYSNET, "brq0"),
        )
        .await;
    let port = plugin.bind_port(port.id, COMPUTE_1).await.unwrap();
    assert_eq!(port.binding.vif_type, VifType::Unbound);
}

#[tokio::test]
async fn test_host_change_rebinds_port() {
    let plugin = plugin_from_config(configs::with_builtin_drivers()).await;
    let mut port_events = plugin.subscribe(Some(ResourceKind::Port));

    let net = plugin
        .create_network(requests::vlan_network("net", 102))
        .await
        .unwrap();
    let port = plugin
        .create_port(requests::port_on(net.id, "vm-1", COMPUTE_2))
        .await
        .unwrap();
    assert!(!port.binding.is_bound());

    // agent shows up later; an explicit rebind on the same host picks it up
    plugin
        .report_agent_state(agents::ovs_agent(COMPUTE_2, PHYSNET))
        .await;
    let rebound = plugin.bind_port(port.id, COMPUTE_2).await.unwrap();
    assert_eq!(rebound.binding.vif_type, VifType::Ovs);

    // moving to a host without an agent unbinds it
    let moved = plugin
        .update_port(port.id, PortUpdate::host(COMPUTE_1))
        .await
        .unwrap();
    assert_eq!(moved.binding.vif_type, VifType::Unbound);
    assert_eq!(moved.binding.host_id.as_deref(), Some(COMPUTE_1));

    // clearing the host drops the binding entirely
    let cleared = plugin
        .update_port(
            port.id,
            PortUpdate {
                host_id: Some(None),
                ..PortUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cleared.binding.host_id, None);

    let ops: Vec<_> = std::iter::from_fn(|| port_events.try_recv().ok())
        .map(|n| n.operation)
        .collect();
    assert_eq!(
        ops,
        vec![
            Operation::Create,
            Operation::Update,
            Operation::Update,
            Operation::Update
        ]
    );
}

#[tokio::test]
async fn test_ovs_binds_tunnel_segment_for_tunnel_agent() {
    let plugin = plugin_from_config(configs::with_builtin_drivers()).await;
    plugin
        .report_agent_state(
            AgentState::new(COMPUTE_1, OVS_AGENT_TYPE).with_tunnel(NetworkType::Vxlan, ip("10.0.0.1")),
        )
        .await;

    let net = plugin
        .create_network(ml2_plugin::NetworkRequest::provider(
            "t",
            "overlay",
            vec![ml2_types::SegmentSpec::vxlan(1000)],
        ))
        .await
        .unwrap();
    let port = plugin
        .create_port(requests::port_on(net.id, "vm-1", COMPUTE_1))
        .await
        .unwrap();
    assert_eq!(port.binding.vif_type, VifType::Ovs);
    assert!(!port.binding.vif_details.contains_key("physical_bridge"));
}

#[tokio::test]
async fn test_first_claim_wins() {
    let log = CallLog::default();
    let plugin = plugin_with(
        configs::vlan_tenant(),
        vec![
            ScriptedDriver::new("shy", &log).into_arc(),
            ScriptedDriver::new("first", &log)
                .claims(COMPUTE_1, VifType::Bridge)
                .into_arc(),
            ScriptedDriver::new("second", &log)
                .claims(COMPUTE_1, VifType::Other("vhostuser".into()))
                .into_arc(),
        ],
    )
    .await;

    let net = plugin
        .create_network(requests::tenant_network("net"))
        .await
        .unwrap();
    log.clear();
    let port = plugin
        .create_port(requests::port_on(net.id, "vm-1", COMPUTE_1))
        .await
        .unwrap();

    assert_eq!(port.binding.vif_type, VifType::Bridge);
    assert_eq!(
        port.binding.vif_details.get("driver").map(String::as_str),
        Some("first")
    );
    assert_eq!(log.hooks_of("second").first().map(String::as_str), Some("create_port_precommit"));
    assert_eq!(log.hooks_of("shy").first().map(String::as_str), Some("bind_port"));
}

#[tokio::test]
async fn test_port_without_host_is_not_bound() {
    let log = CallLog::default();
    let plugin = plugin_with(
        configs::vlan_tenant(),
        vec![ScriptedDriver::new("eager", &log)
            .claims(COMPUTE_1, VifType::Ovs)
            .into_arc()],
    )
    .await;
    let net = plugin
        .create_network(requests::tenant_network("net"))
        .await
        .unwrap();

    let port = plugin
        .create_port(requests::port(net.id, "vm-1"))
        .await
        .unwrap();
    assert_eq!(port.binding.vif_type, VifType::Unbound);
    assert_eq!(port.binding.host_id, None);
    assert!(!log.entries().iter().any(|e| e.ends_with(":bind_port")));
}

#[tokio::test]
async fn test_tunnel_sync_returns_all_endpoints() {
    let plugin = plugin_from_config(configs::with_builtin_drivers()).await;
    plugin
        .report_agent_state(
            AgentState::new(COMPUTE_1, OVS_AGENT_TYPE).with_tunnel(NetworkType::Vxlan, ip("10.0.0.1")),
        )
        .await;

    let endpoints = plugin
        .tunnel_sync("vxlan", ip("10.0.0.2"), Some(COMPUTE_2.to_string()))
        .await
        .unwrap();
    let got: Vec<_> = endpoints
        .iter()
        .map(|e| (e.ip_address, e.host.as_deref()))
        .collect();
    assert_eq!(
        got,
        vec![
            (ip("10.0.0.1"), Some(COMPUTE_1)),
            (ip("10.0.0.2"), Some(COMPUTE_2)),
        ]
    );

    // gre endpoints are tracked separately
    let gre = plugin.tunnel_sync("gre", ip("10.0.0.3"), None).await.unwrap();
    assert_eq!(gre.len(), 1);

    for bad in ["vlan", "geneve"] {
        let err = plugin
            .tunnel_sync(bad, ip("10.0.0.9"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Ml2Error::InvalidRequest { .. }), "{} gave {:?}", bad, err);
    }
}

#[tokio::test]
async fn test_delete_port_allows_network_delete() {
    let plugin = plugin_from_config(configs::with_builtin_drivers()).await;
    plugin
        .report_agent_state(agents::ovs_agent(COMPUTE_1, PHYSNET))
        .await;
    let net = plugin
        .create_network(requests::tenant_network("net"))
        .await
        .unwrap();
    let port = plugin
        .create_port(requests::port_on(net.id, "vm-1", COMPUTE_1))
        .await
        .unwrap();
    assert!(port.binding.is_bound());

    plugin.delete_port(port.id).await.unwrap();
    assert!(matches!(
        plugin.delete_port(port.id).await,
        Err(Ml2Error::NotFound {
            resource: ResourceKind::Port,
            ..
        })
    ));
    plugin.delete_network(net.id).await.unwrap();
    assert!(plugin.list_networks().await.is_empty());
}

#[tokio::test]
async fn test_expired_agent_withdraws_its_endpoints() {
    let plugin = plugin_from_config(configs::with_builtin_drivers()).await;
    plugin
        .report_agent_state(agents::silent(
            AgentState::new(COMPUTE_1, OVS_AGENT_TYPE).with_tunnel(NetworkType::Vxlan, ip("10.0.0.1")),
        ))
        .await;
    plugin
        .report_agent_state(
            AgentState::new(COMPUTE_2, OVS_AGENT_TYPE).with_tunnel(NetworkType::Vxlan, ip("10.0.0.2")),
        )
        .await;

    let expired = plugin.expire_agents().await;
    let hosts: Vec<_> = expired.iter().map(|a| a.host.as_str()).collect();
    assert_eq!(hosts, vec![COMPUTE_1]);
    assert!(plugin.agents().get(COMPUTE_1, OVS_AGENT_TYPE).is_none());

    let endpoints = plugin
        .tunnel_sync("vxlan", ip("10.0.0.2"), Some(COMPUTE_2.to_string()))
        .await
        .unwrap();
    let ips: Vec<_> = endpoints.iter().map(|e| e.ip_address).collect();
    assert_eq!(ips, vec![ip("10.0.0.2")]);
}

#[tokio::test]
async fn test_requested_mac_is_kept() {
    let plugin = plugin_from_config(configs::with_builtin_drivers()).await;
    let net = plugin
        .create_network(requests::tenant_network("net"))
        .await
        .unwrap();
    let mac: MacAddress = "FA:16:3E:AA:BB:CC".parse().unwrap();

    let port = plugin
        .create_port(requests::port(net.id, "vm-1").with_mac(mac))
        .await
        .unwrap();
    assert_eq!(port.mac_address.to_string(), "fa:16:3e:aa:bb:cc");

    let generated = plugin
        .create_port(requests::port(net.id, "vm-2"))
        .await
        .unwrap();
    assert_eq!(generated.mac_address, MacAddress::for_port(&generated.id));
}
