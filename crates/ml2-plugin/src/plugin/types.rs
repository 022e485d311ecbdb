//! Request types accepted by the engine.

use ml2_types::{IpPrefix, MacAddress, ResourceId, SegmentSpec};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Network creation request.
///
/// An empty `segments` list requests a tenant network allocated from the
/// configured tenant network types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub tenant_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub segments: Vec<SegmentSpec>,
}

impl NetworkRequest {
    pub fn tenant(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: name.into(),
            admin_state_up: true,
            segments: Vec::new(),
        }
    }

    pub fn provider(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        segments: Vec<SegmentSpec>,
    ) -> Self {
        Self {
            segments,
            ..Self::tenant(tenant_id, name)
        }
    }
}

/// Mutable network attributes. Segments cannot change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkUpdate {
    pub name: Option<String>,
    pub admin_state_up: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRequest {
    pub network_id: ResourceId,
    pub tenant_id: String,
    pub name: String,
    pub cidr: IpPrefix,
    #[serde(default)]
    pub gateway_ip: Option<IpAddr>,
    #[serde(default = "default_true")]
    pub enable_dhcp: bool,
}

impl SubnetRequest {
    pub fn new(
        network_id: ResourceId,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        cidr: IpPrefix,
    ) -> Self {
        Self {
            network_id,
            tenant_id: tenant_id.into(),
            name: name.into(),
            cidr,
            gateway_ip: None,
            enable_dhcp: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the gateway.
    pub gateway_ip: Option<Option<IpAddr>>,
    pub enable_dhcp: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequest {
    pub network_id: ResourceId,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub mac_address: Option<MacAddress>,
    #[serde(default)]
    pub device_owner: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    /// Host to bind the port on, if already known.
    #[serde(default)]
    pub host_id: Option<String>,
}

impl PortRequest {
    pub fn new(network_id: ResourceId, tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            network_id,
            tenant_id: tenant_id.into(),
            name: name.into(),
            mac_address: None,
            device_owner: String::new(),
            device_id: String::new(),
            admin_state_up: true,
            host_id: None,
        }
    }

    pub fn on_host(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    pub fn with_mac(mut self, mac_address: MacAddress) -> Self {
        self.mac_address = Some(mac_address);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortUpdate {
    pub name: Option<String>,
    pub admin_state_up: Option<bool>,
    pub device_owner: Option<String>,
    pub device_id: Option<String>,
    /// `Some(None)` unbinds the port from its host.
    pub host_id: Option<Option<String>>,
}

impl PortUpdate {
    pub fn host(host_id: impl Into<String>) -> Self {
        Self {
            host_id: Some(Some(host_id.into())),
            ..Self::default()
        }
    }
}

fn default_true() -> bool {
    true
}
