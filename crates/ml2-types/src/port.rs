//! Ports and port bindings.

use crate::{MacAddress, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Virtual interface type a port is realized with on its host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VifType {
    /// No binding has been resolved yet.
    #[default]
    Unbound,
    /// Failure sentinel accepted from stored or imported bindings. The
    /// engine itself leaves a port it cannot bind as [`VifType::Unbound`].
    BindingFailed,
    /// Open vSwitch port.
    Ovs,
    /// Linux bridge port.
    Bridge,
    /// Any other driver-specific vif type.
    Other(String),
}

impl VifType {
    pub fn as_str(&self) -> &str {
        match self {
            VifType::Unbound => "unbound",
            VifType::BindingFailed => "binding_failed",
            VifType::Ovs => "ovs",
            VifType::Bridge => "bridge",
            VifType::Other(name) => name,
        }
    }

    /// Returns true if this vif type describes a realized binding.
    pub fn is_bound(&self) -> bool {
        !matches!(self, VifType::Unbound | VifType::BindingFailed)
    }
}

impl fmt::Display for VifType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for VifType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "unbound" => VifType::Unbound,
            "binding_failed" => VifType::BindingFailed,
            "ovs" => VifType::Ovs,
            "bridge" => VifType::Bridge,
            _ => VifType::Other(s),
        }
    }
}

impl From<VifType> for String {
    fn from(vif: VifType) -> String {
        vif.as_str().to_string()
    }
}

/// Resolved mapping of a port to a host's virtual interface.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    pub vif_type: VifType,
    #[serde(default)]
    pub vif_details: BTreeMap<String, String>,
    /// Index of the network segment the port is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<usize>,
}

impl Binding {
    /// The unbound sentinel for a (possibly) known host.
    pub fn unbound(host_id: Option<String>) -> Self {
        Self {
            host_id,
            ..Self::default()
        }
    }

    pub fn is_bound(&self) -> bool {
        self.vif_type.is_bound()
    }
}

/// A port attached to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: ResourceId,
    /// Back-reference to the parent network (never owning).
    pub network_id: ResourceId,
    pub tenant_id: String,
    pub name: String,
    pub mac_address: MacAddress,
    #[serde(default)]
    pub device_owner: String,
    #[serde(default)]
    pub device_id: String,
    pub admin_state_up: bool,
    #[serde(default)]
    pub binding: Binding,
}

impl Port {
    /// Creates an unbound port with a generated MAC address.
    pub fn new(network_id: ResourceId, tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            network_id,
            tenant_id: tenant_id.into(),
            name: name.into(),
            mac_address: MacAddress::for_port(&id),
            device_owner: String::new(),
            device_id: String::new(),
            admin_state_up: true,
            binding: Binding::default(),
        }
    }
}
