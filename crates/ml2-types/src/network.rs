//! Networks and subnets.

use crate::{IpPrefix, NetworkSegment, ResourceId};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// A virtual Layer-2 network made of one or more segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: ResourceId,
    pub tenant_id: String,
    pub name: String,
    pub admin_state_up: bool,
    /// Ordered segment list; `segments[i].segment_index == i`.
    pub segments: Vec<NetworkSegment>,
}

impl Network {
    /// Creates a network with a fresh id, re-indexing `segments` in order.
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        segments: Vec<NetworkSegment>,
    ) -> Self {
        let segments = segments
            .into_iter()
            .enumerate()
            .map(|(index, seg)| seg.at_index(index))
            .collect();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            admin_state_up: true,
            segments,
        }
    }

    pub fn segment(&self, index: usize) -> Option<&NetworkSegment> {
        self.segments.get(index)
    }

    /// Returns true if this network spans more than one segment.
    pub fn is_multi_segment(&self) -> bool {
        self.segments.len() > 1
    }
}

/// An IP subnet attached to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: ResourceId,
    /// Back-reference to the parent network (never owning).
    pub network_id: ResourceId,
    pub tenant_id: String,
    pub name: String,
    pub cidr: IpPrefix,
    pub ip_version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ip: Option<IpAddr>,
    pub enable_dhcp: bool,
}

impl Subnet {
    pub fn new(
        network_id: ResourceId,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        cidr: IpPrefix,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            network_id,
            tenant_id: tenant_id.into(),
            name: name.into(),
            cidr,
            ip_version: cidr.ip_version(),
            gateway_ip: None,
            enable_dhcp: true,
        }
    }

    pub fn with_gateway(mut self, gateway_ip: IpAddr) -> Self {
        self.gateway_ip = Some(gateway_ip);
        self
    }
}
