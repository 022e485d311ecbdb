//! Network segments: requested ([`SegmentSpec`]) and realized ([`NetworkSegment`]).

use crate::{NetworkType, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric segmentation id (VLAN tag, GRE key or VXLAN VNI).
pub type SegmentationId = u32;

/// Segment attributes as supplied by an administrator for a provider network.
///
/// The network type is kept as a raw string so that an unknown type can be
/// rejected by the type manager like any other invalid attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub network_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_id: Option<SegmentationId>,
}

impl SegmentSpec {
    pub fn new(network_type: impl Into<String>) -> Self {
        Self {
            network_type: network_type.into(),
            physical_network: None,
            segmentation_id: None,
        }
    }

    pub fn local() -> Self {
        Self::new(NetworkType::Local.as_str())
    }

    pub fn flat(physical_network: impl Into<String>) -> Self {
        Self::new(NetworkType::Flat.as_str()).with_physical_network(physical_network)
    }

    pub fn vlan(physical_network: impl Into<String>, vlan_id: SegmentationId) -> Self {
        Self::new(NetworkType::Vlan.as_str())
            .with_physical_network(physical_network)
            .with_segmentation_id(vlan_id)
    }

    pub fn gre(tunnel_id: SegmentationId) -> Self {
        Self::new(NetworkType::Gre.as_str()).with_segmentation_id(tunnel_id)
    }

    pub fn vxlan(vni: SegmentationId) -> Self {
        Self::new(NetworkType::Vxlan.as_str()).with_segmentation_id(vni)
    }

    pub fn with_physical_network(mut self, physical_network: impl Into<String>) -> Self {
        self.physical_network = Some(physical_network.into());
        self
    }

    pub fn with_segmentation_id(mut self, segmentation_id: SegmentationId) -> Self {
        self.segmentation_id = Some(segmentation_id);
        self
    }

    /// Parses the requested network type.
    pub fn parsed_type(&self) -> Result<NetworkType, ParseError> {
        self.network_type.parse()
    }
}

/// One realized segment of a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkSegment {
    pub network_type: NetworkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_id: Option<SegmentationId>,
    /// Position within the owning network's segment list.
    pub segment_index: usize,
}

impl NetworkSegment {
    pub fn new(
        network_type: NetworkType,
        physical_network: Option<String>,
        segmentation_id: Option<SegmentationId>,
    ) -> Self {
        Self {
            network_type,
            physical_network,
            segmentation_id,
            segment_index: 0,
        }
    }

    /// Returns the same segment placed at `index`.
    pub fn at_index(mut self, index: usize) -> Self {
        self.segment_index = index;
        self
    }

    /// Returns the system-wide uniqueness key of this segment.
    pub fn key(&self) -> SegmentKey {
        SegmentKey {
            physical_network: self.physical_network.clone(),
            network_type: self.network_type,
            segmentation_id: self.segmentation_id,
        }
    }
}

impl fmt::Display for NetworkSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network_type)?;
        if let Some(physnet) = &self.physical_network {
            write!(f, ":{}", physnet)?;
        }
        if let Some(id) = self.segmentation_id {
            write!(f, ":{}", id)?;
        }
        Ok(())
    }
}

/// (physical_network, network_type, segmentation_id) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey {
    pub physical_network: Option<String>,
    pub network_type: NetworkType,
    pub segmentation_id: Option<SegmentationId>,
}
