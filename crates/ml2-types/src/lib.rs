//! Segment model for the ML2 driver-orchestration engine.
//!
//! Passive, serializable data structures shared by the type drivers,
//! the mechanism drivers and the engine:
//!
//! - [`NetworkType`]: the Layer-2 technology of a segment
//! - [`NetworkSegment`] / [`SegmentSpec`]: realized and requested segments
//! - [`VlanId`], [`SegmentationId`]: range-checked segmentation identifiers
//! - [`Network`], [`Subnet`], [`IpPrefix`]: the virtual network and its IP subnets
//! - [`Port`], [`Binding`], [`VifType`], [`MacAddress`]: ports and their host binding

mod mac;
mod network;
mod network_type;
mod port;
mod prefix;
mod segment;
mod vlan;

pub use mac::MacAddress;
pub use network::{Network, Subnet};
pub use network_type::NetworkType;
pub use port::{Binding, Port, VifType};
pub use prefix::IpPrefix;
pub use segment::{NetworkSegment, SegmentKey, SegmentSpec, SegmentationId};
pub use vlan::VlanId;

/// Identifier of a network, subnet or port.
pub type ResourceId = uuid::Uuid;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown network type: {0}")]
    UnknownNetworkType(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u32),

    #[error("invalid id range '{0}' (expected <min>:<max>)")]
    InvalidRange(String),

    #[error("invalid VLAN range '{0}' (expected <physnet>[:<min>:<max>])")]
    InvalidVlanRange(String),

    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
