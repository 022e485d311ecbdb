//! Type driver contract.

use crate::Ml2Result;
use async_trait::async_trait;
use ml2_types::{NetworkSegment, NetworkType, SegmentSpec};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A type driver owns validation and id allocation for one network type.
///
/// Reservation and allocation must be atomic with respect to concurrent
/// callers: of several racing reservations of the same segment exactly one
/// succeeds, and racing allocations never return the same id.
#[async_trait]
pub trait TypeDriver: Send + Sync {
    /// The network type this driver owns.
    fn network_type(&self) -> NetworkType;

    /// Returns true if tenant networks may be allocated from this driver.
    fn is_tenant_capable(&self) -> bool {
        true
    }

    /// Called once at start-up, before any allocation.
    async fn initialize(&self) -> Ml2Result<()> {
        Ok(())
    }

    /// Checks provider-supplied attributes without reserving anything.
    fn validate_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<()>;

    /// Marks a validated provider segment as in use.
    async fn reserve_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<NetworkSegment>;

    /// Pops a segment from the free pool; `None` if the pool is exhausted.
    async fn allocate_tenant_segment(&self) -> Ml2Result<Option<NetworkSegment>>;

    /// Returns a segment to the pool. No-op for segments this driver never tracked.
    async fn release_segment(&self, segment: &NetworkSegment);

    /// Rebuilds allocation state from the segments currently recorded as live.
    async fn sync_allocations(&self, _live: &[NetworkSegment]) {}

    /// Tunnel endpoint capability, for overlay types.
    fn tunnel_endpoints(&self) -> Option<&dyn TunnelEndpoints> {
        None
    }
}

/// A tunnel endpoint (VTEP) known to the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TunnelEndpoint {
    pub ip_address: IpAddr,
    pub host: Option<String>,
}

/// Endpoint bookkeeping offered by overlay type drivers.
#[async_trait]
pub trait TunnelEndpoints: Send + Sync {
    /// Registers (or refreshes) an endpoint and returns it.
    async fn add_endpoint(&self, ip_address: IpAddr, host: Option<String>) -> TunnelEndpoint;

    async fn remove_endpoint(&self, ip_address: IpAddr) -> bool;

    /// All known endpoints, ordered by address.
    async fn endpoints(&self) -> Vec<TunnelEndpoint>;
}
