//! Overlay type drivers (GRE, VXLAN): tunnel id pools plus endpoint tracking.

use super::pool::IdPool;
use async_trait::async_trait;
use ml2_driver_api::{Ml2Error, Ml2Result, TunnelEndpoint, TunnelEndpoints, TypeDriver};
use ml2_types::{NetworkSegment, NetworkType, SegmentSpec, SegmentationId};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Highest GRE key.
pub const MAX_GRE_ID: SegmentationId = u32::MAX;

/// Highest VXLAN network identifier (24 bits).
pub const MAX_VXLAN_VNI: SegmentationId = (1 << 24) - 1;

#[derive(Debug)]
pub struct TunnelTypeDriver {
    network_type: NetworkType,
    max_id: SegmentationId,
    pool: Mutex<IdPool>,
    endpoints: Mutex<BTreeMap<IpAddr, TunnelEndpoint>>,
}

impl TunnelTypeDriver {
    pub fn gre(ranges: Vec<(SegmentationId, SegmentationId)>) -> Self {
        Self::with_type(NetworkType::Gre, MAX_GRE_ID, ranges)
    }

    pub fn vxlan(ranges: Vec<(SegmentationId, SegmentationId)>) -> Self {
        Self::with_type(NetworkType::Vxlan, MAX_VXLAN_VNI, ranges)
    }

    fn with_type(
        network_type: NetworkType,
        max_id: SegmentationId,
        ranges: Vec<(SegmentationId, SegmentationId)>,
    ) -> Self {
        Self {
            network_type,
            max_id,
            pool: Mutex::new(IdPool::new(ranges)),
            endpoints: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn free_count(&self) -> u64 {
        self.pool.lock().await.free_count()
    }

    fn segment(&self, id: SegmentationId) -> NetworkSegment {
        NetworkSegment::new(self.network_type, None, Some(id))
    }
}

#[async_trait]
impl TypeDriver for TunnelTypeDriver {
    fn network_type(&self) -> NetworkType {
        self.network_type
    }

    async fn initialize(&self) -> Ml2Result<()> {
        let pool = self.pool.lock().await;
        for &(min, max) in pool.ranges() {
            if min == 0 || max > self.max_id {
                return Err(Ml2Error::config(format!(
                    "{} range {}:{} outside 1:{}",
                    self.network_type, min, max, self.max_id
                )));
            }
        }
        info!(
            "{} type driver ready, {} tenant ids in {} range(s)",
            self.network_type,
            pool.free_count(),
            pool.ranges().len()
        );
        Ok(())
    }

    fn validate_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<()> {
        if spec.physical_network.is_some() {
            return Err(Ml2Error::invalid_segment(format!(
                "physical_network not allowed for {} provider network",
                self.network_type
            )));
        }
        let id = spec.segmentation_id.ok_or_else(|| {
            Ml2Error::invalid_segment(format!(
                "segmentation_id required for {} provider network",
                self.network_type
            ))
        })?;
        if id == 0 || id > self.max_id {
            return Err(Ml2Error::invalid_segment(format!(
                "{} segmentation_id {} outside 1:{}",
                self.network_type, id, self.max_id
            )));
        }
        Ok(())
    }

    async fn reserve_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<NetworkSegment> {
        let id = spec
            .segmentation_id
            .ok_or_else(|| Ml2Error::invalid_segment("segmentation_id required"))?;
        let segment = self.segment(id);
        if !self.pool.lock().await.reserve(id) {
            return Err(Ml2Error::segment_in_use(segment.key()));
        }
        debug!("Reserved {} id {}", self.network_type, id);
        Ok(segment)
    }

    async fn allocate_tenant_segment(&self) -> Ml2Result<Option<NetworkSegment>> {
        let id = self.pool.lock().await.pop();
        Ok(id.map(|id| {
            info!("Allocated tenant {} id {}", self.network_type, id);
            self.segment(id)
        }))
    }

    async fn release_segment(&self, segment: &NetworkSegment) {
        if let Some(id) = segment.segmentation_id {
            if self.pool.lock().await.release(id) {
                debug!("Released {} id {}", self.network_type, id);
            }
        }
    }

    async fn sync_allocations(&self, live: &[NetworkSegment]) {
        self.pool.lock().await.sync(
            live.iter()
                .filter(|s| s.network_type == self.network_type)
                .filter_map(|s| s.segmentation_id),
        );
    }

    fn tunnel_endpoints(&self) -> Option<&dyn TunnelEndpoints> {
        Some(self)
    }
}

#[async_trait]
impl TunnelEndpoints for TunnelTypeDriver {
    async fn add_endpoint(&self, ip_address: IpAddr, host: Option<String>) -> TunnelEndpoint {
        let endpoint = TunnelEndpoint { ip_address, host };
        let previous = self
            .endpoints
            .lock()
            .await
            .insert(ip_address, endpoint.clone());
        if previous.is_none() {
            info!("Added {} endpoint {}", self.network_type, ip_address);
        }
        endpoint
    }

    async fn remove_endpoint(&self, ip_address: IpAddr) -> bool {
        let removed = self.endpoints.lock().await.remove(&ip_address).is_some();
        if removed {
            info!("Removed {} endpoint {}", self.network_type, ip_address);
        }
        removed
    }

    async fn endpoints(&self) -> Vec<TunnelEndpoint> {
        self.endpoints.lock().await.values().cloned().collect()
    }
}
