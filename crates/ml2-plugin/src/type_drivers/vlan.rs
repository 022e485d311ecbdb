//! VLAN type driver: 802.1Q ids pooled per physical network.

use super::pool::IdPool;
use async_trait::async_trait;
use ml2_driver_api::{Ml2Error, Ml2Result, TypeDriver};
use ml2_types::{NetworkSegment, NetworkType, SegmentSpec, SegmentationId, VlanId};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Pools in configured physical network order.
type PhysnetPools = Vec<(String, IdPool)>;

#[derive(Debug)]
pub struct VlanTypeDriver {
    pools: Mutex<PhysnetPools>,
    physnets: Vec<String>,
}

impl VlanTypeDriver {
    /// Creates the driver from `(physnet, ranges)` in configured order.
    ///
    /// Physical networks with no range accept provider networks only.
    pub fn new(ranges: Vec<(String, Vec<(SegmentationId, SegmentationId)>)>) -> Self {
        let physnets = ranges.iter().map(|(p, _)| p.clone()).collect();
        let pools = ranges
            .into_iter()
            .map(|(physnet, r)| (physnet, IdPool::new(r)))
            .collect();
        Self {
            pools: Mutex::new(pools),
            physnets,
        }
    }

    /// Free tenant VLAN count on `physnet`.
    pub async fn free_count(&self, physnet: &str) -> u64 {
        self.pools
            .lock()
            .await
            .iter()
            .find(|(p, _)| p == physnet)
            .map(|(_, pool)| pool.free_count())
            .unwrap_or(0)
    }

    fn segment(physnet: &str, vlan_id: SegmentationId) -> NetworkSegment {
        NetworkSegment::new(NetworkType::Vlan, Some(physnet.to_string()), Some(vlan_id))
    }
}

#[async_trait]
impl TypeDriver for VlanTypeDriver {
    fn network_type(&self) -> NetworkType {
        NetworkType::Vlan
    }

    fn validate_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<()> {
        let physnet = spec.physical_network.as_deref().ok_or_else(|| {
            Ml2Error::invalid_segment("physical_network required for VLAN provider network")
        })?;
        if !self.physnets.iter().any(|p| p == physnet) {
            return Err(Ml2Error::invalid_segment(format!(
                "physical_network '{}' unknown for VLAN provider network",
                physnet
            )));
        }
        let id = spec.segmentation_id.ok_or_else(|| {
            Ml2Error::invalid_segment("segmentation_id required for VLAN provider network")
        })?;
        VlanId::new(id).map_err(|e| Ml2Error::invalid_segment(e.to_string()))?;
        Ok(())
    }

    async fn reserve_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<NetworkSegment> {
        let (physnet, id) = match (&spec.physical_network, spec.segmentation_id) {
            (Some(p), Some(id)) => (p.as_str(), id),
            _ => return Err(Ml2Error::invalid_segment("incomplete VLAN segment")),
        };
        let segment = Self::segment(physnet, id);

        let mut pools = self.pools.lock().await;
        let (_, pool) = pools
            .iter_mut()
            .find(|(p, _)| p == physnet)
            .ok_or_else(|| Ml2Error::invalid_segment(format!("unknown physical_network '{}'", physnet)))?;
        if !pool.reserve(id) {
            return Err(Ml2Error::segment_in_use(segment.key()));
        }
        debug!(
            "Reserved VLAN {} on {} ({} pool)",
            id,
            physnet,
            if pool.in_ranges(id) { "inside" } else { "outside" }
        );
        Ok(segment)
    }

    async fn allocate_tenant_segment(&self) -> Ml2Result<Option<NetworkSegment>> {
        let mut pools = self.pools.lock().await;
        for (physnet, pool) in pools.iter_mut() {
            if let Some(id) = pool.pop() {
                info!("Allocated tenant VLAN {} on {}", id, physnet);
                return Ok(Some(Self::segment(physnet, id)));
            }
        }
        Ok(None)
    }

    async fn release_segment(&self, segment: &NetworkSegment) {
        let (Some(physnet), Some(id)) = (&segment.physical_network, segment.segmentation_id) else {
            return;
        };
        let mut pools = self.pools.lock().await;
        if let Some((_, pool)) = pools.iter_mut().find(|(p, _)| p == physnet) {
            if pool.release(id) {
                debug!("Released VLAN {} on {}", id, physnet);
            }
        }
    }

    async fn sync_allocations(&self, live: &[NetworkSegment]) {
        let mut pools = self.pools.lock().await;
        for (physnet, pool) in pools.iter_mut() {
            pool.sync(
                live.iter()
                    .filter(|s| s.network_type == NetworkType::Vlan)
                    .filter(|s| s.physical_network.as_deref() == Some(physnet.as_str()))
                    .filter_map(|s| s.segmentation_id),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn driver() -> VlanTypeDriver {
        VlanTypeDriver::new(vec![
            ("physnet1".into(), vec![(100, 102)]),
            ("physnet2".into(), vec![]),
        ])
    }

    #[test]
    fn test_validate() {
        let d = driver();
        assert!(d.validate_provider_segment(&SegmentSpec::vlan("physnet1", 100)).is_ok());
        // provider-only physnet and ids outside the tenant pool are fine
        assert!(d.validate_provider_segment(&SegmentSpec::vlan("physnet2", 3000)).is_ok());
        assert!(d.validate_provider_segment(&SegmentSpec::vlan("physnet1", 0)).is_err());
        assert!(d.validate_provider_segment(&SegmentSpec::vlan("physnet1", 4095)).is_err());
        assert!(d.validate_provider_segment(&SegmentSpec::vlan("physnet9", 10)).is_err());
        assert!(d
            .validate_provider_segment(&SegmentSpec::new("vlan").with_physical_network("physnet1"))
            .is_err());
        assert!(d
            .validate_provider_segment(&SegmentSpec::new("vlan").with_segmentation_id(10))
            .is_err());
    }

    #[tokio::test]
    async fn test_tenant_allocation_order_and_exhaustion() {
        let d = driver();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let seg = d.allocate_tenant_segment().await.unwrap().unwrap();
            assert_eq!(seg.physical_network.as_deref(), Some("physnet1"));
            ids.push(seg.segmentation_id.unwrap());
        }
        assert_eq!(ids, vec![100, 101, 102]);
        assert!(d.allocate_tenant_segment().await.unwrap().is_none());
        assert_eq!(d.free_count("physnet1").await, 0);
    }

    #[tokio::test]
    async fn test_reserve_conflicts_with_allocation() {
        let d = driver();
        let seg = d.allocate_tenant_segment().await.unwrap().unwrap();
        let spec = SegmentSpec::vlan("physnet1", seg.segmentation_id.unwrap());
        assert!(matches!(
            d.reserve_provider_segment(&spec).await,
            Err(Ml2Error::SegmentInUse { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_and_reuse() {
        let d = driver();
        let first = d.allocate_tenant_segment().await.unwrap().unwrap();
        d.release_segment(&first).await;
        let again = d.allocate_tenant_segment().await.unwrap().unwrap();
        assert_eq!(again.segmentation_id, Some(100));
    }

    #[tokio::test]
    async fn test_release_untracked_is_noop() {
        let d = driver();
        let seg = VlanTypeDriver::segment("physnet1", 101);
        d.release_segment(&seg).await;
        assert_eq!(d.free_count("physnet1").await, 3);
    }

    #[tokio::test]
    async fn test_sync_allocations() {
        let d = driver();
        d.sync_allocations(&[
            VlanTypeDriver::segment("physnet1", 100),
            VlanTypeDriver::segment("physnet1", 101),
            VlanTypeDriver::segment("physnet2", 7),
        ])
        .await;
        let seg = d.allocate_tenant_segment().await.unwrap().unwrap();
        assert_eq!(seg.segmentation_id, Some(102));
        assert!(matches!(
            d.reserve_provider_segment(&SegmentSpec::vlan("physnet2", 7)).await,
            Err(Ml2Error::SegmentInUse { .. })
        ));
    }
}
