//! Flat type driver: untagged networks, one per physical network.

use crate::config::ANY_PHYSICAL_NETWORK;
use async_trait::async_trait;
use ml2_driver_api::{Ml2Error, Ml2Result, TypeDriver};
use ml2_types::{NetworkSegment, NetworkType, SegmentSpec};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct FlatTypeDriver {
    flat_networks: Vec<String>,
    allocated: Mutex<HashSet<String>>,
}

impl FlatTypeDriver {
    pub fn new(flat_networks: Vec<String>) -> Self {
        Self {
            flat_networks,
            allocated: Mutex::new(HashSet::new()),
        }
    }

    fn allows(&self, physnet: &str) -> bool {
        self.flat_networks
            .iter()
            .any(|n| n == ANY_PHYSICAL_NETWORK || n == physnet)
    }

    /// Returns true if a flat network already occupies `physnet`.
    pub async fn is_allocated(&self, physnet: &str) -> bool {
        self.allocated.lock().await.contains(physnet)
    }
}

#[async_trait]
impl TypeDriver for FlatTypeDriver {
    fn network_type(&self) -> NetworkType {
        NetworkType::Flat
    }

    fn is_tenant_capable(&self) -> bool {
        false
    }

    fn validate_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<()> {
        let physnet = spec.physical_network.as_deref().ok_or_else(|| {
            Ml2Error::invalid_segment("physical_network required for flat provider network")
        })?;
        if !self.allows(physnet) {
            return Err(Ml2Error::invalid_segment(format!(
                "physical_network '{}' unknown for flat provider network",
                physnet
            )));
        }
        if spec.segmentation_id.is_some() {
            return Err(Ml2Error::invalid_segment(
                "segmentation_id not allowed for flat network",
            ));
        }
        Ok(())
    }

    async fn reserve_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<NetworkSegment> {
        let physnet = spec
            .physical_network
            .clone()
            .ok_or_else(|| Ml2Error::invalid_segment("physical_network required"))?;
        let segment = NetworkSegment::new(NetworkType::Flat, Some(physnet.clone()), None);

        let mut allocated = self.allocated.lock().await;
        if !allocated.insert(physnet) {
            return Err(Ml2Error::segment_in_use(segment.key()));
        }
        debug!("Reserved flat network on {:?}", segment.physical_network);
        Ok(segment)
    }

    async fn allocate_tenant_segment(&self) -> Ml2Result<Option<NetworkSegment>> {
        Ok(None)
    }

    async fn release_segment(&self, segment: &NetworkSegment) {
        if let Some(physnet) = &segment.physical_network {
            if self.allocated.lock().await.remove(physnet) {
                debug!("Released flat network on {}", physnet);
            }
        }
    }

    async fn sync_allocations(&self, live: &[NetworkSegment]) {
        let mut allocated = self.allocated.lock().await;
        *allocated = live
            .iter()
            .filter(|s| s.network_type == NetworkType::Flat)
            .filter_map(|s| s.physical_network.clone())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let driver = FlatTypeDriver::new(vec!["physnet1".into()]);
        assert!(driver.validate_provider_segment(&SegmentSpec::flat("physnet1")).is_ok());
        assert!(driver.validate_provider_segment(&SegmentSpec::flat("physnet9")).is_err());
        assert!(driver.validate_provider_segment(&SegmentSpec::new("flat")).is_err());
        assert!(driver
            .validate_provider_segment(&SegmentSpec::flat("physnet1").with_segmentation_id(3))
            .is_err());
    }

    #[test]
    fn test_wildcard() {
        let driver = FlatTypeDriver::new(vec!["*".into()]);
        assert!(driver.validate_provider_segment(&SegmentSpec::flat("anything")).is_ok());
    }

    #[tokio::test]
    async fn test_one_network_per_physnet() {
        let driver = FlatTypeDriver::new(vec!["physnet1".into()]);
        let spec = SegmentSpec::flat("physnet1");
        let seg = driver.reserve_provider_segment(&spec).await.unwrap();
        assert!(matches!(
            driver.reserve_provider_segment(&spec).await,
            Err(Ml2Error::SegmentInUse { .. })
        ));

        driver.release_segment(&seg).await;
        assert!(!driver.is_allocated("physnet1").await);
        assert!(driver.reserve_provider_segment(&spec).await.is_ok());
    }

    #[tokio::test]
    async fn test_not_tenant_capable() {
        let driver = FlatTypeDriver::new(vec!["*".into()]);
        assert!(!driver.is_tenant_capable());
        assert!(driver.allocate_tenant_segment().await.unwrap().is_none());
    }
}
