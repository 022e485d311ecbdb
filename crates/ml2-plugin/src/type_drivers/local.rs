//! Local type driver: host-local networks with no id space.

use async_trait::async_trait;
use ml2_driver_api::{Ml2Error, Ml2Result, TypeDriver};
use ml2_types::{NetworkSegment, NetworkType, SegmentSpec};

#[derive(Debug, Default)]
pub struct LocalTypeDriver;

impl LocalTypeDriver {
    pub fn new() -> Self {
        Self
    }

    fn segment() -> NetworkSegment {
        NetworkSegment::new(NetworkType::Local, None, None)
    }
}

#[async_trait]
impl TypeDriver for LocalTypeDriver {
    fn network_type(&self) -> NetworkType {
        NetworkType::Local
    }

    fn validate_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<()> {
        if spec.physical_network.is_some() {
            return Err(Ml2Error::invalid_segment(
                "physical_network not allowed for local network",
            ));
        }
        if spec.segmentation_id.is_some() {
            return Err(Ml2Error::invalid_segment(
                "segmentation_id not allowed for local network",
            ));
        }
        Ok(())
    }

    async fn reserve_provider_segment(&self, _spec: &SegmentSpec) -> Ml2Result<NetworkSegment> {
        Ok(Self::segment())
    }

    async fn allocate_tenant_segment(&self) -> Ml2Result<Option<NetworkSegment>> {
        Ok(Some(Self::segment()))
    }

    async fn release_segment(&self, _segment: &NetworkSegment) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let driver = LocalTypeDriver::new();
        assert!(driver.validate_provider_segment(&SegmentSpec::local()).is_ok());
        assert!(driver
            .validate_provider_segment(&SegmentSpec::local().with_segmentation_id(1))
            .is_err());
        assert!(driver
            .validate_provider_segment(&SegmentSpec::local().with_physical_network("physnet1"))
            .is_err());
    }

    #[tokio::test]
    async fn test_allocation_never_exhausts() {
        let driver = LocalTypeDriver::new();
        for _ in 0..3 {
            let seg = driver.allocate_tenant_segment().await.unwrap().unwrap();
            assert_eq!(seg.network_type, NetworkType::Local);
            assert_eq!(seg.segmentation_id, None);
        }
    }
}
