//! Type manager: routes segment operations to the type driver owning each network type.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use ml2_driver_api::{Ml2Error, Ml2Result, TunnelEndpoints, TypeDriver};
use ml2_types::{NetworkSegment, NetworkType, SegmentSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SOURCE: &str = "TypeManager";

/// Owns exactly one [`TypeDriver`] per enabled network type.
pub struct TypeManager {
    drivers: HashMap<NetworkType, Arc<dyn TypeDriver>>,
    /// Enabled types in configured order, for logging and iteration.
    order: Vec<NetworkType>,
    tenant_network_types: Vec<NetworkType>,
}

impl std::fmt::Debug for TypeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeManager")
            .field("types", &self.order)
            .field("tenant_network_types", &self.tenant_network_types)
            .finish()
    }
}

impl TypeManager {
    pub fn new(tenant_network_types: Vec<NetworkType>) -> Self {
        Self {
            drivers: HashMap::new(),
            order: Vec::new(),
            tenant_network_types,
        }
    }

    /// Registers a type driver. A second driver for the same type is a config error.
    pub fn register(&mut self, driver: Arc<dyn TypeDriver>) -> Ml2Result<()> {
        let ty = driver.network_type();
        if self.drivers.contains_key(&ty) {
            return Err(Ml2Error::config(format!(
                "type driver for '{}' registered twice",
                ty
            )));
        }
        info!("Registered type driver: {}", ty);
        self.drivers.insert(ty, driver);
        self.order.push(ty);
        Ok(())
    }

    pub fn driver(&self, ty: NetworkType) -> Option<&Arc<dyn TypeDriver>> {
        self.drivers.get(&ty)
    }

    /// Enabled network types, in registration order.
    pub fn network_types(&self) -> &[NetworkType] {
        &self.order
    }

    pub fn tenant_network_types(&self) -> &[NetworkType] {
        &self.tenant_network_types
    }

    /// Initializes every driver and checks the tenant type list.
    pub async fn initialize(&self) -> Ml2Result<()> {
        for ty in &self.tenant_network_types {
            let driver = self.drivers.get(ty).ok_or_else(|| {
                Ml2Error::config(format!("tenant network type '{}' has no type driver", ty))
            })?;
            if !driver.is_tenant_capable() {
                return Err(Ml2Error::config(format!(
                    "network type '{}' cannot be used for tenant networks",
                    ty
                )));
            }
        }
        for ty in &self.order {
            if let Some(driver) = self.drivers.get(ty) {
                driver.initialize().await?;
            }
        }
        info!(
            "TypeManager initialized: types={:?} tenant_network_types={:?}",
            self.order, self.tenant_network_types
        );
        Ok(())
    }

    fn driver_for(&self, spec: &SegmentSpec) -> Ml2Result<&Arc<dyn TypeDriver>> {
        let ty = spec
            .parsed_type()
            .map_err(|e| Ml2Error::invalid_segment(e.to_string()))?;
        self.drivers.get(&ty).ok_or_else(|| {
            Ml2Error::invalid_segment(format!("network type '{}' is not enabled", ty))
        })
    }

    pub fn validate_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<()> {
        self.driver_for(spec)?.validate_provider_segment(spec)
    }

    /// Validates and reserves a provider segment.
    pub async fn reserve_provider_segment(&self, spec: &SegmentSpec) -> Ml2Result<NetworkSegment> {
        let driver = self.driver_for(spec)?;
        driver.validate_provider_segment(spec)?;
        match driver.reserve_provider_segment(spec).await {
            Ok(segment) => {
                audit_log!(AuditRecord::new(
                    AuditCategory::SegmentAllocation,
                    SOURCE,
                    "reserve_provider_segment"
                )
                .with_outcome(AuditOutcome::Success)
                .with_object_id(segment.to_string())
                .with_object_type("segment"));
                Ok(segment)
            }
            Err(e) => {
                audit_log!(AuditRecord::new(
                    AuditCategory::SegmentAllocation,
                    SOURCE,
                    "reserve_provider_segment"
                )
                .with_outcome(AuditOutcome::Denied)
                .with_object_type("segment")
                .with_error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Allocates a tenant segment from the first type in `priority` with a free id.
    pub async fn allocate_tenant_segment(
        &self,
        priority: &[NetworkType],
    ) -> Ml2Result<NetworkSegment> {
        for ty in priority {
            let Some(driver) = self.drivers.get(ty) else {
                warn!("Tenant network type {} has no driver, skipping", ty);
                continue;
            };
            if !driver.is_tenant_capable() {
                continue;
            }
            if let Some(segment) = driver.allocate_tenant_segment().await? {
                audit_log!(AuditRecord::new(
                    AuditCategory::SegmentAllocation,
                    SOURCE,
                    "allocate_tenant_segment"
                )
                .with_outcome(AuditOutcome::Success)
                .with_object_id(segment.to_string())
                .with_object_type("segment"));
                return Ok(segment);
            }
            debug!("Tenant pool for {} exhausted", ty);
        }
        audit_log!(AuditRecord::new(
            AuditCategory::SegmentAllocation,
            SOURCE,
            "allocate_tenant_segment"
        )
        .with_object_type("segment")
        .with_error("all tenant pools exhausted"));
        Err(Ml2Error::NoNetworkAvailable)
    }

    /// Returns a segment to its pool; no-op for unknown types or untracked ids.
    pub async fn release_segment(&self, segment: &NetworkSegment) {
        if let Some(driver) = self.drivers.get(&segment.network_type) {
            driver.release_segment(segment).await;
            audit_log!(AuditRecord::new(
                AuditCategory::SegmentAllocation,
                SOURCE,
                "release_segment"
            )
            .with_outcome(AuditOutcome::Success)
            .with_object_id(segment.to_string())
            .with_object_type("segment"));
        }
    }

    /// Realizes the segments of a new network, in list order.
    ///
    /// An empty `specs` list allocates one tenant segment. On any failure
    /// every segment already obtained for this request is released before
    /// the error is returned.
    pub async fn create_network_segments(
        &self,
        specs: &[SegmentSpec],
    ) -> Ml2Result<Vec<NetworkSegment>> {
        if specs.is_empty() {
            let segment = self
                .allocate_tenant_segment(&self.tenant_network_types)
                .await?;
            return Ok(vec![segment]);
        }

        for spec in specs {
            self.validate_provider_segment(spec)?;
        }

        let mut segments = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            match self.reserve_provider_segment(spec).await {
                Ok(segment) => segments.push(segment.at_index(index)),
                Err(e) => {
                    self.release_network_segments(&segments).await;
                    return Err(e);
                }
            }
        }
        Ok(segments)
    }

    /// Releases every segment of a network, in reverse order.
    pub async fn release_network_segments(&self, segments: &[NetworkSegment]) {
        for segment in segments.iter().rev() {
            self.release_segment(segment).await;
        }
    }

    /// Rebuilds every driver's pool from the segments of live networks.
    pub async fn sync_allocations(&self, live: &[NetworkSegment]) {
        for ty in &self.order {
            if let Some(driver) = self.drivers.get(ty) {
                driver.sync_allocations(live).await;
            }
        }
        info!("Synchronized type driver pools with {} live segments", live.len());
    }

    /// Tunnel endpoint bookkeeping for an overlay type, if enabled.
    pub fn tunnel_endpoints(&self, ty: NetworkType) -> Option<&dyn TunnelEndpoints> {
        self.drivers.get(&ty)?.tunnel_endpoints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_drivers::{FlatTypeDriver, LocalTypeDriver, TunnelTypeDriver, VlanTypeDriver};
    use pretty_assertions::assert_eq;

    fn manager(tenant: Vec<NetworkType>) -> TypeManager {
        let mut tm = TypeManager::new(tenant);
        tm.register(Arc::new(LocalTypeDriver::new())).unwrap();
        tm.register(Arc::new(FlatTypeDriver::new(vec!["physnet1".into()])))
            .unwrap();
        tm.register(Arc::new(VlanTypeDriver::new(vec![(
            "physnet1".into(),
            vec![(100, 101)],
        )])))
        .unwrap();
        tm.register(Arc::new(TunnelTypeDriver::vxlan(vec![(5000, 5000)])))
            .unwrap();
        tm
    }

    #[test]
    fn test_duplicate_registration() {
        let mut tm = manager(vec![]);
        assert!(tm.register(Arc::new(LocalTypeDriver::new())).is_err());
    }

    #[tokio::test]
    async fn test_initialize_rejects_flat_tenant_type() {
        let tm = manager(vec![NetworkType::Flat]);
        assert!(matches!(tm.initialize().await, Err(Ml2Error::Config { .. })));

        let tm = manager(vec![NetworkType::Gre]);
        assert!(matches!(tm.initialize().await, Err(Ml2Error::Config { .. })));

        let tm = manager(vec![NetworkType::Vlan, NetworkType::Vxlan]);
        assert!(tm.initialize().await.is_ok());
    }

    #[test]
    fn test_validate_unknown_or_disabled_type() {
        let tm = manager(vec![]);
        assert!(matches!(
            tm.validate_provider_segment(&SegmentSpec::new("bogus")),
            Err(Ml2Error::InvalidSegmentAttributes { .. })
        ));
        assert!(matches!(
            tm.validate_provider_segment(&SegmentSpec::gre(10)),
            Err(Ml2Error::InvalidSegmentAttributes { .. })
        ));
    }

    #[tokio::test]
    async fn test_tenant_allocation_priority() {
        let tm = manager(vec![NetworkType::Vlan, NetworkType::Vxlan]);
        let priority = tm.tenant_network_types().to_vec();

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(tm.allocate_tenant_segment(&priority).await.unwrap().to_string());
        }
        assert_eq!(got, vec!["vlan:physnet1:100", "vlan:physnet1:101", "vxlan:5000"]);
        assert!(matches!(
            tm.allocate_tenant_segment(&priority).await,
            Err(Ml2Error::NoNetworkAvailable)
        ));
    }

    #[tokio::test]
    async fn test_multi_segment_failure_releases_earlier() {
        let tm = manager(vec![]);
        let taken = tm
            .reserve_provider_segment(&SegmentSpec::vxlan(7000))
            .await
            .unwrap();

        let err = tm
            .create_network_segments(&[SegmentSpec::vlan("physnet1", 100), SegmentSpec::vxlan(7000)])
            .await
            .unwrap_err();
        assert!(matches!(err, Ml2Error::SegmentInUse { .. }));

        // vlan 100 went back to the pool
        let seg = tm.reserve_provider_segment(&SegmentSpec::vlan("physnet1", 100)).await;
        assert!(seg.is_ok());
        tm.release_segment(&taken).await;
    }

    #[tokio::test]
    async fn test_multi_segment_indexes() {
        let tm = manager(vec![]);
        let segs = tm
            .create_network_segments(&[SegmentSpec::flat("physnet1"), SegmentSpec::vxlan(9)])
            .await
            .unwrap();
        assert_eq!(segs[0].segment_index, 0);
        assert_eq!(segs[1].segment_index, 1);
        assert_eq!(segs[1].to_string(), "vxlan:9");
    }

    #[tokio::test]
    async fn test_validation_failure_reserves_nothing() {
        let tm = manager(vec![]);
        let err = tm
            .create_network_segments(&[SegmentSpec::flat("physnet1"), SegmentSpec::vlan("physnet1", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, Ml2Error::InvalidSegmentAttributes { .. }));
        assert!(tm.reserve_provider_segment(&SegmentSpec::flat("physnet1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_sync_allocations() {
        let tm = manager(vec![NetworkType::Vlan]);
        let live = vec![NetworkSegment::new(
            NetworkType::Vlan,
            Some("physnet1".into()),
            Some(100),
        )];
        tm.sync_allocations(&live).await;
        let seg = tm.allocate_tenant_segment(&[NetworkType::Vlan]).await.unwrap();
        assert_eq!(seg.segmentation_id, Some(101));
    }

    #[tokio::test]
    async fn test_tunnel_endpoints_only_for_overlays() {
        let tm = manager(vec![]);
        assert!(tm.tunnel_endpoints(NetworkType::Vxlan).is_some());
        assert!(tm.tunnel_endpoints(NetworkType::Vlan).is_none());
        assert!(tm.tunnel_endpoints(NetworkType::Gre).is_none());
    }
}
