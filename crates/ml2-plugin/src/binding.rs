//! Binding coordinator: asks mechanism drivers, in order, to claim a port.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use ml2_driver_api::{BindingRequest, MechanismDriver};
use ml2_types::{Binding, NetworkSegment, Port};
use std::sync::Arc;
use tracing::{debug, info};

/// How a binding attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingOutcome {
    /// A driver claimed the port.
    Bound { driver: String, binding: Binding },
    /// No driver claimed the port on that host; the port is not yet realizable.
    NotClaimed { binding: Binding },
    /// No host is assigned.
    NoHost { binding: Binding },
}

impl BindingOutcome {
    pub fn binding(&self) -> &Binding {
        match self {
            BindingOutcome::Bound { binding, .. }
            | BindingOutcome::NotClaimed { binding }
            | BindingOutcome::NoHost { binding } => binding,
        }
    }

    pub fn into_binding(self) -> Binding {
        match self {
            BindingOutcome::Bound { binding, .. }
            | BindingOutcome::NotClaimed { binding }
            | BindingOutcome::NoHost { binding } => binding,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, BindingOutcome::Bound { .. })
    }
}

/// Resolves port bindings against the registered drivers.
///
/// The first driver (in registration order) whose `bind_port` returns a
/// result wins.
pub struct BindingCoordinator {
    drivers: Vec<Arc<dyn MechanismDriver>>,
}

impl BindingCoordinator {
    pub fn new(drivers: Vec<Arc<dyn MechanismDriver>>) -> Self {
        Self { drivers }
    }

    /// Resolves the binding of `port` on `host_id` over `segments`.
    ///
    /// Never fails: when nobody claims the port the result carries the
    /// unbound sentinel for that host.
    pub async fn resolve_binding(
        &self,
        port: &Port,
        host_id: Option<&str>,
        segments: &[NetworkSegment],
    ) -> BindingOutcome {
        let Some(host_id) = host_id else {
            return BindingOutcome::NoHost {
                binding: Binding::unbound(None),
            };
        };

        let request = BindingRequest {
            port,
            host_id,
            segments,
        };
        for driver in &self.drivers {
            let Some(result) = driver.bind_port(request).await else {
                debug!("{} did not claim port {} on {}", driver.name(), port.id, host_id);
                continue;
            };
            if segments.get(result.segment_index).is_none() {
                debug!(
                    "{} claimed port {} with unknown segment index {}, ignoring",
                    driver.name(),
                    port.id,
                    result.segment_index
                );
                continue;
            }

            info!(
                "Port {} bound on {} by {} (vif_type={})",
                port.id,
                host_id,
                driver.name(),
                result.vif_type
            );
            let record = AuditRecord::new(AuditCategory::PortBinding, driver.name(), "bind_port")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(port.id.to_string())
                .with_object_type("port")
                .with_details(serde_json::json!({
                    "host_id": host_id,
                    "vif_type": result.vif_type.as_str(),
                    "segment_index": result.segment_index,
                }));
            audit_log!(record);

            return BindingOutcome::Bound {
                driver: driver.name().to_string(),
                binding: Binding {
                    host_id: Some(host_id.to_string()),
                    vif_type: result.vif_type,
                    vif_details: result.vif_details,
                    segment_index: Some(result.segment_index),
                },
            };
        }

        info!("No mechanism driver could bind port {} on {}", port.id, host_id);
        BindingOutcome::NotClaimed {
            binding: Binding::unbound(Some(host_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ml2_driver_api::BindingResult;
    use ml2_types::{Network, NetworkType, VifType};
    use pretty_assertions::assert_eq;

    struct Claims {
        name: &'static str,
        host: &'static str,
        segment_index: usize,
    }

    #[async_trait]
    impl MechanismDriver for Claims {
        fn name(&self) -> &str {
            self.name
        }

        async fn bind_port(&self, request: BindingRequest<'_>) -> Option<BindingResult> {
            (request.host_id == self.host).then(|| {
                BindingResult::new(VifType::Other(self.name.to_string()), self.segment_index)
            })
        }
    }

    fn fixture() -> (Port, Vec<NetworkSegment>) {
        let net = Network::new(
            "t",
            "n",
            vec![NetworkSegment::new(NetworkType::Vlan, Some("physnet1".into()), Some(100))],
        );
        (Port::new(net.id, "t", "p"), net.segments)
    }

    #[tokio::test]
    async fn test_first_claim_wins() {
        let coordinator = BindingCoordinator::new(vec![
            Arc::new(Claims { name: "a", host: "h2", segment_index: 0 }),
            Arc::new(Claims { name: "b", host: "h1", segment_index: 0 }),
            Arc::new(Claims { name: "c", host: "h1", segment_index: 0 }),
        ]);
        let (port, segments) = fixture();

        let outcome = coordinator.resolve_binding(&port, Some("h1"), &segments).await;
        match &outcome {
            BindingOutcome::Bound { driver, binding } => {
                assert_eq!(driver, "b");
                assert_eq!(binding.vif_type, VifType::Other("b".into()));
                assert_eq!(binding.segment_index, Some(0));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_claimed_is_unbound() {
        let coordinator = BindingCoordinator::new(vec![Arc::new(Claims {
            name: "a",
            host: "h2",
            segment_index: 0,
        })]);
        let (port, segments) = fixture();

        let outcome = coordinator.resolve_binding(&port, Some("h1"), &segments).await;
        assert!(!outcome.is_bound());
        assert_eq!(outcome.binding().vif_type, VifType::Unbound);
        assert_eq!(outcome.binding().host_id.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn test_invalid_segment_index_ignored() {
        let coordinator = BindingCoordinator::new(vec![
            Arc::new(Claims { name: "bad", host: "h1", segment_index: 4 }),
            Arc::new(Claims { name: "good", host: "h1", segment_index: 0 }),
        ]);
        let (port, segments) = fixture();
        let outcome = coordinator.resolve_binding(&port, Some("h1"), &segments).await;
        assert!(matches!(outcome, BindingOutcome::Bound { ref driver, .. } if driver == "good"));
    }

    #[tokio::test]
    async fn test_no_host() {
        let coordinator = BindingCoordinator::new(vec![]);
        let (port, segments) = fixture();
        let outcome = coordinator.resolve_binding(&port, None, &segments).await;
        assert_eq!(outcome, BindingOutcome::NoHost { binding: Binding::default() });
    }
}
