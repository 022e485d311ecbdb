//! Agent reports, tunnel endpoint sync and pool reconciliation.

use super::Ml2Plugin;
use crate::agents::AgentState;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use ml2_driver_api::{Ml2Error, Ml2Result, TunnelEndpoint};
use ml2_types::NetworkType;
use std::net::IpAddr;
use tracing::{debug, instrument};

impl Ml2Plugin {
    /// Records an agent heartbeat. Agents advertising a tunnel IP are
    /// registered as endpoints of every tunnel type they support.
    ///
    /// Returns true if the agent was not known before.
    #[instrument(skip(self, state), fields(host = %state.host, agent_type = %state.agent_type))]
    pub async fn report_agent_state(&self, state: AgentState) -> bool {
        if let Some(ip) = state.tunnel_ip {
            for ty in &state.tunnel_types {
                match self.type_manager.tunnel_endpoints(*ty) {
                    Some(endpoints) => {
                        endpoints.add_endpoint(ip, Some(state.host.clone())).await;
                    }
                    None => debug!("Agent on {} reports disabled tunnel type {}", state.host, ty),
                }
            }
        }
        self.agents.report(state)
    }

    /// Drops agents that stopped reporting, withdrawing the tunnel
    /// endpoints they registered. Returns the expired agents.
    #[instrument(skip(self))]
    pub async fn expire_agents(&self) -> Vec<AgentState> {
        let expired = self.agents.expire();
        for agent in &expired {
            let Some(ip) = agent.tunnel_ip else {
                continue;
            };
            for ty in &agent.tunnel_types {
                let Some(endpoints) = self.type_manager.tunnel_endpoints(*ty) else {
                    continue;
                };
                // another host may have taken the address over since
                let owned = endpoints
                    .endpoints()
                    .await
                    .iter()
                    .any(|e| e.ip_address == ip && e.host.as_deref() == Some(agent.host.as_str()));
                if owned {
                    endpoints.remove_endpoint(ip).await;
                }
            }
            let record = AuditRecord::new(AuditCategory::ResourceDelete, "Ml2Plugin", "expire_agent")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(agent.host.clone())
                .with_object_type("agent")
                .with_details(serde_json::json!({ "agent_type": agent.agent_type }));
            audit_log!(record);
        }
        expired
    }

    /// Registers a tunnel endpoint and returns every endpoint of that type.
    #[instrument(skip(self))]
    pub async fn tunnel_sync(
        &self,
        tunnel_type: &str,
        ip_address: IpAddr,
        host: Option<String>,
    ) -> Ml2Result<Vec<TunnelEndpoint>> {
        let ty: NetworkType = tunnel_type
            .parse()
            .map_err(|e: ml2_types::ParseError| Ml2Error::invalid_request(e.to_string()))?;
        let endpoints = self.type_manager.tunnel_endpoints(ty).ok_or_else(|| {
            Ml2Error::invalid_request(format!("network type '{}' is not an enabled tunnel type", ty))
        })?;

        let endpoint = endpoints.add_endpoint(ip_address, host).await;
        let record = AuditRecord::new(AuditCategory::ResourceModify, "Ml2Plugin", "tunnel_sync")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(endpoint.ip_address.to_string())
            .with_object_type("endpoint")
            .with_details(serde_json::json!({
                "tunnel_type": ty,
                "host": endpoint.host,
            }));
        audit_log!(record);
        Ok(endpoints.endpoints().await)
    }

    /// Rebuilds every type driver's pool from the networks in the store.
    ///
    /// Waits for network creates holding an uncommitted segment, so ids
    /// in flight are never handed out twice.
    pub async fn sync_allocations(&self) {
        let _exclusive = self.allocations.write().await;
        let live = self.store.live_segments().await;
        self.type_manager.sync_allocations(&live).await;
    }
}
