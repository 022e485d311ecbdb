//! Liveness and capability records reported by L2 agents.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ml2_types::NetworkType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

/// Agent type reported by Open vSwitch agents.
pub const OVS_AGENT_TYPE: &str = "Open vSwitch agent";

/// State reported by an agent on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub host: String,
    pub agent_type: String,
    /// physical network -> bridge
    #[serde(default)]
    pub bridge_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub tunnel_types: Vec<NetworkType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_ip: Option<IpAddr>,
    pub heartbeat: DateTime<Utc>,
}

impl AgentState {
    pub fn new(host: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            agent_type: agent_type.into(),
            bridge_mappings: BTreeMap::new(),
            tunnel_types: Vec::new(),
            tunnel_ip: None,
            heartbeat: Utc::now(),
        }
    }

    pub fn with_bridge_mapping(
        mut self,
        physical_network: impl Into<String>,
        bridge: impl Into<String>,
    ) -> Self {
        self.bridge_mappings
            .insert(physical_network.into(), bridge.into());
        self
    }

    pub fn with_tunnel(mut self, tunnel_type: NetworkType, tunnel_ip: IpAddr) -> Self {
        if !self.tunnel_types.contains(&tunnel_type) {
            self.tunnel_types.push(tunnel_type);
        }
        self.tunnel_ip = Some(tunnel_ip);
        self
    }
}

/// Agents keyed by (host, agent type).
#[derive(Debug)]
pub struct AgentRegistry {
    agents: DashMap<(String, String), AgentState>,
    down_time: Duration,
}

impl AgentRegistry {
    pub fn new(down_time: Duration) -> Self {
        Self {
            agents: DashMap::new(),
            down_time,
        }
    }

    /// Records a report. Returns true if the agent was not known before.
    pub fn report(&self, state: AgentState) -> bool {
        let key = (state.host.clone(), state.agent_type.clone());
        let is_new = self.agents.insert(key, state.clone()).is_none();
        if is_new {
            info!("New agent '{}' on host {}", state.agent_type, state.host);
        }
        is_new
    }

    pub fn get(&self, host: &str, agent_type: &str) -> Option<AgentState> {
        self.agents
            .get(&(host.to_string(), agent_type.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Returns the agent of `agent_type` on `host` if it reported recently enough.
    pub fn alive(&self, host: &str, agent_type: &str) -> Option<AgentState> {
        self.get(host, agent_type).filter(|a| self.is_alive(a))
    }

    pub fn is_alive(&self, agent: &AgentState) -> bool {
        let age = Utc::now().signed_duration_since(agent.heartbeat);
        age.to_std().map(|age| age <= self.down_time).unwrap_or(true)
    }

    pub fn remove(&self, host: &str, agent_type: &str) -> Option<AgentState> {
        self.agents
            .remove(&(host.to_string(), agent_type.to_string()))
            .map(|(_, state)| state)
    }

    /// Removes every agent whose last heartbeat is older than the down time.
    pub fn expire(&self) -> Vec<AgentState> {
        let dead: Vec<(String, String)> = self
            .agents
            .iter()
            .filter(|e| !self.is_alive(e.value()))
            .map(|e| e.key().clone())
            .collect();
        let mut expired = Vec::with_capacity(dead.len());
        for (host, agent_type) in dead {
            if let Some(state) = self.remove(&host, &agent_type) {
                warn!("Agent '{}' on host {} expired", agent_type, host);
                expired.push(state);
            }
        }
        expired
    }

    /// All known agents sorted by host.
    pub fn list(&self) -> Vec<AgentState> {
        let mut out: Vec<AgentState> = self.agents.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| (&a.host, &a.agent_type).cmp(&(&b.host, &b.agent_type)));
        out
    }
}
