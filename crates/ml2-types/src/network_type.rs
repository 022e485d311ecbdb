//! Network type (segment technology) identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Layer-2 technology realizing one segment of a virtual network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Host-local connectivity only; no physical network, no id.
    Local,
    /// Untagged traffic on a physical network.
    Flat,
    /// 802.1Q tagged traffic on a physical network.
    Vlan,
    /// GRE tunnel keyed by a 32-bit tunnel id.
    Gre,
    /// VXLAN overlay keyed by a 24-bit VNI.
    Vxlan,
}

impl NetworkType {
    /// All known network types.
    pub const ALL: [NetworkType; 5] = [
        NetworkType::Local,
        NetworkType::Flat,
        NetworkType::Vlan,
        NetworkType::Gre,
        NetworkType::Vxlan,
    ];

    /// Returns the canonical lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Local => "local",
            NetworkType::Flat => "flat",
            NetworkType::Vlan => "vlan",
            NetworkType::Gre => "gre",
            NetworkType::Vxlan => "vxlan",
        }
    }

    /// Returns true if segments of this type draw ids from a shared numeric pool.
    pub const fn is_pooled(&self) -> bool {
        matches!(self, NetworkType::Vlan | NetworkType::Gre | NetworkType::Vxlan)
    }

    /// Returns true for overlay types that run over tunnel endpoints.
    pub const fn is_tunnel(&self) -> bool {
        matches!(self, NetworkType::Gre | NetworkType::Vxlan)
    }

    /// Returns true if segments of this type live on a physical network.
    pub const fn requires_physical_network(&self) -> bool {
        matches!(self, NetworkType::Flat | NetworkType::Vlan)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(NetworkType::Local),
            "flat" => Ok(NetworkType::Flat),
            "vlan" => Ok(NetworkType::Vlan),
            "gre" => Ok(NetworkType::Gre),
            "vxlan" => Ok(NetworkType::Vxlan),
            _ => Err(ParseError::UnknownNetworkType(s.to_string())),
        }
    }
}
