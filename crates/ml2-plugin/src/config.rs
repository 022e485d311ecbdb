//! Configuration file support for the ML2 engine.
//!
//! Loads and validates engine configuration from TOML files.
//! Default location: /etc/ml2/ml2.toml

use ml2_driver_api::{Ml2Error, Ml2Result, RetryPolicy};
use ml2_types::{NetworkType, ParseError, SegmentationId, VlanId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ml2/ml2.toml";

/// Wildcard accepted in `flat_networks` to allow any physical network.
pub const ANY_PHYSICAL_NETWORK: &str = "*";

/// Driver selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriversConfig {
    /// Enabled type drivers, by network type name
    #[serde(default = "default_type_drivers")]
    pub type_drivers: Vec<String>,

    /// Network types tried, in order, for tenant networks
    #[serde(default = "default_tenant_network_types")]
    pub tenant_network_types: Vec<String>,

    /// Mechanism drivers, in registration (dispatch) order
    #[serde(default)]
    pub mechanism_drivers: Vec<String>,
}

/// Flat type driver options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatConfig {
    /// Physical networks usable by flat networks ("*" for any)
    #[serde(default)]
    pub flat_networks: Vec<String>,
}

/// VLAN type driver options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VlanConfig {
    /// `<physnet>[:<min>:<max>]` entries; physnets without a range are provider-only
    #[serde(default)]
    pub network_vlan_ranges: Vec<String>,
}

/// GRE type driver options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GreConfig {
    /// `<min>:<max>` tunnel id ranges available for tenant networks
    #[serde(default)]
    pub tunnel_id_ranges: Vec<String>,
}

/// VXLAN type driver options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VxlanConfig {
    /// `<min>:<max>` VNI ranges available for tenant networks
    #[serde(default)]
    pub vni_ranges: Vec<String>,
}

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for a single mechanism driver postcommit call
    #[serde(default = "default_postcommit_timeout")]
    pub postcommit_timeout_ms: u64,

    /// How long a transaction waits for a row lock
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Attempts for operations hitting transient store failures
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_initial_backoff")]
    pub retry_initial_backoff_ms: u64,

    #[serde(default = "default_retry_max_backoff")]
    pub retry_max_backoff_ms: u64,

    /// Agents silent for longer than this are not used for port binding
    #[serde(default = "default_agent_down_time")]
    pub agent_down_time_ms: u64,
}

/// Complete ML2 configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ml2Config {
    #[serde(default)]
    pub ml2: DriversConfig,

    #[serde(default)]
    pub ml2_type_flat: FlatConfig,

    #[serde(default)]
    pub ml2_type_vlan: VlanConfig,

    #[serde(default)]
    pub ml2_type_gre: GreConfig,

    #[serde(default)]
    pub ml2_type_vxlan: VxlanConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_type_drivers() -> Vec<String> {
    NetworkType::ALL.iter().map(|t| t.as_str().to_string()).collect()
}

fn default_tenant_network_types() -> Vec<String> {
    vec![NetworkType::Local.as_str().to_string()]
}

fn default_postcommit_timeout() -> u64 {
    30_000
}

fn default_lock_timeout() -> u64 {
    5_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_backoff() -> u64 {
    10
}

fn default_retry_max_backoff() -> u64 {
    500
}

fn default_agent_down_time() -> u64 {
    75_000
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            type_drivers: default_type_drivers(),
            tenant_network_types: default_tenant_network_types(),
            mechanism_drivers: Vec::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            postcommit_timeout_ms: default_postcommit_timeout(),
            lock_timeout_ms: default_lock_timeout(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_backoff_ms: default_retry_initial_backoff(),
            retry_max_backoff_ms: default_retry_max_backoff(),
            agent_down_time_ms: default_agent_down_time(),
        }
    }
}

/// Parses a `<min>:<max>` id range.
pub fn parse_id_range(entry: &str) -> Result<(SegmentationId, SegmentationId), ParseError> {
    let invalid = || ParseError::InvalidRange(entry.to_string());
    let (min, max) = entry.split_once(':').ok_or_else(invalid)?;
    let min: SegmentationId = min.trim().parse().map_err(|_| invalid())?;
    let max: SegmentationId = max.trim().parse().map_err(|_| invalid())?;
    if min > max {
        return Err(invalid());
    }
    Ok((min, max))
}

/// Parses a `<physnet>[:<min>:<max>]` VLAN range entry.
pub fn parse_vlan_range(
    entry: &str,
) -> Result<(String, Option<(SegmentationId, SegmentationId)>), ParseError> {
    let invalid = || ParseError::InvalidVlanRange(entry.to_string());
    let mut parts = entry.split(':');
    let physnet = parts.next().map(str::trim).unwrap_or_default();
    if physnet.is_empty() {
        return Err(invalid());
    }
    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => Ok((physnet.to_string(), None)),
        (Some(min), Some(max), None) => {
            let min = parse_vlan_bound(min).map_err(|_| invalid())?;
            let max = parse_vlan_bound(max).map_err(|_| invalid())?;
            if min > max {
                return Err(invalid());
            }
            Ok((physnet.to_string(), Some((min, max))))
        }
        _ => Err(invalid()),
    }
}

fn parse_vlan_bound(s: &str) -> Result<SegmentationId, ParseError> {
    s.parse::<VlanId>().map(u32::from)
}

impl Ml2Config {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Ml2Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| {
                Ml2Error::config(format!("Failed to parse config file {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Ml2Error::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Ml2Result<Self> {
        toml::from_str(content).map_err(|e| Ml2Error::config(e.to_string()))
    }

    /// Serializes configuration to TOML.
    pub fn to_toml(&self) -> Ml2Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Ml2Error::config(format!("Failed to serialize config: {}", e)))
    }

    /// Enabled type drivers, in configured order.
    pub fn type_drivers(&self) -> Ml2Result<Vec<NetworkType>> {
        parse_types("type_drivers", &self.ml2.type_drivers)
    }

    /// Tenant network types, in priority order.
    pub fn tenant_network_types(&self) -> Ml2Result<Vec<NetworkType>> {
        parse_types("tenant_network_types", &self.ml2.tenant_network_types)
    }

    /// VLAN physical networks in configured order with their tenant ranges.
    pub fn vlan_ranges(&self) -> Ml2Result<Vec<(String, Vec<(SegmentationId, SegmentationId)>)>> {
        let mut out: Vec<(String, Vec<(SegmentationId, SegmentationId)>)> = Vec::new();
        for entry in &self.ml2_type_vlan.network_vlan_ranges {
            let (physnet, range) =
                parse_vlan_range(entry).map_err(|e| Ml2Error::config(e.to_string()))?;
            match out.iter_mut().find(|(p, _)| *p == physnet) {
                Some((_, ranges)) => ranges.extend(range),
                None => out.push((physnet, range.into_iter().collect())),
            }
        }
        Ok(out)
    }

    pub fn gre_ranges(&self) -> Ml2Result<Vec<(SegmentationId, SegmentationId)>> {
        parse_ranges(&self.ml2_type_gre.tunnel_id_ranges)
    }

    pub fn vxlan_ranges(&self) -> Ml2Result<Vec<(SegmentationId, SegmentationId)>> {
        parse_ranges(&self.ml2_type_vxlan.vni_ranges)
    }

    /// Get postcommit timeout as Duration
    pub fn postcommit_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.postcommit_timeout_ms)
    }

    /// Get lock timeout as Duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.lock_timeout_ms)
    }

    pub fn agent_down_time(&self) -> Duration {
        Duration::from_millis(self.engine.agent_down_time_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.engine.retry_max_attempts,
            initial_backoff: Duration::from_millis(self.engine.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.engine.retry_max_backoff_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Ml2Result<()> {
        let enabled = self.type_drivers()?;
        if enabled.is_empty() {
            return Err(Ml2Error::config("type_drivers must not be empty"));
        }
        for ty in self.tenant_network_types()? {
            if !enabled.contains(&ty) {
                return Err(Ml2Error::config(format!(
                    "tenant network type '{}' is not an enabled type driver",
                    ty
                )));
            }
        }
        let mut seen = Vec::new();
        for name in &self.ml2.mechanism_drivers {
            if seen.contains(&name) {
                return Err(Ml2Error::config(format!(
                    "mechanism driver '{}' listed twice",
                    name
                )));
            }
            seen.push(name);
        }
        self.vlan_ranges()?;
        self.gre_ranges()?;
        self.vxlan_ranges()?;

        if self.engine.postcommit_timeout_ms == 0 {
            return Err(Ml2Error::config("postcommit_timeout_ms must be > 0"));
        }
        if self.engine.agent_down_time_ms == 0 {
            return Err(Ml2Error::config("agent_down_time_ms must be > 0"));
        }
        if self.engine.retry_max_attempts == 0 {
            return Err(Ml2Error::config("retry_max_attempts must be > 0"));
        }
        Ok(())
    }
}

fn parse_types(field: &str, names: &[String]) -> Ml2Result<Vec<NetworkType>> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let ty: NetworkType = name
            .parse()
            .map_err(|e: ParseError| Ml2Error::config(format!("{}: {}", field, e)))?;
        if out.contains(&ty) {
            return Err(Ml2Error::config(format!("{}: '{}' listed twice", field, ty)));
        }
        out.push(ty);
    }
    Ok(out)
}

fn parse_ranges(entries: &[String]) -> Ml2Result<Vec<(SegmentationId, SegmentationId)>> {
    entries
        .iter()
        .map(|e| parse_id_range(e).map_err(|err| Ml2Error::config(err.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Ml2Config::default();
        assert_eq!(config.type_drivers().unwrap().len(), 5);
        assert_eq!(
            config.tenant_network_types().unwrap(),
            vec![NetworkType::Local]
        );
        assert!(config.ml2.mechanism_drivers.is_empty());
        assert_eq!(config.postcommit_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[ml2]
type_drivers = ["flat", "vlan", "vxlan"]
tenant_network_types = ["vlan", "vxlan"]
mechanism_drivers = ["logger", "openvswitch"]

[ml2_type_flat]
flat_networks = ["*"]

[ml2_type_vlan]
network_vlan_ranges = ["physnet1:100:102", "physnet2", "physnet1:200:201"]

[ml2_type_vxlan]
vni_ranges = ["1001:2000"]

[engine]
postcommit_timeout_ms = 250
"#;
        let config = Ml2Config::from_toml(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.tenant_network_types().unwrap(),
            vec![NetworkType::Vlan, NetworkType::Vxlan]
        );
        assert_eq!(
            config.vlan_ranges().unwrap(),
            vec![
                ("physnet1".to_string(), vec![(100, 102), (200, 201)]),
                ("physnet2".to_string(), vec![]),
            ]
        );
        assert_eq!(config.vxlan_ranges().unwrap(), vec![(1001, 2000)]);
        assert_eq!(config.postcommit_timeout(), Duration::from_millis(250));
        // Unspecified values should use defaults
        assert_eq!(config.engine.lock_timeout_ms, 5_000);
    }

    #[test]
    fn test_parse_id_range() {
        assert_eq!(parse_id_range("1:100").unwrap(), (1, 100));
        assert!(parse_id_range("100:1").is_err());
        assert!(parse_id_range("100").is_err());
        assert!(parse_id_range("a:b").is_err());
    }

    #[test]
    fn test_parse_vlan_range() {
        assert_eq!(parse_vlan_range("physnet1").unwrap(), ("physnet1".into(), None));
        assert_eq!(
            parse_vlan_range("physnet1:10:20").unwrap(),
            ("physnet1".into(), Some((10, 20)))
        );
        assert!(parse_vlan_range("physnet1:0:20").is_err());
        assert!(parse_vlan_range("physnet1:10").is_err());
        assert!(parse_vlan_range(":10:20").is_err());
    }

    #[test]
    fn test_validate_unknown_type() {
        let mut config = Ml2Config::default();
        config.ml2.type_drivers = vec!["geneve".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_tenant_type_not_enabled() {
        let mut config = Ml2Config::default();
        config.ml2.type_drivers = vec!["local".into()];
        config.ml2.tenant_network_types = vec!["vxlan".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_mechanism_driver() {
        let mut config = Ml2Config::default();
        config.ml2.mechanism_drivers = vec!["logger".into(), "logger".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = Ml2Config::default();
        let toml_str = config.to_toml().unwrap();
        assert!(toml_str.contains("type_drivers"));
        assert!(toml_str.contains("postcommit_timeout_ms"));
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = Ml2Config::load_or_default("/nonexistent/ml2.toml").unwrap();
        assert_eq!(config.engine.retry_max_attempts, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ml2.toml");
        fs::write(&path, "[ml2]\nmechanism_drivers = [\"logger\"]\n").unwrap();
        let config = Ml2Config::load_or_default(&path).unwrap();
        assert_eq!(config.ml2.mechanism_drivers, vec!["logger".to_string()]);
    }
}
