//! ML2 driver-orchestration engine.
//!
//! Pluggable Layer-2 control plane: type drivers own segment types and their
//! id pools, mechanism drivers realize networks and ports on backends, and
//! [`Ml2Plugin`] runs every lifecycle operation through the
//! precommit / commit / postcommit protocol.
//!
//! # Example
//!
//! ```ignore
//! use ml2_plugin::{DriverRegistry, Ml2Config, Ml2Plugin, NetworkRequest};
//! use ml2_types::SegmentSpec;
//!
//! let config = Ml2Config::load_or_default("/etc/ml2/ml2.toml")?;
//! let plugin = Ml2Plugin::from_config(config, &DriverRegistry::new())?;
//! plugin.initialize().await?;
//!
//! let net = plugin
//!     .create_network(NetworkRequest::provider("admin", "public", vec![SegmentSpec::vlan("physnet1", 100)]))
//!     .await?;
//! ```

pub mod agents;
pub mod audit;
pub mod binding;
pub mod config;
pub mod mech_drivers;
pub mod mechanism_manager;
pub mod notifier;
pub mod plugin;
pub mod registry;
pub mod store;
pub mod type_drivers;
pub mod type_manager;

pub use agents::{AgentRegistry, AgentState, OVS_AGENT_TYPE};
pub use audit::{AuditCategory, AuditOutcome, AuditRecord};
pub use binding::{BindingCoordinator, BindingOutcome};
pub use config::{Ml2Config, DEFAULT_CONFIG_PATH};
pub use mechanism_manager::MechanismManager;
pub use notifier::{Notification, Notifier};
pub use plugin::{
    Ml2Plugin, NetworkRequest, NetworkUpdate, PortRequest, PortUpdate, SubnetRequest,
    SubnetUpdate,
};
pub use registry::{DriverRegistry, FactoryContext, MechanismFactory};
pub use store::{LockKey, MemoryStore, StoreError, Transaction};
pub use type_manager::TypeManager;
