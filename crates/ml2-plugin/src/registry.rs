//! Static driver registry: configured names to driver instances.
//!
//! Type drivers are built in. Mechanism drivers are looked up by name in a
//! table of factory functions; `logger` and `openvswitch` are always
//! present and deployments may add their own before building the engine.

use crate::agents::AgentRegistry;
use crate::config::Ml2Config;
use crate::mech_drivers::{
    LoggerMechanismDriver, OpenvswitchMechanismDriver, LOGGER_DRIVER, OPENVSWITCH_DRIVER,
};
use crate::mechanism_manager::MechanismManager;
use crate::type_drivers::{FlatTypeDriver, LocalTypeDriver, TunnelTypeDriver, VlanTypeDriver};
use crate::type_manager::TypeManager;
use ml2_driver_api::{MechanismDriver, Ml2Error, Ml2Result, TypeDriver};
use ml2_types::NetworkType;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// What a mechanism driver factory gets to build its driver from.
#[derive(Debug, Clone)]
pub struct FactoryContext {
    pub config: Arc<Ml2Config>,
    pub agents: Arc<AgentRegistry>,
}

pub type MechanismFactory =
    Box<dyn Fn(&FactoryContext) -> Ml2Result<Arc<dyn MechanismDriver>> + Send + Sync>;

pub struct DriverRegistry {
    mechanism_factories: BTreeMap<String, MechanismFactory>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("mechanism_drivers", &self.mechanism_factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Registry holding the built-in mechanism drivers.
    pub fn new() -> Self {
        let mut registry = Self {
            mechanism_factories: BTreeMap::new(),
        };
        registry.register_mechanism(LOGGER_DRIVER, |_| {
            Ok(Arc::new(LoggerMechanismDriver::new()) as Arc<dyn MechanismDriver>)
        });
        registry.register_mechanism(OPENVSWITCH_DRIVER, |ctx| {
            Ok(Arc::new(OpenvswitchMechanismDriver::new(ctx.agents.clone())) as Arc<dyn MechanismDriver>)
        });
        registry
    }

    /// Adds (or replaces) a mechanism driver factory.
    pub fn register_mechanism<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&FactoryContext) -> Ml2Result<Arc<dyn MechanismDriver>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Mechanism driver factory registered: {}", name);
        self.mechanism_factories.insert(name, Box::new(factory));
    }

    pub fn mechanism_names(&self) -> Vec<&str> {
        self.mechanism_factories.keys().map(String::as_str).collect()
    }

    /// Builds one type driver per enabled type.
    pub fn build_type_manager(&self, config: &Ml2Config) -> Ml2Result<TypeManager> {
        let mut manager = TypeManager::new(config.tenant_network_types()?);
        for ty in config.type_drivers()? {
            manager.register(build_type_driver(ty, config)?)?;
        }
        Ok(manager)
    }

    /// Builds the mechanism drivers in configured order.
    pub fn build_mechanism_manager(&self, ctx: &FactoryContext) -> Ml2Result<MechanismManager> {
        let mut manager = MechanismManager::new(ctx.config.postcommit_timeout());
        for name in &ctx.config.ml2.mechanism_drivers {
            let factory = self.mechanism_factories.get(name).ok_or_else(|| {
                Ml2Error::config(format!(
                    "unknown mechanism driver '{}' (known: {})",
                    name,
                    self.mechanism_names().join(", ")
                ))
            })?;
            manager.register(factory(ctx)?)?;
        }
        Ok(manager)
    }
}

fn build_type_driver(ty: NetworkType, config: &Ml2Config) -> Ml2Result<Arc<dyn TypeDriver>> {
    let driver: Arc<dyn TypeDriver> = match ty {
        NetworkType::Local => Arc::new(LocalTypeDriver::new()),
        NetworkType::Flat => Arc::new(FlatTypeDriver::new(
            config.ml2_type_flat.flat_networks.clone(),
        )),
        NetworkType::Vlan => Arc::new(VlanTypeDriver::new(config.vlan_ranges()?)),
        NetworkType::Gre => Arc::new(TunnelTypeDriver::gre(config.gre_ranges()?)),
        NetworkType::Vxlan => Arc::new(TunnelTypeDriver::vxlan(config.vxlan_ranges()?)),
    };
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn ctx(config: Ml2Config) -> FactoryContext {
        FactoryContext {
            config: Arc::new(config),
            agents: Arc::new(AgentRegistry::new(Duration::from_secs(75))),
        }
    }

    #[test]
    fn test_builtin_names() {
        let registry = DriverRegistry::new();
        assert_eq!(registry.mechanism_names(), vec!["logger", "openvswitch"]);
    }

    #[test]
    fn test_build_in_configured_order() {
        let mut config = Ml2Config::default();
        config.ml2.mechanism_drivers = vec!["openvswitch".into(), "logger".into()];
        let manager = DriverRegistry::new().build_mechanism_manager(&ctx(config)).unwrap();
        assert_eq!(manager.names(), vec!["openvswitch", "logger"]);
    }

    #[test]
    fn test_unknown_mechanism_driver() {
        let mut config = Ml2Config::default();
        config.ml2.mechanism_drivers = vec!["cisco_nexus".into()];
        let err = DriverRegistry::new().build_mechanism_manager(&ctx(config)).unwrap_err();
        assert!(matches!(err, Ml2Error::Config { .. }));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = DriverRegistry::new();
        registry.register_mechanism("quiet", |_| {
            Ok(Arc::new(LoggerMechanismDriver::new()) as Arc<dyn MechanismDriver>)
        });
        let mut config = Ml2Config::default();
        config.ml2.mechanism_drivers = vec!["quiet".into()];
        assert!(registry.build_mechanism_manager(&ctx(config)).is_ok());
    }

    #[test]
    fn test_build_type_manager() {
        let mut config = Ml2Config::default();
        config.ml2.type_drivers = vec!["vlan".into(), "vxlan".into()];
        config.ml2.tenant_network_types = vec!["vxlan".into()];
        config.ml2_type_vxlan.vni_ranges = vec!["100:200".into()];
        let manager = DriverRegistry::new().build_type_manager(&config).unwrap();
        assert_eq!(manager.network_types(), &[NetworkType::Vlan, NetworkType::Vxlan]);
        assert!(manager.driver(NetworkType::Local).is_none());
    }
}
