//! Scripted mechanism drivers for exercising the dispatch protocol
//!
//! One [`ScriptedDriver`] type covers every behavior the integration suites
//! need; each instance is configured with a builder:
//!
//! ```ignore
//! let log = CallLog::default();
//! let flaky = ScriptedDriver::new("flaky", &log)
//!     .fail_on(Hook::postcommit(Operation::Create, ResourceKind::Network), DriverError::backend("down"));
//! ```

use async_trait::async_trait;
use ml2_driver_api::{
    BindingRequest, BindingResult, DriverError, DriverResult, MechanismDriver, NetworkContext,
    Operation, Phase, PortContext, ResourceKind, SubnetContext, TransactionHandle,
};
use ml2_types::{ResourceId, VifType};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One of the 18 lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hook {
    pub operation: Operation,
    pub resource: ResourceKind,
    pub phase: Phase,
}

impl Hook {
    pub const fn new(operation: Operation, resource: ResourceKind, phase: Phase) -> Self {
        Self {
            operation,
            resource,
            phase,
        }
    }

    pub const fn precommit(operation: Operation, resource: ResourceKind) -> Self {
        Self::new(operation, resource, Phase::Precommit)
    }

    pub const fn postcommit(operation: Operation, resource: ResourceKind) -> Self {
        Self::new(operation, resource, Phase::Postcommit)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.operation, self.resource, self.phase)
    }
}

/// Shared, ordered record of driver calls, as `"<driver>:<hook>"` entries.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, driver: &str, call: impl fmt::Display) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{}:{}", driver, call));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drivers that saw `hook`, in call order.
    pub fn drivers_for(&self, hook: Hook) -> Vec<String> {
        let suffix = format!(":{}", hook);
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }

    /// Hooks `driver` saw, in call order.
    pub fn hooks_of(&self, driver: &str) -> Vec<String> {
        let prefix = format!("{}:", driver);
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// A mechanism driver whose behavior is set per hook.
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    name: String,
    log: CallLog,
    failures: Vec<(Hook, DriverError)>,
    delays: Vec<(Hook, Duration)>,
    stage_extensions: bool,
    claims: Vec<(String, VifType)>,
}

impl ScriptedDriver {
    /// A driver that only records its calls.
    pub fn new(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            failures: Vec::new(),
            delays: Vec::new(),
            stage_extensions: false,
            claims: Vec::new(),
        }
    }

    /// Fails `hook` with `error`, after recording the call.
    pub fn fail_on(mut self, hook: Hook, error: DriverError) -> Self {
        self.failures.push((hook, error));
        self
    }

    /// Sleeps for `delay` inside `hook`.
    pub fn delay_on(mut self, hook: Hook, delay: Duration) -> Self {
        self.delays.push((hook, delay));
        self
    }

    /// Stages `{"driver": <name>, "hook": <hook>}` as extension state in
    /// every create and update precommit.
    pub fn with_extensions(mut self) -> Self {
        self.stage_extensions = true;
        self
    }

    /// Claims bindings on `host` with `vif_type`, on the first segment.
    pub fn claims(mut self, host: impl Into<String>, vif_type: VifType) -> Self {
        self.claims.push((host.into(), vif_type));
        self
    }

    pub fn into_arc(self) -> Arc<dyn MechanismDriver> {
        Arc::new(self)
    }

    async fn observe(
        &self,
        hook: Hook,
        resource_id: ResourceId,
        txn: Option<&TransactionHandle>,
    ) -> DriverResult<()> {
        self.log.push(&self.name, hook);

        if let Some((_, delay)) = self.delays.iter().find(|(h, _)| *h == hook) {
            tokio::time::sleep(*delay).await;
        }
        if self.stage_extensions && hook.operation != Operation::Delete {
            if let Some(txn) = txn {
                let value = json!({ "driver": self.name, "hook": hook.to_string() });
                txn.stage_extension(&self.name, resource_id, value).await;
            }
        }
        match self.failures.iter().find(|(h, _)| *h == hook) {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

macro_rules! scripted_hooks {
    ($($hook:ident($ctx:ident) => $op:ident $kind:ident $phase:ident),* $(,)?) => {
        #[async_trait]
        impl MechanismDriver for ScriptedDriver {
            fn name(&self) -> &str {
                &self.name
            }

            async fn bind_port(&self, request: BindingRequest<'_>) -> Option<BindingResult> {
                self.log.push(&self.name, "bind_port");
                let (_, vif_type) = self.claims.iter().find(|(host, _)| host == request.host_id)?;
                let segment = request.segments.first()?;
                Some(
                    BindingResult::new(vif_type.clone(), segment.segment_index)
                        .with_detail("driver", self.name.clone()),
                )
            }

            $(
                async fn $hook(&self, ctx: &$ctx) -> DriverResult<()> {
                    let hook = Hook::new(Operation::$op, ResourceKind::$kind, Phase::$phase);
                    self.observe(hook, ctx.current().id, ctx.transaction()).await
                }
            )*
        }
    };
}

scripted_hooks! {
    create_network_precommit(NetworkContext) => Create Network Precommit,
    create_network_postcommit(NetworkContext) => Create Network Postcommit,
    update_network_precommit(NetworkContext) => Update Network Precommit,
    update_network_postcommit(NetworkContext) => Update Network Postcommit,
    delete_network_precommit(NetworkContext) => Delete Network Precommit,
    delete_network_postcommit(NetworkContext) => Delete Network Postcommit,
    create_subnet_precommit(SubnetContext) => Create Subnet Precommit,
    create_subnet_postcommit(SubnetContext) => Create Subnet Postcommit,
    update_subnet_precommit(SubnetContext) => Update Subnet Precommit,
    update_subnet_postcommit(SubnetContext) => Update Subnet Postcommit,
    delete_subnet_precommit(SubnetContext) => Delete Subnet Precommit,
    delete_subnet_postcommit(SubnetContext) => Delete Subnet Postcommit,
    create_port_precommit(PortContext) => Create Port Precommit,
    create_port_postcommit(PortContext) => Create Port Postcommit,
    update_port_precommit(PortContext) => Update Port Precommit,
    update_port_postcommit(PortContext) => Update Port Postcommit,
    delete_port_precommit(PortContext) => Delete Port Precommit,
    delete_port_postcommit(PortContext) => Delete Port Postcommit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml2_types::Network;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hook_display() {
        let hook = Hook::postcommit(Operation::Delete, ResourceKind::Subnet);
        assert_eq!(hook.to_string(), "delete_subnet_postcommit");
    }

    #[tokio::test]
    async fn test_records_and_fails() {
        let log = CallLog::default();
        let hook = Hook::precommit(Operation::Create, ResourceKind::Network);
        let driver = ScriptedDriver::new("d1", &log).fail_on(hook, DriverError::rejected("no"));

        let ctx = NetworkContext::new(Network::new("t", "n", vec![]));
        assert_eq!(
            driver.create_network_precommit(&ctx).await,
            Err(DriverError::rejected("no"))
        );
        assert!(driver.create_network_postcommit(&ctx).await.is_ok());

        assert_eq!(log.drivers_for(hook), vec!["d1".to_string()]);
        assert_eq!(
            log.hooks_of("d1"),
            vec![
                "create_network_precommit".to_string(),
                "create_network_postcommit".to_string()
            ]
        );
        log.clear();
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_stages_extension_in_transaction() {
        let log = CallLog::default();
        let driver = ScriptedDriver::new("ext", &log).with_extensions();
        let txn = TransactionHandle::new(1);
        let net = Network::new("t", "n", vec![]);
        let ctx = NetworkContext::new(net.clone()).with_transaction(txn.clone());

        driver.create_network_precommit(&ctx).await.unwrap();
        assert_eq!(
            txn.staged_extension("ext", net.id).await,
            Some(json!({ "driver": "ext", "hook": "create_network_precommit" }))
        );
    }
}
