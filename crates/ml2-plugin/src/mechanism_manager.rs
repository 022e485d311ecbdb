//! Mechanism manager: ordered precommit/postcommit dispatch to mechanism drivers.

use crate::audit::{AuditCategory, AuditRecord};
use crate::audit_log;
use ml2_driver_api::{
    DriverError, LifecycleEvent, MechanismDriver, Ml2Error, Ml2Result, Operation, Phase,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SOURCE: &str = "MechanismManager";

/// Owns the mechanism drivers in registration order.
///
/// The order is fixed once the engine starts and is the dispatch order of
/// both phases.
pub struct MechanismManager {
    drivers: Vec<Arc<dyn MechanismDriver>>,
    postcommit_timeout: Duration,
}

impl std::fmt::Debug for MechanismManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MechanismManager")
            .field("drivers", &self.names())
            .field("postcommit_timeout", &self.postcommit_timeout)
            .finish()
    }
}

impl MechanismManager {
    pub fn new(postcommit_timeout: Duration) -> Self {
        Self {
            drivers: Vec::new(),
            postcommit_timeout,
        }
    }

    /// Appends a driver to the dispatch order. Names must be unique.
    pub fn register(&mut self, driver: Arc<dyn MechanismDriver>) -> Ml2Result<()> {
        let name = driver.name().to_string();
        if self.drivers.iter().any(|d| d.name() == name) {
            return Err(Ml2Error::config(format!(
                "mechanism driver '{}' registered twice",
                name
            )));
        }
        info!(
            "Registered mechanism driver {} at position {}",
            name,
            self.drivers.len()
        );
        self.drivers.push(driver);
        Ok(())
    }

    pub fn drivers(&self) -> &[Arc<dyn MechanismDriver>] {
        &self.drivers
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    pub fn postcommit_timeout(&self) -> Duration {
        self.postcommit_timeout
    }

    /// Initializes every driver in registration order.
    pub async fn initialize(&self) -> Ml2Result<()> {
        for driver in &self.drivers {
            driver.initialize().await.map_err(|e| {
                Ml2Error::config(format!(
                    "mechanism driver '{}' failed to initialize: {}",
                    driver.name(),
                    e
                ))
            })?;
        }
        info!("MechanismManager initialized: {:?}", self.names());
        Ok(())
    }

    /// Runs `{operation}_{kind}_precommit` on every driver, stopping at the first error.
    pub async fn precommit(&self, operation: Operation, event: LifecycleEvent<'_>) -> Ml2Result<()> {
        let resource = event.resource_kind();
        for driver in &self.drivers {
            debug!("{}: {}_{}_precommit", driver.name(), operation, resource);
            if let Err(source) = event.deliver(driver.as_ref(), operation, Phase::Precommit).await {
                warn!(
                    "{} rejected {}_{}_precommit: {}",
                    driver.name(),
                    operation,
                    resource,
                    source
                );
                record_failure(driver.name(), operation, event, Phase::Precommit, &source);
                return Err(Ml2Error::PrecommitRejected {
                    driver: driver.name().to_string(),
                    operation,
                    resource,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Runs `{operation}_{kind}_postcommit` on every driver, each bounded by the
    /// postcommit timeout.
    ///
    /// Create and update stop at the first failure. Delete keeps going so
    /// every backend gets to clean up, then reports the first failure.
    pub async fn postcommit(&self, operation: Operation, event: LifecycleEvent<'_>) -> Ml2Result<()> {
        let resource = event.resource_kind();
        let mut first_failure: Option<Ml2Error> = None;

        for driver in &self.drivers {
            debug!("{}: {}_{}_postcommit", driver.name(), operation, resource);
            let call = event.deliver(driver.as_ref(), operation, Phase::Postcommit);
            let result = match tokio::time::timeout(self.postcommit_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(DriverError::Timeout(self.postcommit_timeout)),
            };
            let Err(source) = result else {
                continue;
            };

            error!(
                "{} failed {}_{}_postcommit: {}",
                driver.name(),
                operation,
                resource,
                source
            );
            record_failure(driver.name(), operation, event, Phase::Postcommit, &source);
            let failure = Ml2Error::PostcommitFailed {
                driver: driver.name().to_string(),
                operation,
                resource,
                source,
            };
            if operation != Operation::Delete {
                return Err(failure);
            }
            first_failure.get_or_insert(failure);
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn record_failure(
    driver: &str,
    operation: Operation,
    event: LifecycleEvent<'_>,
    phase: Phase,
    source: &DriverError,
) {
    let object_id = match event {
        LifecycleEvent::Network(c) => c.current().id,
        LifecycleEvent::Subnet(c) => c.current().id,
        LifecycleEvent::Port(c) => c.current().id,
    };
    let record = AuditRecord::new(
        AuditCategory::DriverFailure,
        driver,
        format!("{}_{}_{}", operation, event.resource_kind(), phase),
    )
    .with_object_id(object_id.to_string())
    .with_object_type(event.resource_kind().as_str())
    .with_details(serde_json::json!({ "dispatcher": SOURCE }))
    .with_error(source.to_string());
    audit_log!(record);
}
