//! Driver contracts for the ML2 driver-orchestration engine.
//!
//! This crate defines what the engine requires from the drivers it is
//! handed at start-up, and what drivers receive in return:
//!
//! - [`TypeDriver`]: validation and id-pool allocation for one network type
//! - [`MechanismDriver`]: precommit/postcommit hooks and optional port binding
//! - [`LifecycleContext`]: per-operation state passed to every hook
//! - [`TransactionHandle`]: staging area for precommit side effects
//! - [`Ml2Error`] / [`DriverError`]: the error taxonomy
//! - [`RetryPolicy`]: bounded retry of transient store failures
//!
//! # Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use ml2_driver_api::{DriverResult, MechanismDriver, NetworkContext};
//!
//! struct AuditDriver;
//!
//! #[async_trait]
//! impl MechanismDriver for AuditDriver {
//!     fn name(&self) -> &str { "audit" }
//!
//!     async fn create_network_precommit(&self, ctx: &NetworkContext) -> DriverResult<()> {
//!         if let Some(txn) = ctx.transaction() {
//!             txn.stage_extension(self.name(), ctx.current().id, serde_json::json!({"seen": true})).await;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

mod context;
mod error;
mod mechanism;
mod retry;
mod type_driver;

pub use context::{
    LifecycleContext, NetworkContext, PortContext, RowWrite, StagedWrites, SubnetContext,
    TransactionHandle,
};
pub use error::{DriverError, DriverResult, Ml2Error, Ml2Result};
pub use mechanism::{
    BindingRequest, BindingResult, LifecycleEvent, MechanismDriver, Operation, Phase, ResourceKind,
};
pub use retry::RetryPolicy;
pub use type_driver::{TunnelEndpoint, TunnelEndpoints, TypeDriver};
