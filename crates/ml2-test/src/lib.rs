//! Integration test infrastructure for the ML2 engine
//!
//! Provides:
//! - Configuration presets and request builders
//! - Scripted mechanism drivers that record, fail, stall, stage extension
//!   state or claim port bindings on demand
//! - Engine assembly helpers wiring those drivers into an [`Ml2Plugin`]
//!
//! [`Ml2Plugin`]: ml2_plugin::Ml2Plugin

pub mod drivers;
pub mod fixtures;

pub use drivers::{CallLog, Hook, ScriptedDriver};
pub use fixtures::*;
