//! Built-in mechanism drivers.

mod logger;
mod openvswitch;

pub use logger::{LoggerMechanismDriver, LOGGER_DRIVER};
pub use openvswitch::{OpenvswitchMechanismDriver, INTEGRATION_BRIDGE, OPENVSWITCH_DRIVER};
