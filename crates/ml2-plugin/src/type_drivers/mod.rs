//! Built-in type drivers.

mod flat;
mod local;
mod pool;
mod tunnel;
mod vlan;

pub use flat::FlatTypeDriver;
pub use local::LocalTypeDriver;
pub use pool::IdPool;
pub use tunnel::{TunnelTypeDriver, MAX_GRE_ID, MAX_VXLAN_VNI};
pub use vlan::VlanTypeDriver;
