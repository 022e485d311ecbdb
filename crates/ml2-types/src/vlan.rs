//! VLAN ID type with validation.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// VLAN 0 (priority tagged) and 4095 are reserved and never handed out
/// as segmentation ids.
///
/// # Examples
///
/// ```
/// use ml2_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
/// assert!(VlanId::new(0).is_err());
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct VlanId(u16);

impl VlanId {
    /// Minimum valid VLAN ID.
    pub const MIN: u16 = 1;

    /// Maximum valid VLAN ID.
    pub const MAX: u16 = 4094;

    /// Creates a new VLAN ID from a segmentation id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is not in the valid range (1-4094).
    pub const fn new(id: u32) -> Result<Self, ParseError> {
        if id >= Self::MIN as u32 && id <= Self::MAX as u32 {
            Ok(VlanId(id as u16))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    /// Returns the VLAN ID as a u16.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u32 = s.trim().parse().map_err(|_| ParseError::InvalidVlanId(0))?;
        VlanId::new(id)
    }
}

impl TryFrom<u32> for VlanId {
    type Error = ParseError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u32 {
    fn from(vlan: VlanId) -> u32 {
        u32::from(vlan.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_vlan_ids() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
    }

    #[test]
    fn test_invalid_vlan_ids() {
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
        assert!(VlanId::new(70_000).is_err());
    }

    #[test]
    fn test_parse() {
        let vlan: VlanId = " 100".parse().unwrap();
        assert_eq!(vlan.as_u16(), 100);
        assert!("vlan".parse::<VlanId>().is_err());
    }
}
