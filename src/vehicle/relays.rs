// Eight-relay output bank, one bit per relay
use serde::{Deserialize, Serialize};

use crate::device::{DeviceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayBank(u8);

impl RelayBank {
    pub const COUNT: u8 = 8;

    pub fn from_mask(mask: u8) -> Self {
        Self(mask)
    }

    pub fn mask(self) -> u8 {
        self.0
    }

    pub fn is_on(self, relay: u8) -> bool {
        relay < Self::COUNT && self.0 & (1 << relay) != 0
    }

    /// Bank with `relay` flipped
    pub fn toggled(self, relay: u8) -> Result<Self> {
        if relay >= Self::COUNT {
            return Err(DeviceError::InvalidRelay(relay));
        }
        Ok(Self(self.0 ^ (1 << relay)))
    }
}
