//! Serialisable device configuration.

use serde::{Deserialize, Serialize};

use midi_ci_core::{DeviceInfo, FunctionBlock, Muid};

use crate::error::{Error, Result};

/// Smallest SysEx size a MIDI-CI device may declare.
pub const MIN_SYSEX_SIZE: usize = 128;

/// Settings that stay fixed for the lifetime of a [`Device`](super::Device).
///
/// Every field has a default, so a config file only needs the values it
/// changes:
///
/// ```json
/// { "identity": { "manufacturer": [0, 33, 9], "family": [1, 0], "model": [2, 0], "revision": [0, 0, 0, 1] },
///   "max_sysex_size": 4096 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    pub identity: DeviceInfo,
    pub function_block: FunctionBlock,
    /// Largest message the device accepts and produces.
    pub max_sysex_size: usize,
    /// Fixed MUID. A random one is drawn when absent.
    pub muid: Option<Muid>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            identity: DeviceInfo::default(),
            function_block: FunctionBlock::default(),
            max_sysex_size: 512,
            muid: None,
        }
    }
}

impl DeviceOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_sysex_size < MIN_SYSEX_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_sysex_size {} is below the minimum of {}",
                self.max_sysex_size, MIN_SYSEX_SIZE
            )));
        }

        let block = self.function_block;
        if block.num_groups == 0 || usize::from(block.first_group) + usize::from(block.num_groups) > 16 {
            return Err(Error::InvalidConfig(format!(
                "function block groups {}..{} are outside 0..16",
                block.first_group,
                usize::from(block.first_group) + usize::from(block.num_groups)
            )));
        }

        if let Some(muid) = self.muid {
            if Muid::new(muid.value()).is_none() || muid.is_broadcast() || muid.value() >= 0x0fff_ff00 {
                return Err(Error::InvalidConfig(format!("{muid} is not a usable device MUID")));
            }
        }

        for (name, bytes) in [
            ("manufacturer", &self.identity.manufacturer[..]),
            ("family", &self.identity.family[..]),
            ("model", &self.identity.model[..]),
            ("revision", &self.identity.revision[..]),
        ] {
            if bytes.iter().any(|b| b & 0x80 != 0) {
                return Err(Error::InvalidConfig(format!("identity {name} must be 7-bit")));
            }
        }
        Ok(())
    }
}
