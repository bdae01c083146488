//! Notifications about remote devices, queued while processing messages.

use midi_ci_core::message::{Acknowledgement, PropertyCapabilities};
use midi_ci_core::{ChannelAddress, Muid, ProfileAtAddress};

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A MUID was seen in discovery for the first time.
    DeviceAdded(Muid),
    /// A known MUID was invalidated. Its cached state is gone.
    DeviceRemoved(Muid),
    MessageNotAcknowledged {
        muid: Muid,
        nak: Acknowledgement,
    },
    /// A profile inquiry response replaced the cached states at `address`.
    ProfileStateReceived {
        muid: Muid,
        address: ChannelAddress,
    },
    ProfilePresenceChanged {
        muid: Muid,
        at: ProfileAtAddress,
        exists: bool,
    },
    /// Zero channels means the profile was disabled.
    ProfileEnablementChanged {
        muid: Muid,
        at: ProfileAtAddress,
        num_channels: u16,
    },
    ProfileDetailsReceived {
        muid: Muid,
        at: ProfileAtAddress,
        target: u8,
        data: Vec<u8>,
    },
    ProfileSpecificDataReceived {
        muid: Muid,
        at: ProfileAtAddress,
        data: Vec<u8>,
    },
    PropertyCapabilitiesReceived {
        muid: Muid,
        capabilities: PropertyCapabilities,
    },
}

impl DeviceEvent {
    /// The remote device the event is about.
    pub fn muid(&self) -> Muid {
        match self {
            Self::DeviceAdded(muid) | Self::DeviceRemoved(muid) => *muid,
            Self::MessageNotAcknowledged { muid, .. }
            | Self::ProfileStateReceived { muid, .. }
            | Self::ProfilePresenceChanged { muid, .. }
            | Self::ProfileEnablementChanged { muid, .. }
            | Self::ProfileDetailsReceived { muid, .. }
            | Self::ProfileSpecificDataReceived { muid, .. }
            | Self::PropertyCapabilitiesReceived { muid, .. } => *muid,
        }
    }
}
