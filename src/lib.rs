//! # midi-ci - MIDI Capability Inquiry
//!
//! MIDI-CI lets MIDI devices discover each other, negotiate profiles, and
//! exchange JSON properties over System Exclusive messages.
//!
//! ## Architecture
//!
//! midi-ci is an umbrella crate over:
//! - **midi-ci-core** - Addressing, profile states, message codec, encodings
//! - **midi-ci-host** - Device, profile negotiation, property exchange, chunking
//!
//! ## Quick Start
//!
//! ```ignore
//! use midi_ci::prelude::*;
//!
//! let mut device = Device::builder()
//!     .identity(identity)
//!     .profiles(my_profiles)
//!     .output(move |group, sysex| driver.send(group, sysex))
//!     .build()?;
//!
//! device
//!     .profiles()
//!     .unwrap()
//!     .add_profile(ProfileAtAddress::new(profile, ChannelAddress::default()), 1)?;
//!
//! // For every inbound MIDI-CI message
//! device.process_message(group, &sysex);
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Everything
//! - `host` - Protocol engine (`Device` and friends)

/// Re-export of midi-ci-core for direct access
pub use midi_ci_core as core;

pub use midi_ci_core::{
    parser, ChannelAddress, ChannelInGroup, DeviceInfo, Encoding, FunctionBlock, Muid, Profile,
    ProfileAtAddress, PropertyReplyData, PropertyReplyHeader, PropertyRequestData,
    PropertyRequestHeader, PropertySubscriptionHeader, SubscriptionCommand, SupportedAndActive,
};

#[cfg(feature = "host")]
pub use midi_ci_host as host;

#[cfg(feature = "host")]
pub use midi_ci_host::{
    Device, DeviceBuilder, DeviceEvent, DeviceOptions, EnablementRequest, ExchangeError,
    ProfileControl, ProfileDelegate, PropertyDelegate, PropertyExchangeResult, RemoteDevice,
    RequestKey, Subscription,
};

mod error;
pub use error::{Error, Result};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::core::{
        ChannelAddress, ChannelInGroup, DeviceInfo, FunctionBlock, Muid, Profile, ProfileAtAddress,
    };

    #[cfg(feature = "host")]
    pub use crate::host::{
        Device, DeviceEvent, DeviceOptions, EnablementRequest, ProfileControl, ProfileDelegate,
        PropertyDelegate,
    };
}
