//! MIDI-CI protocol engine for a local device.
//!
//! Answers discovery, negotiates profiles, and serves property exchange on
//! top of the `midi-ci-core` codec:
//!
//! - [`Device`]: MUID, identity, inbound dispatch, requests to remote devices
//! - [`ProfileHost`]: profile inquiries, enablement, details
//! - [`PropertyHost`]: get/set/subscribe with chunk reassembly
//! - [`PropertyChunker`]: splits outgoing property payloads
//!
//! Transport is left to the caller: the device hands every outgoing message
//! to a closure, and inbound messages are fed to [`Device::process_message`].

pub mod error;
pub use error::{ChunkError, Error, Result};

pub mod chunker;
pub use chunker::{send_chunked, ChunkParams, ChunkSource, PropertyChunker, SliceSource, StreamSource};

mod device;
pub use device::{
    Device, DeviceBuilder, DeviceEvent, DeviceOptions, RemoteDevice, CAPABILITY_PROFILES,
    CAPABILITY_PROPERTIES, MIN_SYSEX_SIZE,
};

pub mod exchange_cache;
pub use exchange_cache::{ExchangeError, PropertyExchangeResponse, PropertyExchangeResult};

pub mod output;
pub use output::{BufferOutput, CollectingOutput, ResponderOutput};

pub mod profile_host;
pub use profile_host::{EnablementRequest, ProfileControl, ProfileDelegate, ProfileHost};

pub mod property_host;
pub use property_host::{PropertyDelegate, PropertyHost, ResultCallback};

pub mod subscription;
pub use subscription::{RequestKey, Subscription, SubscriptionRegistry, SubscriptionToken};
