//! MIDI-CI message model.
//!
//! A message is a [`Header`] followed by a [`Body`] whose layout is selected by
//! the header's category (sub-ID #2) byte.

use serde::{Deserialize, Serialize};

use crate::address::{ChannelInGroup, Muid, Profile};

/// MIDI-CI message version emitted by this crate.
pub const IMPLEMENTATION_VERSION: u8 = 0x02;

/// Universal SysEx non-realtime id.
pub const UNIVERSAL_SYSEX: u8 = 0x7e;

/// Sub-ID #1 for MIDI-CI.
pub const SUB_ID_MIDI_CI: u8 = 0x0d;

/// Sub-ID #2 values.
pub mod category {
    pub const PROFILE_INQUIRY: u8 = 0x20;
    pub const PROFILE_INQUIRY_RESPONSE: u8 = 0x21;
    pub const PROFILE_ON: u8 = 0x22;
    pub const PROFILE_OFF: u8 = 0x23;
    pub const PROFILE_ENABLED_REPORT: u8 = 0x24;
    pub const PROFILE_DISABLED_REPORT: u8 = 0x25;
    pub const PROFILE_ADDED: u8 = 0x26;
    pub const PROFILE_REMOVED: u8 = 0x27;
    pub const PROFILE_DETAILS: u8 = 0x28;
    pub const PROFILE_DETAILS_RESPONSE: u8 = 0x29;
    pub const PROFILE_SPECIFIC_DATA: u8 = 0x2f;

    pub const PE_CAPABILITIES: u8 = 0x30;
    pub const PE_CAPABILITIES_RESPONSE: u8 = 0x31;
    pub const PE_GET_DATA: u8 = 0x34;
    pub const PE_GET_DATA_RESPONSE: u8 = 0x35;
    pub const PE_SET_DATA: u8 = 0x36;
    pub const PE_SET_DATA_RESPONSE: u8 = 0x37;
    pub const PE_SUBSCRIBE: u8 = 0x38;
    pub const PE_SUBSCRIBE_RESPONSE: u8 = 0x39;
    pub const PE_NOTIFY: u8 = 0x3f;

    pub const DISCOVERY: u8 = 0x70;
    pub const DISCOVERY_RESPONSE: u8 = 0x71;
    pub const ACK: u8 = 0x7d;
    pub const INVALIDATE_MUID: u8 = 0x7e;
    pub const NAK: u8 = 0x7f;
}

/// NAK status codes.
pub mod nak_status {
    pub const GENERIC: u8 = 0x00;
    pub const UNSUPPORTED_MESSAGE: u8 = 0x01;
    pub const UNSUPPORTED_VERSION: u8 = 0x02;
    pub const TARGET_NOT_RECOGNISED: u8 = 0x04;
    pub const MALFORMED: u8 = 0x41;
}

/// Fields at the start of every MIDI-CI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub device_id: ChannelInGroup,
    pub category: u8,
    pub version: u8,
    pub source: Muid,
    pub destination: Muid,
}

impl Header {
    /// 0x7e, device id, 0x0d, category, version, source (4), destination (4)
    pub const LEN: usize = 13;
}

/// Chunk count of a property-exchange message; zero on the wire means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkCount {
    Known(u16),
    Unknown,
}

impl ChunkCount {
    pub fn from_wire(value: u16) -> Self {
        match value {
            0 => Self::Unknown,
            n => Self::Known(n),
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            Self::Known(n) => n,
            Self::Unknown => 0,
        }
    }
}

/// Manufacturer, family, model and revision of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: [u8; 3],
    pub family: [u8; 2],
    pub model: [u8; 2],
    pub revision: [u8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    pub device: DeviceInfo,
    pub capabilities: u8,
    pub max_sysex_size: u32,
    /// Version 2 and later.
    pub output_path_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub device: DeviceInfo,
    pub capabilities: u8,
    pub max_sysex_size: u32,
    /// Version 2 and later.
    pub output_path_id: u8,
    /// Version 2 and later.
    pub function_block: u8,
}

/// Body shared by ACK and NAK.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acknowledgement {
    pub original_category: u8,
    pub status_code: u8,
    pub status_data: u8,
    pub details: [u8; 5],
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileInquiryResponse {
    pub enabled: Vec<Profile>,
    pub disabled: Vec<Profile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileChannels {
    pub profile: Profile,
    /// Version 2 and later; version 1 messages imply one channel.
    pub num_channels: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileDetails {
    pub profile: Profile,
    pub target: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDetailsResponse {
    pub profile: Profile,
    pub target: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSpecificData {
    pub profile: Profile,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyCapabilities {
    pub simultaneous_requests: u8,
    /// Version 2 and later.
    pub major_version: u8,
    /// Version 2 and later.
    pub minor_version: u8,
}

/// A property-exchange message that always fits in one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRequest {
    pub request_id: u8,
    pub header: Vec<u8>,
}

/// One chunk of a possibly multi-chunk property-exchange message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChunk {
    pub request_id: u8,
    pub header: Vec<u8>,
    pub total_chunks: ChunkCount,
    /// 1-based; 0 when the sender does not number its chunks
    pub this_chunk: u16,
    pub data: Vec<u8>,
}

impl PropertyChunk {
    pub fn is_last(&self) -> bool {
        self.total_chunks == ChunkCount::Known(self.this_chunk)
    }
}

/// Every message body understood by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Discovery(Discovery),
    DiscoveryResponse(DiscoveryResponse),
    InvalidateMuid { target: Muid },
    Ack(Acknowledgement),
    Nak(Acknowledgement),

    ProfileInquiry,
    ProfileInquiryResponse(ProfileInquiryResponse),
    ProfileAdded(Profile),
    ProfileRemoved(Profile),
    ProfileDetails(ProfileDetails),
    ProfileDetailsResponse(ProfileDetailsResponse),
    ProfileOn(ProfileChannels),
    ProfileOff(Profile),
    ProfileEnabledReport(ProfileChannels),
    ProfileDisabledReport(ProfileChannels),
    ProfileSpecificData(ProfileSpecificData),

    PropertyCapabilities(PropertyCapabilities),
    PropertyCapabilitiesResponse(PropertyCapabilities),
    PropertyGetData(PropertyRequest),
    PropertyGetDataResponse(PropertyChunk),
    PropertySetData(PropertyChunk),
    PropertySetDataResponse(PropertyRequest),
    PropertySubscribe(PropertyChunk),
    PropertySubscribeResponse(PropertyChunk),
    PropertyNotify(PropertyChunk),
}

impl Body {
    pub fn category(&self) -> u8 {
        use category::*;

        match self {
            Body::Discovery(_) => DISCOVERY,
            Body::DiscoveryResponse(_) => DISCOVERY_RESPONSE,
            Body::InvalidateMuid { .. } => INVALIDATE_MUID,
            Body::Ack(_) => ACK,
            Body::Nak(_) => NAK,
            Body::ProfileInquiry => PROFILE_INQUIRY,
            Body::ProfileInquiryResponse(_) => PROFILE_INQUIRY_RESPONSE,
            Body::ProfileAdded(_) => PROFILE_ADDED,
            Body::ProfileRemoved(_) => PROFILE_REMOVED,
            Body::ProfileDetails(_) => PROFILE_DETAILS,
            Body::ProfileDetailsResponse(_) => PROFILE_DETAILS_RESPONSE,
            Body::ProfileOn(_) => PROFILE_ON,
            Body::ProfileOff(_) => PROFILE_OFF,
            Body::ProfileEnabledReport(_) => PROFILE_ENABLED_REPORT,
            Body::ProfileDisabledReport(_) => PROFILE_DISABLED_REPORT,
            Body::ProfileSpecificData(_) => PROFILE_SPECIFIC_DATA,
            Body::PropertyCapabilities(_) => PE_CAPABILITIES,
            Body::PropertyCapabilitiesResponse(_) => PE_CAPABILITIES_RESPONSE,
            Body::PropertyGetData(_) => PE_GET_DATA,
            Body::PropertyGetDataResponse(_) => PE_GET_DATA_RESPONSE,
            Body::PropertySetData(_) => PE_SET_DATA,
            Body::PropertySetDataResponse(_) => PE_SET_DATA_RESPONSE,
            Body::PropertySubscribe(_) => PE_SUBSCRIBE,
            Body::PropertySubscribeResponse(_) => PE_SUBSCRIBE_RESPONSE,
            Body::PropertyNotify(_) => PE_NOTIFY,
        }
    }
}

/// A decoded message. `body` is `None` when only the header could be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub header: Header,
    pub body: Option<Body>,
}
