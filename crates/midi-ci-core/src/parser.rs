//! Message parsing and encoding.
//!
//! Input to [`parse`] is a complete CI message without the 0xf0/0xf7 framing.

use smallvec::SmallVec;

use crate::address::{ChannelInGroup, Muid, Profile};
use crate::error::{Error, Result};
use crate::marshal::{Reader, Writer};
use crate::message::*;

/// Outcome classification of [`parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Ok,
    /// Addressed to another device
    MismatchedMuid,
    /// Source MUID equals our own
    CollidingMuid,
    UnrecognisedMessage,
    /// Major version bits are set
    ReservedVersion,
    Malformed,
}

/// Parses a message without MUID checks.
///
/// Returns `None` only when the header itself is malformed. A body of `None`
/// means the body could not be decoded; `status` says why.
pub fn parse(bytes: &[u8]) -> (Option<Parsed>, ParseStatus) {
    let mut reader = Reader::new(bytes);
    let header = match read_header(&mut reader) {
        Ok(header) => header,
        Err(err) => {
            tracing::warn!("dropping message with malformed header: {}", err);
            return (None, ParseStatus::Malformed);
        }
    };

    if header.version & 0x70 != 0 {
        tracing::trace!(
            "reserved version {:#04x} from {}",
            header.version,
            header.source
        );
        return (Some(Parsed { header, body: None }), ParseStatus::ReservedVersion);
    }

    let (body, status) = match read_body(&header, &mut reader) {
        Ok(Some(body)) => (Some(body), ParseStatus::Ok),
        Ok(None) => (None, ParseStatus::UnrecognisedMessage),
        Err(err) => {
            tracing::warn!(
                "malformed body for category {:#04x} from {}: {}",
                header.category,
                header.source,
                err
            );
            (None, ParseStatus::Malformed)
        }
    };
    (Some(Parsed { header, body }), status)
}

/// Parses a message received by the device identified by `own`.
pub fn parse_for(own: Muid, bytes: &[u8]) -> (Option<Parsed>, ParseStatus) {
    let (parsed, status) = parse(bytes);
    let Some(parsed) = parsed else {
        return (None, status);
    };

    let header = &parsed.header;
    let status = if header.destination != Muid::BROADCAST && header.destination != own {
        ParseStatus::MismatchedMuid
    } else if header.source == own {
        tracing::warn!("message from {} collides with our own MUID", own);
        ParseStatus::CollidingMuid
    } else {
        status
    };
    (Some(parsed), status)
}

fn read_header(r: &mut Reader<'_>) -> Result<Header> {
    if r.byte()? != UNIVERSAL_SYSEX {
        return Err(Error::Malformed("not a universal sysex message"));
    }
    let device_id = ChannelInGroup::from_byte(r.byte()?)
        .ok_or(Error::Malformed("invalid device id"))?;
    if r.byte()? != SUB_ID_MIDI_CI {
        return Err(Error::Malformed("not a MIDI-CI message"));
    }
    Ok(Header {
        device_id,
        category: r.u7()?,
        version: r.u7()?,
        source: r.muid()?,
        destination: r.muid()?,
    })
}

fn read_profiles(r: &mut Reader<'_>) -> Result<Vec<Profile>> {
    let count = r.u14()?;
    (0..count).map(|_| r.profile()).collect()
}

fn read_chunk(r: &mut Reader<'_>) -> Result<PropertyChunk> {
    Ok(PropertyChunk {
        request_id: r.u7()?,
        header: r.span_u14()?.to_vec(),
        total_chunks: ChunkCount::from_wire(r.u14()?),
        this_chunk: r.u14()?,
        data: r.span_u14()?.to_vec(),
    })
}

fn read_request(r: &mut Reader<'_>) -> Result<PropertyRequest> {
    Ok(PropertyRequest {
        request_id: r.u7()?,
        header: r.span_u14()?.to_vec(),
    })
}

fn read_ack(r: &mut Reader<'_>) -> Result<Acknowledgement> {
    Ok(Acknowledgement {
        original_category: r.u7()?,
        status_code: r.u7()?,
        status_data: r.u7()?,
        details: r.array()?,
        message: r.span_u14()?.to_vec(),
    })
}

fn read_capabilities(r: &mut Reader<'_>, v2: bool) -> Result<PropertyCapabilities> {
    let simultaneous_requests = r.u7()?;
    let (major_version, minor_version) = if v2 { (r.u7()?, r.u7()?) } else { (0, 0) };
    Ok(PropertyCapabilities {
        simultaneous_requests,
        major_version,
        minor_version,
    })
}

fn read_device_info(r: &mut Reader<'_>) -> Result<DeviceInfo> {
    Ok(DeviceInfo {
        manufacturer: r.array()?,
        family: r.array()?,
        model: r.array()?,
        revision: r.array()?,
    })
}

fn read_profile_channels(r: &mut Reader<'_>, v2: bool) -> Result<ProfileChannels> {
    Ok(ProfileChannels {
        profile: r.profile()?,
        num_channels: if v2 { r.u14()? } else { 0 },
    })
}

/// `Ok(None)` for categories this codec does not know.
fn read_body(header: &Header, r: &mut Reader<'_>) -> Result<Option<Body>> {
    use crate::message::category::*;

    let v2 = header.version >= 2;
    let body = match header.category {
        DISCOVERY => Body::Discovery(Discovery {
            device: read_device_info(r)?,
            capabilities: r.u7()?,
            max_sysex_size: r.u28()?,
            output_path_id: if v2 { r.u7()? } else { 0 },
        }),
        DISCOVERY_RESPONSE => Body::DiscoveryResponse(DiscoveryResponse {
            device: read_device_info(r)?,
            capabilities: r.u7()?,
            max_sysex_size: r.u28()?,
            output_path_id: if v2 { r.u7()? } else { 0 },
            function_block: if v2 { r.u7()? } else { 0 },
        }),
        INVALIDATE_MUID => Body::InvalidateMuid { target: r.muid()? },
        ACK => Body::Ack(read_ack(r)?),
        NAK if v2 => Body::Nak(read_ack(r)?),
        NAK => Body::Nak(Acknowledgement::default()),

        PROFILE_INQUIRY => Body::ProfileInquiry,
        PROFILE_INQUIRY_RESPONSE => Body::ProfileInquiryResponse(ProfileInquiryResponse {
            enabled: read_profiles(r)?,
            disabled: read_profiles(r)?,
        }),
        PROFILE_ADDED => Body::ProfileAdded(r.profile()?),
        PROFILE_REMOVED => Body::ProfileRemoved(r.profile()?),
        PROFILE_DETAILS => Body::ProfileDetails(ProfileDetails {
            profile: r.profile()?,
            target: r.u7()?,
        }),
        PROFILE_DETAILS_RESPONSE => Body::ProfileDetailsResponse(ProfileDetailsResponse {
            profile: r.profile()?,
            target: r.u7()?,
            data: r.span_u14()?.to_vec(),
        }),
        PROFILE_ON => Body::ProfileOn(read_profile_channels(r, v2)?),
        PROFILE_OFF => Body::ProfileOff(r.profile()?),
        PROFILE_ENABLED_REPORT => Body::ProfileEnabledReport(read_profile_channels(r, v2)?),
        PROFILE_DISABLED_REPORT => Body::ProfileDisabledReport(read_profile_channels(r, v2)?),
        PROFILE_SPECIFIC_DATA => Body::ProfileSpecificData(ProfileSpecificData {
            profile: r.profile()?,
            data: r.span_u28()?.to_vec(),
        }),

        PE_CAPABILITIES => Body::PropertyCapabilities(read_capabilities(r, v2)?),
        PE_CAPABILITIES_RESPONSE => Body::PropertyCapabilitiesResponse(read_capabilities(r, v2)?),
        PE_GET_DATA => Body::PropertyGetData(read_request(r)?),
        PE_GET_DATA_RESPONSE => Body::PropertyGetDataResponse(read_chunk(r)?),
        PE_SET_DATA => Body::PropertySetData(read_chunk(r)?),
        PE_SET_DATA_RESPONSE => Body::PropertySetDataResponse(read_request(r)?),
        PE_SUBSCRIBE => Body::PropertySubscribe(read_chunk(r)?),
        PE_SUBSCRIBE_RESPONSE => Body::PropertySubscribeResponse(read_chunk(r)?),
        PE_NOTIFY => Body::PropertyNotify(read_chunk(r)?),

        _ => return Ok(None),
    };
    Ok(Some(body))
}

/// Writes the 13-byte header with the given category.
pub fn write_header(w: &mut Writer<'_>, header: &Header, category: u8) {
    w.raw(&[
        UNIVERSAL_SYSEX,
        header.device_id.to_byte(),
        SUB_ID_MIDI_CI,
    ])
    .u7(category)
    .u7(header.version)
    .muid(header.source)
    .muid(header.destination);
}

/// Encodes a message. The category byte is taken from `body`; fields that
/// only exist in version 2 messages are written when `header.version >= 2`.
pub fn encode(header: &Header, body: &Body) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(Header::LEN + 16);
    encode_into(&mut out, header, body)?;
    Ok(out)
}

/// Appends an encoded message to `out`.
pub fn encode_into(out: &mut Vec<u8>, header: &Header, body: &Body) -> Result<()> {
    let v2 = header.version >= 2;
    let mut w = Writer::append_to(out);
    write_header(&mut w, header, body.category());

    match body {
        Body::Discovery(d) => {
            write_device_info(&mut w, &d.device);
            w.u7(d.capabilities).u28(d.max_sysex_size);
            if v2 {
                w.u7(d.output_path_id);
            }
        }
        Body::DiscoveryResponse(d) => {
            write_device_info(&mut w, &d.device);
            w.u7(d.capabilities).u28(d.max_sysex_size);
            if v2 {
                w.u7(d.output_path_id).u7(d.function_block);
            }
        }
        Body::InvalidateMuid { target } => {
            w.muid(*target);
        }
        Body::Ack(ack) => write_ack(&mut w, ack)?,
        Body::Nak(nak) => {
            if v2 {
                write_ack(&mut w, nak)?;
            }
        }
        Body::ProfileInquiry => {}
        Body::ProfileInquiryResponse(response) => {
            write_profiles(&mut w, &response.enabled)?;
            write_profiles(&mut w, &response.disabled)?;
        }
        Body::ProfileAdded(profile) | Body::ProfileRemoved(profile) => {
            w.profile(profile);
        }
        Body::ProfileDetails(details) => {
            w.profile(&details.profile).u7(details.target);
        }
        Body::ProfileDetailsResponse(response) => {
            w.profile(&response.profile).u7(response.target);
            w.span_u14(&response.data)?;
        }
        Body::ProfileOn(channels)
        | Body::ProfileEnabledReport(channels)
        | Body::ProfileDisabledReport(channels) => {
            w.profile(&channels.profile);
            if v2 {
                w.u14(channels.num_channels);
            }
        }
        Body::ProfileOff(profile) => {
            w.profile(profile);
            if v2 {
                // reserved
                w.u14(0);
            }
        }
        Body::ProfileSpecificData(data) => {
            w.profile(&data.profile);
            w.span_u28(&data.data)?;
        }
        Body::PropertyCapabilities(caps) | Body::PropertyCapabilitiesResponse(caps) => {
            w.u7(caps.simultaneous_requests);
            if v2 {
                w.u7(caps.major_version).u7(caps.minor_version);
            }
        }
        Body::PropertyGetData(request) | Body::PropertySetDataResponse(request) => {
            w.u7(request.request_id);
            w.span_u14(&request.header)?;
            // single chunk, no body
            w.u14(1).u14(1).u14(0);
        }
        Body::PropertyGetDataResponse(chunk)
        | Body::PropertySetData(chunk)
        | Body::PropertySubscribe(chunk)
        | Body::PropertySubscribeResponse(chunk)
        | Body::PropertyNotify(chunk) => {
            w.u7(chunk.request_id);
            w.span_u14(&chunk.header)?;
            w.u14(chunk.total_chunks.to_wire()).u14(chunk.this_chunk);
            w.span_u14(&chunk.data)?;
        }
    }
    Ok(())
}

fn write_device_info(w: &mut Writer<'_>, info: &DeviceInfo) {
    let bytes: SmallVec<[u8; 11]> = info
        .manufacturer
        .iter()
        .chain(&info.family)
        .chain(&info.model)
        .chain(&info.revision)
        .map(|b| b & 0x7f)
        .collect();
    w.raw(&bytes);
}

fn write_ack(w: &mut Writer<'_>, ack: &Acknowledgement) -> Result<()> {
    w.u7(ack.original_category)
        .u7(ack.status_code)
        .u7(ack.status_data)
        .raw(&ack.details);
    w.span_u14(&ack.message)?;
    Ok(())
}

fn write_profiles(w: &mut Writer<'_>, profiles: &[Profile]) -> Result<()> {
    let count = u16::try_from(profiles.len())
        .ok()
        .filter(|&n| n <= 0x3fff)
        .ok_or(Error::FieldTooLong {
            len: profiles.len(),
            max: 0x3fff,
        })?;
    w.u14(count);
    for profile in profiles {
        w.profile(profile);
    }
    Ok(())
}
