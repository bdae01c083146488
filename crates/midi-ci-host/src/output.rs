//! Output sinks for outgoing MIDI-CI messages.

use midi_ci_core::message::{category, nak_status, Acknowledgement};
use midi_ci_core::{parser, Body, ChannelAddress, ChannelInGroup, Header, Muid, IMPLEMENTATION_VERSION};

/// Destination for encoded messages.
///
/// Implementations add transport framing (0xf0/0xf7 or UMP packets) and hand
/// the bytes to a driver.
pub trait BufferOutput {
    /// MUID of the local device.
    fn muid(&self) -> Muid;

    /// Sends a complete CI message, without framing, on `group`.
    fn send(&mut self, group: u8, message: &[u8]);
}

/// Encodes and sends a message. Messages that cannot be encoded are dropped
/// with a warning.
pub fn send_message(output: &mut dyn BufferOutput, group: u8, header: &Header, body: &Body) {
    match parser::encode(header, body) {
        Ok(bytes) => output.send(group, &bytes),
        Err(e) => tracing::warn!("Dropping unencodable {:#04x} message: {}", body.category(), e),
    }
}

/// Header for a message sent by `source` to every device.
pub fn broadcast_header(source: Muid, device_id: ChannelInGroup, category: u8) -> Header {
    Header {
        device_id,
        category,
        version: IMPLEMENTATION_VERSION,
        source,
        destination: Muid::BROADCAST,
    }
}

/// An output that also knows the message being answered.
pub struct ResponderOutput<'a> {
    inner: &'a mut dyn BufferOutput,
    incoming: Header,
    group: u8,
}

impl<'a> ResponderOutput<'a> {
    pub fn new(inner: &'a mut dyn BufferOutput, incoming: Header, group: u8) -> Self {
        Self {
            inner,
            incoming,
            group,
        }
    }

    pub fn incoming_header(&self) -> &Header {
        &self.incoming
    }

    pub fn incoming_group(&self) -> u8 {
        self.group
    }

    /// Destination of the incoming message.
    pub fn channel_address(&self) -> ChannelAddress {
        ChannelAddress::new(self.group, self.incoming.device_id)
    }

    /// Header addressed back to the sender of the incoming message.
    pub fn reply_header(&self, category: u8) -> Header {
        Header {
            device_id: self.incoming.device_id,
            category,
            version: IMPLEMENTATION_VERSION,
            source: self.inner.muid(),
            destination: self.incoming.source,
        }
    }

    /// Sends `body` to the inquirer on the incoming group.
    pub fn reply(&mut self, body: &Body) {
        let header = self.reply_header(body.category());
        send_message(&mut *self.inner, self.group, &header, body);
    }

    pub fn send_message(&mut self, group: u8, header: &Header, body: &Body) {
        send_message(&mut *self.inner, group, header, body);
    }

    /// Rejects the incoming message.
    pub fn send_nak(&mut self, status_code: u8) {
        self.reply(&Body::Nak(Acknowledgement {
            original_category: self.incoming.category,
            status_code,
            ..Default::default()
        }));
    }

    /// Handles messages nothing else answered: inquiries are rejected as
    /// unsupported, replies and reports are dropped.
    pub fn respond_unhandled(&mut self) {
        if is_inquiry(self.incoming.category) {
            self.send_nak(nak_status::UNSUPPORTED_MESSAGE);
        }
    }
}

impl BufferOutput for ResponderOutput<'_> {
    fn muid(&self) -> Muid {
        self.inner.muid()
    }

    fn send(&mut self, group: u8, message: &[u8]) {
        self.inner.send(group, message);
    }
}

fn is_inquiry(kind: u8) -> bool {
    use category::*;

    matches!(
        kind,
        DISCOVERY
            | PROFILE_INQUIRY
            | PROFILE_ON
            | PROFILE_OFF
            | PROFILE_DETAILS
            | PE_CAPABILITIES
            | PE_GET_DATA
            | PE_SET_DATA
            | PE_SUBSCRIBE
    )
}

/// Collects sent messages in memory.
#[derive(Debug, Clone)]
pub struct CollectingOutput {
    muid: Muid,
    pub sent: Vec<(u8, Vec<u8>)>,
}

impl CollectingOutput {
    pub fn new(muid: Muid) -> Self {
        Self {
            muid,
            sent: Vec::new(),
        }
    }

    /// Removes and returns everything sent so far.
    pub fn take(&mut self) -> Vec<(u8, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }

    /// Sent messages decoded, in order.
    pub fn parsed(&self) -> Vec<(u8, midi_ci_core::Parsed)> {
        self.sent
            .iter()
            .filter_map(|(group, bytes)| parser::parse(bytes).0.map(|p| (*group, p)))
            .collect()
    }
}

impl BufferOutput for CollectingOutput {
    fn muid(&self) -> Muid {
        self.muid
    }

    fn send(&mut self, group: u8, message: &[u8]) {
        self.sent.push((group, message.to_vec()));
    }
}
