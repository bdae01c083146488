//! A MIDI-CI device: MUID, identity, and the hosts that answer requests.
//!
//! ## Quick Start
//!
//! ```ignore
//! use midi_ci_host::Device;
//!
//! let mut device = Device::builder()
//!     .identity(identity)
//!     .profiles(my_profiles)
//!     .properties(my_properties)
//!     .output(move |group, bytes| driver.send_sysex(group, bytes))
//!     .build()?;
//!
//! device.send_discovery();
//!
//! // Feed every inbound MIDI-CI message, without 0xf0/0xf7 framing
//! device.process_message(group, &sysex);
//! ```

mod builder;
mod event;
mod options;
mod remote;

pub use builder::DeviceBuilder;
pub use event::DeviceEvent;
pub use options::{DeviceOptions, MIN_SYSEX_SIZE};
pub use remote::RemoteDevice;

use std::fmt;

use midi_ci_core::message::{
    category, nak_status, Discovery, DiscoveryResponse, ProfileChannels, ProfileDetails,
    ProfileSpecificData,
};
use midi_ci_core::{
    parser, Body, ChannelAddress, ChannelInGroup, ChannelProfileStates, Header, Muid, ParseStatus,
    Parsed, Profile, PropertySubscriptionHeader, IMPLEMENTATION_VERSION,
};

use crate::error::{Error, Result};
use crate::exchange_cache::PropertyExchangeResult;
use crate::output::{broadcast_header, send_message, BufferOutput, ResponderOutput};
use crate::profile_host::{ProfileControl, ProfileHost, MAX_CHANNELS};
use crate::property_host::PropertyHost;
use crate::subscription::RequestKey;

/// Capability bit for profile configuration.
pub const CAPABILITY_PROFILES: u8 = 1 << 2;
/// Capability bit for property exchange.
pub const CAPABILITY_PROPERTIES: u8 = 1 << 3;

pub(crate) type Sink = Box<dyn FnMut(u8, &[u8])>;

pub(crate) struct DeviceOutput {
    muid: Muid,
    sink: Sink,
}

impl BufferOutput for DeviceOutput {
    fn muid(&self) -> Muid {
        self.muid
    }

    fn send(&mut self, group: u8, message: &[u8]) {
        (self.sink)(group, message);
    }
}

pub struct Device {
    options: DeviceOptions,
    output: DeviceOutput,
    profile_host: Option<ProfileHost>,
    property_host: Option<PropertyHost>,
    remotes: remote::Remotes,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("muid", &self.output.muid)
            .field("options", &self.options)
            .field("capabilities", &self.capabilities())
            .field("discovered", &self.remotes.len())
            .field("pending_events", &self.remotes.pending_event_count())
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    pub fn muid(&self) -> Muid {
        self.output.muid
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// Capability byte advertised in discovery messages.
    pub fn capabilities(&self) -> u8 {
        capabilities(&self.profile_host, &self.property_host)
    }

    pub fn profile_host(&self) -> Option<&ProfileHost> {
        self.profile_host.as_ref()
    }

    /// Mutation handle for local profiles. Changes are broadcast once the
    /// device has answered a profile inquiry.
    pub fn profiles(&mut self) -> Option<ProfileControl<'_>> {
        let host = self.profile_host.as_mut()?;
        Some(host.control(&mut self.output))
    }

    pub fn property_host(&self) -> Option<&PropertyHost> {
        self.property_host.as_ref()
    }

    pub fn discovered_devices(&self) -> impl Iterator<Item = (Muid, &RemoteDevice)> + '_ {
        self.remotes.iter()
    }

    /// Last profile states `muid` reported for `address`, if it has reported any.
    pub fn profile_state_for(&self, muid: Muid, address: ChannelAddress) -> Option<&ChannelProfileStates> {
        self.remotes.profile_states(muid, address)
    }

    /// Removes and returns every event queued since the last drain.
    ///
    /// Events accumulate until drained.
    pub fn drain_events(&mut self) -> Vec<DeviceEvent> {
        self.remotes.drain_events()
    }

    #[inline]
    pub fn has_pending_events(&self) -> bool {
        self.remotes.has_pending_events()
    }

    #[inline]
    pub fn pending_event_count(&self) -> usize {
        self.remotes.pending_event_count()
    }

    /// Announces this device to every other device on the function block's
    /// first group.
    pub fn send_discovery(&mut self) {
        let header = broadcast_header(self.muid(), ChannelInGroup::WholeBlock, category::DISCOVERY);
        let body = Body::Discovery(Discovery {
            device: self.options.identity,
            capabilities: self.capabilities(),
            max_sysex_size: self.options.max_sysex_size as u32,
            output_path_id: 0,
        });
        send_message(&mut self.output, self.options.function_block.first_group, &header, &body);
    }

    /// Asks `muid` for its profiles at `destination`. The reply arrives as
    /// [`DeviceEvent::ProfileStateReceived`].
    pub fn send_profile_inquiry(&mut self, muid: Muid, destination: ChannelInGroup) -> Result<()> {
        self.send_to(muid, destination, &Body::ProfileInquiry)
    }

    /// The reply arrives as [`DeviceEvent::ProfileDetailsReceived`].
    pub fn send_profile_details_inquiry(
        &mut self,
        muid: Muid,
        destination: ChannelInGroup,
        profile: Profile,
        target: u8,
    ) -> Result<()> {
        self.send_to(
            muid,
            destination,
            &Body::ProfileDetails(ProfileDetails { profile, target }),
        )
    }

    pub fn send_profile_specific_data(
        &mut self,
        muid: Muid,
        destination: ChannelInGroup,
        profile: Profile,
        data: &[u8],
    ) -> Result<()> {
        self.send_to(
            muid,
            destination,
            &Body::ProfileSpecificData(ProfileSpecificData {
                profile,
                data: data.to_vec(),
            }),
        )
    }

    /// Requests a profile on with `num_channels` channels, or off for zero or less.
    ///
    /// Group and block requests always carry a channel count of zero. The
    /// outcome arrives as [`DeviceEvent::ProfileEnablementChanged`] or as a
    /// NAK.
    pub fn send_profile_enablement(
        &mut self,
        muid: Muid,
        destination: ChannelInGroup,
        profile: Profile,
        num_channels: i32,
    ) -> Result<()> {
        if num_channels > MAX_CHANNELS {
            return Err(Error::TooManyChannels(num_channels));
        }
        let body = if num_channels > 0 {
            let num_channels = match destination {
                ChannelInGroup::Channel(_) => num_channels as u16,
                _ => 0,
            };
            Body::ProfileOn(ProfileChannels {
                profile,
                num_channels,
            })
        } else {
            Body::ProfileOff(profile)
        };
        self.send_to(muid, destination, &body)
    }

    fn send_to(&mut self, muid: Muid, destination: ChannelInGroup, body: &Body) -> Result<()> {
        let remote = self.remotes.get(muid).ok_or(Error::UnknownDevice(muid))?;
        let group = remote.group;
        let header = Header {
            device_id: destination,
            category: body.category(),
            version: IMPLEMENTATION_VERSION,
            source: self.muid(),
            destination: muid,
        };
        tracing::trace!("Sending {:#04x} to {} on group {} {}", header.category, muid, group, destination);
        send_message(&mut self.output, group, &header, body);
        Ok(())
    }

    /// Sends a subscription update to a remote subscriber.
    ///
    /// Fails with [`Error::UnknownDevice`] when
    /// property exchange is disabled, since no device can be subscribed.
    pub fn send_subscription_update(
        &mut self,
        device: Muid,
        header: &PropertySubscriptionHeader,
        body: &[u8],
        on_result: impl FnOnce(&PropertyExchangeResult) + 'static,
    ) -> Result<RequestKey> {
        let host = self
            .property_host
            .as_mut()
            .ok_or(Error::UnknownDevice(device))?;
        host.send_subscription_update(&mut self.output, device, header, body, on_result)
    }

    pub fn terminate_subscription(&mut self, device: Muid, subscribe_id: &str) -> Result<RequestKey> {
        let host = self
            .property_host
            .as_mut()
            .ok_or(Error::UnknownDevice(device))?;
        host.terminate_subscription(&mut self.output, device, subscribe_id)
    }

    pub fn abort_request(&mut self, key: RequestKey) -> bool {
        self.property_host
            .as_mut()
            .is_some_and(|host| host.abort_request(key))
    }

    /// Handles one inbound MIDI-CI message received on `group`.
    pub fn process_message(&mut self, group: u8, bytes: &[u8]) {
        let (parsed, status) = parser::parse_for(self.muid(), bytes);
        let Some(parsed) = parsed else {
            tracing::trace!("Dropping {}-byte message without a MIDI-CI header", bytes.len());
            return;
        };
        tracing::trace!(
            "Received {:#04x} from {} on group {} ({:?})",
            parsed.header.category,
            parsed.header.source,
            group,
            status
        );

        let mut out = ResponderOutput::new(&mut self.output, parsed.header, group);
        match status {
            ParseStatus::Ok => {}
            ParseStatus::MismatchedMuid => return,
            ParseStatus::CollidingMuid => {
                tracing::warn!("Another device is using MUID {}", parsed.header.source);
                let own = out.muid();
                let header = broadcast_header(own, ChannelInGroup::WholeBlock, category::INVALIDATE_MUID);
                out.send_message(group, &header, &Body::InvalidateMuid { target: own });
                return;
            }
            ParseStatus::UnrecognisedMessage => {
                out.send_nak(nak_status::UNSUPPORTED_MESSAGE);
                return;
            }
            ParseStatus::ReservedVersion => {
                out.send_nak(nak_status::UNSUPPORTED_VERSION);
                return;
            }
            ParseStatus::Malformed => {
                out.send_nak(nak_status::MALFORMED);
                return;
            }
        }

        let source = parsed.header.source;
        match &parsed.body {
            Some(Body::Discovery(discovery)) => {
                self.remotes.insert(
                    source,
                    RemoteDevice {
                        identity: discovery.device,
                        capabilities: discovery.capabilities,
                        max_sysex_size: discovery.max_sysex_size,
                        group,
                    },
                );
                if let Some(host) = self.property_host.as_mut() {
                    host.set_max_sysex_size(source, discovery.max_sysex_size as usize);
                }

                out.reply(&Body::DiscoveryResponse(DiscoveryResponse {
                    device: self.options.identity,
                    capabilities: capabilities(&self.profile_host, &self.property_host),
                    max_sysex_size: self.options.max_sysex_size as u32,
                    output_path_id: discovery.output_path_id,
                    function_block: self.options.function_block.identifier,
                }));
            }
            Some(Body::DiscoveryResponse(response)) => {
                self.remotes.insert(
                    source,
                    RemoteDevice {
                        identity: response.device,
                        capabilities: response.capabilities,
                        max_sysex_size: response.max_sysex_size,
                        group,
                    },
                );
                if let Some(host) = self.property_host.as_mut() {
                    host.set_max_sysex_size(source, response.max_sysex_size as usize);
                }
            }
            Some(Body::InvalidateMuid { target }) => {
                self.remotes.remove(*target);
                if let Some(host) = self.property_host.as_mut() {
                    host.forget_device(*target);
                }
            }
            _ => {
                self.remotes.observe(&parsed, out.channel_address());
                let handled = respond_with(&mut self.profile_host, &mut self.property_host, &mut out, &parsed);
                if !handled {
                    out.respond_unhandled();
                }
            }
        }
    }
}

fn capabilities(profiles: &Option<ProfileHost>, properties: &Option<PropertyHost>) -> u8 {
    let mut flags = 0;
    if profiles.is_some() {
        flags |= CAPABILITY_PROFILES;
    }
    if properties.is_some() {
        flags |= CAPABILITY_PROPERTIES;
    }
    flags
}

fn respond_with(
    profiles: &mut Option<ProfileHost>,
    properties: &mut Option<PropertyHost>,
    out: &mut ResponderOutput<'_>,
    parsed: &Parsed,
) -> bool {
    if let Some(host) = profiles {
        if host.try_respond(out, parsed) {
            return true;
        }
    }
    if let Some(host) = properties {
        if host.try_respond(out, parsed) {
            return true;
        }
    }
    false
}
