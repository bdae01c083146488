//! Responder-side profile negotiation.
//!
//! [`ProfileHost`] keeps the supported/active state of every profile the
//! local function block offers, answers profile inquiries, and asks its
//! [`ProfileDelegate`] whenever a remote device wants a profile switched on
//! or off. Once the host has answered anything, local state changes are
//! broadcast so that other devices can keep their view in sync.

use midi_ci_core::marshal::Writer;
use midi_ci_core::message::{
    category, nak_status, ProfileChannels, ProfileDetails, ProfileDetailsResponse,
    ProfileInquiryResponse,
};
use midi_ci_core::{
    BlockProfileStates, Body, ChannelAddress, ChannelInGroup, ChannelProfileStates, FunctionBlock,
    Muid, Parsed, Profile, ProfileAtAddress, SupportedAndActive,
};

use crate::error::{Error, Result};
use crate::output::{broadcast_header, send_message, BufferOutput, ResponderOutput};

/// A UMP endpoint has 256 channels.
pub const MAX_CHANNELS: i32 = 256;

/// A remote request to change a profile's enablement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnablementRequest {
    /// Device that sent the request.
    pub muid: Muid,
    pub profile_at_address: ProfileAtAddress,
    /// Channels requested. Always 1 for enable requests from version 1
    /// devices and 0 for disable requests.
    pub num_channels: u16,
    pub enabled: bool,
}

/// Decides how the local device reacts to profile requests.
pub trait ProfileDelegate {
    /// A remote device asked to enable or disable a profile.
    ///
    /// Apply the change through `control`, or leave state untouched to
    /// refuse. The host reports whatever state results once this returns.
    fn profile_enablement_requested(
        &mut self,
        request: EnablementRequest,
        control: &mut ProfileControl<'_>,
    );

    /// Profile-specific details for a non-zero inquiry target. Returning an
    /// empty buffer rejects the inquiry.
    fn profile_details_inquired(
        &mut self,
        muid: Muid,
        profile_at_address: ProfileAtAddress,
        target: u8,
    ) -> Vec<u8>;
}

struct ProfileTable {
    states: BlockProfileStates,
    function_block: FunctionBlock,
    is_responder: bool,
}

/// Mutation handle over a host's profile state.
///
/// Changes made through a handle are broadcast to other devices, except
/// changes to the profile a remote request is currently asking about: that
/// request gets a single report once the delegate returns.
pub struct ProfileControl<'a> {
    table: &'a mut ProfileTable,
    output: &'a mut dyn BufferOutput,
    suppressed: Option<ProfileAtAddress>,
}

impl ProfileControl<'_> {
    /// Registers a profile as supported on up to `max_channels` channels
    /// (at least 1). Does nothing if it is already supported.
    pub fn add_profile(&mut self, profile_at_address: ProfileAtAddress, max_channels: i32) -> Result<()> {
        if max_channels > MAX_CHANNELS {
            return Err(Error::TooManyChannels(max_channels));
        }
        let Some(state) = self.table.states.state_for_destination_mut(profile_at_address.address) else {
            return Ok(());
        };
        if state.get(&profile_at_address.profile).is_supported() {
            return Ok(());
        }

        let supported = max_channels.max(1) as u16;
        state.set(
            profile_at_address.profile,
            SupportedAndActive { supported, active: 0 },
        );
        tracing::debug!("Profile {} added at {}", profile_at_address.profile, profile_at_address.address);

        self.broadcast(profile_at_address, Body::ProfileAdded(profile_at_address.profile));
        Ok(())
    }

    /// Disables and then forgets a profile.
    pub fn remove_profile(&mut self, profile_at_address: ProfileAtAddress) {
        if self.table.states.state_for_destination(profile_at_address.address).is_none() {
            return;
        }
        self.disable(profile_at_address);

        let Some(state) = self.table.states.state_for_destination_mut(profile_at_address.address) else {
            return;
        };
        if !state.get(&profile_at_address.profile).is_supported() {
            return;
        }
        state.erase(&profile_at_address.profile);
        tracing::debug!("Profile {} removed from {}", profile_at_address.profile, profile_at_address.address);

        self.broadcast(profile_at_address, Body::ProfileRemoved(profile_at_address.profile));
    }

    /// Enables a supported profile on `num_channels` channels, clamped to
    /// what it supports. Zero or fewer disables it.
    pub fn set_profile_enablement(
        &mut self,
        profile_at_address: ProfileAtAddress,
        num_channels: i32,
    ) -> Result<()> {
        if num_channels > MAX_CHANNELS {
            return Err(Error::TooManyChannels(num_channels));
        }
        if num_channels > 0 {
            self.enable(profile_at_address, num_channels as u16);
        } else {
            self.disable(profile_at_address);
        }
        Ok(())
    }

    pub fn state(&self, profile_at_address: ProfileAtAddress) -> SupportedAndActive {
        self.table
            .states
            .get(&profile_at_address.profile, profile_at_address.address)
    }

    pub fn states(&self) -> &BlockProfileStates {
        &self.table.states
    }

    fn enable(&mut self, profile_at_address: ProfileAtAddress, num_channels: u16) {
        let Some(state) = self.table.states.state_for_destination_mut(profile_at_address.address) else {
            return;
        };
        let old = state.get(&profile_at_address.profile);
        if !old.is_supported() {
            return;
        }

        let active = num_channels.clamp(1, old.supported);
        state.set(
            profile_at_address.profile,
            SupportedAndActive { supported: old.supported, active },
        );
        tracing::debug!(
            "Profile {} enabled on {} channel(s) at {}",
            profile_at_address.profile,
            active,
            profile_at_address.address
        );

        let body = Body::ProfileEnabledReport(ProfileChannels {
            profile: profile_at_address.profile,
            num_channels: reported_channels(profile_at_address.address, active),
        });
        self.broadcast(profile_at_address, body);
    }

    fn disable(&mut self, profile_at_address: ProfileAtAddress) {
        let Some(state) = self.table.states.state_for_destination_mut(profile_at_address.address) else {
            return;
        };
        let old = state.get(&profile_at_address.profile);
        if !old.is_active() {
            return;
        }

        state.set(
            profile_at_address.profile,
            SupportedAndActive { supported: old.supported, active: 0 },
        );
        tracing::debug!("Profile {} disabled at {}", profile_at_address.profile, profile_at_address.address);

        let body = Body::ProfileDisabledReport(ProfileChannels {
            profile: profile_at_address.profile,
            num_channels: reported_channels(profile_at_address.address, old.active),
        });
        self.broadcast(profile_at_address, body);
    }

    fn broadcast(&mut self, profile_at_address: ProfileAtAddress, body: Body) {
        if !self.table.is_responder || self.suppressed == Some(profile_at_address) {
            return;
        }
        let address = profile_at_address.address;
        let header = broadcast_header(self.output.muid(), address.channel, body.category());
        send_message(&mut *self.output, address.group, &header, &body);
    }
}

/// Channel counts are only meaningful in reports about a single channel.
fn reported_channels(address: ChannelAddress, count: u16) -> u16 {
    if address.is_single_channel() {
        count
    } else {
        0
    }
}

fn inquiry_response(states: &ChannelProfileStates) -> Body {
    Body::ProfileInquiryResponse(ProfileInquiryResponse {
        enabled: states.active(),
        disabled: states.inactive(),
    })
}

/// Profile state and negotiation for one function block.
pub struct ProfileHost {
    table: ProfileTable,
    delegate: Box<dyn ProfileDelegate>,
}

impl ProfileHost {
    pub fn new(function_block: FunctionBlock, delegate: Box<dyn ProfileDelegate>) -> Self {
        Self {
            table: ProfileTable {
                states: BlockProfileStates::default(),
                function_block,
                is_responder: false,
            },
            delegate,
        }
    }

    /// Borrows the host's state together with the output used for
    /// broadcasts.
    pub fn control<'a>(&'a mut self, output: &'a mut dyn BufferOutput) -> ProfileControl<'a> {
        ProfileControl {
            table: &mut self.table,
            output,
            suppressed: None,
        }
    }

    pub fn add_profile(
        &mut self,
        output: &mut dyn BufferOutput,
        profile_at_address: ProfileAtAddress,
        max_channels: i32,
    ) -> Result<()> {
        self.control(output).add_profile(profile_at_address, max_channels)
    }

    pub fn remove_profile(&mut self, output: &mut dyn BufferOutput, profile_at_address: ProfileAtAddress) {
        self.control(output).remove_profile(profile_at_address)
    }

    pub fn set_profile_enablement(
        &mut self,
        output: &mut dyn BufferOutput,
        profile_at_address: ProfileAtAddress,
        num_channels: i32,
    ) -> Result<()> {
        self.control(output)
            .set_profile_enablement(profile_at_address, num_channels)
    }

    pub fn state(&self, profile_at_address: ProfileAtAddress) -> SupportedAndActive {
        self.table
            .states
            .get(&profile_at_address.profile, profile_at_address.address)
    }

    pub fn states(&self) -> &BlockProfileStates {
        &self.table.states
    }

    pub fn function_block(&self) -> FunctionBlock {
        self.table.function_block
    }

    /// True once this host has answered a profile message.
    pub fn is_responder(&self) -> bool {
        self.table.is_responder
    }

    /// Handles profile inquiries and enablement requests. Returns false for
    /// messages that are not profile requests.
    pub fn try_respond(&mut self, output: &mut ResponderOutput<'_>, parsed: &Parsed) -> bool {
        match &parsed.body {
            Some(Body::ProfileInquiry) => {
                self.handle_inquiry(output);
                true
            }
            Some(Body::ProfileDetails(details)) => {
                self.handle_details(output, details);
                true
            }
            Some(Body::ProfileOn(request)) => {
                let num_channels = if parsed.header.version >= 2 {
                    request.num_channels
                } else {
                    1
                };
                self.handle_enablement(output, request.profile, num_channels, true);
                true
            }
            Some(Body::ProfileOff(profile)) => {
                self.handle_enablement(output, *profile, 0, false);
                true
            }
            _ => false,
        }
    }

    fn handle_inquiry(&mut self, output: &mut ResponderOutput<'_>) {
        self.table.is_responder = true;
        let incoming_group = output.incoming_group();
        let device_id = output.incoming_header().device_id;

        if device_id != ChannelInGroup::WholeBlock {
            let states = self
                .table
                .states
                .group_states
                .get(usize::from(incoming_group))
                .and_then(|group| group.state_for_destination(device_id));
            if let Some(states) = states {
                output.reply(&inquiry_response(states));
            }
            return;
        }

        let mut header = output.reply_header(category::PROFILE_INQUIRY_RESPONSE);
        let groups = self.table.function_block.groups();

        for group in groups.clone() {
            let group_states = &self.table.states.group_states[usize::from(group)];
            for (channel, states) in group_states.channel_states.iter().enumerate() {
                if states.is_empty() {
                    continue;
                }
                header.device_id = ChannelInGroup::Channel(channel as u8);
                output.send_message(group, &header, &inquiry_response(states));
            }
        }

        header.device_id = ChannelInGroup::WholeGroup;
        for group in groups {
            let states = &self.table.states.group_states[usize::from(group)].group_state;
            if !states.is_empty() {
                output.send_message(group, &header, &inquiry_response(states));
            }
        }

        // The block reply always comes last and tells the inquirer nothing else follows
        header.device_id = ChannelInGroup::WholeBlock;
        output.send_message(
            incoming_group,
            &header,
            &inquiry_response(&self.table.states.block_state),
        );
    }

    fn handle_details(&mut self, output: &mut ResponderOutput<'_>, details: &ProfileDetails) {
        let profile_at_address = ProfileAtAddress::new(details.profile, output.channel_address());

        let data = if details.target == 0 {
            let state = self.state(profile_at_address);
            let mut w = Writer::new();
            w.u14(state.active).u14(state.supported);
            w.finish()
        } else {
            let muid = output.incoming_header().source;
            let data = self
                .delegate
                .profile_details_inquired(muid, profile_at_address, details.target);
            if data.is_empty() {
                output.send_nak(nak_status::TARGET_NOT_RECOGNISED);
                return;
            }
            data
        };

        output.reply(&Body::ProfileDetailsResponse(ProfileDetailsResponse {
            profile: details.profile,
            target: details.target,
            data,
        }));
    }

    fn handle_enablement(
        &mut self,
        output: &mut ResponderOutput<'_>,
        profile: Profile,
        num_channels: u16,
        enabled: bool,
    ) {
        let destination = output.channel_address();
        let previous = match self.table.states.state_for_destination(destination) {
            Some(states) => states.get(&profile),
            None => SupportedAndActive::default(),
        };
        if !previous.is_supported() {
            output.send_nak(nak_status::GENERIC);
            return;
        }

        let profile_at_address = ProfileAtAddress::new(profile, destination);
        let request = EnablementRequest {
            muid: output.incoming_header().source,
            profile_at_address,
            num_channels,
            enabled,
        };
        tracing::debug!(
            "Profile {} {} requested at {} by {}",
            profile,
            if enabled { "enable" } else { "disable" },
            destination,
            request.muid
        );

        {
            let mut control = ProfileControl {
                table: &mut self.table,
                output: &mut *output,
                suppressed: Some(profile_at_address),
            };
            self.delegate.profile_enablement_requested(request, &mut control);
        }

        let current = self.state(profile_at_address);
        let count = if enabled { current.active } else { previous.active };
        let report = ProfileChannels {
            profile,
            num_channels: reported_channels(destination, count),
        };
        let body = if current.is_active() {
            Body::ProfileEnabledReport(report)
        } else {
            Body::ProfileDisabledReport(report)
        };
        let header = broadcast_header(output.muid(), destination.channel, body.category());
        output.send_message(destination.group, &header, &body);

        self.table.is_responder = true;
    }
}
