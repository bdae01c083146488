//! Discovered devices and their last reported profile states.

use std::collections::BTreeMap;

use midi_ci_core::{
    BlockProfileStates, Body, ChannelAddress, ChannelProfileStates, DeviceInfo, Muid, Parsed,
    ProfileAtAddress, SupportedAndActive,
};

use super::event::DeviceEvent;

/// What a remote device said about itself during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDevice {
    pub identity: DeviceInfo,
    pub capabilities: u8,
    pub max_sysex_size: u32,
    /// Group the discovery message arrived on. Requests to the device go there.
    pub group: u8,
}

const ENABLED: SupportedAndActive = SupportedAndActive {
    supported: 1,
    active: 1,
};

const DISABLED: SupportedAndActive = SupportedAndActive {
    supported: 1,
    active: 0,
};

#[derive(Debug, Default)]
pub(crate) struct Remotes {
    devices: BTreeMap<Muid, RemoteDevice>,
    profiles: BTreeMap<Muid, BlockProfileStates>,
    events: Vec<DeviceEvent>,
}

impl Remotes {
    pub fn get(&self, muid: Muid) -> Option<&RemoteDevice> {
        self.devices.get(&muid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Muid, &RemoteDevice)> + '_ {
        self.devices.iter().map(|(muid, remote)| (*muid, remote))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Records a discovery. Only the first sighting of a MUID queues an event.
    pub fn insert(&mut self, muid: Muid, remote: RemoteDevice) {
        if self.devices.insert(muid, remote).is_none() {
            tracing::debug!("Discovered {} (max sysex {})", muid, remote.max_sysex_size);
            self.events.push(DeviceEvent::DeviceAdded(muid));
        }
    }

    pub fn remove(&mut self, muid: Muid) {
        self.profiles.remove(&muid);
        if self.devices.remove(&muid).is_some() {
            tracing::debug!("{} invalidated", muid);
            self.events.push(DeviceEvent::DeviceRemoved(muid));
        }
    }

    pub fn profile_states(&self, muid: Muid, address: ChannelAddress) -> Option<&ChannelProfileStates> {
        self.profiles.get(&muid)?.state_for_destination(address)
    }

    pub fn drain_events(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.events)
    }

    #[inline]
    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    #[inline]
    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }

    /// Updates the cache from replies and reports sent to `address`.
    ///
    /// Profile state is only kept for discovered devices. Everything else
    /// is queued regardless of discovery.
    pub fn observe(&mut self, parsed: &Parsed, address: ChannelAddress) {
        let Some(body) = &parsed.body else {
            return;
        };
        let muid = parsed.header.source;

        match body {
            Body::Nak(nak) => {
                tracing::debug!(
                    "{} rejected {:#04x} with status {:#04x}",
                    muid,
                    nak.original_category,
                    nak.status_code
                );
                self.events.push(DeviceEvent::MessageNotAcknowledged {
                    muid,
                    nak: nak.clone(),
                });
            }
            Body::ProfileInquiryResponse(response) => {
                let Some(states) = self.states_mut(muid, address) else {
                    return;
                };
                *states = ChannelProfileStates::default();
                for profile in &response.enabled {
                    states.set(*profile, ENABLED);
                }
                for profile in &response.disabled {
                    states.set(*profile, DISABLED);
                }
                self.events.push(DeviceEvent::ProfileStateReceived { muid, address });
            }
            Body::ProfileAdded(profile) => {
                let Some(states) = self.states_mut(muid, address) else {
                    return;
                };
                if !states.get(profile).is_supported() {
                    states.set(*profile, DISABLED);
                }
                self.events.push(DeviceEvent::ProfilePresenceChanged {
                    muid,
                    at: ProfileAtAddress::new(*profile, address),
                    exists: true,
                });
            }
            Body::ProfileRemoved(profile) => {
                let Some(states) = self.states_mut(muid, address) else {
                    return;
                };
                states.erase(profile);
                self.events.push(DeviceEvent::ProfilePresenceChanged {
                    muid,
                    at: ProfileAtAddress::new(*profile, address),
                    exists: false,
                });
            }
            Body::ProfileEnabledReport(report) => {
                // Version 1 reports and group or block reports carry no count
                let num_channels = if parsed.header.version >= 2 {
                    report.num_channels.max(1)
                } else {
                    1
                };
                let Some(states) = self.states_mut(muid, address) else {
                    return;
                };
                let supported = states.get(&report.profile).supported.max(num_channels);
                states.set(
                    report.profile,
                    SupportedAndActive {
                        supported,
                        active: num_channels,
                    },
                );
                self.events.push(DeviceEvent::ProfileEnablementChanged {
                    muid,
                    at: ProfileAtAddress::new(report.profile, address),
                    num_channels,
                });
            }
            Body::ProfileDisabledReport(report) => {
                let Some(states) = self.states_mut(muid, address) else {
                    return;
                };
                let supported = states.get(&report.profile).supported.max(1);
                states.set(report.profile, SupportedAndActive { supported, active: 0 });
                self.events.push(DeviceEvent::ProfileEnablementChanged {
                    muid,
                    at: ProfileAtAddress::new(report.profile, address),
                    num_channels: 0,
                });
            }
            Body::ProfileDetailsResponse(response) => {
                self.events.push(DeviceEvent::ProfileDetailsReceived {
                    muid,
                    at: ProfileAtAddress::new(response.profile, address),
                    target: response.target,
                    data: response.data.clone(),
                });
            }
            Body::ProfileSpecificData(specific) => {
                self.events.push(DeviceEvent::ProfileSpecificDataReceived {
                    muid,
                    at: ProfileAtAddress::new(specific.profile, address),
                    data: specific.data.clone(),
                });
            }
            Body::PropertyCapabilitiesResponse(capabilities) => {
                self.events.push(DeviceEvent::PropertyCapabilitiesReceived {
                    muid,
                    capabilities: *capabilities,
                });
            }
            _ => {}
        }
    }

    fn states_mut(&mut self, muid: Muid, address: ChannelAddress) -> Option<&mut ChannelProfileStates> {
        if !self.devices.contains_key(&muid) {
            tracing::trace!("Ignoring profile state from undiscovered {}", muid);
            return None;
        }
        self.profiles
            .entry(muid)
            .or_default()
            .state_for_destination_mut(address)
    }
}
