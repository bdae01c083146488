//! Profile support and enablement state, per destination.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::address::{ChannelAddress, ChannelInGroup, Profile};

/// Number of channels a profile supports and how many are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedAndActive {
    pub supported: u16,
    pub active: u16,
}

impl SupportedAndActive {
    #[inline]
    pub fn is_supported(&self) -> bool {
        self.supported > 0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStateEntry {
    pub profile: Profile,
    pub state: SupportedAndActive,
}

/// Profile states for one destination, sorted by profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelProfileStates {
    entries: SmallVec<[ProfileStateEntry; 4]>,
}

impl ChannelProfileStates {
    fn find(&self, profile: &Profile) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.profile.cmp(profile))
    }

    /// Zero state for profiles that have no entry.
    pub fn get(&self, profile: &Profile) -> SupportedAndActive {
        self.find(profile)
            .map(|i| self.entries[i].state)
            .unwrap_or_default()
    }

    /// Inserts or replaces. Setting the all-zero state removes the entry.
    pub fn set(&mut self, profile: Profile, state: SupportedAndActive) {
        if state == SupportedAndActive::default() {
            self.erase(&profile);
            return;
        }
        match self.find(&profile) {
            Ok(i) => self.entries[i].state = state,
            Err(i) => self.entries.insert(i, ProfileStateEntry { profile, state }),
        }
    }

    pub fn erase(&mut self, profile: &Profile) {
        if let Ok(i) = self.find(profile) {
            self.entries.remove(i);
        }
    }

    /// Profiles with at least one active channel.
    pub fn active(&self) -> Vec<Profile> {
        self.filter(|s| s.is_active())
    }

    /// Profiles that are supported but not active.
    pub fn inactive(&self) -> Vec<Profile> {
        self.filter(|s| s.is_supported() && !s.is_active())
    }

    fn filter(&self, pred: impl Fn(&SupportedAndActive) -> bool) -> Vec<Profile> {
        self.entries
            .iter()
            .filter(|e| pred(&e.state))
            .map(|e| e.profile)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileStateEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-channel states plus the whole-group state of one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupProfileStates {
    pub channel_states: [ChannelProfileStates; 16],
    pub group_state: ChannelProfileStates,
}

impl GroupProfileStates {
    /// `None` for the whole-block destination, which groups do not hold.
    pub fn state_for_destination(&self, destination: ChannelInGroup) -> Option<&ChannelProfileStates> {
        match destination {
            ChannelInGroup::WholeGroup => Some(&self.group_state),
            ChannelInGroup::Channel(c) => self.channel_states.get(usize::from(c)),
            ChannelInGroup::WholeBlock => None,
        }
    }

    pub fn state_for_destination_mut(
        &mut self,
        destination: ChannelInGroup,
    ) -> Option<&mut ChannelProfileStates> {
        match destination {
            ChannelInGroup::WholeGroup => Some(&mut self.group_state),
            ChannelInGroup::Channel(c) => self.channel_states.get_mut(usize::from(c)),
            ChannelInGroup::WholeBlock => None,
        }
    }
}

/// Profile states for every destination of a function block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockProfileStates {
    pub group_states: [GroupProfileStates; 16],
    pub block_state: ChannelProfileStates,
}

impl BlockProfileStates {
    pub fn state_for_destination(&self, address: ChannelAddress) -> Option<&ChannelProfileStates> {
        if address.is_block() {
            return Some(&self.block_state);
        }
        self.group_states
            .get(usize::from(address.group))?
            .state_for_destination(address.channel)
    }

    pub fn state_for_destination_mut(
        &mut self,
        address: ChannelAddress,
    ) -> Option<&mut ChannelProfileStates> {
        if address.is_block() {
            return Some(&mut self.block_state);
        }
        self.group_states
            .get_mut(usize::from(address.group))?
            .state_for_destination_mut(address.channel)
    }

    /// Zero state when the destination does not exist.
    pub fn get(&self, profile: &Profile, address: ChannelAddress) -> SupportedAndActive {
        self.state_for_destination(address)
            .map(|states| states.get(profile))
            .unwrap_or_default()
    }
}
