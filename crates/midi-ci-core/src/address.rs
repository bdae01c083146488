//! Addressing types: MUIDs, channels within a group, function blocks and profiles.

use std::fmt;
use std::ops::Range;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Destination of a message within a group.
///
/// Channels order before the wildcards, which matches their wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelInGroup {
    /// A single channel (0-15)
    Channel(u8),
    /// Every channel of the group (wire 0x7e)
    WholeGroup,
    /// Every group of the function block (wire 0x7f)
    WholeBlock,
}

impl ChannelInGroup {
    pub const WHOLE_GROUP_BYTE: u8 = 0x7e;
    pub const WHOLE_BLOCK_BYTE: u8 = 0x7f;

    /// Returns `None` for channels outside 0-15.
    pub fn channel(channel: u8) -> Option<Self> {
        (channel < 16).then_some(Self::Channel(channel))
    }

    /// Decodes a device-id byte. Bytes 0x10..0x7d are not valid destinations.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte & 0x7f {
            c @ 0..=15 => Some(Self::Channel(c)),
            Self::WHOLE_GROUP_BYTE => Some(Self::WholeGroup),
            Self::WHOLE_BLOCK_BYTE => Some(Self::WholeBlock),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Channel(c) => c & 0x0f,
            Self::WholeGroup => Self::WHOLE_GROUP_BYTE,
            Self::WholeBlock => Self::WHOLE_BLOCK_BYTE,
        }
    }
}

impl fmt::Display for ChannelInGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(c) => write!(f, "channel {c}"),
            Self::WholeGroup => f.write_str("whole group"),
            Self::WholeBlock => f.write_str("whole block"),
        }
    }
}

/// A group (0-15) plus a destination within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelAddress {
    pub group: u8,
    pub channel: ChannelInGroup,
}

impl ChannelAddress {
    pub fn new(group: u8, channel: ChannelInGroup) -> Self {
        Self {
            group: group & 0x0f,
            channel,
        }
    }

    pub fn with_group(self, group: u8) -> Self {
        Self::new(group, self.channel)
    }

    pub fn with_channel(self, channel: ChannelInGroup) -> Self {
        Self::new(self.group, channel)
    }

    #[inline]
    pub fn is_block(&self) -> bool {
        self.channel == ChannelInGroup::WholeBlock
    }

    #[inline]
    pub fn is_group(&self) -> bool {
        self.channel == ChannelInGroup::WholeGroup
    }

    #[inline]
    pub fn is_single_channel(&self) -> bool {
        matches!(self.channel, ChannelInGroup::Channel(_))
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group {} {}", self.group, self.channel)
    }
}

impl Default for ChannelAddress {
    fn default() -> Self {
        Self::new(0, ChannelInGroup::WholeBlock)
    }
}

/// 28-bit MIDI-CI unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Muid(u32);

impl Muid {
    pub const BROADCAST: Muid = Muid(0x0fff_ffff);

    /// First value of the range reserved for future use.
    const RESERVED_START: u32 = 0x0fff_ff00;

    /// Returns `None` if any bit above bit 27 is set.
    pub fn new(value: u32) -> Option<Self> {
        (value & !0x0fff_ffff == 0).then_some(Self(value))
    }

    pub fn try_new(value: u32) -> Result<Self> {
        Self::new(value).ok_or(Error::InvalidMuid(value))
    }

    /// Draws a MUID from the non-reserved range.
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(0..Self::RESERVED_START))
    }

    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for Muid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:07x}", self.0)
    }
}

/// Group span of a function block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionBlock {
    /// 0x7f means "no function block"
    pub identifier: u8,
    pub first_group: u8,
    pub num_groups: u8,
}

impl FunctionBlock {
    pub const NONE: u8 = 0x7f;

    pub fn groups(&self) -> Range<u8> {
        let end = self.first_group.saturating_add(self.num_groups).min(16);
        self.first_group.min(end)..end
    }
}

impl Default for FunctionBlock {
    fn default() -> Self {
        Self {
            identifier: Self::NONE,
            first_group: 0,
            num_groups: 1,
        }
    }
}

/// Five-byte profile identifier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Profile(pub [u8; 5]);

impl Profile {
    pub const LEN: usize = 5;

    pub fn bytes(&self) -> &[u8; 5] {
        &self.0
    }
}

impl From<[u8; 5]> for Profile {
    fn from(bytes: [u8; 5]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e] = self.0;
        write!(f, "{a:02x} {b:02x} {c:02x} {d:02x} {e:02x}")
    }
}

/// A profile at a particular destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProfileAtAddress {
    pub profile: Profile,
    pub address: ChannelAddress,
}

impl ProfileAtAddress {
    pub fn new(profile: Profile, address: ChannelAddress) -> Self {
        Self { profile, address }
    }
}
