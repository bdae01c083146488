//! MIDI Capability Inquiry data model.
//!
//! Pure data and codec, no I/O:
//!
//! - **Addressing**: MUIDs, groups, channels, function blocks, profile ids
//! - **Profile state**: supported/active channel counts per destination
//! - **Messages**: typed headers and bodies, 7-bit marshalling, parser and encoder
//! - **Encodings**: 7-bit text, Mcoded7, property-exchange JSON headers
//!
//! # Example
//!
//! ```ignore
//! use midi_ci_core::{parser, Muid};
//!
//! let (parsed, status) = parser::parse_for(own_muid, &sysex_without_framing);
//! if let Some(parsed) = parsed {
//!     println!("{:?} from {}", parsed.body, parsed.header.source);
//! }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod address;
pub mod encoding;
pub mod marshal;
pub mod message;
pub mod parser;
pub mod profile_state;
pub mod property_header;

pub use address::{ChannelAddress, ChannelInGroup, FunctionBlock, Muid, Profile, ProfileAtAddress};
pub use encoding::Encoding;
pub use message::{Body, ChunkCount, DeviceInfo, Header, Parsed, IMPLEMENTATION_VERSION};
pub use parser::ParseStatus;
pub use profile_state::{
    BlockProfileStates, ChannelProfileStates, GroupProfileStates, ProfileStateEntry,
    SupportedAndActive,
};
pub use property_header::{
    Pagination, PropertyReplyData, PropertyReplyHeader, PropertyRequestData,
    PropertyRequestHeader, PropertySubscriptionHeader, SubscriptionCommand,
};
