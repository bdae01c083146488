//! Device builder.

use midi_ci_core::{DeviceInfo, FunctionBlock, Muid};

use crate::error::{Error, Result};
use crate::profile_host::{ProfileDelegate, ProfileHost};
use crate::property_host::{PropertyDelegate, PropertyHost};

use super::{Device, DeviceOptions, DeviceOutput, Sink};

/// Configures a [`Device`].
///
/// An output is required. Profile and property support are enabled by
/// supplying the matching delegate.
#[derive(Default)]
pub struct DeviceBuilder {
    options: DeviceOptions,
    sink: Option<Sink>,
    profiles: Option<Box<dyn ProfileDelegate>>,
    properties: Option<Box<dyn PropertyDelegate>>,
}

impl DeviceBuilder {
    /// Replaces every option at once, e.g. with options loaded from a file.
    pub fn options(mut self, options: DeviceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn muid(mut self, muid: Muid) -> Self {
        self.options.muid = Some(muid);
        self
    }

    pub fn function_block(mut self, function_block: FunctionBlock) -> Self {
        self.options.function_block = function_block;
        self
    }

    pub fn identity(mut self, identity: DeviceInfo) -> Self {
        self.options.identity = identity;
        self
    }

    pub fn max_sysex_size(mut self, size: usize) -> Self {
        self.options.max_sysex_size = size;
        self
    }

    /// Receives every outgoing message with its group. Messages carry no
    /// 0xf0/0xf7 framing.
    pub fn output(mut self, sink: impl FnMut(u8, &[u8]) + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Enables profile configuration.
    pub fn profiles(mut self, delegate: impl ProfileDelegate + 'static) -> Self {
        self.profiles = Some(Box::new(delegate));
        self
    }

    /// Enables property exchange.
    pub fn properties(mut self, delegate: impl PropertyDelegate + 'static) -> Self {
        self.properties = Some(Box::new(delegate));
        self
    }

    pub fn build(self) -> Result<Device> {
        self.options.validate()?;
        let sink = self
            .sink
            .ok_or_else(|| Error::InvalidConfig("an output is required".into()))?;

        let muid = self.options.muid.unwrap_or_else(Muid::random);
        let function_block = self.options.function_block;

        let profile_host = self
            .profiles
            .map(|delegate| ProfileHost::new(function_block, delegate));
        let property_host = self.properties.map(|delegate| {
            PropertyHost::new(function_block, delegate, self.options.max_sysex_size)
        });

        tracing::debug!(
            "MIDI-CI device {} created (profiles: {}, properties: {})",
            muid,
            profile_host.is_some(),
            property_host.is_some()
        );

        Ok(Device {
            options: self.options,
            output: DeviceOutput { muid, sink },
            profile_host,
            property_host,
            remotes: Default::default(),
        })
    }
}
