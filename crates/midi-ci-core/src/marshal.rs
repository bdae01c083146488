//! 7-bit little-endian field marshalling.
//!
//! Every multi-byte integer in a MIDI-CI message is split into 7-bit groups,
//! least significant group first. Variable-length spans carry a 14-bit length
//! prefix unless noted otherwise.

use crate::address::{Muid, Profile};
use crate::error::{Error, Result};

/// Largest length that fits a 14-bit prefix.
pub const MAX_U14: usize = 0x3fff;

/// Largest length that fits a 28-bit prefix.
pub const MAX_U28: usize = 0x0fff_ffff;

/// Appends fields to a byte buffer.
#[derive(Debug, Default)]
pub struct Writer<'a> {
    buf: Option<&'a mut Vec<u8>>,
    owned: Vec<u8>,
}

impl<'a> Writer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to an existing buffer instead of an owned one.
    pub fn append_to(buf: &'a mut Vec<u8>) -> Self {
        Self {
            buf: Some(buf),
            owned: Vec::new(),
        }
    }

    fn out(&mut self) -> &mut Vec<u8> {
        match self.buf.as_deref_mut() {
            Some(buf) => buf,
            None => &mut self.owned,
        }
    }

    pub fn u7(&mut self, value: u8) -> &mut Self {
        self.out().push(value & 0x7f);
        self
    }

    pub fn u14(&mut self, value: u16) -> &mut Self {
        self.out()
            .extend_from_slice(&[(value & 0x7f) as u8, ((value >> 7) & 0x7f) as u8]);
        self
    }

    pub fn u28(&mut self, value: u32) -> &mut Self {
        let out = self.out();
        for shift in [0, 7, 14, 21] {
            out.push(((value >> shift) & 0x7f) as u8);
        }
        self
    }

    pub fn muid(&mut self, muid: Muid) -> &mut Self {
        self.u28(muid.value())
    }

    pub fn profile(&mut self, profile: &Profile) -> &mut Self {
        self.raw(profile.bytes())
    }

    /// Appends bytes unchanged.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.out().extend_from_slice(bytes);
        self
    }

    /// Appends a 14-bit length followed by the bytes.
    pub fn span_u14(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let len = checked_len(bytes.len(), MAX_U14)?;
        self.u14(len as u16).raw(bytes);
        Ok(self)
    }

    /// Appends a 28-bit length followed by the bytes.
    pub fn span_u28(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let len = checked_len(bytes.len(), MAX_U28)?;
        self.u28(len as u32).raw(bytes);
        Ok(self)
    }

    /// Returns the owned buffer; empty when writing into a borrowed one.
    pub fn finish(self) -> Vec<u8> {
        self.owned
    }
}

fn checked_len(len: usize, max: usize) -> Result<usize> {
    if len > max {
        return Err(Error::FieldTooLong { len, max });
    }
    Ok(len)
}

/// Reads fields from the front of a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn rest(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(Error::Malformed("truncated field"));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    pub fn u7(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0] & 0x7f)
    }

    /// Reads a byte without masking.
    pub fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u14(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from(b[0] & 0x7f) | u16::from(b[1] & 0x7f) << 7)
    }

    pub fn u28(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(b.iter()
            .enumerate()
            .fold(0, |acc, (i, byte)| acc | u32::from(byte & 0x7f) << (7 * i)))
    }

    pub fn muid(&mut self) -> Result<Muid> {
        let value = self.u28()?;
        // u28() masks every group, so the value always fits.
        Muid::new(value).ok_or(Error::InvalidMuid(value))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn profile(&mut self) -> Result<Profile> {
        self.array::<5>().map(Profile)
    }

    pub fn span_u14(&mut self) -> Result<&'a [u8]> {
        let len = self.u14()? as usize;
        self.take(len)
    }

    pub fn span_u28(&mut self) -> Result<&'a [u8]> {
        let len = self.u28()? as usize;
        self.take(len)
    }
}
