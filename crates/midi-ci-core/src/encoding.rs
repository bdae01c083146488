//! Text and payload encodings used by property exchange.
//!
//! SysEx data bytes are 7-bit, so text is written as escaped ASCII and binary
//! bodies are either plain ASCII or Mcoded7.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Value of the `mutualEncoding` header field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "ASCII")]
    Ascii,
    #[serde(rename = "Mcoded7")]
    Mcoded7,
    #[serde(rename = "zlib+Mcoded7")]
    ZlibMcoded7,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Ascii => "ASCII",
            Encoding::Mcoded7 => "Mcoded7",
            Encoding::ZlibMcoded7 => "zlib+Mcoded7",
        }
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ASCII" => Ok(Encoding::Ascii),
            "Mcoded7" => Ok(Encoding::Mcoded7),
            "zlib+Mcoded7" => Ok(Encoding::ZlibMcoded7),
            other => Err(Error::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// Encodes a property body for the wire.
pub fn encode(bytes: &[u8], encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Ascii if bytes.iter().any(|b| b & 0x80 != 0) => Err(Error::NonSevenBitData),
        Encoding::Ascii => Ok(bytes.to_vec()),
        Encoding::Mcoded7 => Ok(to_mcoded7(bytes)),
        Encoding::ZlibMcoded7 => Err(Error::UnsupportedEncoding(encoding.as_str().to_string())),
    }
}

/// Decodes a property body received from the wire.
pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Ascii if bytes.iter().any(|b| b & 0x80 != 0) => Err(Error::NonSevenBitData),
        Encoding::Ascii => Ok(bytes.to_vec()),
        Encoding::Mcoded7 => Ok(from_mcoded7(bytes)),
        Encoding::ZlibMcoded7 => Err(Error::UnsupportedEncoding(encoding.as_str().to_string())),
    }
}

/// Packs each group of up to seven bytes as one byte of high bits followed by
/// the seven low-7-bit bytes.
pub fn to_mcoded7(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + bytes.len().div_ceil(7));
    for group in bytes.chunks(7) {
        let high = group
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, b)| acc | ((b & 0x80) >> (i + 1)));
        out.push(high);
        out.extend(group.iter().map(|b| b & 0x7f));
    }
    out
}

pub fn from_mcoded7(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for group in bytes.chunks(8) {
        let (high, rest) = match group.split_first() {
            Some(split) => split,
            None => continue,
        };
        out.extend(
            rest.iter()
                .enumerate()
                .map(|(i, b)| ((high << (i + 1)) & 0x80) | (b & 0x7f)),
        );
    }
    out
}

/// Escapes text as 7-bit bytes. Characters outside printable ASCII (other than
/// newline) are written as `\uXXXX` UTF-16 escapes.
pub fn string_to_7bit_text(text: &str) -> Vec<u8> {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\n' || (' '..='\u{7f}').contains(&c) {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{unit:04x}");
            }
        }
    }
    out.into_bytes()
}

/// Reverses [`string_to_7bit_text`], also accepting the JSON single-character
/// escapes.
pub fn string_from_7bit_text(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();

    while let Some(b) = iter.next() {
        if (b < 0x20 && b != b'\n') || b >= 0x80 {
            return Err(Error::InvalidText);
        }
        if b != b'\\' {
            units.push(u16::from(b));
            continue;
        }
        let unit = match iter.next().ok_or(Error::InvalidText)? {
            b'"' => u16::from(b'"'),
            b'\\' => u16::from(b'\\'),
            b'/' => u16::from(b'/'),
            b'b' => 0x08,
            b'f' => 0x0c,
            b'n' => u16::from(b'\n'),
            b'r' => u16::from(b'\r'),
            b't' => u16::from(b'\t'),
            b'u' => {
                let hex: Vec<u8> = iter.by_ref().take(4).collect();
                let hex = std::str::from_utf8(&hex).map_err(|_| Error::InvalidText)?;
                if hex.len() != 4 {
                    return Err(Error::InvalidText);
                }
                u16::from_str_radix(hex, 16).map_err(|_| Error::InvalidText)?
            }
            _ => return Err(Error::InvalidText),
        };
        units.push(unit);
    }

    String::from_utf16(&units).map_err(|_| Error::InvalidText)
}

/// Serialises JSON compactly, escaping non-ASCII characters.
pub fn json_to_7bit_text(value: &serde_json::Value) -> Result<Vec<u8>> {
    let text = serde_json::to_string(value)?;
    Ok(string_to_7bit_text(&text))
}

/// Parses JSON from 7-bit text. Empty input yields `Value::Null`.
pub fn json_from_7bit_text(bytes: &[u8]) -> Result<serde_json::Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    if bytes.iter().any(|b| b & 0x80 != 0) {
        return Err(Error::NonSevenBitData);
    }
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_mcoded7_layout() {
        let encoded = to_mcoded7(&[0x81, 0x02, 0xff]);
        assert_eq!(encoded, [0b0101_0000, 0x01, 0x02, 0x7f]);
        assert_eq!(from_mcoded7(&encoded), [0x81, 0x02, 0xff]);
    }

    #[test]
    fn test_ascii_rejects_high_bit() {
        assert!(matches!(encode(&[0x41, 0x80], Encoding::Ascii), Err(Error::NonSevenBitData)));
        assert_eq!(encode(b"abc", Encoding::Ascii).unwrap(), b"abc");
        assert!(matches!(
            encode(b"abc", Encoding::ZlibMcoded7),
            Err(Error::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_encoding_names() {
        for encoding in [Encoding::Ascii, Encoding::Mcoded7, Encoding::ZlibMcoded7] {
            assert_eq!(encoding.as_str().parse::<Encoding>().unwrap(), encoding);
        }
        assert!("gzip".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_text_escapes() {
        let converted = string_to_7bit_text("Accepted Beat \u{266a}");
        assert_eq!(converted, b"Accepted Beat \\u266a");
        assert_eq!(string_from_7bit_text(&converted).unwrap(), "Accepted Beat \u{266a}");

        // Surrogate pairs survive
        let emoji = string_to_7bit_text("\u{1f3b9}");
        assert_eq!(emoji, b"\\ud83c\\udfb9");
        assert_eq!(string_from_7bit_text(&emoji).unwrap(), "\u{1f3b9}");

        assert!(string_from_7bit_text(b"bad \\u12").is_err());
        assert!(string_from_7bit_text(b"bad \\q").is_err());
        assert!(string_from_7bit_text(&[0x01]).is_err());
    }

    #[test]
    fn test_json_text() {
        let value = json!({"resource": "Caf\u{e9}", "quote": "a\"b"});
        let bytes = json_to_7bit_text(&value).unwrap();
        assert!(bytes.iter().all(|b| b & 0x80 == 0));
        assert_eq!(json_from_7bit_text(&bytes).unwrap(), value);
        assert_eq!(json_from_7bit_text(b"").unwrap(), serde_json::Value::Null);
    }

    proptest! {
        #[test]
        fn prop_mcoded7_lossless(bytes in proptest::collection::vec(any::<u8>(), 0..100)) {
            let encoded = to_mcoded7(&bytes);
            prop_assert!(encoded.iter().all(|b| b & 0x80 == 0));
            prop_assert_eq!(from_mcoded7(&encoded), bytes);
        }
    }
}
