//! JSON headers carried by property-exchange messages.
//!
//! Headers are written condensed: fields holding their default value are
//! omitted, and unknown fields are kept in `extended` so they round-trip.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::encoding::{self, Encoding};
use crate::error::{Error, Result};

pub const DEFAULT_MEDIA_TYPE: &str = "application/json";

/// Status codes used in reply headers.
pub mod status {
    pub const OK: i64 = 200;
    pub const ACCEPTED: i64 = 202;
    pub const NOTIFY_PENDING: i64 = 100;
    pub const TOO_MANY_REQUESTS: i64 = 343;
    pub const BAD_REQUEST: i64 = 400;
    pub const NOT_ALLOWED: i64 = 405;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionCommand {
    Start,
    Partial,
    Full,
    Notify,
    End,
}

impl SubscriptionCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Partial => "partial",
            Self::Full => "full",
            Self::Notify => "notify",
            Self::End => "end",
        }
    }
}

impl fmt::Display for SubscriptionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "start" => Self::Start,
            "partial" => Self::Partial,
            "full" => Self::Full,
            "notify" => Self::Notify,
            "end" => Self::End,
            _ => return Err(Error::Malformed("unknown subscription command")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 1,
        }
    }
}

/// Header of a get or set inquiry.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRequestHeader {
    pub resource: String,
    pub res_id: String,
    pub mutual_encoding: Encoding,
    pub media_type: String,
    pub set_partial: bool,
    pub pagination: Option<Pagination>,
    pub extended: Map<String, Value>,
}

impl Default for PropertyRequestHeader {
    fn default() -> Self {
        Self {
            resource: String::new(),
            res_id: String::new(),
            mutual_encoding: Encoding::Ascii,
            media_type: DEFAULT_MEDIA_TYPE.to_string(),
            set_partial: false,
            pagination: None,
            extended: Map::new(),
        }
    }
}

/// Header of a reply to any inquiry.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyReplyHeader {
    pub status: i64,
    pub message: String,
    pub mutual_encoding: Encoding,
    pub cache_time: i64,
    pub media_type: String,
    pub extended: Map<String, Value>,
}

impl Default for PropertyReplyHeader {
    fn default() -> Self {
        Self {
            status: status::OK,
            message: String::new(),
            mutual_encoding: Encoding::Ascii,
            cache_time: 0,
            media_type: DEFAULT_MEDIA_TYPE.to_string(),
            extended: Map::new(),
        }
    }
}

impl PropertyReplyHeader {
    pub fn with_status(status: i64) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

/// Header of a subscription inquiry or update.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySubscriptionHeader {
    pub resource: String,
    pub res_id: String,
    pub mutual_encoding: Encoding,
    pub media_type: String,
    pub command: Option<SubscriptionCommand>,
    pub subscribe_id: String,
    pub extended: Map<String, Value>,
}

impl Default for PropertySubscriptionHeader {
    fn default() -> Self {
        Self {
            resource: String::new(),
            res_id: String::new(),
            mutual_encoding: Encoding::Ascii,
            media_type: DEFAULT_MEDIA_TYPE.to_string(),
            command: None,
            subscribe_id: String::new(),
            extended: Map::new(),
        }
    }
}

/// Condensed header fields, written with `first` leading.
struct Fields {
    first: Option<(&'static str, Value)>,
    rest: Map<String, Value>,
}

impl Fields {
    fn new() -> Self {
        Self {
            first: None,
            rest: Map::new(),
        }
    }

    fn lead(&mut self, key: &'static str, value: Value) {
        self.first = Some((key, value));
    }

    fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.rest.insert(key.to_string(), value.into());
    }

    fn put_if(&mut self, cond: bool, key: &str, value: impl Into<Value>) {
        if cond {
            self.put(key, value);
        }
    }

    fn into_value(self, extended: &Map<String, Value>) -> Value {
        let mut out = Map::new();
        if let Some((key, value)) = self.first {
            out.insert(key.to_string(), value);
        }
        for (key, value) in self.rest.iter().chain(extended.iter()) {
            if !out.contains_key(key) {
                out.insert(key.clone(), value.clone());
            }
        }
        Value::Object(out)
    }
}

fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

fn as_encoding(value: &Value) -> Encoding {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Encoding::Ascii)
}

fn object(value: &Value) -> impl Iterator<Item = (&String, &Value)> {
    value.as_object().into_iter().flat_map(|o| o.iter())
}

impl PropertyRequestHeader {
    pub fn from_json(value: &Value) -> Self {
        let mut header = Self::default();
        for (key, v) in object(value) {
            match key.as_str() {
                "resource" => header.resource = as_string(v),
                "resId" => header.res_id = as_string(v),
                "mediaType" => header.media_type = as_string(v),
                "mutualEncoding" => header.mutual_encoding = as_encoding(v),
                "setPartial" => header.set_partial = v.as_bool().unwrap_or(false),
                "offset" => header.pagination.get_or_insert_with(Pagination::default).offset = as_int(v),
                "limit" => header.pagination.get_or_insert_with(Pagination::default).limit = as_int(v),
                _ => {
                    header.extended.insert(key.clone(), v.clone());
                }
            }
        }
        header
    }

    pub fn to_json(&self) -> Value {
        let defaults = Self::default();
        let mut fields = Fields::new();
        if self.resource != defaults.resource {
            fields.lead("resource", Value::from(self.resource.as_str()));
        }
        fields.put_if(self.res_id != defaults.res_id, "resId", self.res_id.as_str());
        fields.put_if(
            self.mutual_encoding != defaults.mutual_encoding,
            "mutualEncoding",
            self.mutual_encoding.as_str(),
        );
        fields.put_if(self.media_type != defaults.media_type, "mediaType", self.media_type.as_str());
        fields.put_if(self.set_partial, "setPartial", true);
        if let Some(pagination) = self.pagination {
            fields.put("offset", pagination.offset);
            fields.put("limit", pagination.limit);
        }
        fields.into_value(&self.extended)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_json(&encoding::json_from_7bit_text(bytes)?))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encoding::json_to_7bit_text(&self.to_json())
    }
}

impl PropertyReplyHeader {
    pub fn from_json(value: &Value) -> Self {
        let mut header = Self::default();
        for (key, v) in object(value) {
            match key.as_str() {
                "status" => header.status = as_int(v),
                "message" => header.message = as_string(v),
                "cacheTime" => header.cache_time = as_int(v),
                "mediaType" => header.media_type = as_string(v),
                "mutualEncoding" => header.mutual_encoding = as_encoding(v),
                _ => {
                    header.extended.insert(key.clone(), v.clone());
                }
            }
        }
        header
    }

    /// The status field is always written.
    pub fn to_json(&self) -> Value {
        let defaults = Self::default();
        let mut fields = Fields::new();
        fields.lead("status", Value::from(self.status));
        fields.put_if(
            self.mutual_encoding != defaults.mutual_encoding,
            "mutualEncoding",
            self.mutual_encoding.as_str(),
        );
        fields.put_if(self.media_type != defaults.media_type, "mediaType", self.media_type.as_str());
        fields.put_if(self.cache_time != defaults.cache_time, "cacheTime", self.cache_time);
        fields.put_if(self.message != defaults.message, "message", self.message.as_str());
        fields.into_value(&self.extended)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_json(&encoding::json_from_7bit_text(bytes)?))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encoding::json_to_7bit_text(&self.to_json())
    }
}

impl PropertySubscriptionHeader {
    pub fn from_json(value: &Value) -> Self {
        let mut header = Self::default();
        for (key, v) in object(value) {
            match key.as_str() {
                "resource" => header.resource = as_string(v),
                "resId" => header.res_id = as_string(v),
                "mediaType" => header.media_type = as_string(v),
                "mutualEncoding" => header.mutual_encoding = as_encoding(v),
                "subscribeId" => header.subscribe_id = as_string(v),
                // Unknown commands read as notify
                "command" => {
                    header.command = Some(
                        v.as_str()
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(SubscriptionCommand::Notify),
                    )
                }
                _ => {
                    header.extended.insert(key.clone(), v.clone());
                }
            }
        }
        header
    }

    pub fn to_json(&self) -> Value {
        let defaults = Self::default();
        let mut fields = Fields::new();
        if let Some(command) = self.command {
            fields.lead("command", Value::from(command.as_str()));
        }
        fields.put_if(self.resource != defaults.resource, "resource", self.resource.as_str());
        fields.put_if(
            self.subscribe_id != defaults.subscribe_id,
            "subscribeId",
            self.subscribe_id.as_str(),
        );
        fields.put_if(self.res_id != defaults.res_id, "resId", self.res_id.as_str());
        fields.put_if(
            self.mutual_encoding != defaults.mutual_encoding,
            "mutualEncoding",
            self.mutual_encoding.as_str(),
        );
        fields.put_if(self.media_type != defaults.media_type, "mediaType", self.media_type.as_str());
        fields.into_value(&self.extended)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_json(&encoding::json_from_7bit_text(bytes)?))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encoding::json_to_7bit_text(&self.to_json())
    }
}

/// A decoded inquiry: header plus the body after undoing the mutual encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRequestData {
    pub header: PropertyRequestHeader,
    pub body: Vec<u8>,
}

/// A reply produced by a property delegate. `body` is unencoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyReplyData {
    pub header: PropertyReplyHeader,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_header_condensed() {
        let header = PropertyRequestHeader {
            resource: "ChannelList".into(),
            pagination: Some(Pagination {
                offset: 10,
                limit: 5,
            }),
            ..Default::default()
        };
        let value = header.to_json();
        assert_eq!(value, json!({"resource": "ChannelList", "offset": 10, "limit": 5}));
        assert_eq!(PropertyRequestHeader::from_json(&value), header);

        let text = header.to_bytes().unwrap();
        assert!(text.starts_with(br#"{"resource":"ChannelList""#));
    }

    #[test]
    fn test_request_header_extended_fields() {
        let value = json!({"resource": "X", "mutualEncoding": "Mcoded7", "vendor": [1, 2]});
        let header = PropertyRequestHeader::from_json(&value);
        assert_eq!(header.mutual_encoding, Encoding::Mcoded7);
        assert_eq!(header.extended.get("vendor"), Some(&json!([1, 2])));
        assert_eq!(header.to_json(), value);
    }

    #[test]
    fn test_reply_header_always_has_status() {
        let reply = PropertyReplyHeader::default();
        assert_eq!(reply.to_json(), json!({"status": 200}));
        assert_eq!(reply.to_bytes().unwrap(), br#"{"status":200}"#);

        let parsed = PropertyReplyHeader::from_bytes(br#"{"status":343,"message":"busy"}"#).unwrap();
        assert_eq!(parsed.status, status::TOO_MANY_REQUESTS);
        assert_eq!(parsed.message, "busy");
    }

    #[test]
    fn test_subscription_header() {
        let header = PropertySubscriptionHeader {
            resource: "ProgramList".into(),
            command: Some(SubscriptionCommand::Start),
            ..Default::default()
        };
        assert_eq!(
            header.to_bytes().unwrap(),
            br#"{"command":"start","resource":"ProgramList"}"#
        );

        let parsed = PropertySubscriptionHeader::from_json(&json!({
            "command": "bogus",
            "subscribeId": "3"
        }));
        assert_eq!(parsed.command, Some(SubscriptionCommand::Notify));
        assert_eq!(parsed.subscribe_id, "3");
        assert_eq!(PropertySubscriptionHeader::from_json(&Value::Null).command, None);
    }
}
