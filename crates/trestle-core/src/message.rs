//! Wire protocol messages.
//!
//! A [`Message`] is a short ASCII id plus a list of typed attributes. The
//! same message shape travels in both directions between the editor and the
//! processor; [`id`] lists the known ids and [`attr`] the attribute keys.
//!
//! Dispatch code reads attributes through the [`AttributeSource`] trait so
//! it runs identically over an owned `Message` (tests, in-process delivery)
//! and over a live host attribute list at the COM boundary.

use crate::error::{BridgeError, BridgeResult};

/// Known message ids.
pub mod id {
    /// Editor announces itself to the processor.
    pub const INIT: &str = "init";
    /// Editor is going away.
    pub const CLOSE: &str = "close";
    /// Processor has no more queued data; editor may request again.
    pub const READY: &str = "ready";
    /// Editor requests the next batch of queued data.
    pub const IDLE: &str = "idle";
    /// Parameter edit gesture started/ended.
    pub const PARAMETER_EDIT: &str = "parameter-edit";
    /// Parameter value change (either direction).
    pub const PARAMETER_SET: &str = "parameter-set";
    /// Key/value state change (either direction).
    pub const STATE_SET: &str = "state-set";
    /// Processor sample rate, pushed to the editor.
    pub const SAMPLE_RATE: &str = "sample-rate";
    /// Raw 3-byte MIDI event from the editor.
    pub const MIDI: &str = "midi";
}

/// Attribute keys.
pub mod attr {
    /// Routing attribute naming which half should consume the message.
    pub const TARGET: &str = "__dpf_msg_target__";
    /// Raw parameter index (program slot included).
    pub const RINDEX: &str = "rindex";
    /// Generic value attribute (parameter value, sample rate).
    pub const VALUE: &str = "value";
    /// Edit gesture flag: 1 = started, 0 = ended.
    pub const STARTED: &str = "started";
    /// State key string.
    pub const KEY: &str = "key";
    /// Length of the state key string, in UTF-16 code units.
    pub const KEY_LENGTH: &str = "key:length";
    /// Length of the state value string, in UTF-16 code units.
    pub const VALUE_LENGTH: &str = "value:length";
    /// MIDI event bytes.
    pub const DATA: &str = "data";
}

/// [`attr::TARGET`] value for messages addressed to the processor.
pub const TARGET_PROCESSOR: i64 = 1;
/// [`attr::TARGET`] value for messages addressed to the editor.
pub const TARGET_EDITOR: i64 = 2;

/// An attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    /// UTF-16 code units, not null-terminated.
    String(Vec<u16>),
    Binary(Vec<u8>),
}

/// An owned protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: String,
    attrs: Vec<(String, Value)>,
}

impl Message {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            attrs: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> &[(String, Value)] {
        &self.attrs
    }

    pub fn set_int(&mut self, key: &str, value: i64) -> &mut Self {
        self.attrs.push((key.to_owned(), Value::Int(value)));
        self
    }

    pub fn set_float(&mut self, key: &str, value: f64) -> &mut Self {
        self.attrs.push((key.to_owned(), Value::Float(value)));
        self
    }

    pub fn set_string(&mut self, key: &str, value: &str) -> &mut Self {
        self.attrs
            .push((key.to_owned(), Value::String(encode_utf16(value))));
        self
    }

    pub fn set_binary(&mut self, key: &str, value: &[u8]) -> &mut Self {
        self.attrs.push((key.to_owned(), Value::Binary(value.to_vec())));
        self
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Typed attribute reads for message dispatch.
///
/// Reads fail with [`BridgeError::InvalidArgument`] when the key is missing
/// or holds a different type.
pub trait AttributeSource {
    fn int(&self, key: &str) -> BridgeResult<i64>;
    fn float(&self, key: &str) -> BridgeResult<f64>;
    /// Read a UTF-16 string attribute of at most `max_units` code units.
    fn string(&self, key: &str, max_units: usize) -> BridgeResult<Vec<u16>>;
    fn binary(&self, key: &str) -> BridgeResult<Vec<u8>>;
}

impl AttributeSource for Message {
    fn int(&self, key: &str) -> BridgeResult<i64> {
        match self.get(key) {
            Some(Value::Int(v)) => Ok(*v),
            _ => Err(BridgeError::InvalidArgument),
        }
    }

    fn float(&self, key: &str) -> BridgeResult<f64> {
        match self.get(key) {
            Some(Value::Float(v)) => Ok(*v),
            _ => Err(BridgeError::InvalidArgument),
        }
    }

    fn string(&self, key: &str, max_units: usize) -> BridgeResult<Vec<u16>> {
        match self.get(key) {
            Some(Value::String(v)) => Ok(v[..v.len().min(max_units)].to_vec()),
            _ => Err(BridgeError::InvalidArgument),
        }
    }

    fn binary(&self, key: &str) -> BridgeResult<Vec<u8>> {
        match self.get(key) {
            Some(Value::Binary(v)) => Ok(v.clone()),
            _ => Err(BridgeError::InvalidArgument),
        }
    }
}

/// Encode a string as UTF-16 code units, without a terminator.
pub fn encode_utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Narrow UTF-16 code units into a byte string by truncating each unit to
/// its low byte. State strings are ASCII in practice; anything wider is
/// lossy by contract.
pub fn narrow_utf16(units: &[u16]) -> String {
    units
        .iter()
        .take_while(|&&u| u != 0)
        .map(|&u| (u & 0xff) as u8 as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_attribute_reads() {
        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::RINDEX, 3).set_float(attr::VALUE, 0.5);

        assert_eq!(msg.id(), "parameter-set");
        assert_eq!(msg.int(attr::RINDEX), Ok(3));
        assert_eq!(msg.float(attr::VALUE), Ok(0.5));
    }

    #[test]
    fn test_missing_or_mistyped_attribute_is_invalid_argument() {
        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::RINDEX, 3);

        assert_eq!(msg.float(attr::RINDEX), Err(BridgeError::InvalidArgument));
        assert_eq!(msg.int(attr::VALUE), Err(BridgeError::InvalidArgument));
        assert_eq!(msg.binary(attr::DATA), Err(BridgeError::InvalidArgument));
    }

    #[test]
    fn test_string_read_respects_max_units() {
        let mut msg = Message::new(id::STATE_SET);
        msg.set_string(attr::KEY, "abcdef");

        let units = msg.string(attr::KEY, 3).unwrap();
        assert_eq!(units, encode_utf16("abc"));
    }

    #[test]
    fn test_narrow_round_trip_for_ascii() {
        let s = "filter/cutoff=440";
        assert_eq!(narrow_utf16(&encode_utf16(s)), s);
    }

    #[test]
    fn test_narrow_stops_at_terminator() {
        let mut units = encode_utf16("ab");
        units.push(0);
        units.extend(encode_utf16("cd"));
        assert_eq!(narrow_utf16(&units), "ab");
    }
}
