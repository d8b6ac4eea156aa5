//! Protocol message types

use crate::error::{ProtocolError, Result};
use crate::{WireFormat, MAX_MESSAGE_SIZE, WIRE_HEADER_SIZE};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Acknowledgment level requested for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    /// Fire and forget: the broker sends no response
    None,
    /// The partition leader has appended the record
    #[default]
    Leader,
    /// All in-sync replicas have the record
    All,
}

impl Acks {
    /// Whether the broker answers a publish with this level
    pub const fn expects_response(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Acks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Leader => "leader",
            Self::All => "all",
        })
    }
}

impl FromStr for Acks {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Self::None),
            "leader" | "1" => Ok(Self::Leader),
            "all" | "-1" => Ok(Self::All),
            other => Err(ProtocolError::InvalidFormat(format!(
                "unknown acks level: {}",
                other
            ))),
        }
    }
}

/// Client requests
#[derive(Clone, Serialize, Deserialize)]
pub enum Request {
    /// Append one record to a topic partition
    Publish {
        topic: String,
        partition: u32,
        acks: Acks,
        /// Compressed record frame (codec byte + body)
        value: Bytes,
    },

    /// Ask for the partition layout of a topic
    GetMetadata { topic: String },

    /// Liveness probe
    Ping,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish {
                topic,
                partition,
                acks,
                value,
            } => f
                .debug_struct("Publish")
                .field("topic", topic)
                .field("partition", partition)
                .field("acks", acks)
                .field("value_len", &value.len())
                .finish(),
            Self::GetMetadata { topic } => {
                f.debug_struct("GetMetadata").field("topic", topic).finish()
            }
            Self::Ping => f.write_str("Ping"),
        }
    }
}

/// Broker responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Record appended
    Published { partition: u32, offset: u64 },

    /// Topic layout
    Metadata { name: String, partitions: u32 },

    /// Reply to [`Request::Ping`]
    Pong,

    /// Request failed on the broker
    Error { message: String },
}

// ============================================================================
// Wire Encoding
// ============================================================================

fn encode_frame<T: Serialize>(value: &T, format: WireFormat, correlation_id: u32) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(WIRE_HEADER_SIZE + 64);
    out.push(format.as_byte());
    out.extend_from_slice(&correlation_id.to_be_bytes());

    let out = match format {
        WireFormat::Postcard => postcard::to_extend(value, out)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?,
    };

    if out.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(out.len(), MAX_MESSAGE_SIZE));
    }
    Ok(out)
}

fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> Result<(T, WireFormat, u32)> {
    if data.len() < WIRE_HEADER_SIZE {
        return Err(ProtocolError::InvalidFormat(
            "wire data too short (need format byte + correlation_id)".into(),
        ));
    }

    let format = WireFormat::from_byte(data[0]).ok_or_else(|| {
        ProtocolError::InvalidFormat(format!("unknown wire format: 0x{:02x}", data[0]))
    })?;
    let correlation_id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    let payload = &data[WIRE_HEADER_SIZE..];

    let value = match format {
        WireFormat::Postcard => postcard::from_bytes(payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?,
    };
    Ok((value, format, correlation_id))
}

impl Request {
    /// Serialize with format prefix and correlation id.
    ///
    /// The transport length prefix is not included.
    pub fn to_wire(&self, format: WireFormat, correlation_id: u32) -> Result<Vec<u8>> {
        encode_frame(self, format, correlation_id)
    }

    /// Deserialize, returning the request, its format and correlation id
    pub fn from_wire(data: &[u8]) -> Result<(Self, WireFormat, u32)> {
        decode_frame(data)
    }
}

impl Response {
    /// Serialize with format prefix and correlation id.
    pub fn to_wire(&self, format: WireFormat, correlation_id: u32) -> Result<Vec<u8>> {
        encode_frame(self, format, correlation_id)
    }

    /// Deserialize, returning the response, its format and correlation id
    pub fn from_wire(data: &[u8]) -> Result<(Self, WireFormat, u32)> {
        decode_frame(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_roundtrip() {
        let wire_bytes = Request::Ping.to_wire(WireFormat::Postcard, 42).unwrap();
        assert_eq!(wire_bytes[0], 0x00);

        let (decoded, format, correlation_id) = Request::from_wire(&wire_bytes).unwrap();
        assert_eq!(format, WireFormat::Postcard);
        assert_eq!(correlation_id, 42);
        assert!(matches!(decoded, Request::Ping));
    }

    #[test]
    fn test_publish_request_keeps_value() {
        let request = Request::Publish {
            topic: "events".to_string(),
            partition: 3,
            acks: Acks::All,
            value: Bytes::from_static(b"\x00hello"),
        };
        let wire_bytes = request.to_wire(WireFormat::Postcard, 7).unwrap();
        let (decoded, _, _) = Request::from_wire(&wire_bytes).unwrap();

        match decoded {
            Request::Publish {
                topic,
                partition,
                acks,
                value,
            } => {
                assert_eq!(topic, "events");
                assert_eq!(partition, 3);
                assert_eq!(acks, Acks::All);
                assert_eq!(&value[..], b"\x00hello");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_response_wire_roundtrip() {
        let response = Response::Metadata {
            name: "events".to_string(),
            partitions: 12,
        };
        let wire_bytes = response.to_wire(WireFormat::Postcard, 99).unwrap();
        let (decoded, _, correlation_id) = Response::from_wire(&wire_bytes).unwrap();
        assert_eq!(correlation_id, 99);
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_wire_format_rejects_short_and_unknown() {
        assert!(matches!(
            Request::from_wire(&[]),
            Err(ProtocolError::InvalidFormat(_))
        ));
        assert!(matches!(
            Response::from_wire(&[0x7f, 0, 0, 0, 1, 0]),
            Err(ProtocolError::InvalidFormat(_))
        ));
        assert!(matches!(
            Response::from_wire(&[0x00, 0, 0, 0, 1, 0xff, 0xff]),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_message_size_limit() {
        let request = Request::Publish {
            topic: "big".to_string(),
            partition: 0,
            acks: Acks::Leader,
            value: Bytes::from(vec![0u8; MAX_MESSAGE_SIZE + 1]),
        };
        assert!(matches!(
            request.to_wire(WireFormat::Postcard, 1),
            Err(ProtocolError::MessageTooLarge(_, MAX_MESSAGE_SIZE))
        ));
    }

    #[test]
    fn test_publish_debug_hides_payload() {
        let request = Request::Publish {
            topic: "t".to_string(),
            partition: 0,
            acks: Acks::Leader,
            value: Bytes::from_static(b"secret"),
        };
        let debug = format!("{:?}", request);
        assert!(debug.contains("value_len: 6"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_acks_parsing() {
        assert_eq!("none".parse::<Acks>().unwrap(), Acks::None);
        assert_eq!("1".parse::<Acks>().unwrap(), Acks::Leader);
        assert_eq!("ALL".parse::<Acks>().unwrap(), Acks::All);
        assert!("two".parse::<Acks>().is_err());
        assert!(!Acks::None.expects_response());
        assert!(Acks::Leader.expects_response());
        assert_eq!(serde_json::to_string(&Acks::All).unwrap(), "\"all\"");
    }
}
