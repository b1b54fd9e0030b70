//! Packet encoding.
//!
//! JSON is the interchange format: its field names are what other ring
//! participants read. CBOR is available for deployments where every peer
//! runs ringflow and compactness matters more than readability.
//!
//! Decoding always validates packet invariants, so a body that parses but
//! breaks them is reported the same way as one that does not parse.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::packet::RingPacket;

/// Wire encoding of a stored packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    Cbor,
}

impl Codec {
    /// File extension used by filesystem stores, without the dot.
    pub const fn extension(self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::Cbor => "cbor",
        }
    }

    /// Encode a packet.
    pub fn encode(self, packet: &RingPacket) -> Result<Vec<u8>> {
        match self {
            Codec::Json => {
                serde_json::to_vec(packet).map_err(|e| CoreError::Encoding(e.to_string()))
            }
            Codec::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(packet, &mut buf)
                    .map_err(|e| CoreError::Encoding(e.to_string()))?;
                Ok(buf)
            }
        }
    }

    /// Decode and validate a packet.
    pub fn decode(self, bytes: &[u8]) -> Result<RingPacket> {
        let packet: RingPacket = match self {
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| CoreError::Decoding(e.to_string()))?
            }
            Codec::Cbor => {
                ciborium::from_reader(bytes).map_err(|e| CoreError::Decoding(e.to_string()))?
            }
        };
        packet.validate()?;
        Ok(packet)
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
