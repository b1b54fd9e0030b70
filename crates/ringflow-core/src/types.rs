//! Strong type definitions for ringflow.
//!
//! Both identifiers end up as path segments on a shared filesystem (or as
//! keys in a database), so they are validated on construction and never
//! contain separators or relative components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Checks shared by every identifier that becomes a path segment.
fn check_segment(s: &str) -> Result<(), &'static str> {
    if s.is_empty() {
        return Err("must not be empty");
    }
    if s.trim() != s {
        return Err("must not have leading or trailing whitespace");
    }
    if s.starts_with('.') {
        return Err("must not start with '.'");
    }
    if s.chars().any(|c| c == '/' || c == '\\' || c == '\0') {
        return Err("must not contain path separators or NUL");
    }
    Ok(())
}

/// Identity of a ring participant.
///
/// In deployed rings this is the participant's email address, which
/// doubles as the name of their folder on the synchronized root.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id, rejecting anything that is not a single path segment.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        match check_segment(&id) {
            Ok(()) => Ok(Self(id)),
            Err(why) => Err(CoreError::InvalidPeerId(id, why)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PeerId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of a packet inside a peer's namespace.
///
/// A packet is identified by (peer, name). The name is stable across hops,
/// which is what lets a re-driven delivery recognise its own earlier copy.
/// Names never include the codec's file extension.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PacketName(String);

impl PacketName {
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        match check_segment(&name) {
            Ok(()) => Ok(Self(name)),
            Err(why) => Err(CoreError::InvalidPacketName(name, why)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PacketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketName({})", self.0)
    }
}

impl fmt::Display for PacketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PacketName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PacketName {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PacketName> for String {
    fn from(name: PacketName) -> Self {
        name.0
    }
}
