// Core ID types for the room relay protocol.
//
// `RoomId` is the wire-level room key used by `message.rs`; `ConnectionId`
// is the relay-assigned client handle used by `parlor_relay::rooms`. Rooms
// are keyed by arbitrary client-chosen strings, so `RoomId` is a thin
// newtype over `String` rather than a compact integer. An empty key is the
// one malformed shape the relay recognizes — such requests are dropped
// without a reply, so `is_empty` is the gate every operation checks first.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Client-chosen room key. Serializes as a bare JSON string.
///
/// The default (empty) key doubles as the "absent" marker: room-keyed
/// messages deserialize a missing `roomId` into it, so the relay's
/// malformed-request gate catches omitted and empty keys alike.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// An empty key marks a malformed request; the relay drops it silently.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Relay-assigned connection handle. Allocated from a monotonic counter at
/// accept time and never reused for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
