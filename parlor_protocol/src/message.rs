// Protocol messages for client-relay communication.
//
// Two enums define the full protocol vocabulary:
// - `ClientMessage`: sent by clients to the room relay.
// - `ServerMessage`: sent by the room relay to clients.
//
// All types serialize as externally tagged JSON with camelCase event and
// field names, so the wire spelling of a join is `{"join":{"roomId":"R1"}}`.
//
// Payloads are opaque `serde_json::Value` / `serde_json::Map` — the relay
// never inspects them beyond extracting `roomId` for routing. The `end`
// event captures every field other than `roomId` into a flattened map and
// forwards it verbatim; that includes fields the relay has never seen
// before, which is intended (opaque-payload policy).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::RoomId;

/// Messages sent by a client to the relay.
///
/// The room key is `#[serde(default)]` on every room-keyed variant: a
/// frame with `roomId` omitted decodes to an empty key rather than a
/// decode error, so the relay can drop it as a malformed request instead
/// of tearing the connection down.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join a room (created implicitly on first join).
    #[serde(rename_all = "camelCase")]
    Join {
        #[serde(default)]
        room_id: RoomId,
    },
    /// Ask for the room's current member count (reply goes to sender only).
    #[serde(rename_all = "camelCase")]
    RoomSize {
        #[serde(default)]
        room_id: RoomId,
    },
    /// Broadcast an ongoing state update to the other room members.
    #[serde(rename_all = "camelCase")]
    State {
        #[serde(default)]
        room_id: RoomId,
        state: Value,
    },
    /// Broadcast a terminal result to the other room members. Everything
    /// besides `roomId` is forwarded untouched.
    #[serde(rename_all = "camelCase")]
    End {
        #[serde(default)]
        room_id: RoomId,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
    /// Client is leaving gracefully.
    Goodbye,
}

/// Messages sent by the relay to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    /// Occupancy of a room — either a direct reply to a `roomSize` query or
    /// a broadcast to every member after the membership changed.
    #[serde(rename_all = "camelCase")]
    RoomSize { room_id: RoomId, count: usize },
    /// A state update relayed from another member (sender excluded).
    State { state: Value },
    /// A terminal result relayed from another member, `roomId` stripped.
    End {
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
}
