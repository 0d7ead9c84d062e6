// parlor_protocol — wire protocol for room relay communication.
//
// This crate defines the message types, framing, and serialization used by
// the room relay (`parlor_relay`) and its clients to communicate over TCP.
// It is shared between both sides and has no dependency on the relay crate.
//
// Module overview:
// - `types.rs`:    ID types — `RoomId` (wire-level room key) and
//                  `ConnectionId` (relay-assigned client handle).
// - `message.rs`:  Client-to-relay and relay-to-client message enums.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload.
//
// Design decisions:
// - **JSON serialization.** Events and fields are spelled in camelCase on
//   the wire (`join`, `roomSize`, `roomId`), matching what browser-side
//   clients already send.
// - **Opaque payloads.** `state` bodies and everything in an `end` besides
//   `roomId` are never inspected by the relay; they travel as
//   `serde_json::Value` / `serde_json::Map`.
// - **No async runtime.** Uses `std::io::Read`/`Write` for framing,
//   compatible with both blocking TCP streams and buffered wrappers.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{ClientMessage, ServerMessage};
pub use types::{ConnectionId, RoomId};
