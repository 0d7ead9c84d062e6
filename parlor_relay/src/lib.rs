// parlor_relay — room-scoped broadcast relay for Parlor board games.
//
// The relay is a thin message broker: clients join named rooms and the
// relay fans small JSON payloads (board state, end-of-game results,
// occupancy counts) out to the other members of the same room. It never
// inspects payload content and holds no game logic — everything it knows
// is the client/room membership relation.
//
// Module overview:
// - `rooms.rs`:   `RoomTable` — membership relation and all fan-out. The
//                 core data structure that `server.rs` drives.
// - `server.rs`:  TCP listener, reader threads (one per client), and the
//                 main event loop. Uses `std::net` with a thread-per-reader
//                 architecture and an `mpsc` channel to funnel events into
//                 the single-threaded `RoomTable`.
// - `client.rs`:  `RelayClient` — a small blocking-connect / non-blocking-
//                 poll client used by embedders and integration tests.
//
// Dependencies: `parlor_protocol` (shared message types and framing),
// `log` for structured logging. The binary additionally pulls in
// `env_logger` and `ctrlc`.
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in a
// host process via the library API (`start_relay`).

pub mod client;
pub mod rooms;
pub mod server;

pub use server::start_relay;
