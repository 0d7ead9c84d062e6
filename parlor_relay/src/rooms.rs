// Room membership table for the relay.
//
// `RoomTable` is the central data structure that `server.rs` drives. It
// tracks connected clients, the many-to-many client/room membership
// relation, and performs all fan-out. All mutation happens through methods
// called from the server's single-threaded main loop — no internal locking.
//
// Key responsibilities:
// - Client management: register a connection at accept time, assign a
//   `ConnectionId`, remove the client from every room on disconnect.
// - Membership: join is idempotent; a room exists exactly while it has at
//   least one member. Empty rooms are removed outright rather than left as
//   tombstones, so occupancy queries on emptied and never-existent rooms
//   both read zero with no special case.
// - Fan-out: `state` and `end` go to every member except the sender;
//   occupancy goes to every member including the trigger.
//
// Malformed requests (empty room key) are dropped here with a debug log and
// no side effects — no reply, no broadcast, no state change.
//
// Writing to client streams: `RoomTable` holds cloned `TcpStream` write
// halves wrapped in `BufWriter`. The `send_to` helper serializes a
// `ServerMessage` to JSON, frames it, and writes it out. Write errors on a
// single client are logged but do not crash the relay — the reader thread
// for that client will detect the broken pipe and send a `Disconnected`
// event.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};

use log::{debug, info, warn};
use serde_json::{Map, Value};

use parlor_protocol::framing::write_message;
use parlor_protocol::message::ServerMessage;
use parlor_protocol::types::{ConnectionId, RoomId};

/// Membership table and fan-out for all rooms served by one relay process.
pub struct RoomTable {
    clients: BTreeMap<ConnectionId, ClientState>,
    rooms: BTreeMap<RoomId, BTreeSet<ConnectionId>>,
    next_connection_id: u64,
}

struct ClientState {
    writer: BufWriter<TcpStream>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self {
            clients: BTreeMap::new(),
            rooms: BTreeMap::new(),
            next_connection_id: 0,
        }
    }

    /// Register a new connection and assign its ID. The ID tags the reader
    /// thread for this connection so that subsequent events carry it.
    /// IDs come from a monotonic counter and are never reused.
    pub fn add_client(&mut self, stream: TcpStream) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        self.clients.insert(
            id,
            ClientState {
                writer: BufWriter::new(stream),
            },
        );
        info!("client {id} connected");
        id
    }

    /// Add a client to a room (idempotent) and broadcast the new occupancy
    /// to every member, the joiner included. The room comes into existence
    /// on its first join.
    pub fn join(&mut self, conn_id: ConnectionId, room_id: &RoomId) {
        if room_id.is_empty() {
            debug!("client {conn_id}: dropping join with empty room key");
            return;
        }
        // Membership is only kept for live connections.
        if !self.clients.contains_key(&conn_id) {
            return;
        }
        self.rooms
            .entry(room_id.clone())
            .or_default()
            .insert(conn_id);
        info!(
            "client {conn_id} joined room \"{room_id}\" ({} members)",
            self.member_count(room_id)
        );
        self.broadcast_occupancy(room_id);
    }

    /// Reply with the room's current member count to the requesting client
    /// only. Unknown rooms are a normal zero-count case, not an error.
    pub fn query_occupancy(&mut self, conn_id: ConnectionId, room_id: &RoomId) {
        if room_id.is_empty() {
            debug!("client {conn_id}: dropping roomSize with empty room key");
            return;
        }
        let msg = ServerMessage::RoomSize {
            room_id: room_id.clone(),
            count: self.member_count(room_id),
        };
        self.send_to(conn_id, &msg);
    }

    /// Forward a state payload verbatim to every other member of the room.
    /// The payload is opaque application data; the sender never receives
    /// its own broadcast.
    pub fn relay_state(&mut self, conn_id: ConnectionId, room_id: &RoomId, state: Value) {
        if room_id.is_empty() {
            debug!("client {conn_id}: dropping state with empty room key");
            return;
        }
        let msg = ServerMessage::State { state };
        self.send_to_others(conn_id, room_id, &msg);
    }

    /// Forward an end-of-game payload (room key already stripped into
    /// `rest` by deserialization) to every other member of the room. Same
    /// delivery semantics as `relay_state`, on a distinct event so
    /// receivers can tell a terminal result from an ongoing update.
    pub fn relay_end(&mut self, conn_id: ConnectionId, room_id: &RoomId, rest: Map<String, Value>) {
        if room_id.is_empty() {
            debug!("client {conn_id}: dropping end with empty room key");
            return;
        }
        let msg = ServerMessage::End { rest };
        self.send_to_others(conn_id, room_id, &msg);
    }

    /// Remove a client from every room it belongs to and drop its writer.
    /// Unconditional — a client that never joined anything removes cleanly.
    ///
    /// Occupancy broadcasts go out only after the client is gone from *all*
    /// rooms, so every recomputed count reflects the post-removal state
    /// rather than a snapshot taken mid-removal.
    pub fn remove_client(&mut self, conn_id: ConnectionId) {
        if self.clients.remove(&conn_id).is_none() {
            return;
        }

        let mut affected: Vec<RoomId> = Vec::new();
        for (room_id, members) in &mut self.rooms {
            if members.remove(&conn_id) {
                affected.push(room_id.clone());
            }
        }
        // Emptied rooms vanish; no tombstones.
        self.rooms.retain(|_, members| !members.is_empty());

        info!("client {conn_id} disconnected ({} rooms affected)", affected.len());

        for room_id in affected {
            self.broadcast_occupancy(&room_id);
        }
    }

    /// Current member count of a room; 0 for rooms with no members,
    /// including rooms that never existed.
    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, BTreeSet::len)
    }

    /// Number of rooms that currently have at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Shut down every client socket. The write halves held here are clones
    /// of the sockets the reader threads block on, so this unblocks those
    /// reads and sends FIN to each peer. Called once when the relay stops.
    pub fn shutdown_all(&mut self) {
        for (conn_id, client) in &mut self.clients {
            if let Err(e) = client.writer.get_ref().shutdown(Shutdown::Both) {
                debug!("shutdown of client {conn_id} socket failed: {e}");
            }
        }
        self.clients.clear();
        self.rooms.clear();
    }

    /// Send the room's current occupancy to every member of the room.
    /// Broadcasting to an emptied or unknown room is a no-op.
    fn broadcast_occupancy(&mut self, room_id: &RoomId) {
        let msg = ServerMessage::RoomSize {
            room_id: room_id.clone(),
            count: self.member_count(room_id),
        };
        let members = self.members_of(room_id);
        for id in members {
            self.send_to(id, &msg);
        }
    }

    /// Send a message to every member of the room except `sender`.
    fn send_to_others(&mut self, sender: ConnectionId, room_id: &RoomId, msg: &ServerMessage) {
        let members = self.members_of(room_id);
        for id in members {
            if id != sender {
                self.send_to(id, msg);
            }
        }
    }

    fn members_of(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Send a message to a specific client. Write errors are logged and
    /// otherwise ignored (the reader thread will detect the broken pipe).
    fn send_to(&mut self, conn_id: ConnectionId, msg: &ServerMessage) {
        if let Some(client) = self.clients.get_mut(&conn_id) {
            if let Err(e) = send_message(&mut client.writer, msg) {
                warn!("send to client {conn_id} failed: {e}");
            }
        }
    }
}

impl Default for RoomTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a `ServerMessage` to JSON and write it with length-delimited
/// framing. Returns any error (caller decides whether to log or propagate).
fn send_message(
    writer: &mut BufWriter<TcpStream>,
    msg: &ServerMessage,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_vec(msg)?;
    write_message(writer, &json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::time::Duration;

    use serde_json::json;

    use parlor_protocol::framing::read_message;
    use parlor_protocol::message::ClientMessage;

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Read a ServerMessage from a TCP stream.
    fn recv_server_msg(stream: &mut BufReader<TcpStream>) -> ServerMessage {
        let bytes = read_message(stream).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Assert nothing is buffered on the stream within a short timeout.
    fn assert_no_message(stream: &mut BufReader<TcpStream>) {
        stream
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        assert!(
            read_message(stream).is_err(),
            "expected no message, but one was buffered"
        );
        stream.get_ref().set_read_timeout(None).unwrap();
    }

    fn room(key: &str) -> RoomId {
        RoomId::from(key)
    }

    #[test]
    fn join_broadcasts_occupancy_to_joiner() {
        let (client, server) = tcp_pair();
        let mut table = RoomTable::new();

        let id = table.add_client(server);
        table.join(id, &room("R1"));

        let mut reader = BufReader::new(client);
        let msg = recv_server_msg(&mut reader);
        match msg {
            ServerMessage::RoomSize { room_id, count } => {
                assert_eq!(room_id, room("R1"));
                assert_eq!(count, 1);
            }
            other => panic!("expected RoomSize, got {other:?}"),
        }
    }

    #[test]
    fn second_join_broadcasts_occupancy_to_both() {
        let (client_a, server_a) = tcp_pair();
        let (client_b, server_b) = tcp_pair();
        let mut table = RoomTable::new();

        let a = table.add_client(server_a);
        let b = table.add_client(server_b);
        table.join(a, &room("R1"));
        table.join(b, &room("R1"));

        let mut reader_a = BufReader::new(client_a);
        // A sees its own join (count 1), then B's (count 2).
        let first = recv_server_msg(&mut reader_a);
        assert!(matches!(first, ServerMessage::RoomSize { count: 1, .. }));
        let second = recv_server_msg(&mut reader_a);
        assert!(matches!(second, ServerMessage::RoomSize { count: 2, .. }));

        let mut reader_b = BufReader::new(client_b);
        let msg = recv_server_msg(&mut reader_b);
        assert!(matches!(msg, ServerMessage::RoomSize { count: 2, .. }));
    }

    #[test]
    fn join_is_idempotent() {
        let (client, server) = tcp_pair();
        let mut table = RoomTable::new();

        let id = table.add_client(server);
        table.join(id, &room("R1"));
        table.join(id, &room("R1"));

        assert_eq!(table.member_count(&room("R1")), 1);
        assert_eq!(table.room_count(), 1);

        // Each well-formed join still triggers a broadcast; both say 1.
        let mut reader = BufReader::new(client);
        for _ in 0..2 {
            let msg = recv_server_msg(&mut reader);
            assert!(matches!(msg, ServerMessage::RoomSize { count: 1, .. }));
        }
    }

    #[test]
    fn join_empty_room_key_is_dropped() {
        let (client, server) = tcp_pair();
        let mut table = RoomTable::new();

        let id = table.add_client(server);
        table.join(id, &room(""));

        assert_eq!(table.room_count(), 0);
        let mut reader = BufReader::new(client);
        assert_no_message(&mut reader);
    }

    #[test]
    fn query_replies_to_sender_only() {
        let (client_a, server_a) = tcp_pair();
        let (client_b, server_b) = tcp_pair();
        let mut table = RoomTable::new();

        let a = table.add_client(server_a);
        let b = table.add_client(server_b);
        table.join(a, &room("R1"));
        table.join(b, &room("R1"));

        let mut reader_a = BufReader::new(client_a);
        let mut reader_b = BufReader::new(client_b);
        // Drain the two join broadcasts on A and one on B.
        let _ = recv_server_msg(&mut reader_a);
        let _ = recv_server_msg(&mut reader_a);
        let _ = recv_server_msg(&mut reader_b);

        table.query_occupancy(a, &room("R1"));

        let msg = recv_server_msg(&mut reader_a);
        match msg {
            ServerMessage::RoomSize { room_id, count } => {
                assert_eq!(room_id, room("R1"));
                assert_eq!(count, 2);
            }
            other => panic!("expected RoomSize, got {other:?}"),
        }
        assert_no_message(&mut reader_b);
    }

    #[test]
    fn query_unknown_room_is_zero() {
        let (client, server) = tcp_pair();
        let mut table = RoomTable::new();

        let id = table.add_client(server);
        table.query_occupancy(id, &room("never-existed"));

        let mut reader = BufReader::new(client);
        let msg = recv_server_msg(&mut reader);
        assert!(matches!(msg, ServerMessage::RoomSize { count: 0, .. }));
    }

    #[test]
    fn relay_state_excludes_sender() {
        let (client_a, server_a) = tcp_pair();
        let (client_b, server_b) = tcp_pair();
        let mut table = RoomTable::new();

        let a = table.add_client(server_a);
        let b = table.add_client(server_b);
        table.join(a, &room("R1"));
        table.join(b, &room("R1"));

        let mut reader_a = BufReader::new(client_a);
        let mut reader_b = BufReader::new(client_b);
        let _ = recv_server_msg(&mut reader_a);
        let _ = recv_server_msg(&mut reader_a);
        let _ = recv_server_msg(&mut reader_b);

        table.relay_state(a, &room("R1"), json!({"board": [1, 2, 3]}));

        let msg = recv_server_msg(&mut reader_b);
        match msg {
            ServerMessage::State { state } => {
                assert_eq!(state, json!({"board": [1, 2, 3]}));
            }
            other => panic!("expected State, got {other:?}"),
        }
        assert_no_message(&mut reader_a);
    }

    #[test]
    fn relay_state_outside_any_room_is_noop() {
        let (client_a, server_a) = tcp_pair();
        let (client_b, server_b) = tcp_pair();
        let mut table = RoomTable::new();

        let a = table.add_client(server_a);
        let b = table.add_client(server_b);
        table.join(b, &room("R1"));

        // A never joined R2; relaying into it reaches nobody.
        table.relay_state(a, &room("R2"), json!({"x": 1}));

        let mut reader_a = BufReader::new(client_a);
        let mut reader_b = BufReader::new(client_b);
        let _ = recv_server_msg(&mut reader_b); // join broadcast
        assert_no_message(&mut reader_a);
        assert_no_message(&mut reader_b);
    }

    #[test]
    fn relay_end_forwards_rest_without_room_key() {
        let (_client_a, server_a) = tcp_pair();
        let (client_b, server_b) = tcp_pair();
        let mut table = RoomTable::new();

        let a = table.add_client(server_a);
        let b = table.add_client(server_b);
        table.join(a, &room("R1"));
        table.join(b, &room("R1"));

        let mut reader_b = BufReader::new(client_b);
        let _ = recv_server_msg(&mut reader_b);

        // Simulate the wire: an end frame with roomId plus arbitrary fields.
        let frame = json!({"end": {"roomId": "R1", "winner": "A", "survivors": ["A"]}});
        let ClientMessage::End { room_id, rest } = serde_json::from_value(frame).unwrap() else {
            panic!("expected End");
        };
        table.relay_end(a, &room_id, rest);

        let msg = recv_server_msg(&mut reader_b);
        match msg {
            ServerMessage::End { rest } => {
                assert_eq!(rest.get("winner"), Some(&json!("A")));
                assert_eq!(rest.get("survivors"), Some(&json!(["A"])));
                assert!(!rest.contains_key("roomId"));
            }
            other => panic!("expected End, got {other:?}"),
        }
    }

    #[test]
    fn remove_client_updates_every_room_it_was_in() {
        let (_client_a, server_a) = tcp_pair();
        let (client_b, server_b) = tcp_pair();
        let (client_c, server_c) = tcp_pair();
        let mut table = RoomTable::new();

        let a = table.add_client(server_a);
        let b = table.add_client(server_b);
        let c = table.add_client(server_c);
        // A is in both rooms; B and C in one each.
        table.join(a, &room("R1"));
        table.join(a, &room("R2"));
        table.join(b, &room("R1"));
        table.join(c, &room("R2"));

        let mut reader_b = BufReader::new(client_b);
        let mut reader_c = BufReader::new(client_c);
        let _ = recv_server_msg(&mut reader_b); // own join, count 2
        let _ = recv_server_msg(&mut reader_c); // own join, count 2

        table.remove_client(a);

        // Both survivors see their room drop to 1.
        let msg = recv_server_msg(&mut reader_b);
        match msg {
            ServerMessage::RoomSize { room_id, count } => {
                assert_eq!(room_id, room("R1"));
                assert_eq!(count, 1);
            }
            other => panic!("expected RoomSize, got {other:?}"),
        }
        let msg = recv_server_msg(&mut reader_c);
        match msg {
            ServerMessage::RoomSize { room_id, count } => {
                assert_eq!(room_id, room("R2"));
                assert_eq!(count, 1);
            }
            other => panic!("expected RoomSize, got {other:?}"),
        }

        assert_eq!(table.member_count(&room("R1")), 1);
        assert_eq!(table.member_count(&room("R2")), 1);
        assert_eq!(table.client_count(), 2);
    }

    #[test]
    fn removing_last_member_drops_the_room() {
        let (_client, server) = tcp_pair();
        let mut table = RoomTable::new();

        let id = table.add_client(server);
        table.join(id, &room("R1"));
        assert_eq!(table.room_count(), 1);

        table.remove_client(id);
        assert_eq!(table.room_count(), 0);
        assert_eq!(table.member_count(&room("R1")), 0);
    }

    #[test]
    fn remove_client_that_joined_nothing() {
        let (_client, server) = tcp_pair();
        let mut table = RoomTable::new();

        let id = table.add_client(server);
        table.remove_client(id);
        assert_eq!(table.client_count(), 0);

        // Removing twice is also fine.
        table.remove_client(id);
    }

    #[test]
    fn connection_ids_are_never_reused() {
        let (_client_a, server_a) = tcp_pair();
        let (_client_b, server_b) = tcp_pair();
        let mut table = RoomTable::new();

        let a = table.add_client(server_a);
        table.remove_client(a);
        let b = table.add_client(server_b);
        assert_ne!(a, b);
    }

    #[test]
    fn shutdown_all_closes_client_sockets() {
        let (client, server) = tcp_pair();
        let mut table = RoomTable::new();

        let id = table.add_client(server);
        table.join(id, &room("R1"));
        table.shutdown_all();
        assert_eq!(table.client_count(), 0);
        assert_eq!(table.room_count(), 0);

        let mut reader = BufReader::new(client);
        let _ = recv_server_msg(&mut reader); // join broadcast
        // The socket was shut down; the next read hits EOF.
        assert!(read_message(&mut reader).is_err());
    }

    #[test]
    fn empty_room_key_is_dropped_on_every_operation() {
        let (client, server) = tcp_pair();
        let mut table = RoomTable::new();

        let id = table.add_client(server);
        table.query_occupancy(id, &room(""));
        table.relay_state(id, &room(""), json!({"board": []}));
        table.relay_end(id, &room(""), Map::new());

        assert_eq!(table.room_count(), 0);
        let mut reader = BufReader::new(client);
        assert_no_message(&mut reader);
    }
}
