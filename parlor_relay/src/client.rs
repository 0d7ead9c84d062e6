// TCP client for connecting to the room relay.
//
// Provides a non-blocking interface for the caller's main thread to
// communicate with the relay. Architecture:
// - `connect()` performs the TCP connect on the calling thread, then spawns
//   a background reader thread. There is no handshake — the relay knows the
//   client as soon as the socket is accepted.
// - The reader thread calls `read_message()` in a loop, deserializes
//   `ServerMessage`, and pushes into an `mpsc` channel.
// - The caller holds a `BufWriter<TcpStream>` for sending.
// - `poll()` drains the inbox non-blocking, returning all queued messages.
//
// This separation ensures the caller never blocks on network I/O. The
// reader thread handles the blocking reads, and the writer flushes
// synchronously (acceptable for the small messages we send).
//
// This module lives in the relay crate because it is purely std TCP +
// protocol framing + mpsc. Living here makes it available to embedders and
// integration tests (see `parlor_tests`) alike.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use serde_json::{Map, Value};

use parlor_protocol::framing::{read_message, write_message};
use parlor_protocol::message::{ClientMessage, ServerMessage};
use parlor_protocol::types::RoomId;

/// TCP client for relay communication.
pub struct RelayClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect to a relay server and spawn a reader thread.
    pub fn connect(addr: &str) -> Result<Self, String> {
        let stream = TcpStream::connect(addr).map_err(|e| format!("connect failed: {e}"))?;
        let reader_stream = stream
            .try_clone()
            .map_err(|e| format!("clone failed: {e}"))?;
        let writer = BufWriter::new(stream);

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(BufReader::new(reader_stream), tx);
        });

        Ok(Self {
            writer,
            inbox: rx,
            _reader_thread: Some(reader_thread),
        })
    }

    /// Join a room. The relay answers with an occupancy broadcast.
    pub fn send_join(&mut self, room_id: &str) -> Result<(), String> {
        let msg = ClientMessage::Join {
            room_id: RoomId::from(room_id),
        };
        send_msg(&mut self.writer, &msg).map_err(|e| format!("send join failed: {e}"))
    }

    /// Ask for a room's member count. The reply comes back on `poll()`.
    pub fn send_room_size(&mut self, room_id: &str) -> Result<(), String> {
        let msg = ClientMessage::RoomSize {
            room_id: RoomId::from(room_id),
        };
        send_msg(&mut self.writer, &msg).map_err(|e| format!("send roomSize failed: {e}"))
    }

    /// Broadcast a state payload to the other members of a room.
    pub fn send_state(&mut self, room_id: &str, state: Value) -> Result<(), String> {
        let msg = ClientMessage::State {
            room_id: RoomId::from(room_id),
            state,
        };
        send_msg(&mut self.writer, &msg).map_err(|e| format!("send state failed: {e}"))
    }

    /// Broadcast an end-of-game payload to the other members of a room.
    /// Every entry of `rest` is forwarded verbatim; a `roomId` key, if
    /// present, is dropped by the relay.
    pub fn send_end(&mut self, room_id: &str, rest: Map<String, Value>) -> Result<(), String> {
        let msg = ClientMessage::End {
            room_id: RoomId::from(room_id),
            rest,
        };
        send_msg(&mut self.writer, &msg).map_err(|e| format!("send end failed: {e}"))
    }

    /// Send Goodbye and let the relay clean up our memberships.
    pub fn disconnect(&mut self) {
        let _ = send_msg(&mut self.writer, &ClientMessage::Goodbye);
    }

    /// Drain all queued server messages (non-blocking).
    pub fn poll(&self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            messages.push(msg);
        }
        messages
    }
}

/// Serialize a `ClientMessage` to JSON and write with length-delimited framing.
fn send_msg(writer: &mut BufWriter<TcpStream>, msg: &ClientMessage) -> Result<(), String> {
    let json = serde_json::to_vec(msg).map_err(|e| e.to_string())?;
    write_message(writer, &json).map_err(|e| e.to_string())
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(bytes) = read_message(&mut reader) {
        match serde_json::from_slice::<ServerMessage>(&bytes) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break; // Main thread dropped the receiver
                }
            }
            Err(_) => break, // Malformed message
        }
    }
}
