// Test-only wrapper for relay integration tests.
//
// Wraps the real `RelayClient` (from `parlor_relay::client`) to provide a
// synchronous, test-friendly API for exercising the full pipeline:
// connect → join → broadcast → fan-out → disconnect cleanup.
//
// The only test-specific code here is the synchronous polling wrappers:
// `RelayClient::poll()` drains its channel, so messages are parked in a
// local inbox and consumed front-to-first-match, preserving arrival order.
// All networking uses the same code paths as a real embedder.
//
// See also: `tests/relay_pipeline.rs` for the end-to-end scenarios.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use parlor_protocol::message::ServerMessage;
use parlor_protocol::types::RoomId;
use parlor_relay::client::RelayClient;

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `assert_silent` waits for messages that must not arrive.
const SILENCE_WINDOW: Duration = Duration::from_millis(150);

/// A test client wrapping a real RelayClient.
pub struct TestClient {
    client: RelayClient,
    inbox: VecDeque<ServerMessage>,
}

impl TestClient {
    /// Connect to a relay server.
    pub fn connect(addr: std::net::SocketAddr) -> Self {
        let client = RelayClient::connect(&addr.to_string()).expect("TestClient::connect failed");
        Self {
            client,
            inbox: VecDeque::new(),
        }
    }

    pub fn join(&mut self, room: &str) {
        self.client.send_join(room).expect("send_join failed");
    }

    pub fn query_room_size(&mut self, room: &str) {
        self.client
            .send_room_size(room)
            .expect("send_room_size failed");
    }

    pub fn send_state(&mut self, room: &str, state: Value) {
        self.client
            .send_state(room, state)
            .expect("send_state failed");
    }

    pub fn send_end(&mut self, room: &str, rest: Map<String, Value>) {
        self.client.send_end(room, rest).expect("send_end failed");
    }

    /// Send Goodbye and close the connection.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }

    /// Blocking poll until a `roomSize` message for the given room arrives.
    /// Earlier messages of other kinds are discarded. Returns the count.
    pub fn poll_until_room_size(&mut self, room: &str) -> usize {
        let want = RoomId::from(room);
        self.poll_until(|msg| match msg {
            ServerMessage::RoomSize { room_id, count } if room_id == &want => Some(*count),
            _ => None,
        })
    }

    /// Blocking poll until a relayed `state` message arrives.
    pub fn poll_until_state(&mut self) -> Value {
        self.poll_until(|msg| match msg {
            ServerMessage::State { state } => Some(state.clone()),
            _ => None,
        })
    }

    /// Blocking poll until a relayed `end` message arrives.
    pub fn poll_until_end(&mut self) -> Map<String, Value> {
        self.poll_until(|msg| match msg {
            ServerMessage::End { rest } => Some(rest.clone()),
            _ => None,
        })
    }

    /// Assert that no message arrives within a short window.
    pub fn assert_silent(&mut self) {
        thread::sleep(SILENCE_WINDOW);
        self.refill();
        assert!(
            self.inbox.is_empty(),
            "expected silence, got: {:?}",
            self.inbox
        );
    }

    /// Pop buffered messages in arrival order until `extract` matches one,
    /// refilling from the client between attempts.
    fn poll_until<T>(&mut self, extract: impl Fn(&ServerMessage) -> Option<T>) -> T {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for a matching message"
            );
            self.refill();
            while let Some(msg) = self.inbox.pop_front() {
                if let Some(value) = extract(&msg) {
                    return value;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn refill(&mut self) {
        self.inbox.extend(self.client.poll());
    }
}
