// TCP server and main event loop for the room relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client): call `framing::read_message()` in a
//   loop, deserialize `ClientMessage`, and send `InternalEvent::MessageFrom`
//   to the main thread. On error/EOF, send `InternalEvent::Disconnected`.
// - **Main thread**: owns the `RoomTable`, receives events from the channel,
//   and dispatches them one at a time. Each event is handled to completion
//   before the next, so a membership mutation and the fan-out it triggers
//   are atomic with respect to every other operation — the table needs no
//   locking. Per-client ordering holds because each reader thread performs
//   FIFO reads into a FIFO channel.
//
// The main thread is the only writer to client TCP streams (via
// `RoomTable::send_to`). Reader threads only read from streams. This avoids
// concurrent read/write on the same `TcpStream`, which is safe on most
// platforms but fragile.
//
// Shutdown: the main thread checks a `keep_running` flag (set to false by
// `RelayHandle::stop`), breaks out of the event loop, and shuts down every
// client socket so blocked reader threads wake up and peers see EOF.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use log::warn;

use parlor_protocol::framing::read_message;
use parlor_protocol::message::ClientMessage;
use parlor_protocol::types::ConnectionId;

use crate::rooms::RoomTable;

/// How often the main loop and the listener wake up to check the
/// `keep_running` flag when no events are arriving.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Events sent from listener/reader threads to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    MessageFrom {
        conn_id: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        conn_id: ConnectionId,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a relay server.
pub struct RelayConfig {
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Start the relay server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used
/// to let the OS pick a free port).
pub fn start_relay(config: RelayConfig) -> std::io::Result<(RelayHandle, std::net::SocketAddr)> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    let thread = thread::spawn(move || {
        run_relay(listener, keep_running_clone);
    });

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, keep_running: Arc<AtomicBool>) {
    let mut table = RoomTable::new();

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Set the listener to non-blocking so the accept thread can check
    // keep_running periodically.
    listener.set_nonblocking(true).ok();

    // Listener thread: accepts new connections.
    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(SHUTDOWN_POLL_INTERVAL);
                }
                Err(_) => break,
            }
        }
    });

    // Main event loop.
    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
            Ok(event) => {
                handle_event(&mut table, event, &tx, &keep_running);
                // Drain any additional events that arrived during handling.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut table, event, &tx, &keep_running);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Nothing waiting; loop around and re-check the flag.
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Close every client socket so reader threads blocked in read_message
    // wake up and exit, and peers see EOF.
    table.shutdown_all();
}

/// Dispatch a single event to the room table.
fn handle_event(
    table: &mut RoomTable,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    match event {
        InternalEvent::NewConnection { stream } => {
            handle_new_connection(table, stream, tx, keep_running);
        }
        InternalEvent::MessageFrom { conn_id, message } => {
            handle_message(table, conn_id, message);
        }
        InternalEvent::Disconnected { conn_id } => {
            table.remove_client(conn_id);
        }
    }
}

/// Handle a new TCP connection: register the client with the room table
/// (which assigns its connection ID) and spawn a reader thread. There is no
/// handshake — a client is known from the moment its socket is accepted.
fn handle_new_connection(
    table: &mut RoomTable,
    stream: TcpStream,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    // Clone the read half before the table takes ownership of the write half.
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!("dropping connection, stream clone failed: {e}");
            return;
        }
    };

    let conn_id = table.add_client(stream);

    let tx_reader = tx.clone();
    let keep_running_reader = keep_running.clone();
    thread::spawn(move || {
        reader_loop(
            BufReader::new(reader_stream),
            conn_id,
            tx_reader,
            keep_running_reader,
        );
    });
}

/// Reader loop for a single client. Runs in its own thread. Always ends by
/// reporting a disconnect, whether the client left gracefully (`Goodbye`),
/// closed the socket, or sent an undecodable frame.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    conn_id: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match read_message(&mut reader) {
            Ok(bytes) => match serde_json::from_slice::<ClientMessage>(&bytes) {
                Ok(ClientMessage::Goodbye) => {
                    let _ = tx.send(InternalEvent::Disconnected { conn_id });
                    break;
                }
                Ok(message) => {
                    let _ = tx.send(InternalEvent::MessageFrom { conn_id, message });
                }
                Err(_) => {
                    // Undecodable frame — disconnect.
                    let _ = tx.send(InternalEvent::Disconnected { conn_id });
                    break;
                }
            },
            Err(_) => {
                // Read error or EOF — disconnect.
                let _ = tx.send(InternalEvent::Disconnected { conn_id });
                break;
            }
        }
    }
}

/// Dispatch a client message that isn't Goodbye (handled in the reader
/// loop). Room-key validation happens inside the table operations.
fn handle_message(table: &mut RoomTable, conn_id: ConnectionId, message: ClientMessage) {
    match message {
        ClientMessage::Join { room_id } => {
            table.join(conn_id, &room_id);
        }
        ClientMessage::RoomSize { room_id } => {
            table.query_occupancy(conn_id, &room_id);
        }
        ClientMessage::State { room_id, state } => {
            table.relay_state(conn_id, &room_id, state);
        }
        ClientMessage::End { room_id, rest } => {
            table.relay_end(conn_id, &room_id, rest);
        }
        ClientMessage::Goodbye => {
            // Handled in the reader loop.
        }
    }
}
