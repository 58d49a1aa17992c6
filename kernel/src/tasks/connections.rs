//! The registry of live connections and the per-connection state the kernel
//! shares with the network host: output queue, options, reader handle, and
//! the player binding.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use loam_values::var::objid::Objid;
use loam_values::FIRST_CONNECTION_ID;

use crate::tasks::Wake;

/// One queued outbound message: a text line (CRLF-terminated on the wire) or
/// raw bytes for binary-mode connections.
#[derive(Debug, Clone)]
pub enum ConnectionMessage {
    Text(String),
    Bytes(Vec<u8>),
}

/// One decoded inbound item, as produced by the host's input pipeline.
#[derive(Debug, Clone)]
pub enum InputItem {
    Line(String),
    Binary(Vec<u8>),
    /// The client's byte stream ended.
    Eof,
}

/// Capacity of the inbound queue; the host's reader applies backpressure
/// past this.
pub const INPUT_QUEUE_CAPACITY: usize = 512;

/// The set of intrinsic commands a connection recognizes by default.
pub const INTRINSIC_COMMANDS: [&str; 5] = [
    "PREFIX",
    "OUTPUTPREFIX",
    "SUFFIX",
    "OUTPUTSUFFIX",
    ".program",
];

/// Per-connection options, mutable from MOO via `set_connection_option`.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Treat input and output as byte sequences via the binary-string
    /// escape form.
    pub binary: bool,
    /// Do not deliver any in-band input until cleared.
    pub hold_input: bool,
    /// Treat all input as in-band.
    pub disable_oob: bool,
    /// Mirrored to the client as a telnet IAC WILL/WON'T ECHO on change.
    pub client_echo: bool,
    /// The input line that flushes pending input when matched exactly.
    pub flush_command: String,
    /// Which intrinsic commands this connection honors.
    pub intrinsic_commands: HashSet<String>,
}

impl ConnectionOptions {
    #[must_use]
    pub fn new(flush_command: String) -> Self {
        Self {
            binary: false,
            hold_input: false,
            disable_oob: false,
            client_echo: true,
            flush_command,
            intrinsic_commands: INTRINSIC_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Capacity of the output queue; past this the oldest message is dropped and
/// counted as flushed.
pub const OUTPUT_QUEUE_CAPACITY: usize = 512;

/// The bounded outbound queue. Producers are kernel task threads; the
/// consumer is the host's writer half, which parks on the signal channel.
pub struct OutputQueue {
    queue: Mutex<VecDeque<ConnectionMessage>>,
    signal_tx: flume::Sender<()>,
    signal_rx: flume::Receiver<()>,
    flushed: AtomicU64,
    closed: AtomicBool,
}

impl OutputQueue {
    #[must_use]
    pub fn new() -> Self {
        let (signal_tx, signal_rx) = flume::unbounded();
        Self {
            queue: Mutex::new(VecDeque::new()),
            signal_tx,
            signal_rx,
            flushed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a message, dropping the oldest if full. Producers never block.
    pub fn push(&self, msg: ConnectionMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut q = self.queue.lock();
            if q.len() >= OUTPUT_QUEUE_CAPACITY {
                q.pop_front();
                self.flushed.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(msg);
        }
        let _ = self.signal_tx.try_send(());
    }

    #[must_use]
    pub fn try_pop(&self) -> Option<ConnectionMessage> {
        self.queue.lock().pop_front()
    }

    /// The channel the writer half parks on between drains.
    #[must_use]
    pub fn signal(&self) -> flume::Receiver<()> {
        self.signal_rx.clone()
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn flushed_count(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }

    /// Close the queue: the writer drains what remains and terminates.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.signal_tx.try_send(());
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the kernel knows about one live connection.
pub struct ConnectionHandle {
    /// The id this connection was born with (always negative).
    pub connection_id: Objid,
    /// The listener object that accepted it.
    pub listener: Objid,
    /// Current binding: the connection id until login, the player after.
    player: Mutex<Objid>,
    /// Peer name, computed at accept time.
    pub peer_name: String,
    pub output: OutputQueue,
    /// Inbound items decoded by the host; consumed by the connection's
    /// driver, drained by the flush command.
    input_tx: flume::Sender<InputItem>,
    input_rx: flume::Receiver<InputItem>,
    pub options: Mutex<ConnectionOptions>,
    /// The (prefix, suffix) output delimiters sent around command output.
    pub delimiters: Mutex<(String, String)>,
    /// Present iff a task is blocked in `read()` on this connection.
    reader: Mutex<Option<flume::Sender<Wake>>>,
    pub connected_at: SystemTime,
    last_activity: Mutex<SystemTime>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn player(&self) -> Objid {
        *self.player.lock()
    }

    pub fn set_player(&self, player: Objid) {
        *self.player.lock() = player;
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.player().0 >= 0
    }

    pub fn send_text(&self, line: String) {
        self.output.push(ConnectionMessage::Text(line));
    }

    pub fn send_bytes(&self, bytes: Vec<u8>) {
        self.output.push(ConnectionMessage::Bytes(bytes));
    }

    /// The sending half of the input queue, for the host's reader.
    #[must_use]
    pub fn input_sender(&self) -> flume::Sender<InputItem> {
        self.input_tx.clone()
    }

    /// The receiving half of the input queue, for the connection driver.
    #[must_use]
    pub fn input_receiver(&self) -> flume::Receiver<InputItem> {
        self.input_rx.clone()
    }

    /// Drop everything pending on the input queue; the flush command and the
    /// `flush_input` builtin land here.
    pub fn flush_input(&self) -> usize {
        let mut flushed = 0;
        while self.input_rx.try_recv().is_ok() {
            flushed += 1;
        }
        flushed
    }

    #[must_use]
    pub fn last_activity(&self) -> SystemTime {
        *self.last_activity.lock()
    }

    pub fn record_activity(&self) {
        *self.last_activity.lock() = SystemTime::now();
    }

    /// Install a reader wake handle; fails if one is already present.
    pub fn set_reader(&self, wake: flume::Sender<Wake>) -> bool {
        let mut r = self.reader.lock();
        if r.is_some() {
            return false;
        }
        *r = Some(wake);
        true
    }

    #[must_use]
    pub fn has_reader(&self) -> bool {
        self.reader.lock().is_some()
    }

    /// Hand an input line (or an EOF error) to the pending reader, if any.
    /// Returns false when no reader was waiting.
    pub fn wake_reader(&self, wake: Wake) -> bool {
        let Some(tx) = self.reader.lock().take() else {
            return false;
        };
        let _ = tx.send(wake);
        true
    }
}

/// The process-wide map from bound object (player or connection id) to live
/// connection. At most one connection per player; a second login redirects
/// the first.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Objid, Arc<ConnectionHandle>>>,
    next_connection_id: AtomicI64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicI64::new(FIRST_CONNECTION_ID),
        }
    }

    /// Register a fresh, unauthenticated connection.
    pub fn new_connection(
        &self,
        listener: Objid,
        peer_name: String,
        flush_command: String,
    ) -> Arc<ConnectionHandle> {
        let id = Objid(self.next_connection_id.fetch_sub(1, Ordering::SeqCst));
        let (input_tx, input_rx) = flume::bounded(INPUT_QUEUE_CAPACITY);
        let handle = Arc::new(ConnectionHandle {
            connection_id: id,
            listener,
            player: Mutex::new(id),
            peer_name,
            output: OutputQueue::new(),
            input_tx,
            input_rx,
            options: Mutex::new(ConnectionOptions::new(flush_command)),
            delimiters: Mutex::new((String::new(), String::new())),
            reader: Mutex::new(None),
            connected_at: SystemTime::now(),
            last_activity: Mutex::new(SystemTime::now()),
        });
        self.connections.lock().insert(id, handle.clone());
        debug!(connection = %id, peer = %handle.peer_name, "new connection");
        handle
    }

    #[must_use]
    pub fn get(&self, who: Objid) -> Option<Arc<ConnectionHandle>> {
        self.connections.lock().get(&who).cloned()
    }

    /// All currently bound objects; with `include_all` the unauthenticated
    /// connection ids are included too.
    #[must_use]
    pub fn connected(&self, include_all: bool) -> Vec<Objid> {
        let mut who: Vec<Objid> = self
            .connections
            .lock()
            .keys()
            .copied()
            .filter(|o| include_all || o.0 >= 0)
            .collect();
        who.sort();
        who
    }

    /// Bind a connection to a player object. If the player already owns a
    /// connection, that older connection is unhooked and returned so the
    /// caller can deliver redirect messages and close it.
    pub fn bind_player(
        &self,
        handle: &Arc<ConnectionHandle>,
        player: Objid,
    ) -> Option<Arc<ConnectionHandle>> {
        let mut conns = self.connections.lock();
        let old_key = handle.player();
        conns.remove(&old_key);
        let displaced = conns.insert(player, handle.clone());
        handle.set_player(player);
        displaced
    }

    /// Remove a connection, by identity. Returns true when it was present.
    pub fn remove(&self, handle: &Arc<ConnectionHandle>) -> bool {
        let mut conns = self.connections.lock();
        let key = handle.player();
        match conns.get(&key) {
            Some(existing) if Arc::ptr_eq(existing, handle) => {
                conns.remove(&key);
                true
            }
            _ => false,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_values::NOTHING;

    #[test]
    fn test_output_queue_drops_oldest() {
        let q = OutputQueue::new();
        for i in 0..(OUTPUT_QUEUE_CAPACITY + 3) {
            q.push(ConnectionMessage::Text(format!("line {i}")));
        }
        assert_eq!(q.buffered_len(), OUTPUT_QUEUE_CAPACITY);
        assert_eq!(q.flushed_count(), 3);
        let Some(ConnectionMessage::Text(first)) = q.try_pop() else {
            panic!("expected text");
        };
        assert_eq!(first, "line 3");
    }

    #[test]
    fn test_at_most_one_connection_per_player() {
        let registry = ConnectionRegistry::new();
        let c1 = registry.new_connection(NOTHING, "peer-1".into(), ".flush".into());
        let c2 = registry.new_connection(NOTHING, "peer-2".into(), ".flush".into());
        assert_ne!(c1.connection_id, c2.connection_id);

        let player = Objid(10);
        assert!(registry.bind_player(&c1, player).is_none());
        // second login displaces the first
        let displaced = registry.bind_player(&c2, player).unwrap();
        assert!(Arc::ptr_eq(&displaced, &c1));
        assert!(Arc::ptr_eq(&registry.get(player).unwrap(), &c2));
    }

    #[test]
    fn test_reader_slot() {
        let registry = ConnectionRegistry::new();
        let c = registry.new_connection(NOTHING, "peer".into(), ".flush".into());
        let (tx, rx) = flume::unbounded();
        assert!(c.set_reader(tx));
        let (tx2, _rx2) = flume::unbounded();
        assert!(!c.set_reader(tx2));
        assert!(c.wake_reader(Wake::Resume(loam_values::var::v_str("hi"))));
        assert!(matches!(rx.try_recv().unwrap(), Wake::Resume(_)));
        // slot is empty again
        assert!(!c.wake_reader(Wake::Abort));
    }
}
