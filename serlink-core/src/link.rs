use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

use log::{debug, info, trace, warn};

use crate::buffer::ReceiveBuffer;
use crate::config::{Device, FIRST_CANDIDATE_INDEX, Handshake, LinkConfig};
use crate::error::{LinkError, Result};
use crate::foreground::Foreground;
use crate::open::open_device;
use crate::transport::{Backend, Transport, is_idle};

/// Size of a single read by the background reader.
const READ_CHUNK: usize = 1024;

/// Called on the foreground context after each chunk the reader received.
pub type DataHandler = Arc<dyn Fn(&SerialLink) + Send + Sync>;

/// Called by [`SerialLink::clear_buffer`] before clearing.
pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// A line taken from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Not valid UTF-8. The bytes were consumed all the same.
    Undecodable(Vec<u8>),
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Undecodable(bytes) => write!(f, "<undecodable data: {} bytes>", bytes.len()),
        }
    }
}

/// Outcome of a write. Failures are logged as warnings, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Sent,
    /// The link is disconnected; nothing was written.
    LinkClosed,
    /// The transport failed, most likely because the port closed before the
    /// reader noticed.
    Failed,
}

struct Connection {
    device: String,
    port: Option<Box<dyn Transport>>,
    state: LinkState,
    reader_running: bool,
}

struct Shared {
    config: LinkConfig,
    backend: Arc<dyn Backend>,
    foreground: Arc<dyn Foreground>,
    buffer: Mutex<ReceiveBuffer>,
    connection: Mutex<Connection>,
    handler: Mutex<Option<DataHandler>>,
    refresh: Mutex<Option<RefreshHook>>,
}

/// One serial connection drained by a background reader thread, with a
/// non-blocking read/write surface for the foreground context and automatic
/// reconnection after the device disappears.
///
/// Cloning gives another handle on the same link.
#[derive(Clone)]
pub struct SerialLink {
    shared: Arc<Shared>,
}

impl SerialLink {
    /// Open `device` (see [`open_device`]) and wrap it in a link.
    ///
    /// The reader does not run until [`SerialLink::start`].
    pub fn open(
        backend: Arc<dyn Backend>,
        foreground: Arc<dyn Foreground>,
        device: impl Into<Device>,
        handshake: &Handshake,
        config: LinkConfig,
    ) -> Result<Self> {
        let (name, transport) = open_device(backend.as_ref(), &device.into(), handshake, &config)?;
        Ok(Self::new(name, transport, backend, foreground, config))
    }

    /// Wrap an already-open transport. `backend` is used for reconnecting.
    pub fn new(
        device: String,
        transport: Box<dyn Transport>,
        backend: Arc<dyn Backend>,
        foreground: Arc<dyn Foreground>,
        config: LinkConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                backend,
                foreground,
                buffer: Mutex::new(ReceiveBuffer::default()),
                connection: Mutex::new(Connection {
                    device,
                    port: Some(transport),
                    state: LinkState::Connected,
                    reader_running: false,
                }),
                handler: Mutex::new(None),
                refresh: Mutex::new(None),
            }),
        }
    }

    /// Set the buffer capacity, register `on_data` as the only data handler
    /// (replacing any earlier one) and start the background reader.
    pub fn start<F>(&self, capacity: usize, on_data: F) -> Result<()>
    where
        F: Fn(&SerialLink) + Send + Sync + 'static,
    {
        lock(&self.shared.buffer).set_capacity(capacity);
        *lock(&self.shared.handler) = Some(Arc::new(on_data));

        let reader_port = {
            let mut conn = lock(&self.shared.connection);
            if conn.reader_running {
                debug!("reader for {} already running", conn.device);
                return Ok(());
            }
            let Some(port) = conn.port.as_ref() else {
                debug!("{} is disconnected, reader starts on reconnect", conn.device);
                return Ok(());
            };
            let reader_port = port.try_clone()?;
            conn.reader_running = true;
            reader_port
        };

        if let Err(e) = self.spawn_reader(reader_port) {
            lock(&self.shared.connection).reader_running = false;
            return Err(e);
        }
        Ok(())
    }

    /// Optional hook run by [`SerialLink::clear_buffer`] to flush pending
    /// foreground work. Embeddings that render after every event need none.
    pub fn set_refresh_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.shared.refresh) = Some(Arc::new(hook));
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Name of the device currently (or last) bound to the link.
    pub fn device(&self) -> String {
        lock(&self.shared.connection).device.clone()
    }

    pub fn state(&self) -> LinkState {
        lock(&self.shared.connection).state
    }

    pub fn is_disconnected(&self) -> bool {
        self.state() == LinkState::Disconnected
    }

    /// Number of bytes waiting in the receive buffer.
    pub fn buffered(&self) -> usize {
        lock(&self.shared.buffer).len()
    }

    /// Remove and return the first `n` buffered bytes, or `None` if fewer
    /// are available. Never blocks.
    pub fn read_bytes(&self, n: usize) -> Option<Vec<u8>> {
        lock(&self.shared.buffer).take(n)
    }

    /// Remove and return the first complete line, without its terminator.
    /// `None` if no complete line is buffered. Never blocks.
    pub fn read_line(&self) -> Option<Line> {
        let bytes = lock(&self.shared.buffer).take_line(&self.shared.config.terminator)?;
        Some(match String::from_utf8(bytes) {
            Ok(text) => Line::Text(text),
            Err(e) => Line::Undecodable(e.into_bytes()),
        })
    }

    /// Empty the receive buffer, or with `to_last_line` drop only the complete
    /// lines and keep a trailing partial one.
    ///
    /// Runs the refresh hook first, so pending foreground work may be pumped.
    pub fn clear_buffer(&self, to_last_line: bool) {
        let refresh = lock(&self.shared.refresh).clone();
        if let Some(refresh) = refresh {
            refresh();
        }

        let mut buffer = lock(&self.shared.buffer);
        if to_last_line {
            buffer.clear_to_last_line(&self.shared.config.terminator);
        } else {
            buffer.clear();
        }
    }

    pub fn write(&self, data: &[u8]) -> WriteStatus {
        let mut conn = lock(&self.shared.connection);
        let device = conn.device.clone();
        let port = match (conn.state, conn.port.as_mut()) {
            (LinkState::Connected, Some(port)) => port,
            _ => {
                warn!("nothing to write to, serial port {device} is closed");
                return WriteStatus::LinkClosed;
            }
        };

        match port.write_all(data).and_then(|()| port.flush()) {
            Ok(()) => {
                trace!("TX {device}: {:02X?}", data);
                WriteStatus::Sent
            }
            Err(e) => {
                warn!("write to {device} failed, the port probably closed without the link noticing yet: {e}");
                WriteStatus::Failed
            }
        }
    }

    /// Write `text` followed by the terminator.
    pub fn write_line(&self, text: &str) -> WriteStatus {
        let mut bytes = Vec::with_capacity(text.len() + self.shared.config.terminator.len());
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(&self.shared.config.terminator);
        self.write(&bytes)
    }

    fn spawn_reader(&self, port: Box<dyn Transport>) -> Result<()> {
        let weak = Arc::downgrade(&self.shared);
        thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || read_loop(weak, port))
            .map_err(LinkError::Io)?;
        Ok(())
    }

    /// Store a received chunk and notify the handler on the foreground.
    fn receive(&self, chunk: &[u8]) {
        {
            let mut buffer = lock(&self.shared.buffer);
            if buffer.push_chunk(chunk) {
                trace!("RX: {:02X?}", chunk);
            } else {
                debug!(
                    "receive buffer full ({}/{} bytes), dropped {} bytes",
                    buffer.len(),
                    buffer.capacity(),
                    chunk.len()
                );
            }
        }

        let handler = lock(&self.shared.handler).clone();
        if let Some(handler) = handler {
            let link = self.clone();
            self.shared.foreground.post(Box::new(move || handler(&link)));
        }
    }

    fn connection_lost(&self, err: std::io::Error) {
        let device = {
            let mut conn = lock(&self.shared.connection);
            conn.state = LinkState::Disconnected;
            conn.port = None;
            conn.reader_running = false;
            conn.device.clone()
        };
        warn!("serial port {device} disconnected ({err}), trying to reconnect");

        let link = self.clone();
        self.shared.foreground.post(Box::new(move || link.reconnect()));
    }

    /// One reconnect attempt; schedules the next one on failure.
    fn reconnect(&self) {
        match self.try_reconnect() {
            Ok(Some(name)) => info!("reconnected to {name}"),
            Ok(None) => self.schedule_reconnect(),
            Err(e) => {
                debug!("reconnect attempt failed: {e}");
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&self) {
        let link = self.clone();
        self.shared.foreground.post_after(
            self.shared.config.reconnect_interval,
            Box::new(move || link.reconnect()),
        );
    }

    fn try_reconnect(&self) -> Result<Option<String>> {
        let ports = self.shared.backend.available_ports()?;
        let Some(name) = ports.get(FIRST_CANDIDATE_INDEX) else {
            trace!("{} port(s) present, waiting", ports.len());
            return Ok(None);
        };

        let transport = self
            .shared
            .backend
            .open(name, self.shared.config.read_timeout)?;
        let reader_port = transport.try_clone()?;

        {
            let mut conn = lock(&self.shared.connection);
            conn.device = name.clone();
            conn.port = Some(transport);
            conn.state = LinkState::Connected;
            conn.reader_running = true;
        }

        if let Err(e) = self.spawn_reader(reader_port) {
            let mut conn = lock(&self.shared.connection);
            conn.state = LinkState::Disconnected;
            conn.port = None;
            conn.reader_running = false;
            return Err(e);
        }
        Ok(Some(name.clone()))
    }
}

/// Body of the reader thread. Ends when the connection is lost or every
/// `SerialLink` handle has been dropped.
fn read_loop(shared: Weak<Shared>, mut port: Box<dyn Transport>) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match port.read(&mut chunk) {
            Ok(n) if n > 0 => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                SerialLink { shared }.receive(&chunk[..n]);
            }
            // An empty read is a timeout under the `Transport::read` contract.
            // A vanished device must come back as an error instead.
            Ok(_) => {
                if shared.strong_count() == 0 {
                    return;
                }
            }
            Err(e) if is_idle(&e) => {
                if shared.strong_count() == 0 {
                    return;
                }
            }
            Err(e) => {
                if let Some(shared) = shared.upgrade() {
                    SerialLink { shared }.connection_lost(e);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::foreground::ForegroundQueue;
    use crate::transport::memory::{MemoryBackend, VirtualDevice};

    const WAIT: Duration = Duration::from_secs(2);

    fn config() -> LinkConfig {
        LinkConfig {
            read_timeout: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(20),
            reconnect_interval: Duration::from_millis(5),
            ..LinkConfig::default()
        }
    }

    fn setup() -> (ForegroundQueue, MemoryBackend, Arc<VirtualDevice>, SerialLink) {
        let queue = ForegroundQueue::new();
        let backend = MemoryBackend::new();
        backend.add_device("ttyS0");
        let dev = backend.add_device("ttyUSB0");
        let link = SerialLink::open(
            Arc::new(backend.clone()),
            Arc::new(queue.handle()),
            "Auto",
            &Handshake::new(),
            config(),
        )
        .unwrap();
        (queue, backend, dev, link)
    }

    #[test]
    fn test_open_auto_binds_first_candidate() {
        let (_queue, _backend, _dev, link) = setup();
        assert_eq!(link.device(), "ttyUSB0");
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.buffered(), 0);
    }

    #[test]
    fn test_reader_fills_buffer_and_calls_handler() {
        let (mut queue, _backend, dev, link) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        link.start(4096, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        dev.feed(b"ab\ncd");
        assert!(queue.run_until(WAIT, || calls.load(Ordering::SeqCst) == 1));
        assert_eq!(link.read_line(), Some(Line::Text("ab".into())));
        assert_eq!(link.read_line(), None);
        assert_eq!(link.read_bytes(2), Some(b"cd".to_vec()));
    }

    #[test]
    fn test_handler_called_for_discarded_chunk() {
        let (mut queue, _backend, dev, link) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        link.start(4, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        dev.feed(b"abc");
        dev.feed(b"de");
        assert!(queue.run_until(WAIT, || calls.load(Ordering::SeqCst) == 2));
        assert_eq!(link.buffered(), 3);
        assert_eq!(link.read_bytes(3), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_handler_runs_on_foreground_only() {
        let (mut queue, _backend, dev, link) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        link.start(4096, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        dev.feed(b"x");
        let mut spins = 0;
        while link.buffered() == 0 && spins < 400 {
            thread::sleep(Duration::from_millis(5));
            spins += 1;
        }
        // Data is buffered, but the handler waits for the foreground to pump.
        assert_eq!(link.buffered(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(queue.run_until(WAIT, || calls.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_later_start_replaces_handler() {
        let (mut queue, _backend, dev, link) = setup();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        link.start(4096, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let s = Arc::clone(&second);
        link.start(4096, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        dev.feed(b"x");
        assert!(queue.run_until(WAIT, || second.load(Ordering::SeqCst) == 1));
        assert_eq!(first.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_can_read_from_link() {
        let (mut queue, _backend, dev, link) = setup();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&lines);
        link.start(4096, move |link| {
            while let Some(line) = link.read_line() {
                l.lock().unwrap().push(line.to_string());
            }
        })
        .unwrap();

        dev.feed(b"one\ntw");
        dev.feed(b"o\n");
        assert!(queue.run_until(WAIT, || lines.lock().unwrap().len() == 2));
        assert_eq!(*lines.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_undecodable_line_is_consumed() {
        let (mut queue, _backend, dev, link) = setup();
        link.start(4096, |_| {}).unwrap();

        dev.feed(&[0xFF, 0xFE, b'\n', b'o', b'k', b'\n']);
        assert!(queue.run_until(WAIT, || link.buffered() == 6));
        assert_eq!(link.read_line(), Some(Line::Undecodable(vec![0xFF, 0xFE])));
        assert_eq!(link.read_line(), Some(Line::Text("ok".into())));
        assert_eq!(link.buffered(), 0);
    }

    #[test]
    fn test_write_line_appends_terminator() {
        let (_queue, _backend, dev, link) = setup();
        assert_eq!(link.write_line("*IDN?"), WriteStatus::Sent);
        assert_eq!(link.write(b"raw"), WriteStatus::Sent);
        assert_eq!(dev.written(), b"*IDN?\nraw");
    }

    #[test]
    fn test_write_failure_is_reported_not_raised() {
        let (_queue, _backend, dev, link) = setup();
        // Reader not started, so the link has not noticed the unplug yet.
        dev.unplug();
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.write_line("x"), WriteStatus::Failed);
    }

    #[test]
    fn test_clear_buffer_without_refresh_hook() {
        let (mut queue, _backend, dev, link) = setup();
        link.start(4096, |_| {}).unwrap();

        dev.feed(b"ab\ncd");
        assert!(queue.run_until(WAIT, || link.buffered() == 5));
        link.clear_buffer(true);
        assert_eq!(link.buffered(), 2);
        link.clear_buffer(false);
        assert_eq!(link.buffered(), 0);
    }

    #[test]
    fn test_clear_buffer_runs_refresh_hook() {
        let (mut queue, _backend, dev, link) = setup();
        link.start(4096, |_| {}).unwrap();
        let refreshed = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&refreshed);
        link.set_refresh_hook(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        dev.feed(b"ab\ncd\nef");
        assert!(queue.run_until(WAIT, || link.buffered() == 8));
        link.clear_buffer(true);
        assert_eq!(link.read_bytes(2), Some(b"ef".to_vec()));

        dev.feed(b"gh");
        assert!(queue.run_until(WAIT, || link.buffered() == 2));
        link.clear_buffer(false);
        assert_eq!(link.buffered(), 0);
        assert_eq!(refreshed.load(Ordering::SeqCst), 2);
    }

    /// Returns `Ok(0)` on every read, the way some drivers report a timeout.
    struct SilentTransport;

    impl Transport for SilentTransport {
        fn write_all(&mut self, _buf: &[u8]) -> std::io::Result<()> {
            Ok(())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            thread::sleep(Duration::from_millis(1));
            Ok(0)
        }

        fn set_read_timeout(&mut self, _timeout: Duration) -> std::io::Result<()> {
            Ok(())
        }

        fn try_clone(&self) -> std::io::Result<Box<dyn Transport>> {
            Ok(Box::new(SilentTransport))
        }
    }

    #[test]
    fn test_empty_reads_keep_link_connected() {
        let mut queue = ForegroundQueue::new();
        let link = SerialLink::new(
            "ttySILENT".into(),
            Box::new(SilentTransport),
            Arc::new(MemoryBackend::new()),
            Arc::new(queue.handle()),
            config(),
        );
        link.start(4096, |_| {}).unwrap();

        assert!(!queue.run_until(Duration::from_millis(50), || link.is_disconnected()));
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.write_line("still here"), WriteStatus::Sent);
    }

    #[test]
    fn test_disconnect_blocks_writes() {
        let (mut queue, _backend, dev, link) = setup();
        link.start(4096, |_| {}).unwrap();
        assert_eq!(link.write_line("before"), WriteStatus::Sent);

        dev.unplug();
        assert!(queue.run_until(WAIT, || link.is_disconnected()));
        let written = dev.written();
        assert_eq!(link.write_line("after"), WriteStatus::LinkClosed);
        assert_eq!(link.write(b"raw"), WriteStatus::LinkClosed);
        assert_eq!(dev.written(), written);
    }
}
