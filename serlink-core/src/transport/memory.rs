//! In-memory serial host.
//!
//! A [`MemoryBackend`] holds a list of [`VirtualDevice`]s that the test (or a
//! demo) drives from the device side: feeding bytes, answering commands,
//! and plugging or unplugging the device.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{LinkError, Result};

use super::{Backend, Transport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct DeviceState {
    plugged: bool,
    /// Listed, but opening it fails (another process holds it).
    busy: bool,
    /// Bumped on every re-plug; handles from an older session are dead.
    session: u64,
    /// Device-to-host chunks, boundaries preserved.
    incoming: VecDeque<Vec<u8>>,
    /// Everything the host wrote.
    written: Vec<u8>,
    /// Canned replies keyed by the exact bytes of one host write.
    replies: Vec<(Vec<u8>, Vec<u8>)>,
}

/// One simulated device.
pub struct VirtualDevice {
    name: String,
    state: Mutex<DeviceState>,
    readable: Condvar,
}

impl VirtualDevice {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(DeviceState {
                plugged: true,
                ..DeviceState::default()
            }),
            readable: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue one chunk for the host to read.
    pub fn feed(&self, chunk: &[u8]) {
        lock(&self.state).incoming.push_back(chunk.to_vec());
        self.readable.notify_all();
    }

    /// Reply with `reply` whenever the host writes exactly `command`.
    pub fn respond_to(&self, command: &[u8], reply: &[u8]) {
        lock(&self.state)
            .replies
            .push((command.to_vec(), reply.to_vec()));
    }

    /// Bytes written by the host so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn is_plugged(&self) -> bool {
        lock(&self.state).plugged
    }

    /// While set, the device stays listed but every open fails.
    pub fn fail_opens(&self, fail: bool) {
        lock(&self.state).busy = fail;
    }

    /// Remove the device. Open handles fail and it disappears from enumeration.
    pub fn unplug(&self) {
        let mut state = lock(&self.state);
        state.plugged = false;
        state.incoming.clear();
        drop(state);
        self.readable.notify_all();
    }

    /// Make the device available again under a new session.
    pub fn plug(&self) {
        let mut state = lock(&self.state);
        if !state.plugged {
            state.plugged = true;
            state.session += 1;
        }
    }
}

/// A handle on a [`VirtualDevice`], bound to the session it was opened in.
pub struct MemoryPort {
    device: Arc<VirtualDevice>,
    session: u64,
    timeout: Duration,
}

impl MemoryPort {
    fn check_alive(&self, state: &DeviceState) -> io::Result<()> {
        if state.plugged && state.session == self.session {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{} was unplugged", self.device.name()),
            ))
        }
    }
}

impl Transport for MemoryPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = lock(&self.device.state);
        self.check_alive(&state)?;
        state.written.extend_from_slice(buf);

        let reply = state
            .replies
            .iter()
            .find(|(command, _)| command.as_slice() == buf)
            .map(|(_, reply)| reply.clone());
        if let Some(reply) = reply {
            state.incoming.push_back(reply);
            drop(state);
            self.device.readable.notify_all();
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_alive(&lock(&self.device.state))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut state = lock(&self.device.state);
        loop {
            self.check_alive(&state)?;

            if let Some(mut chunk) = state.incoming.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.incoming.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
            }
            state = self
                .device
                .readable
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        self.check_alive(&lock(&self.device.state))?;
        Ok(Box::new(MemoryPort {
            device: Arc::clone(&self.device),
            session: self.session,
            timeout: self.timeout,
        }))
    }
}

/// An in-memory host with a fixed list of virtual devices.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    devices: Arc<Mutex<Vec<Arc<VirtualDevice>>>>,
    enumeration_fails: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugged device at the end of the enumeration order.
    pub fn add_device(&self, name: &str) -> Arc<VirtualDevice> {
        let device = Arc::new(VirtualDevice::new(name));
        lock(&self.devices).push(Arc::clone(&device));
        device
    }

    pub fn device(&self, name: &str) -> Option<Arc<VirtualDevice>> {
        lock(&self.devices).iter().find(|d| d.name() == name).cloned()
    }

    /// While set, listing the ports fails.
    pub fn fail_enumeration(&self, fail: bool) {
        self.enumeration_fails.store(fail, Ordering::SeqCst);
    }
}

impl Backend for MemoryBackend {
    fn available_ports(&self) -> Result<Vec<String>> {
        if self.enumeration_fails.load(Ordering::SeqCst) {
            return Err(LinkError::Io(io::Error::other("port enumeration failed")));
        }
        Ok(lock(&self.devices)
            .iter()
            .filter(|d| d.is_plugged())
            .map(|d| d.name().to_string())
            .collect())
    }

    fn open(&self, name: &str, timeout: Duration) -> Result<Box<dyn Transport>> {
        let device = self
            .device(name)
            .filter(|d| d.is_plugged())
            .ok_or_else(|| {
                LinkError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such device: {name}"),
                ))
            })?;
        let session = {
            let state = lock(&device.state);
            if state.busy {
                return Err(LinkError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{name} is busy"),
                )));
            }
            state.session
        };
        Ok(Box::new(MemoryPort {
            device,
            session,
            timeout,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_read_preserves_chunks() {
        let backend = MemoryBackend::new();
        let dev = backend.add_device("ttyV0");
        let mut port = backend.open("ttyV0", SHORT).unwrap();

        dev.feed(b"abc");
        dev.feed(b"de");
        let mut buf = [0u8; 16];
        assert_eq!(port.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(port.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"de");
    }

    #[test]
    fn test_read_times_out_when_idle() {
        let backend = MemoryBackend::new();
        backend.add_device("ttyV0");
        let mut port = backend.open("ttyV0", SHORT).unwrap();

        let err = port.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_unplug_kills_old_handles() {
        let backend = MemoryBackend::new();
        let dev = backend.add_device("ttyV0");
        let mut port = backend.open("ttyV0", SHORT).unwrap();

        dev.unplug();
        assert!(backend.available_ports().unwrap().is_empty());
        assert!(backend.open("ttyV0", SHORT).is_err());
        assert_eq!(
            port.read(&mut [0u8; 4]).unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );

        dev.plug();
        assert!(port.write_all(b"x").is_err());
        let mut fresh = backend.open("ttyV0", SHORT).unwrap();
        fresh.write_all(b"x").unwrap();
        assert_eq!(dev.written(), b"x");
    }

    #[test]
    fn test_failure_switches() {
        let backend = MemoryBackend::new();
        let dev = backend.add_device("ttyV0");

        dev.fail_opens(true);
        assert_eq!(backend.available_ports().unwrap(), vec!["ttyV0"]);
        assert!(backend.open("ttyV0", SHORT).is_err());
        dev.fail_opens(false);
        assert!(backend.open("ttyV0", SHORT).is_ok());

        backend.fail_enumeration(true);
        assert!(backend.available_ports().is_err());
        backend.fail_enumeration(false);
        assert_eq!(backend.available_ports().unwrap().len(), 1);
    }

    #[test]
    fn test_canned_reply() {
        let backend = MemoryBackend::new();
        let dev = backend.add_device("ttyV0");
        dev.respond_to(b"?\n", b"yes\n");
        let mut port = backend.open("ttyV0", SHORT).unwrap();

        port.write_all(b"?\n").unwrap();
        let mut buf = [0u8; 8];
        let n = port.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"yes\n");
    }
}
