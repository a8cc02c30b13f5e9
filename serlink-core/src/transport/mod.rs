use std::io;
use std::time::Duration;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "serial")]
pub mod serial;

/// A byte-oriented, blocking connection to one serial device.
pub trait Transport: Send {
    /// Write all bytes to the transport.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Flush any buffered output.
    fn flush(&mut self) -> io::Result<()>;

    /// Read bytes into the buffer. Returns the number of bytes read.
    ///
    /// Returns `Ok(0)` or an error of kind `TimedOut`, `WouldBlock` or
    /// `Interrupted` when nothing arrived within the read timeout. Any other
    /// error means the device is gone.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Set the read timeout for subsequent `read()` calls.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Open a second handle on the same device, used by the background reader.
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// Host-side access to serial devices: enumeration and opening.
pub trait Backend: Send + Sync {
    /// Names of the devices currently present, in host enumeration order.
    fn available_ports(&self) -> Result<Vec<String>>;

    /// Open the named device with the given read timeout.
    fn open(&self, name: &str, timeout: Duration) -> Result<Box<dyn Transport>>;
}

/// Whether a read error only means that no data arrived in time.
pub(crate) fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
