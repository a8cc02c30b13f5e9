use std::fmt;
use std::time::Duration;

/// Device name that asks for automatic detection.
pub const AUTO_DEVICE: &str = "Auto";

/// Default receive buffer capacity in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Enumeration index of the first candidate probed in auto mode, and of the
/// port reopened after a disconnect. Index 0 is taken to be a non-device
/// control port on the hosts this was written for.
pub const FIRST_CANDIDATE_INDEX: usize = 1;

/// Configuration for a serial link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Bytes marking the end of a line.
    pub terminator: Vec<u8>,
    /// Read timeout of the open connection. Bounds how long the reader
    /// blocks before checking whether the link is still owned.
    pub read_timeout: Duration,
    /// Read timeout used while probing candidates in auto mode.
    pub probe_timeout: Duration,
    /// Delay between reconnect attempts after the device disappeared.
    pub reconnect_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            terminator: b"\n".to_vec(),
            read_timeout: Duration::from_millis(100),
            probe_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_millis(100),
        }
    }
}

/// Line settings for native serial ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// 1 or 2.
    pub stop_bits: u8,
    /// RTS/CTS hardware flow control.
    pub rtscts: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            stop_bits: 1,
            rtscts: false,
        }
    }
}

/// Which device to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    /// Probe the enumerated ports, see [`crate::open::open_device`].
    Auto,
    Named(String),
}

impl From<&str> for Device {
    fn from(name: &str) -> Self {
        if name == AUTO_DEVICE {
            Self::Auto
        } else {
            Self::Named(name.to_string())
        }
    }
}

impl From<String> for Device {
    fn from(name: String) -> Self {
        if name == AUTO_DEVICE {
            Self::Auto
        } else {
            Self::Named(name)
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "{AUTO_DEVICE}"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// A question sent to a candidate device and the answer that identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub command: Vec<u8>,
    /// Compared byte for byte with the line read back, terminator included.
    pub expected: Vec<u8>,
}

/// Commands exchanged with a device while auto-detecting it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Sent to every candidate first; one line of response is discarded.
    pub init: Option<Vec<u8>>,
    pub probe: Option<Probe>,
    /// Sent once to the selected device; one line of response is discarded.
    pub finalize: Option<Vec<u8>>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(mut self, command: impl Into<Vec<u8>>) -> Self {
        self.init = Some(command.into());
        self
    }

    pub fn probe(mut self, command: impl Into<Vec<u8>>, expected: impl Into<Vec<u8>>) -> Self {
        self.probe = Some(Probe {
            command: command.into(),
            expected: expected.into(),
        });
        self
    }

    pub fn finalize(mut self, command: impl Into<Vec<u8>>) -> Self {
        self.finalize = Some(command.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_from_sentinel() {
        assert_eq!(Device::from("Auto"), Device::Auto);
        assert_eq!(Device::from("auto"), Device::Named("auto".into()));
        assert_eq!(
            Device::from(String::from("/dev/ttyUSB0")),
            Device::Named("/dev/ttyUSB0".into())
        );
    }

    #[test]
    fn test_handshake_builder() {
        let hs = Handshake::new().init("*RST\n").probe("*IDN?\n", "scope\n");
        assert_eq!(hs.init.as_deref(), Some(&b"*RST\n"[..]));
        assert_eq!(hs.probe.unwrap().expected, b"scope\n");
        assert!(hs.finalize.is_none());
    }

    #[test]
    fn test_default_terminator_is_newline() {
        assert_eq!(LinkConfig::default().terminator, b"\n");
    }
}
