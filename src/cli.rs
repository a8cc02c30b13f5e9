use std::time::Duration;

use clap::Parser;

use serlink_core::config::DEFAULT_BUFFER_CAPACITY;
use serlink_core::{AUTO_DEVICE, Device, Handshake, LinkConfig, SerialSettings};

/// Terminal monitor for a line-oriented serial device.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Port to open, or "Auto" to probe the enumerated ports.
    #[arg(short, long, default_value = AUTO_DEVICE)]
    pub device: String,

    #[arg(short, long, default_value_t = 9600)]
    pub baud: u32,

    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub stop_bits: u8,

    /// Enable RTS/CTS flow control.
    #[arg(long)]
    pub rtscts: bool,

    /// Receive buffer capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
    pub capacity: usize,

    /// Use "\r\n" instead of "\n" as line terminator.
    #[arg(long)]
    pub crlf: bool,

    /// Milliseconds between reconnect attempts.
    #[arg(long, default_value_t = 100)]
    pub reconnect_ms: u64,

    /// Sent to each candidate first in auto mode. Escapes: \n \r \t \\ \xNN.
    #[arg(long)]
    pub init: Option<String>,

    /// Sent to each candidate in auto mode; the answer must equal --expect.
    #[arg(long, requires = "expect")]
    pub probe: Option<String>,

    /// Expected answer to --probe, terminator included.
    #[arg(long, requires = "probe")]
    pub expect: Option<String>,

    /// Sent once to the selected device in auto mode.
    #[arg(long = "final")]
    pub finalize: Option<String>,

    /// List the available ports and exit.
    #[arg(long)]
    pub list: bool,
}

impl Args {
    pub fn device(&self) -> Device {
        Device::from(self.device.as_str())
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud,
            stop_bits: self.stop_bits,
            rtscts: self.rtscts,
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        let terminator = if self.crlf { b"\r\n".to_vec() } else { b"\n".to_vec() };
        LinkConfig {
            terminator,
            reconnect_interval: Duration::from_millis(self.reconnect_ms),
            ..LinkConfig::default()
        }
    }

    pub fn handshake(&self) -> Handshake {
        let mut handshake = Handshake::new();
        if let Some(init) = &self.init {
            handshake = handshake.init(unescape(init));
        }
        if let (Some(probe), Some(expect)) = (&self.probe, &self.expect) {
            handshake = handshake.probe(unescape(probe), unescape(expect));
        }
        if let Some(finalize) = &self.finalize {
            handshake = handshake.finalize(unescape(finalize));
        }
        handshake
    }
}

/// Expand `\n`, `\r`, `\t`, `\\` and `\xNN` escapes into bytes. Unknown or
/// malformed escapes are kept literally.
pub fn unescape(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'\\' => out.push(b'\\'),
            b'x' => {
                let hex = bytes
                    .get(i + 2..i + 4)
                    .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 4;
                        continue;
                    }
                    None => out.extend_from_slice(b"\\x"),
                }
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
        i += 2;
    }
    out
}
