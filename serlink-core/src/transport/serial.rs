use std::io;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::SerialSettings;
use crate::error::{LinkError, Result};

use super::{Backend, Transport};

/// Fixed line settings; stop bits and flow control come from `SerialSettings`.
const DATA_BITS: serialport::DataBits = serialport::DataBits::Eight;
const PARITY: serialport::Parity = serialport::Parity::None;

/// A transport backed by a native serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.port, buf)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialTransport::new(port)))
    }
}

/// Opens native serial ports with a fixed set of line settings.
#[derive(Debug, Clone, Default)]
pub struct SerialBackend {
    settings: SerialSettings,
}

impl SerialBackend {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

impl Backend for SerialBackend {
    fn available_ports(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(LinkError::Serial)?;

        if ports.is_empty() {
            warn!("no serial ports found");
        }
        for port in &ports {
            debug!("found port: {} ({:?})", port.port_name, port.port_type);
        }

        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, name: &str, timeout: Duration) -> Result<Box<dyn Transport>> {
        let stop_bits = match self.settings.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };
        let flow_control = if self.settings.rtscts {
            serialport::FlowControl::Hardware
        } else {
            serialport::FlowControl::None
        };

        let port = serialport::new(name, self.settings.baud_rate)
            .data_bits(DATA_BITS)
            .stop_bits(stop_bits)
            .parity(PARITY)
            .flow_control(flow_control)
            .timeout(timeout)
            .open()
            .map_err(LinkError::Serial)?;

        info!("opened {} at {} baud", name, self.settings.baud_rate);
        Ok(Box::new(SerialTransport::new(port)))
    }
}
