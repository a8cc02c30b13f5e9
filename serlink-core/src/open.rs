use log::{debug, info, warn};

use crate::config::{Device, FIRST_CANDIDATE_INDEX, Handshake, LinkConfig};
use crate::error::{LinkError, Result};
use crate::transport::{Backend, Transport, is_idle};

/// Open `device`, probing the enumerated ports when it is [`Device::Auto`].
///
/// In auto mode every port from [`FIRST_CANDIDATE_INDEX`] on is opened with
/// the probe timeout and put through `handshake`: the init command, then the
/// probe, whose answer must match exactly. Without a probe the first port that
/// opens is taken. The final command is sent to the selected port only.
///
/// A named device is opened directly and the handshake is not used.
///
/// Every failure is reported as [`LinkError::NoDeviceFound`].
pub fn open_device(
    backend: &dyn Backend,
    device: &Device,
    handshake: &Handshake,
    config: &LinkConfig,
) -> Result<(String, Box<dyn Transport>)> {
    let result = match device {
        Device::Named(name) => backend
            .open(name, config.read_timeout)
            .map(|transport| (name.clone(), transport)),
        Device::Auto => auto_detect(backend, handshake, config),
    };

    result.map_err(|e| {
        warn!("could not open serial port {device}: {e}");
        e.into_no_device()
    })
}

fn auto_detect(
    backend: &dyn Backend,
    handshake: &Handshake,
    config: &LinkConfig,
) -> Result<(String, Box<dyn Transport>)> {
    let ports = backend.available_ports()?;
    if ports.len() <= FIRST_CANDIDATE_INDEX {
        return Err(LinkError::NoDeviceFound(format!(
            "{} port(s) present, no candidates",
            ports.len()
        )));
    }

    for name in &ports[FIRST_CANDIDATE_INDEX..] {
        debug!("probing {name}");
        let mut transport = backend.open(name, config.probe_timeout)?;

        if let Some(init) = &handshake.init {
            send(transport.as_mut(), init)?;
            read_line_blocking(transport.as_mut(), &config.terminator)?;
        }

        let accepted = match &handshake.probe {
            Some(probe) => {
                send(transport.as_mut(), &probe.command)?;
                let answer = read_line_blocking(transport.as_mut(), &config.terminator)?;
                if answer != probe.expected {
                    debug!(
                        "{name} answered {:02X?}, expected {:02X?}",
                        answer, probe.expected
                    );
                }
                answer == probe.expected
            }
            None => true,
        };

        if accepted {
            if let Some(finalize) = &handshake.finalize {
                send(transport.as_mut(), finalize)?;
                read_line_blocking(transport.as_mut(), &config.terminator)?;
            }
            transport.set_read_timeout(config.read_timeout)?;
            info!("selected {name}");
            return Ok((name.clone(), transport));
        }
    }

    Err(LinkError::NoDeviceFound(format!(
        "none of {} candidate(s) gave the expected answer",
        ports.len() - FIRST_CANDIDATE_INDEX
    )))
}

fn send(transport: &mut dyn Transport, bytes: &[u8]) -> Result<()> {
    transport.write_all(bytes)?;
    transport.flush()?;
    Ok(())
}

/// Read until `terminator` (kept in the result) or until a read times out.
fn read_line_blocking(transport: &mut dyn Transport, terminator: &[u8]) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match transport.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if !terminator.is_empty() && line.ends_with(terminator) {
                    break;
                }
            }
            Err(e) if is_idle(&e) => break,
            Err(e) => return Err(LinkError::Io(e)),
        }
    }
    Ok(line)
}
