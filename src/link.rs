//! Serial downlink for the per-second telemetry messages

use std::io::Write;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::error::{Result, TelemetryError};

/// Best-effort message link; a failed link is replaced, never retried
pub trait SerialLink: Send + Sized {
    /// Send one message; the link terminates it with a newline
    fn send(&mut self, message: &str) -> Result<()>;

    /// Open a fresh connection to the same endpoint
    fn reconnect(&self) -> Result<Self>;
}

/// Link over a serial port
///
/// A link whose port could not be opened stays disconnected: every send
/// fails with `LinkSend`, and `reconnect` tries the port again.
pub struct SerialPortLink {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortLink {
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()?;
        info!(port = port_name, baud_rate, "Serial downlink opened");
        Ok(Self {
            port_name: port_name.to_owned(),
            baud_rate,
            timeout,
            port: Some(port),
        })
    }

    /// Open the port, falling back to a disconnected link if it is unavailable
    pub fn connect(port_name: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self::open(port_name, baud_rate, timeout).unwrap_or_else(|e| {
            warn!(port = port_name, error = %e, "Serial downlink unavailable, starting disconnected");
            Self {
                port_name: port_name.to_owned(),
                baud_rate,
                timeout,
                port: None,
            }
        })
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl SerialLink for SerialPortLink {
    fn send(&mut self, message: &str) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| {
            TelemetryError::LinkSend(format!("{}: not connected", self.port_name))
        })?;
        port.write_all(message.as_bytes())
            .and_then(|()| port.write_all(b"\n"))
            .and_then(|()| port.flush())
            .map_err(|e| TelemetryError::LinkSend(format!("{}: {}", self.port_name, e)))
    }

    fn reconnect(&self) -> Result<Self> {
        Self::open(&self.port_name, self.baud_rate, self.timeout)
    }
}

/// Link that only logs messages, for runs without a downlink
#[derive(Debug, Default, Clone)]
pub struct LogLink {
    sent: u64,
}

impl SerialLink for LogLink {
    fn send(&mut self, message: &str) -> Result<()> {
        self.sent += 1;
        debug!(sent = self.sent, len = message.len(), "Telemetry message");
        Ok(())
    }

    fn reconnect(&self) -> Result<Self> {
        Ok(self.clone())
    }
}

/// Downlink chosen at startup
pub enum Downlink {
    Serial(SerialPortLink),
    Log(LogLink),
}

impl SerialLink for Downlink {
    fn send(&mut self, message: &str) -> Result<()> {
        match self {
            Downlink::Serial(link) => link.send(message),
            Downlink::Log(link) => link.send(message),
        }
    }

    fn reconnect(&self) -> Result<Self> {
        match self {
            Downlink::Serial(link) => link.reconnect().map(Downlink::Serial),
            Downlink::Log(link) => link.reconnect().map(Downlink::Log),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_PORT: &str = "/dev/ttyVIBE-missing";

    #[test]
    fn test_missing_port_starts_disconnected() {
        let mut link = SerialPortLink::connect(MISSING_PORT, 115_200, Duration::from_millis(10));
        assert!(!link.is_connected());

        let err = link.send("0,98.6").unwrap_err();
        assert!(matches!(err, TelemetryError::LinkSend(_)));
        assert!(link.reconnect().is_err());
    }

    #[test]
    fn test_missing_port_open_fails() {
        let result = SerialPortLink::open(MISSING_PORT, 115_200, Duration::from_millis(10));
        assert!(result.is_err());
    }

    #[test]
    fn test_log_link_reconnect_keeps_count() {
        let mut link = LogLink::default();
        link.send("0,70").unwrap();
        link.send("1,70").unwrap();
        assert_eq!(link.reconnect().unwrap().sent, 2);
    }
}
