//! Serial transport over the `serialport` crate.
//!
//! Wraps a blocking serial port handle and runs all I/O on Tokio's blocking
//! thread pool so callers stay async. The port is opened with a short
//! internal read timeout; [`SerialTransport::read_line`] applies the
//! configured overall deadline on top of it.

use crate::error::{AppResult, ScanError};
use crate::transport::ByteTransport;
use async_trait::async_trait;
use log::{debug, trace};
use serialport::SerialPort;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Serial transport for RS-232/USB-serial links.
#[derive(Clone)]
pub struct SerialTransport {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3")
    port_name: String,
    /// Baud rate (e.g. 9600)
    baud_rate: u32,
    /// Overall read deadline for one line
    timeout: Duration,
    /// The open port, if any
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
            port: Arc::new(Mutex::new(None)),
        }
    }

    /// Set the per-read line deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl ByteTransport for SerialTransport {
    async fn open(&self) -> AppResult<()> {
        let mut slot = self.port.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.port_name, self.baud_rate)
            // Internal read timeout; the overall deadline is ours.
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                ScanError::Transport(format!(
                    "failed to open serial port '{}' at {} baud: {e}",
                    self.port_name, self.baud_rate
                ))
            })?;
        *slot = Some(port);
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    async fn close(&self) {
        let mut slot = self.port.lock().await;
        if slot.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
    }

    async fn write_bytes(&self, bytes: &[u8]) -> AppResult<()> {
        let port = self.port.clone();
        let data = bytes.to_vec();
        let name = self.port_name.clone();
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut slot = port.blocking_lock();
            let port = slot.as_mut().ok_or(ScanError::PortNotOpen)?;
            port.write_all(&data)
                .map_err(|e| ScanError::Transport(format!("write to '{name}' failed: {e}")))?;
            port.flush()
                .map_err(|e| ScanError::Transport(format!("flush of '{name}' failed: {e}")))?;
            trace!("Wrote {} bytes to '{}'", data.len(), name);
            Ok(())
        })
        .await
        .map_err(|e| ScanError::Transport(format!("serial I/O task panicked: {e}")))?
    }

    async fn read_line(&self) -> AppResult<String> {
        let port = self.port.clone();
        let timeout = self.timeout;
        let name = self.port_name.clone();
        tokio::task::spawn_blocking(move || {
            let mut slot = port.blocking_lock();
            let port = slot.as_mut().ok_or(ScanError::PortNotOpen)?;

            let mut raw = Vec::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();

            // Byte-at-a-time until newline or deadline; the port's own short
            // timeout keeps each read call bounded.
            while start.elapsed() < timeout {
                match port.read(&mut buffer) {
                    Ok(1) => {
                        if buffer[0] == b'\n' {
                            break;
                        }
                        raw.push(buffer[0]);
                    }
                    Ok(_) => {
                        return Err(ScanError::Transport(format!(
                            "unexpected EOF from '{name}'"
                        )))
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        return Err(ScanError::Transport(format!(
                            "read from '{name}' failed: {e}"
                        )))
                    }
                }
            }

            let line = String::from_utf8_lossy(&raw).trim().to_string();
            trace!("Read line from '{}': {:?}", name, line);
            Ok(line)
        })
        .await
        .map_err(|e| ScanError::Transport(format!("serial I/O task panicked: {e}")))?
    }

    fn is_open(&self) -> bool {
        // Non-async view used by the clients before framing a command.
        self.port.try_lock().map(|slot| slot.is_some()).unwrap_or(true)
    }
}
