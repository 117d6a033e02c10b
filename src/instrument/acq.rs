//! Acquisition card client.
//!
//! Commands go out hex-rendered with a trailing carriage return; replies are
//! plain text lines with no control-token annotation. Writes and reads are
//! individually lock-guarded; a read that times out yields an empty string
//! rather than an error, matching the card's polled interaction style.

use crate::error::AppResult;
use crate::link::{Link, LinkToken};
use crate::protocol::frame_acq_command;
use crate::transport::ByteTransport;
use log::{debug, warn};
use std::sync::Arc;

pub struct AcqClient {
    transport: Arc<dyn ByteTransport>,
    link: Link,
}

impl AcqClient {
    pub fn new(transport: Arc<dyn ByteTransport>, link: Link) -> Self {
        Self { transport, link }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Send one command without waiting for a reply.
    ///
    /// Transport faults are logged and swallowed; only a non-ASCII command
    /// is returned as `Err`.
    pub async fn send_command(&self, token: &LinkToken, text: &str) -> AppResult<()> {
        let frame = frame_acq_command(text)?;

        if !self.transport.is_open() {
            warn!("Acq command {:?} dropped: serial port not open", text);
            return Ok(());
        }

        let _guard = self.link.acquire(token).await;
        if let Err(e) = self.transport.write_bytes(&frame).await {
            warn!("Acq command {:?} write failed: {}", text, e);
        } else {
            debug!("Sent acq command {:?}", text);
        }
        Ok(())
    }

    /// Read one raw line; empty string on timeout or transport fault.
    pub async fn read_line(&self, token: &LinkToken) -> String {
        let _guard = self.link.acquire(token).await;
        match self.transport.read_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!("Acq read failed: {}", e);
                String::new()
            }
        }
    }

    /// One command/response exchange under a single lock acquisition.
    pub async fn transact(&self, token: &LinkToken, text: &str) -> AppResult<String> {
        let _guard = self.link.acquire(token).await;
        self.send_command(token, text).await?;
        Ok(self.read_line(token).await)
    }
}
