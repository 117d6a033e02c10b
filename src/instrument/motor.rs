//! Motor controller client.
//!
//! Speaks the STX/address/ETX frame format and annotates replies with
//! bracketed control tokens. One command maps to exactly one write followed
//! by one line read, both under the motor link lock, so command and response
//! stay strictly ordered with no pipelining.

use crate::error::AppResult;
use crate::link::{Link, LinkToken};
use crate::protocol::{annotate_response, frame_motor_command, Response, DEFAULT_MOTOR_ADDRESS};
use crate::transport::ByteTransport;
use log::{debug, warn};
use std::sync::Arc;

pub struct MotorClient {
    transport: Arc<dyn ByteTransport>,
    link: Link,
    address: u8,
}

impl MotorClient {
    pub fn new(transport: Arc<dyn ByteTransport>, link: Link) -> Self {
        Self {
            transport,
            link,
            address: DEFAULT_MOTOR_ADDRESS,
        }
    }

    /// Override the controller address byte (configuration-supplied).
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Send one command and return the annotated reply.
    ///
    /// Transport faults — port closed, write or read failure — are converted
    /// into a synthesized NAK-bearing [`Response`] carrying the error text,
    /// never propagated as errors. Only a non-ASCII command (an encoding
    /// fault in the command itself) is returned as `Err`.
    pub async fn send_command(&self, token: &LinkToken, text: &str) -> AppResult<Response> {
        let frame = frame_motor_command(text, self.address)?;

        if !self.transport.is_open() {
            warn!("Motor command {:?} dropped: serial port not open", text);
            return Ok(Response::nak("Serial port not open"));
        }

        let _guard = self.link.acquire(token).await;

        if let Err(e) = self.transport.write_bytes(&frame).await {
            warn!("Motor command {:?} write failed: {}", text, e);
            return Ok(Response::nak(format!("Error: {e}")));
        }

        match self.transport.read_line().await {
            Ok(raw) => {
                let response = Response::from_annotated(annotate_response(&raw));
                debug!("Motor command {:?} response: {}", text, response);
                Ok(response)
            }
            Err(e) => {
                warn!("Motor command {:?} read failed: {}", text, e);
                Ok(Response::nak(format!("Error: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ETX, STX};
    use crate::transport::MockTransport;

    fn client(transport: &MockTransport) -> MotorClient {
        MotorClient::new(Arc::new(transport.clone()), Link::new("motor"))
    }

    #[tokio::test]
    async fn command_is_framed_and_response_annotated() {
        let transport = MockTransport::opened();
        transport.push_response("\x02\x06O\x03");
        let motor = client(&transport);
        let token = LinkToken::new();

        let response = motor.send_command(&token, "X0+").await.unwrap();
        assert!(response.is_ack());
        assert_eq!(response.as_str(), "<STX><ACK>O<ETX>");

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].first(), Some(&STX));
        assert_eq!(writes[0][1], DEFAULT_MOTOR_ADDRESS);
        assert_eq!(writes[0].last(), Some(&ETX));
    }

    #[tokio::test]
    async fn closed_port_yields_synthesized_nak() {
        let transport = MockTransport::new();
        let motor = client(&transport);
        let token = LinkToken::new();

        let response = motor.send_command(&token, "A").await.unwrap();
        assert!(response.is_nak());
        assert!(response.as_str().contains("not open"));
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_yields_synthesized_nak() {
        let transport = MockTransport::opened();
        transport.trigger_failure();
        let motor = client(&transport);
        let token = LinkToken::new();

        let response = motor.send_command(&token, "A").await.unwrap();
        assert!(response.is_nak());
        assert!(response.as_str().contains("Error"));
    }

    #[tokio::test]
    async fn non_ascii_command_is_an_error() {
        let transport = MockTransport::opened();
        let motor = client(&transport);
        let token = LinkToken::new();

        assert!(motor.send_command(&token, "X→").await.is_err());
    }
}
