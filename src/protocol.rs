//! Frame codec for the motor controller and acquisition card wire formats.
//!
//! Both devices speak an ASCII-command protocol in which the textual command
//! is rendered as two uppercase hex digits per character before framing:
//!
//! - Motor controller: `STX ++ address ++ hex(command) ++ ETX`
//! - Acquisition card: `hex(command) ++ CR`
//!
//! Replies are read as a single line and, on the motor path, annotated by
//! replacing control bytes with bracketed tokens (`<STX>`, `<ACK>`, `<ETX>`,
//! `<NAK>`) so higher layers can classify them without dealing with raw
//! control characters. Everything in this module is a pure function; no state
//! is kept.

use crate::error::{AppResult, ScanError};
use std::fmt;

/// Start-of-text control byte.
pub const STX: u8 = 0x02;
/// End-of-text control byte.
pub const ETX: u8 = 0x03;
/// End-of-transmission control byte, used as block padding during uploads.
pub const EOT: u8 = 0x04;
/// Acknowledge control byte.
pub const ACK: u8 = 0x06;
/// Carriage return, terminator for acquisition-card frames.
pub const CR: u8 = 0x0D;
/// Negative-acknowledge control byte.
pub const NAK: u8 = 0x15;
/// End-of-transmission-block control byte, separates name and data in upload block 1.
pub const ETB: u8 = 0x17;

/// Default motor controller address byte (`'0'`).
pub const DEFAULT_MOTOR_ADDRESS: u8 = 0x30;

/// Maximum framed payload length for program upload blocks.
pub const PROGRAM_BLOCK_SIZE: usize = 256;

/// Render each character of `text` as exactly two uppercase hex digits.
///
/// The output length is always `2 * text.chars().count()`. Characters whose
/// ordinal exceeds `0xFF` cannot be carried by the single-byte wire format
/// and are rejected.
pub fn encode_text_to_hex(text: &str) -> AppResult<String> {
    let mut out = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        let code = ch as u32;
        if code > 0xFF {
            return Err(ScanError::Encoding {
                command: text.to_string(),
                ch,
            });
        }
        out.push_str(&format!("{code:02X}"));
    }
    Ok(out)
}

/// Decode a string of 2-digit uppercase hex pairs back into bytes.
pub fn decode_hex(hex: &str) -> AppResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(ScanError::MalformedResponse(format!(
            "odd-length hex string: {hex:?}"
        )));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        let pair = &hex[i..i + 2];
        let byte = u8::from_str_radix(pair, 16).map_err(|_| {
            ScanError::MalformedResponse(format!("invalid hex pair {pair:?} in {hex:?}"))
        })?;
        out.push(byte);
    }
    Ok(out)
}

/// Build a motor controller frame: `STX ++ address ++ hex(text) ++ ETX`.
///
/// `address` is the controller address byte supplied by configuration
/// ([`DEFAULT_MOTOR_ADDRESS`] unless overridden).
pub fn frame_motor_command(text: &str, address: u8) -> AppResult<Vec<u8>> {
    let hex = encode_text_to_hex(text)?;
    let mut frame = Vec::with_capacity(hex.len() / 2 + 3);
    frame.push(STX);
    frame.push(address);
    frame.extend_from_slice(&decode_hex(&hex)?);
    frame.push(ETX);
    Ok(frame)
}

/// Build an acquisition card frame: `hex(text) ++ CR`.
pub fn frame_acq_command(text: &str) -> AppResult<Vec<u8>> {
    let hex = encode_text_to_hex(text)?;
    let mut frame = decode_hex(&hex)?;
    frame.push(CR);
    Ok(frame)
}

/// Replace control bytes in a decoded reply with bracketed tokens.
///
/// Purely presentational: non-control characters are untouched and the
/// substitution is idempotent (the tokens themselves contain no control
/// characters).
pub fn annotate_response(raw: &str) -> String {
    raw.replace('\x02', "<STX>")
        .replace('\x06', "<ACK>")
        .replace('\x03', "<ETX>")
        .replace('\x15', "<NAK>")
}

/// Extract the payload strictly between the first `<ACK>` token and the next
/// `<ETX>` token of an annotated response.
pub fn extract_ack_payload(annotated: &str) -> AppResult<&str> {
    let ack_end = annotated
        .find("<ACK>")
        .map(|pos| pos + "<ACK>".len())
        .ok_or_else(|| {
            ScanError::MalformedResponse(format!("no <ACK> token in {annotated:?}"))
        })?;
    let rest = &annotated[ack_end..];
    let etx = rest.find("<ETX>").ok_or_else(|| {
        ScanError::MalformedResponse(format!("no <ETX> after <ACK> in {annotated:?}"))
    })?;
    Ok(&rest[..etx])
}

/// An annotated device reply.
///
/// A response is ACK-bearing iff it contains the `<ACK>` token and
/// NAK-bearing iff it contains `<NAK>`; the device emits one or the other,
/// never both, so the two classifications are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    text: String,
}

impl Response {
    /// Wrap an already-annotated reply line.
    pub fn from_annotated(text: String) -> Self {
        Self { text }
    }

    /// Annotate a raw decoded reply line and wrap it.
    pub fn from_raw(raw: &str) -> Self {
        Self {
            text: annotate_response(raw),
        }
    }

    /// Synthesize a NAK-bearing response carrying a descriptive message.
    ///
    /// Used by the instrument clients to report transport-level faults
    /// in-band, so callers treat "port closed" uniformly with a
    /// protocol-level NAK.
    pub fn nak(message: impl fmt::Display) -> Self {
        Self {
            text: format!("<NAK>{message}<ETX>"),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.text.contains("<ACK>")
    }

    pub fn is_nak(&self) -> bool {
        self.text.contains("<NAK>")
    }

    /// Payload between `<ACK>` and `<ETX>`, if present and in order.
    pub fn ack_payload(&self) -> AppResult<&str> {
        extract_ack_payload(&self.text)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips_printable_ascii() {
        for code in 0x20u8..0x7F {
            let text = (code as char).to_string();
            let hex = encode_text_to_hex(&text).unwrap();
            assert_eq!(hex.len(), 2);
            assert_eq!(decode_hex(&hex).unwrap(), text.as_bytes());
        }
    }

    #[test]
    fn hex_encoding_of_command_doubles_length() {
        let hex = encode_text_to_hex("X-400").unwrap();
        assert_eq!(hex, "582D343030");
        assert_eq!(hex.len(), 2 * "X-400".len());
    }

    #[test]
    fn non_ascii_command_is_rejected() {
        let err = encode_text_to_hex("X→400").unwrap_err();
        match err {
            ScanError::Encoding { ch, .. } => assert_eq!(ch, '→'),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn motor_frame_layout() {
        let frame = frame_motor_command("A", DEFAULT_MOTOR_ADDRESS).unwrap();
        assert_eq!(frame.first(), Some(&STX));
        assert_eq!(frame.get(1), Some(&DEFAULT_MOTOR_ADDRESS));
        assert_eq!(frame.last(), Some(&ETX));
        assert_eq!(&frame[2..frame.len() - 1], b"A");
    }

    #[test]
    fn motor_frame_uses_configured_address() {
        let frame = frame_motor_command("X0+", 0x31).unwrap();
        assert_eq!(frame[1], 0x31);
    }

    #[test]
    fn acq_frame_ends_with_carriage_return() {
        let frame = frame_acq_command("SC,002,005").unwrap();
        assert_eq!(frame.last(), Some(&CR));
        assert_eq!(&frame[..frame.len() - 1], b"SC,002,005");
    }

    #[test]
    fn annotate_is_idempotent() {
        let raw = "\x02\x06O\x03 plus text \x15";
        let once = annotate_response(raw);
        assert_eq!(once, "<STX><ACK>O<ETX> plus text <NAK>");
        assert_eq!(annotate_response(&once), once);
    }

    #[test]
    fn annotate_leaves_plain_text_alone() {
        assert_eq!(annotate_response("00000000,00000000"), "00000000,00000000");
    }

    #[test]
    fn ack_payload_extraction() {
        let annotated = annotate_response("\x02\x06O\x03");
        assert_eq!(extract_ack_payload(&annotated).unwrap(), "O");
    }

    #[test]
    fn ack_payload_requires_both_delimiters() {
        assert!(extract_ack_payload("<ACK>O").is_err());
        assert!(extract_ack_payload("O<ETX>").is_err());
        // <ETX> before <ACK> is out of order
        assert!(extract_ack_payload("<ETX>O<ACK>").is_err());
    }

    #[test]
    fn synthesized_nak_is_nak_bearing() {
        let resp = Response::nak("Serial port not open");
        assert!(resp.is_nak());
        assert!(!resp.is_ack());
        assert!(resp.as_str().contains("Serial port not open"));
    }

    #[test]
    fn ack_and_nak_classification() {
        let ack = Response::from_raw("\x02\x06\x03");
        assert!(ack.is_ack());
        assert!(!ack.is_nak());

        let nak = Response::from_raw("\x02\x15\x03");
        assert!(nak.is_nak());
        assert!(!nak.is_ack());
    }
}
