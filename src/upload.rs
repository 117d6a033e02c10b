//! Program upload to the motor controller.
//!
//! Uploads a stored-program `.txt` file over the motor link:
//!
//! 1. Header frame `"QP" + name + " S" + byte_count`, acknowledged with an
//!    ACK payload of `"O"` (new program, RAM available) or `"E"` (program
//!    exists, will be overwritten).
//! 2. The program text in 256-character blocks. Block 1 carries
//!    `name + ETB + data`; every block except an unpadded short block 1 is
//!    right-padded with EOT to exactly 256 characters. Each block must come
//!    back as a bare `"<STX><ACK><ETX>"`.
//!
//! Source files may carry leading line numbers (editor listings); these are
//! stripped before the byte count is taken.

use crate::error::{AppResult, ScanError};
use crate::instrument::MotorClient;
use crate::link::LinkToken;
use crate::protocol::{EOT, ETB, PROGRAM_BLOCK_SIZE};
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Progress notifications emitted during an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadProgress {
    FileRead { bytes: usize },
    HeaderAccepted { code: char },
    BlockSent { number: usize, total: usize },
    Completed,
}

pub struct ProgramUploader {
    motor: Arc<MotorClient>,
    /// Program name as stored on the controller, at most 8 characters.
    program_name: String,
}

impl ProgramUploader {
    pub fn new(motor: Arc<MotorClient>, program_name: &str) -> Self {
        let mut name = program_name.trim().to_string();
        name.truncate(8);
        Self {
            motor,
            program_name: name,
        }
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Upload the program at `path`, reporting progress over `progress`.
    ///
    /// Holds the motor-link lock from the header frame through the last
    /// block. Progress delivery is best-effort; a dropped receiver does not
    /// abort the upload.
    pub async fn upload_file(
        &self,
        token: &LinkToken,
        path: impl AsRef<Path>,
        progress: &mpsc::UnboundedSender<UploadProgress>,
    ) -> AppResult<()> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let text = strip_line_numbers(&raw);
        self.upload_text(token, &text, progress).await
    }

    /// Upload already-prepared program text (line numbers removed).
    pub async fn upload_text(
        &self,
        token: &LinkToken,
        text: &str,
        progress: &mpsc::UnboundedSender<UploadProgress>,
    ) -> AppResult<()> {
        if !text.is_ascii() {
            return Err(ScanError::Upload(
                "program text must be ASCII".to_string(),
            ));
        }
        let total_chars = text.len();
        let _ = progress.send(UploadProgress::FileRead { bytes: total_chars });
        info!(
            "Uploading program '{}' ({} bytes)",
            self.program_name, total_chars
        );

        let _guard = self.motor.link().acquire(token).await;

        let header = format!("QP{} S{}", self.program_name, total_chars);
        let response = self.motor.send_command(token, &header).await?;
        let code = match response.ack_payload() {
            Ok("O") => 'O',
            Ok("E") => 'E',
            _ => {
                return Err(ScanError::Upload(format!(
                    "unexpected header response: {response}"
                )))
            }
        };
        debug!("Header accepted with code {code}");
        let _ = progress.send(UploadProgress::HeaderAccepted { code });

        let blocks = build_blocks(&self.program_name, text);
        let total = blocks.len();
        for (number, block) in blocks.iter().enumerate() {
            let response = self.motor.send_command(token, block).await?;
            if response.as_str() != "<STX><ACK><ETX>" {
                return Err(ScanError::Upload(format!(
                    "invalid response for block {}: {response}",
                    number + 1
                )));
            }
            let _ = progress.send(UploadProgress::BlockSent {
                number: number + 1,
                total,
            });
        }

        info!("Program '{}' uploaded ({total} blocks)", self.program_name);
        let _ = progress.send(UploadProgress::Completed);
        Ok(())
    }
}

/// Strip a leading line number (digits plus following whitespace) from each
/// line of an editor listing.
pub fn strip_line_numbers(text: &str) -> String {
    text.lines()
        .map(|line| {
            let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
            if rest.len() == line.len() {
                line
            } else {
                rest.trim_start()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split program text into transmission blocks.
///
/// Block 1 is `name + ETB + data`; a block 1 that holds the whole program
/// is sent short, unpadded. Every other block is EOT-padded to
/// `PROGRAM_BLOCK_SIZE` characters.
fn build_blocks(name: &str, text: &str) -> Vec<String> {
    let etb = ETB as char;
    let eot = EOT as char;
    let first_chunk_size = PROGRAM_BLOCK_SIZE - (name.len() + 1);

    if text.len() <= first_chunk_size {
        return vec![format!("{name}{etb}{text}")];
    }

    let mut blocks = Vec::new();
    let mut block1 = format!("{name}{etb}{}", &text[..first_chunk_size]);
    pad_to_block(&mut block1, eot);
    blocks.push(block1);

    let remaining = text[first_chunk_size..].as_bytes();
    for chunk in remaining.chunks(PROGRAM_BLOCK_SIZE) {
        // ASCII guaranteed by the caller, so the byte chunk is valid UTF-8.
        let mut block = String::from_utf8_lossy(chunk).into_owned();
        pad_to_block(&mut block, eot);
        blocks.push(block);
    }
    blocks
}

fn pad_to_block(block: &mut String, eot: char) {
    while block.len() < PROGRAM_BLOCK_SIZE {
        block.push(eot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;
    use crate::transport::MockTransport;

    fn make_uploader(transport: &MockTransport, name: &str) -> ProgramUploader {
        ProgramUploader::new(
            Arc::new(MotorClient::new(
                Arc::new(transport.clone()),
                Link::new("motor"),
            )),
            name,
        )
    }

    #[test]
    fn line_numbers_are_stripped() {
        let listing = "10 G01 X5\n20 G01 Y5\nM30\n30   END";
        assert_eq!(strip_line_numbers(listing), "G01 X5\nG01 Y5\nM30\nEND");
    }

    #[test]
    fn program_name_is_trimmed_and_truncated() {
        let transport = MockTransport::opened();
        let uploader = make_uploader(&transport, "  LONGPROGRAMNAME  ");
        assert_eq!(uploader.program_name(), "LONGPROG");
    }

    #[test]
    fn short_program_fits_one_unpadded_block() {
        let blocks = build_blocks("PROG", "G01 X5");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], format!("PROG{}G01 X5", ETB as char));
    }

    #[test]
    fn long_program_splits_into_padded_blocks() {
        let name = "PROG";
        let text = "A".repeat(300);
        let blocks = build_blocks(name, &text);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].len(), PROGRAM_BLOCK_SIZE);
        assert_eq!(blocks[1].len(), PROGRAM_BLOCK_SIZE);

        // Block 1 holds the name, ETB, then 251 characters of data.
        assert!(blocks[0].starts_with(&format!("{name}{}", ETB as char)));
        assert_eq!(&blocks[0][5..], "A".repeat(251));
        // Block 2 holds the remaining 49 characters, EOT-padded.
        assert!(blocks[1].starts_with(&"A".repeat(49)));
        assert!(blocks[1].ends_with(EOT as char));
    }

    #[tokio::test]
    async fn upload_sends_header_then_blocks() {
        let transport = MockTransport::opened();
        // Header accepted as a new program, then one block ack.
        transport.push_responses(["<STX><ACK>O<ETX>", "<STX><ACK><ETX>"]);

        let uploader = make_uploader(&transport, "PROG");
        let token = LinkToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        uploader
            .upload_text(&token, "G01 X5", &tx)
            .await
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            UploadProgress::FileRead { bytes: 6 }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            UploadProgress::HeaderAccepted { code: 'O' }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            UploadProgress::BlockSent {
                number: 1,
                total: 1
            }
        );
        assert_eq!(rx.try_recv().unwrap(), UploadProgress::Completed);

        // Header went out first, carrying the byte count.
        let writes = transport.writes();
        assert!(writes[0].windows(8).any(|w| w == b"QPPROG S"));
    }

    #[tokio::test]
    async fn bad_block_ack_aborts_upload() {
        let transport = MockTransport::opened();
        transport.push_responses(["<STX><ACK>E<ETX>", "garbage"]);

        let uploader = make_uploader(&transport, "PROG");
        let token = LinkToken::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        match uploader.upload_text(&token, "G01 X5", &tx).await {
            Err(ScanError::Upload(msg)) => assert!(msg.contains("block 1")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_header_aborts_before_blocks() {
        let transport = MockTransport::opened();
        transport.push_response("<NAK>refused<ETX>");

        let uploader = make_uploader(&transport, "PROG");
        let token = LinkToken::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(uploader.upload_text(&token, "G01 X5", &tx).await.is_err());
        // Only the header frame ever went out.
        assert_eq!(transport.writes().len(), 1);
    }
}
