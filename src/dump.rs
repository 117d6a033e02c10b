//! Dump collection from the acquisition card.
//!
//! After the card reports ready and the dump trigger goes out, it streams
//! data records one line at a time. Two termination policies exist across
//! the protocol variants and both are supported here, selected per run and
//! never mixed within one collection:
//!
//! - **Count-terminated**: exactly N records of exactly K comma-separated
//!   fields each (128 x 16 on the observed hardware). A short record or an
//!   `ERR`-prefixed reply aborts the whole dump; nothing partial survives.
//! - **Sentinel-terminated**: records until a fixed sentinel value, which is
//!   itself excluded from the buffer.
//!
//! The collector only produces the validated buffer; the destination sink is
//! chosen by the active device profile, not here.

use crate::error::{AppResult, ScanError};
use crate::instrument::AcqClient;
use crate::link::LinkToken;
use log::{debug, warn};
use serde::Deserialize;

/// Consecutive timed-out reads tolerated before a sentinel-terminated
/// collection gives up on a dried-up stream.
const MAX_EMPTY_READS: u32 = 50;

/// How one collection run decides it is complete.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Collect exactly `records` records of exactly `fields` fields each.
    Count {
        #[serde(default = "default_count_records")]
        records: usize,
        #[serde(default = "default_count_fields")]
        fields: usize,
    },
    /// Collect until a record equals `value`; the sentinel is not kept.
    Sentinel {
        #[serde(default = "default_sentinel_value")]
        value: String,
    },
}

fn default_count_records() -> usize {
    128
}

fn default_count_fields() -> usize {
    16
}

fn default_sentinel_value() -> String {
    "00000000,00000000".to_string()
}

impl TerminationPolicy {
    /// The count policy observed on the hardware: 128 records x 16 words.
    pub fn count_default() -> Self {
        Self::Count {
            records: default_count_records(),
            fields: default_count_fields(),
        }
    }

    /// The sentinel policy observed on the hardware.
    pub fn sentinel_default() -> Self {
        Self::Sentinel {
            value: default_sentinel_value(),
        }
    }
}

/// One validated dump record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    raw: String,
    fields: Vec<String>,
}

impl DumpRecord {
    /// Keep the line whole, as a single field (sentinel-terminated variant).
    pub fn from_raw(line: String) -> Self {
        Self {
            fields: vec![line.clone()],
            raw: line,
        }
    }

    /// Parse a fixed-arity record (count-terminated variant).
    fn parse(line: String, index: usize, expected_fields: usize) -> AppResult<Self> {
        if line.trim().starts_with("ERR") {
            return Err(ScanError::MalformedRecord {
                index,
                line: line.trim().to_string(),
            });
        }
        let fields: Vec<String> = line.split(',').map(|f| f.trim().to_string()).collect();
        if fields.len() != expected_fields {
            return Err(ScanError::MalformedRecord { index, line });
        }
        Ok(Self { raw: line, fields })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Drains one dump from the acquisition client under the caller's link token.
pub struct DumpCollector<'a> {
    client: &'a AcqClient,
    policy: TerminationPolicy,
}

impl<'a> DumpCollector<'a> {
    pub fn new(client: &'a AcqClient, policy: TerminationPolicy) -> Self {
        Self { client, policy }
    }

    /// Read records until the policy terminates the run.
    ///
    /// On any malformed record the collection aborts with the record index
    /// and raw content; no partial buffer is handed out. In count mode the
    /// read after the final record is never issued.
    pub async fn collect(&self, token: &LinkToken) -> AppResult<Vec<DumpRecord>> {
        match &self.policy {
            TerminationPolicy::Count { records, fields } => {
                self.collect_counted(token, *records, *fields).await
            }
            TerminationPolicy::Sentinel { value } => self.collect_to_sentinel(token, value).await,
        }
    }

    async fn collect_counted(
        &self,
        token: &LinkToken,
        records: usize,
        fields: usize,
    ) -> AppResult<Vec<DumpRecord>> {
        let mut buffer = Vec::with_capacity(records);
        for index in 0..records {
            let line = self.client.read_line(token).await;
            debug!("Dump record {}/{}: {:?}", index + 1, records, line);
            buffer.push(DumpRecord::parse(line, index, fields)?);
        }
        Ok(buffer)
    }

    async fn collect_to_sentinel(
        &self,
        token: &LinkToken,
        sentinel: &str,
    ) -> AppResult<Vec<DumpRecord>> {
        let mut buffer = Vec::new();
        let mut empty_reads: u32 = 0;
        loop {
            let line = self.client.read_line(token).await;
            if line == sentinel {
                debug!("Dump sentinel after {} records", buffer.len());
                return Ok(buffer);
            }
            if line.is_empty() {
                // Timed-out read; tolerate a gap but not a dead stream.
                empty_reads += 1;
                if empty_reads > MAX_EMPTY_READS {
                    warn!("Dump stream dried up after {} records", buffer.len());
                    return Err(ScanError::PollTimeout {
                        context: "dump data stream".to_string(),
                        attempts: empty_reads,
                    });
                }
                continue;
            }
            empty_reads = 0;
            buffer.push(DumpRecord::from_raw(line));
        }
    }
}
