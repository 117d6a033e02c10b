//! Persistence sinks for collected dump buffers.
//!
//! The engine hands each validated buffer to a [`PersistenceSink`] under the
//! destination name carried by the active device profile. The byte layout is
//! deliberately simple: one field per output line, so a multi-field record is
//! flattened into consecutive lines — column structure beyond that is an
//! external concern.

use crate::dump::DumpRecord;
use crate::error::AppResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Write an ordered buffer of records under `destination`.
    async fn write_records(&self, destination: &str, records: &[DumpRecord]) -> AppResult<()>;
}

/// CSV sink: one file per destination under a configured output directory.
#[cfg(feature = "storage_csv")]
pub struct CsvSink {
    output_dir: std::path::PathBuf,
}

#[cfg(feature = "storage_csv")]
impl CsvSink {
    pub fn new(output_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[cfg(feature = "storage_csv")]
#[async_trait]
impl PersistenceSink for CsvSink {
    async fn write_records(&self, destination: &str, records: &[DumpRecord]) -> AppResult<()> {
        use crate::error::ScanError;

        if !self.output_dir.exists() {
            std::fs::create_dir_all(&self.output_dir)
                .map_err(|e| ScanError::Persistence(format!("create output dir: {e}")))?;
        }
        let path = self.output_dir.join(destination);
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| ScanError::Persistence(format!("create {}: {e}", path.display())))?;

        for record in records {
            for field in record.fields() {
                writer
                    .write_record([field])
                    .map_err(|e| ScanError::Persistence(format!("write {}: {e}", path.display())))?;
            }
        }
        writer
            .flush()
            .map_err(|e| ScanError::Persistence(format!("flush {}: {e}", path.display())))?;

        log::info!(
            "Persisted {} records to '{}'",
            records.len(),
            path.display()
        );
        Ok(())
    }
}

/// In-memory sink used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemorySink {
    buffers: Arc<Mutex<HashMap<String, Vec<DumpRecord>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written under `destination`, if any.
    pub fn records(&self, destination: &str) -> Option<Vec<DumpRecord>> {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
            .cloned()
    }

    /// Total number of destinations written so far.
    pub fn destination_count(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn write_records(&self, destination: &str, records: &[DumpRecord]) -> AppResult<()> {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(destination.to_string(), records.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_keeps_buffers_per_destination() {
        let sink = MemorySink::new();
        let records = vec![DumpRecord::from_raw("1,2".to_string())];
        sink.write_records("x.csv", &records).await.unwrap();

        assert_eq!(sink.records("x.csv").unwrap().len(), 1);
        assert!(sink.records("y.csv").is_none());
        assert_eq!(sink.destination_count(), 1);
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn csv_sink_flattens_fields_one_per_line() {
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path());
        let records = vec![
            DumpRecord::from_raw("A".to_string()),
            DumpRecord::from_raw("B".to_string()),
        ];
        sink.write_records("out.csv", &records).await.unwrap();

        let mut contents = String::new();
        std::fs::File::open(dir.path().join("out.csv"))
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["A", "B"]);
    }
}
