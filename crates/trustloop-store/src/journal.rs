//! JSON Lines journal for audit records.
//!
//! One file per record kind per UTC day, opened in append mode. Each line
//! is a complete JSON object, so an interrupted write only loses that line.

use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::StoreResult;

/// Writer state for the current day's file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Buffered, date-rotated JSON Lines writer.
pub struct JsonLinesWriter<T: Serialize> {
    base_dir: PathBuf,
    /// File name prefix, e.g. `outcomes` for `outcomes_2024-05-01.jsonl`.
    prefix: String,
    buffer: Vec<T>,
    max_buffer_size: usize,
    active_writer: Option<ActiveWriter>,
}

impl<T: Serialize> JsonLinesWriter<T> {
    pub fn new(base_dir: impl AsRef<Path>, prefix: &str, max_buffer_size: usize) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create journal directory");
        }

        Self {
            base_dir,
            prefix: prefix.to_string(),
            buffer: Vec::with_capacity(max_buffer_size),
            max_buffer_size: max_buffer_size.max(1),
            active_writer: None,
        }
    }

    /// Buffer a record, flushing when the buffer is full.
    pub fn append(&mut self, record: T) -> StoreResult<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush journal on close");
            }
            info!(
                prefix = %self.prefix,
                date = %active.date,
                records = active.records_written,
                "Closed journal file"
            );
        }
    }

    fn open_writer(&self, date: &str) -> StoreResult<ActiveWriter> {
        let path = self
            .base_dir
            .join(format!("{}_{}.jsonl", self.prefix, date));
        info!(path = %path.display(), "Opening journal file (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        })
    }

    /// Write buffered records to today's file.
    pub fn flush(&mut self) -> StoreResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        if self
            .active_writer
            .as_ref()
            .is_some_and(|w| w.date != today)
        {
            self.close_active_writer();
        }

        let mut active = match self.active_writer.take() {
            Some(active) => active,
            None => self.open_writer(&today)?,
        };

        let record_count = self.buffer.len();
        let written = Self::write_records(&mut active, &self.buffer);
        if written.is_ok() {
            active.records_written += record_count;
        }
        self.active_writer = Some(active);
        written?;

        debug!(
            prefix = %self.prefix,
            date = %today,
            records = record_count,
            "Flushed journal records"
        );
        self.buffer.clear();
        Ok(())
    }

    fn write_records(active: &mut ActiveWriter, records: &[T]) -> StoreResult<()> {
        for record in records {
            let json = serde_json::to_string(record)?;
            writeln!(active.writer, "{json}")?;
        }
        active.writer.flush()?;
        Ok(())
    }

    /// Flush pending records and close the file.
    pub fn close(&mut self) -> StoreResult<()> {
        self.flush()?;
        self.close_active_writer();
        Ok(())
    }
}

impl<T: Serialize> Drop for JsonLinesWriter<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush journal on drop");
        }
        self.close_active_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        id: u64,
        reason: String,
    }

    fn row(id: u64) -> Row {
        Row {
            id,
            reason: "take_profit".to_string(),
        }
    }

    fn read_lines(dir: &TempDir) -> Vec<String> {
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0]
            .file_name()
            .to_string_lossy()
            .starts_with("outcomes_"));
        let file = File::open(entries[0].path()).unwrap();
        BufReader::new(file).lines().map_while(Result::ok).collect()
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "outcomes", 100);
        for i in 0..5 {
            writer.append(row(i)).unwrap();
        }
        writer.close().unwrap();

        let lines = read_lines(&dir);
        assert_eq!(lines.len(), 5);
        let first: Row = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first, row(0));
    }

    #[test]
    fn test_buffer_flushes_when_full() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "outcomes", 2);
        writer.append(row(1)).unwrap();
        assert_eq!(writer.pending(), 1);
        writer.append(row(2)).unwrap();
        assert_eq!(writer.pending(), 0);
        writer.close().unwrap();
        assert_eq!(read_lines(&dir).len(), 2);
    }

    #[test]
    fn test_append_mode_across_writers() {
        let dir = TempDir::new().unwrap();
        for batch in 0..2 {
            let mut writer = JsonLinesWriter::new(dir.path(), "outcomes", 100);
            for i in 0..3 {
                writer.append(row(batch * 3 + i)).unwrap();
            }
            writer.close().unwrap();
        }
        assert_eq!(read_lines(&dir).len(), 6);
    }

    #[test]
    fn test_empty_flush_creates_no_file() {
        let dir = TempDir::new().unwrap();
        let mut writer: JsonLinesWriter<Row> = JsonLinesWriter::new(dir.path(), "outcomes", 10);
        writer.flush().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
