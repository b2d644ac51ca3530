//! CSV record of per-material download outcomes (`id,downloaded`).

use std::collections::HashMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::HarvestError;
use crate::fs_util::write_bytes_atomic;
use crate::progress::ProgressSink;

const HEADER: [&str; 2] = ["id", "downloaded"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub downloaded: String,
}

impl LogRow {
    pub fn new(id: &str, downloaded: bool) -> Self {
        Self {
            id: id.to_string(),
            downloaded: if downloaded { "True" } else { "False" }.to_string(),
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(
            self.downloaded.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        )
    }
}

/// Rows in file order plus an index of the first row for each id.
#[derive(Debug, Default, Clone)]
pub struct DownloadLog {
    rows: Vec<LogRow>,
    index: HashMap<String, usize>,
}

impl DownloadLog {
    /// Loads the log at `path`. A missing log is empty. Rows that cannot be
    /// decoded are skipped, and an unreadable file yields an empty log; both
    /// are reported through `sink` so earlier rows are never dropped silently.
    pub fn load(path: &Utf8Path, sink: &dyn ProgressSink) -> Self {
        if !path.as_std_path().exists() {
            return Self::default();
        }
        match Self::read(path, sink) {
            Ok(log) => log,
            Err(err) => {
                warn!(path = %path, %err, "unable to read existing log");
                sink.line(&format!("[warn] Unable to read existing log {path}: {err}"));
                Self::default()
            }
        }
    }

    fn read(path: &Utf8Path, sink: &dyn ProgressSink) -> Result<Self, HarvestError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path.as_std_path())
            .map_err(|err| HarvestError::Log(err.to_string()))?;
        let mut rows = Vec::new();
        for row in reader.deserialize::<LogRow>() {
            match row {
                Ok(row) => rows.push(row),
                Err(err) if err.is_io_error() => return Err(HarvestError::Log(err.to_string())),
                Err(err) => {
                    let line = err.position().map_or(0, |pos| pos.line());
                    warn!(path = %path, line, %err, "skipping unreadable log row");
                    sink.line(&format!(
                        "[warn] Skipping unreadable row {line} in log {path}: {err}"
                    ));
                }
            }
        }
        Ok(Self::from_rows(rows))
    }

    pub fn from_rows(rows: Vec<LogRow>) -> Self {
        let mut index = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            let id = row.id.trim();
            if !id.is_empty() {
                index.entry(id.to_string()).or_insert(i);
            }
        }
        Self { rows, index }
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }

    pub fn is_downloaded(&self, id: &str) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| self.rows[i].is_downloaded())
    }

    /// Overwrites the row for `id` in place, or appends a new one.
    pub fn record(&mut self, id: &str, downloaded: bool) {
        let row = LogRow::new(id, downloaded);
        match self.index.get(id) {
            Some(&i) => self.rows[i] = row,
            None => {
                self.index.insert(id.to_string(), self.rows.len());
                self.rows.push(row);
            }
        }
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, HarvestError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer
            .write_record(HEADER)
            .map_err(|err| HarvestError::Log(err.to_string()))?;
        for row in &self.rows {
            writer
                .serialize(row)
                .map_err(|err| HarvestError::Log(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| HarvestError::Log(err.to_string()))
    }

    /// Rewrites the whole log atomically.
    pub fn save(&self, path: &Utf8Path) -> Result<(), HarvestError> {
        write_bytes_atomic(path, &self.to_csv()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for value in ["True", "true", " 1 ", "YES", "y"] {
            assert!(LogRow {
                id: "A".to_string(),
                downloaded: value.to_string()
            }
            .is_downloaded());
        }
        for value in ["False", "0", "", "no"] {
            assert!(!LogRow {
                id: "A".to_string(),
                downloaded: value.to_string()
            }
            .is_downloaded());
        }
    }

    #[test]
    fn first_occurrence_wins_and_record_overwrites_it() {
        let mut log = DownloadLog::from_rows(vec![
            LogRow::new("A", false),
            LogRow::new("B", true),
            LogRow::new("A", true),
        ]);
        assert!(!log.is_downloaded("A"));
        assert!(log.is_downloaded("B"));

        log.record("A", true);
        log.record("C", false);
        assert_eq!(log.rows()[0], LogRow::new("A", true));
        assert_eq!(log.rows()[3], LogRow::new("C", false));
        assert_eq!(log.rows().len(), 4);
    }

    #[test]
    fn csv_layout() {
        let mut log = DownloadLog::default();
        log.record("A", true);
        log.record("B", false);
        let text = String::from_utf8(log.to_csv().unwrap()).unwrap();
        assert_eq!(text, "id,downloaded\nA,True\nB,False\n");
    }

    #[derive(Default)]
    struct Lines(std::sync::Mutex<Vec<String>>);

    impl ProgressSink for Lines {
        fn line(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn undecodable_row_is_skipped_with_a_warning() {
        let temp = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(temp.path().join("log.csv")).unwrap();
        std::fs::write(&path, b"id,downloaded\nOLD1,True\nBAD\xff,True\nOLD2,True\n").unwrap();
        let sink = Lines::default();

        let log = DownloadLog::load(&path, &sink);

        assert!(log.is_downloaded("OLD1"));
        assert!(log.is_downloaded("OLD2"));
        assert_eq!(log.rows().len(), 2);
        let lines = sink.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[warn] Skipping unreadable row"));
    }

    #[test]
    fn empty_log_still_has_header() {
        let text = String::from_utf8(DownloadLog::default().to_csv().unwrap()).unwrap();
        assert_eq!(text, "id,downloaded\n");
    }
}
