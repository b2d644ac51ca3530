use std::collections::HashSet;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::config::DedupConfig;
use crate::error::HarvestError;
use crate::fs_util::{write_bytes_atomic, write_bytes_durable};
use crate::ids::{is_comment, read_lines};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DedupResult {
    pub ids_file: Utf8PathBuf,
    pub original_lines: usize,
    pub unique_lines: usize,
    /// `None` when the file already had no duplicates and was left alone.
    pub backup: Option<Utf8PathBuf>,
}

impl DedupResult {
    pub fn changed(&self) -> bool {
        self.backup.is_some()
    }
}

/// Keeps the first occurrence of each id line, comments in place, and drops
/// blank lines.
pub fn dedup_lines<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(lines.len());
    for line in lines {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }
        if is_comment(line) {
            kept.push(line.to_string());
            continue;
        }
        if seen.insert(line) {
            kept.push(line.to_string());
        }
    }
    kept
}

fn joined(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

pub fn run_dedup(config: &DedupConfig) -> Result<DedupResult, HarvestError> {
    let original = read_lines(&config.ids)?;
    let deduped = dedup_lines(&original);

    if deduped == original {
        info!(path = %config.ids, "no duplicates found");
        return Ok(DedupResult {
            ids_file: config.ids.clone(),
            original_lines: original.len(),
            unique_lines: deduped.len(),
            backup: None,
        });
    }

    // Backup must be on disk before the original is touched.
    write_bytes_durable(&config.backup, joined(&original).as_bytes())?;
    write_bytes_atomic(&config.ids, joined(&deduped).as_bytes())?;
    info!(
        path = %config.ids,
        backup = %config.backup,
        original = original.len(),
        unique = deduped.len(),
        "deduplicated id list"
    );

    Ok(DedupResult {
        ids_file: config.ids.clone(),
        original_lines: original.len(),
        unique_lines: deduped.len(),
        backup: Some(config.backup.clone()),
    })
}
