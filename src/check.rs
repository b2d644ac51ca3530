use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::CheckConfig;
use crate::domain::material_stem;
use crate::error::HarvestError;
use crate::fs_util::write_bytes_atomic;
use crate::ids::{is_comment, read_lines};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    pub expected: usize,
    pub found: usize,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub missing_file: Utf8PathBuf,
}

pub fn expected_ids(path: &Utf8Path) -> Result<BTreeSet<String>, HarvestError> {
    Ok(read_lines(path)?
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !is_comment(line))
        .collect())
}

/// Material stems of the `.cif` files in `dir`. A missing directory is empty.
pub fn present_ids(dir: &Utf8Path) -> Result<BTreeSet<String>, HarvestError> {
    if !dir.as_std_path().exists() {
        debug!(dir = %dir, "cif directory does not exist");
        return Ok(BTreeSet::new());
    }
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| HarvestError::Filesystem(format!("{dir}: {err}")))?;
    let mut stems = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|err| HarvestError::Filesystem(format!("{dir}: {err}")))?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(stem) = material_stem(entry.file_name()) {
            stems.insert(stem.to_string());
        }
    }
    Ok(stems)
}

/// `(missing, extra)`, both sorted.
pub fn diff(expected: &BTreeSet<String>, actual: &BTreeSet<String>) -> (Vec<String>, Vec<String>) {
    let missing = expected.difference(actual).cloned().collect();
    let extra = actual.difference(expected).cloned().collect();
    (missing, extra)
}

pub fn run_check(config: &CheckConfig) -> Result<CheckResult, HarvestError> {
    let expected = expected_ids(&config.ids)?;
    let actual = present_ids(&config.cif_dir)?;
    let (missing, extra) = diff(&expected, &actual);

    write_bytes_atomic(&config.missing, missing.join("\n").as_bytes())?;
    info!(
        expected = expected.len(),
        found = actual.len(),
        missing = missing.len(),
        extra = extra.len(),
        path = %config.missing,
        "wrote missing ids"
    );

    Ok(CheckResult {
        expected: expected.len(),
        found: actual.len(),
        missing,
        extra,
        missing_file: config.missing.clone(),
    })
}
