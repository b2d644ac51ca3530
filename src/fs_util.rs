use std::fs::{self, File};
use std::io::Write;

use camino::Utf8Path;
use tempfile::NamedTempFile;

use crate::error::HarvestError;

fn fs_err(path: &Utf8Path, err: impl std::fmt::Display) -> HarvestError {
    HarvestError::Filesystem(format!("{path}: {err}"))
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), HarvestError> {
    fs::create_dir_all(path.as_std_path()).map_err(|err| fs_err(path, err))
}

fn ensure_parent(path: &Utf8Path) -> Result<&Utf8Path, HarvestError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    ensure_dir(parent)?;
    Ok(parent)
}

/// Temp file in the same directory as `path`, so a later persist is a rename.
pub fn sibling_temp(path: &Utf8Path) -> Result<NamedTempFile, HarvestError> {
    let parent = ensure_parent(path)?;
    tempfile::Builder::new()
        .prefix(".qpod-harvest-")
        .suffix(".part")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| fs_err(path, err))
}

/// Replaces `path` with `content` via temp file + rename; readers never see a
/// half-written file.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
    let mut temp = sibling_temp(path)?;
    temp.write_all(content).map_err(|err| fs_err(path, err))?;
    temp.as_file().sync_all().map_err(|err| fs_err(path, err))?;
    temp.persist(path.as_std_path())
        .map_err(|err| fs_err(path, err.error))?;
    Ok(())
}

/// Writes `content` and fsyncs before returning.
pub fn write_bytes_durable(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
    ensure_parent(path)?;
    let mut file = File::create(path.as_std_path()).map_err(|err| fs_err(path, err))?;
    file.write_all(content).map_err(|err| fs_err(path, err))?;
    file.sync_all().map_err(|err| fs_err(path, err))
}
