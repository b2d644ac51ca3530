//! Reading and appending the plain-text material id list.
//!
//! One id per line; lines starting with `#` are comments and blank lines are
//! ignored on read.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::domain::MaterialId;
use crate::error::HarvestError;
use crate::fs_util::ensure_dir;

pub fn is_comment(line: &str) -> bool {
    line.starts_with('#')
}

/// Raw lines of the file, without line terminators.
pub fn read_lines(path: &Utf8Path) -> Result<Vec<String>, HarvestError> {
    let content = fs::read_to_string(path.as_std_path()).map_err(|err| HarvestError::IdListRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Ids in file order. Lines that do not form a valid id are skipped with a
/// warning. Fails when the file is unreadable or yields no ids.
pub fn read_material_ids(path: &Utf8Path) -> Result<Vec<MaterialId>, HarvestError> {
    let ids = parse_material_ids(&read_lines(path)?);
    if ids.is_empty() {
        return Err(HarvestError::EmptyIdList(path.to_path_buf()));
    }
    Ok(ids)
}

pub fn parse_material_ids<S: AsRef<str>>(lines: &[S]) -> Vec<MaterialId> {
    lines
        .iter()
        .map(|line| line.as_ref().trim())
        .filter(|line| !line.is_empty() && !is_comment(line))
        .filter_map(|line| match line.parse::<MaterialId>() {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(line, %err, "skipping malformed id line");
                None
            }
        })
        .collect()
}

/// Ids already present in the file; an absent file is an empty set.
pub fn load_known_ids(path: &Utf8Path) -> Result<HashSet<String>, HarvestError> {
    if !path.as_std_path().exists() {
        return Ok(HashSet::new());
    }
    Ok(read_lines(path)?
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Append-only writer that makes each batch durable before returning.
pub struct IdAppender {
    path: Utf8PathBuf,
    file: File,
    /// Existing content does not end in a line break.
    unterminated: bool,
}

impl IdAppender {
    pub fn open(path: &Utf8Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            ensure_dir(parent)?;
        }
        let fs_err = |err: std::io::Error| HarvestError::Filesystem(format!("{path}: {err}"));
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(fs_err)?;
        let unterminated = ends_without_newline(&mut file).map_err(fs_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            unterminated,
        })
    }

    pub fn append_batch(&mut self, ids: &[MaterialId]) -> Result<(), HarvestError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut buffer = String::new();
        if self.unterminated {
            buffer.push('\n');
        }
        for id in ids {
            buffer.push_str(id.as_str());
            buffer.push('\n');
        }
        self.file
            .write_all(buffer.as_bytes())
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_all())
            .map_err(|err| HarvestError::Filesystem(format!("{}: {err}", self.path)))?;
        self.unterminated = false;
        Ok(())
    }
}

fn ends_without_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
