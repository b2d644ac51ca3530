//! Bounded-parallel CIF downloader with a resumable CSV log.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::domain::{MaterialId, casefix_file_name, cif_file_name};
use crate::download_log::DownloadLog;
use crate::error::HarvestError;
use crate::fs_util::{ensure_dir, sibling_temp};
use crate::ids::read_material_ids;
use crate::progress::ProgressSink;

/// Why a single material could not be downloaded. Never aborts the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("HTTP {status} {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("network error {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unable to write file ({0})")]
    Write(String),
}

/// One GET per material. Shared by every worker in the pool.
pub trait CifFetcher: Send + Sync {
    fn fetch(&self, id: &MaterialId) -> Result<Vec<u8>, FetchFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved(Utf8PathBuf),
    /// A file for this id was already on disk; no request was made.
    Skipped(Utf8PathBuf),
    Failed(FetchFailure),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, DownloadOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub enum Claim<'a> {
    Existing(Utf8PathBuf),
    Reserved(Reservation<'a>),
}

/// Output directory shared by the workers. Name resolution and the final
/// rename happen under one lock, together with the set of names that
/// in-flight workers have claimed but not yet written.
#[derive(Debug)]
pub struct OutputDir {
    root: Utf8PathBuf,
    reserved: Mutex<HashSet<String>>,
}

impl OutputDir {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.reserved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Picks the file name for `id`:
    /// an exact-case `{id}.cif` on disk means the material is already here;
    /// any other case-insensitive match (on disk or claimed) forces the
    /// `__casefix-` name; otherwise the plain name is claimed.
    pub fn claim(&self, id: &MaterialId) -> Result<Claim<'_>, FetchFailure> {
        let mut reserved = self.lock();
        ensure_dir(&self.root).map_err(write_failure)?;

        let target = cif_file_name(id);
        let target_lower = target.to_lowercase();
        let entries = self
            .root
            .read_dir_utf8()
            .map_err(write_failure)?;

        let mut collision = false;
        for entry in entries.flatten() {
            if !entry.path().is_file() || entry.file_name().to_lowercase() != target_lower {
                continue;
            }
            if entry.file_name() == target {
                return Ok(Claim::Existing(entry.path().to_path_buf()));
            }
            collision = true;
        }
        collision |= reserved
            .iter()
            .any(|name| name.to_lowercase() == target_lower);

        let name = if collision {
            casefix_file_name(id)
        } else {
            target
        };
        let path = self.root.join(&name);
        if collision && path.as_std_path().is_file() {
            return Ok(Claim::Existing(path));
        }
        if collision {
            debug!(id = %id, name = %name, "case collision, using disambiguated name");
        }

        reserved.insert(name.clone());
        Ok(Claim::Reserved(Reservation {
            dir: self,
            name,
            path,
        }))
    }
}

fn write_failure(err: impl std::fmt::Display) -> FetchFailure {
    FetchFailure::Write(err.to_string())
}

/// A claimed file name. Released on drop whether or not it was written.
#[derive(Debug)]
pub struct Reservation<'a> {
    dir: &'a OutputDir,
    name: String,
    path: Utf8PathBuf,
}

impl Reservation<'_> {
    /// Writes `content` to a temp file, then renames it into place under the
    /// directory lock.
    pub fn commit(self, content: &[u8]) -> Result<Utf8PathBuf, FetchFailure> {
        let mut temp = sibling_temp(&self.path).map_err(write_failure)?;
        temp.write_all(content).map_err(write_failure)?;
        temp.as_file().sync_all().map_err(write_failure)?;

        let _guard = self.dir.lock();
        temp.persist(self.path.as_std_path())
            .map_err(|err| write_failure(err.error))?;
        Ok(self.path.clone())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.dir.lock().remove(&self.name);
    }
}

pub fn download_one<F: CifFetcher + ?Sized>(
    id: &MaterialId,
    fetcher: &F,
    dir: &OutputDir,
    sink: &dyn ProgressSink,
) -> DownloadOutcome {
    let outcome = match dir.claim(id) {
        Ok(Claim::Existing(path)) => DownloadOutcome::Skipped(path),
        Ok(Claim::Reserved(reservation)) => match fetcher
            .fetch(id)
            .and_then(|content| reservation.commit(&content))
        {
            Ok(path) => DownloadOutcome::Saved(path),
            Err(failure) => DownloadOutcome::Failed(failure),
        },
        Err(failure) => DownloadOutcome::Failed(failure),
    };

    match &outcome {
        DownloadOutcome::Saved(path) => sink.line(&format!("[ok] {id}: saved to {path}")),
        DownloadOutcome::Skipped(path) => {
            sink.line(&format!("[skip] {id}: already exists at {path}"))
        }
        DownloadOutcome::Failed(failure) => sink.line(&format!("[fail] {id}: {failure}")),
    }
    outcome
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DownloadResult {
    pub listed: usize,
    pub skipped_by_log: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub output_dir: Utf8PathBuf,
    pub log: Utf8PathBuf,
}

impl DownloadResult {
    /// A run fails only when it tried something and nothing worked.
    pub fn is_success(&self) -> bool {
        self.attempted == 0 || self.succeeded > 0
    }
}

fn pacing_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(500..=1000))
}

pub fn run_download<F: CifFetcher>(
    config: &DownloadConfig,
    fetcher: &F,
    sink: &dyn ProgressSink,
) -> Result<DownloadResult, HarvestError> {
    let listed = read_material_ids(&config.ids)?;
    let mut seen = HashSet::new();
    let unique: Vec<MaterialId> = listed
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    let log = DownloadLog::load(&config.log, sink);
    let pending: Vec<MaterialId> = unique
        .iter()
        .filter(|id| !log.is_downloaded(id.as_str()))
        .cloned()
        .collect();
    let skipped_by_log = unique.len() - pending.len();

    let mut result = DownloadResult {
        listed: listed.len(),
        skipped_by_log,
        attempted: pending.len(),
        succeeded: 0,
        failed: 0,
        output_dir: config.output_dir.clone(),
        log: config.log.clone(),
    };
    if pending.is_empty() {
        sink.line("All listed materials are already downloaded according to the log.");
        return Ok(result);
    }
    info!(
        pending = pending.len(),
        skipped = skipped_by_log,
        workers = config.workers,
        "starting downloads"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .thread_name(|i| format!("cif-worker-{i}"))
        .build()
        .map_err(|err| HarvestError::WorkerPool(err.to_string()))?;

    sink.start(pending.len() as u64);
    let dir = OutputDir::new(config.output_dir.clone());
    let log = Mutex::new(log);
    let succeeded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    pool.install(|| {
        pending.par_iter().for_each(|id| {
            let outcome = download_one(id, fetcher, &dir, sink);
            let ok = outcome.is_success();
            if ok {
                succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                failed.fetch_add(1, Ordering::Relaxed);
            }

            {
                let mut log = log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                log.record(id.as_str(), ok);
                if let Err(err) = log.save(&config.log) {
                    warn!(path = %config.log, %err, "unable to write log file");
                    sink.line(&format!("[warn] Unable to write log file {}: {err}", config.log));
                }
            }

            sink.advance();
            if sink.needs_pacing() {
                thread::sleep(pacing_delay());
            }
        });
    });
    sink.finish();

    let log = log.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Err(err) = log.save(&config.log) {
        warn!(path = %config.log, %err, "unable to write log file");
    }

    result.succeeded = succeeded.into_inner();
    result.failed = failed.into_inner();
    info!(
        succeeded = result.succeeded,
        failed = result.failed,
        "downloads finished"
    );
    Ok(result)
}
