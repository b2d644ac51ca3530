use std::io::{self, Write};

use serde::Serialize;

use crate::check::CheckResult;
use crate::dedup::DedupResult;
use crate::download::DownloadResult;
use crate::progress::ProgressSink;
use crate::scrape::ScrapeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

/// Summaries as pretty JSON on stdout; per-item status lines are dropped.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn line(&self, _message: &str) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_scrape(result: &ScrapeResult) {
        println!();
        println!(
            "Done: {} new ids this run, {} ids in {} ({} pages, stop: {:?})",
            result.new_ids, result.total_ids, result.output, result.pages_fetched, result.stop
        );
    }

    pub fn print_dedup(result: &DedupResult) {
        match &result.backup {
            None => println!("No duplicates found; file left unchanged."),
            Some(backup) => {
                println!("Backup written to {backup}");
                println!(
                    "Original lines: {}, unique lines: {}",
                    result.original_lines, result.unique_lines
                );
            }
        }
    }

    pub fn print_download(result: &DownloadResult) {
        if result.attempted == 0 {
            return;
        }
        println!(
            "Completed: {}/{} downloads succeeded ({} failed, {} already logged, {} listed).",
            result.succeeded,
            result.attempted,
            result.failed,
            result.skipped_by_log,
            result.listed
        );
    }

    pub fn print_check(result: &CheckResult) {
        println!("Total IDs listed: {}", result.expected);
        println!("CIF files found:  {}", result.found);
        println!();
        if result.missing.is_empty() {
            println!("No missing CIFs.");
        } else {
            println!("Missing CIFs (IDs with no file):");
            for id in &result.missing {
                println!("  - {id}");
            }
        }
        println!();
        if result.extra.is_empty() {
            println!("No extra CIF files.");
        } else {
            println!("Extra CIF files (not in ID list):");
            for id in &result.extra {
                println!("  - {id}");
            }
        }
        println!();
        println!("Missing IDs saved to {}", result.missing_file);
    }
}
