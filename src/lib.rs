//! Batch tools for harvesting QPOD material ids and their CIF structure files.
//!
//! Each tool is independent and communicates with the others only through
//! files: `scrape` builds the id list, `dedup` cleans it, `check` derives the
//! missing-id list from the CIF directory, and `download` fetches CIFs for a
//! list of ids.

pub mod check;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod download;
pub mod download_log;
pub mod error;
pub mod fs_util;
pub mod ids;
pub mod output;
pub mod progress;
pub mod qpod;
pub mod scrape;
