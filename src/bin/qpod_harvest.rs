use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use qpod_harvest::check::run_check;
use qpod_harvest::config::{ConfigLoader, DownloadOverrides, FileConfig, HttpSettings, ScrapeOverrides};
use qpod_harvest::dedup::run_dedup;
use qpod_harvest::download::run_download;
use qpod_harvest::error::HarvestError;
use qpod_harvest::output::{JsonOutput, OutputMode, TextOutput};
use qpod_harvest::progress::{BarSink, ConsoleSink, ProgressSink};
use qpod_harvest::qpod::QpodHttpClient;
use qpod_harvest::scrape::run_scrape;

#[derive(Parser)]
#[command(name = "qpod-harvest")]
#[command(about = "Scrape QPOD material ids and download their CIF files")]
#[command(version)]
struct Cli {
    /// JSON config file (default: ./qpod-harvest.json when present)
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Print the run summary as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Walk the material table and append new ids to the id list")]
    Scrape(ScrapeArgs),
    #[command(about = "Remove duplicate ids from the id list, keeping a backup")]
    Dedup(DedupArgs),
    #[command(about = "Download a CIF file for every listed id")]
    Download(DownloadArgs),
    #[command(about = "Compare the id list with the CIF directory")]
    Check(CheckArgs),
}

#[derive(Args)]
struct ScrapeArgs {
    /// Table section id
    #[arg(long)]
    sid: Option<u32>,

    /// Id list to append to (default: qpod_sid<SID>_material_ids.txt)
    #[arg(long)]
    output: Option<Utf8PathBuf>,

    /// Seconds to wait between pages
    #[arg(long)]
    interval: Option<f64>,

    /// Zero-based page to start from
    #[arg(long)]
    start_page: Option<u32>,

    /// Stop after this many pages
    #[arg(long)]
    max_pages: Option<u32>,

    /// Attempts per page before giving up; 0 retries forever
    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Args)]
struct DedupArgs {
    /// Id list to deduplicate in place
    #[arg(long)]
    ids: Option<Utf8PathBuf>,

    /// Backup location (default: the id list with a .bak extension)
    #[arg(long)]
    backup: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct DownloadArgs {
    /// Text file with one material id per line (default: missing_ids.txt)
    #[arg(long)]
    ids: Option<Utf8PathBuf>,

    /// Directory where CIF files are stored
    #[arg(long)]
    out: Option<Utf8PathBuf>,

    /// Timeout in seconds for each download request
    #[arg(long)]
    timeout: Option<f64>,

    /// CSV file updated with download results
    #[arg(long)]
    log: Option<Utf8PathBuf>,

    /// Number of CIFs to download in parallel
    #[arg(long, visible_alias = "workers")]
    batch_size: Option<usize>,

    #[arg(long)]
    base_url: Option<String>,

    /// Plain status lines instead of a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct CheckArgs {
    /// Master id list
    #[arg(long)]
    ids: Option<Utf8PathBuf>,

    /// Directory holding the CIF files
    #[arg(long)]
    dir: Option<Utf8PathBuf>,

    /// Where to write the missing ids
    #[arg(long)]
    missing: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<HarvestError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::InvalidMaterialId(_)
        | HarvestError::IdListRead { .. }
        | HarvestError::EmptyIdList(_)
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_) => 2,
        HarvestError::PageFetch(_) | HarvestError::RetryExhausted { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let file_config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Command::Scrape(args) => run_scrape_command(args, &file_config, mode),
        Command::Dedup(args) => {
            let config = file_config.dedup(args.ids, args.backup);
            let result = run_dedup(&config)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_dedup(&result),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Download(args) => run_download_command(args, &file_config, mode),
        Command::Check(args) => {
            let config = file_config.check(args.ids, args.dir, args.missing);
            let result = run_check(&config)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Text => TextOutput::print_check(&result),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_scrape_command(
    args: ScrapeArgs,
    file_config: &FileConfig,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    let config = file_config.scrape(ScrapeOverrides {
        base_url: args.base_url,
        sid: args.sid,
        output: args.output,
        interval_secs: args.interval,
        start_page: args.start_page,
        max_pages: args.max_pages,
        max_attempts: args.max_attempts,
    });
    let client = QpodHttpClient::new(&config.base_url, &file_config.page_http())?;

    match mode {
        OutputMode::Json => {
            let result = run_scrape(&config, &client, &JsonOutput)?;
            JsonOutput::print(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = run_scrape(&config, &client, &ConsoleSink::new())?;
            TextOutput::print_scrape(&result);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_download_command(
    args: DownloadArgs,
    file_config: &FileConfig,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    let config = file_config.download(DownloadOverrides {
        base_url: args.base_url,
        ids: args.ids,
        output_dir: args.out,
        log: args.log,
        timeout_secs: args.timeout,
        workers: args.batch_size,
    });
    let settings = HttpSettings {
        user_agent: file_config.user_agent(),
        timeout: config.timeout,
    };
    let client = QpodHttpClient::new(&config.base_url, &settings)?;

    let sink: Box<dyn ProgressSink> = match mode {
        OutputMode::Json => Box::new(JsonOutput),
        OutputMode::Text if !args.no_progress && BarSink::available() => {
            Box::new(BarSink::new("Downloading"))
        }
        OutputMode::Text => Box::new(ConsoleSink::new()),
    };

    let result = run_download(&config, &client, sink.as_ref())?;
    match mode {
        OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_download(&result),
    }

    if result.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
