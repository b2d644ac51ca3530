use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "qpod-harvest.json";
pub const DEFAULT_BASE_URL: &str = "https://qpod.fysik.dtu.dk";
pub const DEFAULT_SID: u32 = 73;
pub const DEFAULT_OUTPUT_DIR: &str = "cif_downloads";
pub const DEFAULT_LOG_FILE: &str = "download_status.csv";
pub const DEFAULT_MISSING_FILE: &str = "missing_ids.txt";
pub const DEFAULT_WORKERS: usize = 5;
/// Browser identity the table pages have always been requested with.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0 Safari/537.36";

const DEFAULT_PAGE_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_PAGE_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_RETRY_DELAY_SECS: f64 = 10.0;
const DEFAULT_MAX_RETRY_DELAY_SECS: f64 = 300.0;

pub fn default_ids_file(sid: u32) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("qpod_sid{sid}_material_ids.txt"))
}

/// On-disk configuration. Every field is optional; CLI flags win over these.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub sid: Option<u32>,
    pub user_agent: Option<String>,
    pub page_interval_secs: Option<f64>,
    pub page_timeout_secs: Option<f64>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<f64>,
    pub backoff_factor: Option<f64>,
    pub max_retry_delay_secs: Option<f64>,
    pub download_timeout_secs: Option<f64>,
    pub workers: Option<usize>,
    pub ids_file: Option<Utf8PathBuf>,
    pub output_dir: Option<Utf8PathBuf>,
    pub log_file: Option<Utf8PathBuf>,
    pub missing_file: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `qpod-harvest.json` from the working directory when no
    /// path is given. Only the implicit default may be absent.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<FileConfig, HarvestError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Ok(FileConfig::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<FileConfig, HarvestError> {
        serde_json::from_str(content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per page; `0` retries forever.
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::from_secs_f64(DEFAULT_RETRY_DELAY_SECS),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs_f64(DEFAULT_MAX_RETRY_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let secs = (self.delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub base_url: String,
    pub sid: u32,
    pub output: Utf8PathBuf,
    pub page_interval: Duration,
    pub start_page: u32,
    pub max_pages: Option<u32>,
    pub retry: RetryPolicy,
}

impl ScrapeConfig {
    pub fn page_url(&self, page: u32) -> String {
        format!(
            "{}/table?sid={}&page={page}",
            self.base_url.trim_end_matches('/'),
            self.sid
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeOverrides {
    pub base_url: Option<String>,
    pub sid: Option<u32>,
    pub output: Option<Utf8PathBuf>,
    pub interval_secs: Option<f64>,
    pub start_page: Option<u32>,
    pub max_pages: Option<u32>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub ids: Utf8PathBuf,
    pub backup: Utf8PathBuf,
}

impl DedupConfig {
    pub fn for_ids(ids: Utf8PathBuf) -> Self {
        let backup = ids.with_extension("bak");
        Self { ids, backup }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub base_url: String,
    pub ids: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub log: Utf8PathBuf,
    pub timeout: Duration,
    pub workers: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOverrides {
    pub base_url: Option<String>,
    pub ids: Option<Utf8PathBuf>,
    pub output_dir: Option<Utf8PathBuf>,
    pub log: Option<Utf8PathBuf>,
    pub timeout_secs: Option<f64>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub ids: Utf8PathBuf,
    pub cif_dir: Utf8PathBuf,
    pub missing: Utf8PathBuf,
}

impl FileConfig {
    fn sid(&self, cli: Option<u32>) -> u32 {
        cli.or(self.sid).unwrap_or(DEFAULT_SID)
    }

    fn base_url(&self, cli: Option<String>) -> String {
        cli.or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn master_ids(&self, cli: Option<Utf8PathBuf>) -> Utf8PathBuf {
        cli.or_else(|| self.ids_file.clone())
            .unwrap_or_else(|| default_ids_file(self.sid(None)))
    }

    pub fn scrape(&self, overrides: ScrapeOverrides) -> ScrapeConfig {
        let sid = self.sid(overrides.sid);
        let retry = RetryPolicy {
            max_attempts: overrides
                .max_attempts
                .or(self.max_attempts)
                .unwrap_or(RetryPolicy::default().max_attempts),
            delay: secs(self.retry_delay_secs, DEFAULT_RETRY_DELAY_SECS),
            backoff_factor: self.backoff_factor.unwrap_or(1.0),
            max_delay: secs(self.max_retry_delay_secs, DEFAULT_MAX_RETRY_DELAY_SECS),
        };
        ScrapeConfig {
            base_url: self.base_url(overrides.base_url),
            sid,
            output: overrides
                .output
                .or_else(|| self.ids_file.clone())
                .unwrap_or_else(|| default_ids_file(sid)),
            page_interval: secs(
                overrides.interval_secs.or(self.page_interval_secs),
                DEFAULT_PAGE_INTERVAL_SECS,
            ),
            start_page: overrides.start_page.unwrap_or(0),
            max_pages: overrides.max_pages,
            retry,
        }
    }

    pub fn page_http(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self.user_agent(),
            timeout: secs(self.page_timeout_secs, DEFAULT_PAGE_TIMEOUT_SECS),
        }
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn dedup(&self, ids: Option<Utf8PathBuf>, backup: Option<Utf8PathBuf>) -> DedupConfig {
        let mut config = DedupConfig::for_ids(self.master_ids(ids));
        if let Some(backup) = backup {
            config.backup = backup;
        }
        config
    }

    pub fn download(&self, overrides: DownloadOverrides) -> DownloadConfig {
        DownloadConfig {
            base_url: self.base_url(overrides.base_url),
            ids: overrides
                .ids
                .unwrap_or_else(|| self.missing_file_path(None)),
            output_dir: overrides
                .output_dir
                .or_else(|| self.output_dir.clone())
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUTPUT_DIR)),
            log: overrides
                .log
                .or_else(|| self.log_file.clone())
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_LOG_FILE)),
            timeout: secs(
                overrides.timeout_secs.or(self.download_timeout_secs),
                DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            ),
            workers: overrides
                .workers
                .or(self.workers)
                .unwrap_or(DEFAULT_WORKERS)
                .max(1),
        }
    }

    pub fn check(
        &self,
        ids: Option<Utf8PathBuf>,
        cif_dir: Option<Utf8PathBuf>,
        missing: Option<Utf8PathBuf>,
    ) -> CheckConfig {
        CheckConfig {
            ids: self.master_ids(ids),
            cif_dir: cif_dir
                .or_else(|| self.output_dir.clone())
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUTPUT_DIR)),
            missing: self.missing_file_path(missing),
        }
    }

    fn missing_file_path(&self, cli: Option<Utf8PathBuf>) -> Utf8PathBuf {
        cli.or_else(|| self.missing_file.clone())
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_MISSING_FILE))
    }
}

fn secs(value: Option<f64>, default: f64) -> Duration {
    value
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_defaults() {
        let config = FileConfig::default();
        let scrape = config.scrape(ScrapeOverrides::default());
        assert_eq!(scrape.sid, 73);
        assert_eq!(scrape.output, "qpod_sid73_material_ids.txt");
        assert_eq!(scrape.page_interval, Duration::from_secs(5));
        assert_eq!(
            scrape.page_url(2),
            "https://qpod.fysik.dtu.dk/table?sid=73&page=2"
        );

        let download = config.download(DownloadOverrides::default());
        assert_eq!(download.ids, "missing_ids.txt");
        assert_eq!(download.workers, 5);
        assert_eq!(download.timeout, Duration::from_secs(30));
        assert!(config.page_http().user_agent.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn cli_overrides_file_values() {
        let config = ConfigLoader::parse(r#"{"sid": 12, "workers": 8}"#).unwrap();
        let scrape = config.scrape(ScrapeOverrides {
            sid: Some(99),
            ..ScrapeOverrides::default()
        });
        assert_eq!(scrape.sid, 99);
        assert_eq!(scrape.output, "qpod_sid99_material_ids.txt");

        let download = config.download(DownloadOverrides {
            workers: Some(0),
            ..DownloadOverrides::default()
        });
        assert_eq!(download.workers, 1);
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 4,
            delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
        assert!(RetryPolicy::default().allows(u32::MAX - 1));
    }
}
