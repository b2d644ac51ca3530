use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid material id: {0:?}")]
    InvalidMaterialId(String),

    #[error("failed to read id list {path}: {message}")]
    IdListRead { path: Utf8PathBuf, message: String },

    #[error("no material ids found in {0}")]
    #[diagnostic(help("the file must contain one id per line; `#` lines are comments"))]
    EmptyIdList(Utf8PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),

    #[error("page request failed: {0}")]
    PageFetch(String),

    #[error("page {page} still failing after {attempts} attempts: {message}")]
    RetryExhausted {
        page: u32,
        attempts: u32,
        message: String,
    },

    #[error("invalid CSS selector: {0}")]
    Selector(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("download log error: {0}")]
    Log(String),
}
