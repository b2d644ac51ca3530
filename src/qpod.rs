use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

use crate::config::HttpSettings;
use crate::domain::MaterialId;
use crate::download::{CifFetcher, FetchFailure};
use crate::error::HarvestError;
use crate::scrape::PageSource;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Blocking client for the QPOD web front end. Serves table pages to the
/// scraper and CIF files to the downloader.
#[derive(Clone)]
pub struct QpodHttpClient {
    client: Client,
    base_url: String,
}

impl QpodHttpClient {
    pub fn new(base_url: &str, settings: &HttpSettings) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|err| HarvestError::HttpClient(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| HarvestError::HttpClient(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn cif_url(&self, id: &MaterialId) -> String {
        format!("{}/material/{}/download/cif", self.base_url, id.as_str())
    }
}

impl PageSource for QpodHttpClient {
    fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
        self.client
            .get(url)
            .header(ACCEPT, HTML_ACCEPT)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|err| HarvestError::PageFetch(err.to_string()))
    }
}

impl CifFetcher for QpodHttpClient {
    fn fetch(&self, id: &MaterialId) -> Result<Vec<u8>, FetchFailure> {
        let response = self
            .client
            .get(self.cif_url(id))
            .send()
            .map_err(classify)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(status_failure(status));
        }
        let body = response.bytes().map_err(classify)?;
        Ok(body.to_vec())
    }
}

fn status_failure(status: StatusCode) -> FetchFailure {
    if status.is_client_error() || status.is_server_error() {
        FetchFailure::HttpStatus {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        }
    } else {
        FetchFailure::UnexpectedStatus(status.as_u16())
    }
}

fn classify(err: reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Network(err.to_string())
    }
}
