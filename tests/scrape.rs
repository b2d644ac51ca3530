use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use qpod_harvest::config::{FileConfig, ScrapeConfig, ScrapeOverrides};
use qpod_harvest::error::HarvestError;
use qpod_harvest::progress::ProgressSink;
use qpod_harvest::scrape::{PageSource, StopReason, run_scrape};

/// Serves canned pages keyed by zero-based page number; the first
/// `failures` requests for any page fail.
#[derive(Default)]
struct ScriptedSource {
    pages: HashMap<u32, String>,
    failures: Mutex<u32>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn new(pages: Vec<String>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(page, html)| (page as u32, html))
                .collect(),
            ..Self::default()
        }
    }

    fn failing_first(mut self, failures: u32) -> Self {
        self.failures = Mutex::new(failures);
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl PageSource for ScriptedSource {
    fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
        self.requests.lock().unwrap().push(url.to_string());
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(HarvestError::PageFetch("connection reset".to_string()));
        }
        let page: u32 = url.rsplit('=').next().unwrap().parse().unwrap();
        self.pages
            .get(&page)
            .cloned()
            .ok_or_else(|| HarvestError::PageFetch(format!("HTTP 404 for {url}")))
    }
}

#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn line(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn needs_pacing(&self) -> bool {
        false
    }
}

fn table(ids: &[&str], next: Option<bool>) -> String {
    let rows: String = ids
        .iter()
        .map(|id| {
            format!("<tr><th><a href=\"/material/{id}\">{id}</a></th><td>2</td></tr>")
        })
        .collect();
    let pager = match next {
        Some(true) => r##"<li class="page-item"><a class="page-link" href="#">›</a></li>"##,
        Some(false) => {
            r##"<li class="page-item disabled"><a class="page-link" href="#">›</a></li>"##
        }
        None => "",
    };
    format!(
        "<html><body><table><thead><tr><th>id</th></tr></thead><tbody>{rows}</tbody></table>\
         <ul class=\"pagination\">{pager}</ul></body></html>"
    )
}

fn config(output: Utf8PathBuf) -> ScrapeConfig {
    let mut config = FileConfig::default().scrape(ScrapeOverrides {
        base_url: Some("http://qpod.test".to_string()),
        output: Some(output),
        interval_secs: Some(0.0),
        ..ScrapeOverrides::default()
    });
    config.retry.delay = Duration::ZERO;
    config.retry.max_delay = Duration::ZERO;
    config
}

fn output_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("ids.txt")).unwrap()
}

#[test]
fn walks_pages_until_next_is_disabled() {
    let temp = tempfile::tempdir().unwrap();
    let output = output_path(&temp);
    let source = ScriptedSource::new(vec![
        table(&["A-1", "B-1"], Some(true)),
        table(&["C-1", "A-1"], Some(true)),
        table(&["D-1"], Some(false)),
        table(&["NEVER"], Some(false)),
    ]);

    let result = run_scrape(&config(output.clone()), &source, &RecordingSink::default()).unwrap();

    assert_eq!(result.stop, StopReason::LastPage);
    assert_eq!(result.pages_fetched, 3);
    assert_eq!(result.last_page, Some(3));
    assert_eq!(result.new_ids, 4);
    assert_eq!(source.requests().len(), 3);
    assert_eq!(
        source.requests()[0],
        "http://qpod.test/table?sid=73&page=0"
    );
    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written, "A-1\nB-1\nC-1\nD-1\n");
}

#[test]
fn resumes_without_rewriting_known_ids() {
    let temp = tempfile::tempdir().unwrap();
    let output = output_path(&temp);
    fs::write(&output, "A-1\nB-1\n").unwrap();
    let source = ScriptedSource::new(vec![table(&["A-1", "B-1", "C-1"], None)]);
    let sink = RecordingSink::default();

    let result = run_scrape(&config(output.clone()), &source, &sink).unwrap();

    assert_eq!(result.stop, StopReason::NoNextControl);
    assert_eq!(result.new_ids, 1);
    assert_eq!(result.total_ids, 3);
    assert_eq!(fs::read_to_string(&output).unwrap(), "A-1\nB-1\nC-1\n");
    assert!(
        sink.lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains("found 2 existing ids"))
    );
}

#[test]
fn empty_table_stops_the_walk() {
    let temp = tempfile::tempdir().unwrap();
    let output = output_path(&temp);
    let source = ScriptedSource::new(vec![table(&["A-1"], Some(true)), table(&[], Some(true))]);
    let sink = RecordingSink::default();

    let result = run_scrape(&config(output.clone()), &source, &sink).unwrap();

    assert_eq!(result.stop, StopReason::EmptyPage);
    assert_eq!(result.pages_fetched, 2);
    assert_eq!(fs::read_to_string(&output).unwrap(), "A-1\n");
    assert!(
        sink.lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains("no material rows"))
    );
}

#[test]
fn page_limit_and_start_page() {
    let temp = tempfile::tempdir().unwrap();
    let output = output_path(&temp);
    let source = ScriptedSource::new(vec![
        table(&["A-1"], Some(true)),
        table(&["B-1"], Some(true)),
        table(&["C-1"], Some(true)),
    ]);
    let mut config = config(output.clone());
    config.start_page = 1;
    config.max_pages = Some(1);

    let result = run_scrape(&config, &source, &RecordingSink::default()).unwrap();

    assert_eq!(result.stop, StopReason::PageLimit);
    assert_eq!(result.pages_fetched, 1);
    assert_eq!(result.last_page, Some(2));
    assert_eq!(fs::read_to_string(&output).unwrap(), "B-1\n");
}

#[test]
fn transient_failures_are_retried() {
    let temp = tempfile::tempdir().unwrap();
    let output = output_path(&temp);
    let source = ScriptedSource::new(vec![table(&["A-1"], Some(false))]).failing_first(2);
    let mut config = config(output.clone());
    config.retry.max_attempts = 5;

    let result = run_scrape(&config, &source, &RecordingSink::default()).unwrap();

    assert_eq!(result.new_ids, 1);
    assert_eq!(source.requests().len(), 3);
}

#[test]
fn bounded_retries_give_up() {
    let temp = tempfile::tempdir().unwrap();
    let output = output_path(&temp);
    let source = ScriptedSource::new(vec![table(&["A-1"], Some(false))]).failing_first(10);
    let mut config = config(output);
    config.retry.max_attempts = 3;

    let err = run_scrape(&config, &source, &RecordingSink::default()).unwrap_err();

    assert_matches!(
        err,
        HarvestError::RetryExhausted {
            page: 1,
            attempts: 3,
            ..
        }
    );
    assert_eq!(source.requests().len(), 3);
}
