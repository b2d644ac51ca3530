//! Walks the paginated QPOD table and appends every material id to the id list.

use std::thread;
use std::time::Duration;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{RetryPolicy, ScrapeConfig};
use crate::domain::MaterialId;
use crate::error::HarvestError;
use crate::ids::{IdAppender, load_known_ids};
use crate::progress::ProgressSink;

const SAMPLE_CHARS: usize = 500;
const NEXT_LABELS: [&str; 3] = [">", "›", "Next"];

/// Source of table pages. Injected so runs can be driven without a network.
pub trait PageSource {
    fn fetch_page(&self, url: &str) -> Result<String, HarvestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextControl {
    Enabled,
    Disabled,
    Absent,
}

#[derive(Debug, Clone)]
pub struct TablePage {
    pub row_count: usize,
    pub ids: Vec<MaterialId>,
    pub next: NextControl,
}

/// Compiled selectors for one table layout.
pub struct TableParser {
    rows: Selector,
    material_link: Selector,
    page_links: Selector,
    href_id: Regex,
}

fn create_selector(selector: &str) -> Result<Selector, HarvestError> {
    Selector::parse(selector).map_err(|_| HarvestError::Selector(selector.to_string()))
}

impl TableParser {
    pub fn new() -> Result<Self, HarvestError> {
        Ok(Self {
            rows: create_selector("tbody tr")?,
            material_link: create_selector("th a[href*='/material/']")?,
            page_links: create_selector("a.page-link")?,
            href_id: Regex::new(r"/material/([^/?#]+)")
                .map_err(|err| HarvestError::Selector(err.to_string()))?,
        })
    }

    pub fn parse(&self, html: &str) -> TablePage {
        let doc = Html::parse_document(html);

        let mut row_count = 0;
        let mut ids = Vec::new();
        for row in doc.select(&self.rows) {
            row_count += 1;
            let Some(anchor) = row.select(&self.material_link).next() else {
                continue;
            };
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            match self.material_id(href) {
                Some(id) => ids.push(id),
                None => warn!(href, "material link without a usable id"),
            }
        }

        TablePage {
            row_count,
            ids,
            next: self.next_control(&doc),
        }
    }

    fn material_id(&self, href: &str) -> Option<MaterialId> {
        let captures = self.href_id.captures(href)?;
        captures.get(1)?.as_str().parse().ok()
    }

    fn next_control(&self, doc: &Html) -> NextControl {
        let next = doc.select(&self.page_links).find(|link| {
            let text = link.text().collect::<String>();
            NEXT_LABELS.contains(&text.trim())
        });
        let Some(next) = next else {
            return NextControl::Absent;
        };
        let disabled = next
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "li")
            .is_some_and(|li| li.value().classes().any(|class| class == "disabled"));
        if disabled {
            NextControl::Disabled
        } else {
            NextControl::Enabled
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Next-page control present but disabled.
    LastPage,
    NoNextControl,
    /// Page had no table rows; the layout may have changed.
    EmptyPage,
    /// Rows present but none linked to a material.
    NoMaterialLinks,
    PageLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub output: String,
    pub pages_fetched: u32,
    pub last_page: Option<u32>,
    pub new_ids: usize,
    pub total_ids: usize,
    pub stop: StopReason,
}

fn content_sample(html: &str) -> String {
    html.chars().take(SAMPLE_CHARS).collect()
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

fn fetch_with_retry<P: PageSource>(
    source: &P,
    url: &str,
    page: u32,
    policy: &RetryPolicy,
    sink: &dyn ProgressSink,
) -> Result<String, HarvestError> {
    let mut attempt = 1u32;
    loop {
        match source.fetch_page(url) {
            Ok(html) => return Ok(html),
            Err(err) => {
                if !policy.allows(attempt) {
                    return Err(HarvestError::RetryExhausted {
                        page: page + 1,
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(page = page + 1, attempt, error = %err, "page request failed");
                sink.line(&format!(
                    "request failed: {err}; retrying page {} in {:.1}s",
                    page + 1,
                    delay.as_secs_f64()
                ));
                pause(delay);
                attempt += 1;
            }
        }
    }
}

pub fn run_scrape<P: PageSource>(
    config: &ScrapeConfig,
    source: &P,
    sink: &dyn ProgressSink,
) -> Result<ScrapeResult, HarvestError> {
    let parser = TableParser::new()?;
    let mut known = load_known_ids(&config.output)?;
    if !known.is_empty() {
        sink.line(&format!(
            "found {} existing ids in {}, resuming",
            known.len(),
            config.output
        ));
    }
    let mut appender = IdAppender::open(&config.output)?;

    let mut page = config.start_page;
    let mut pages_fetched = 0u32;
    let mut last_page = None;
    let mut new_ids = 0usize;

    let stop = loop {
        if config.max_pages.is_some_and(|max| pages_fetched >= max) {
            break StopReason::PageLimit;
        }

        let url = config.page_url(page);
        sink.line(&format!("fetching page {} -> {url}", page + 1));
        let html = fetch_with_retry(source, &url, page, &config.retry, sink)?;
        pages_fetched += 1;
        last_page = Some(page);

        let table = parser.parse(&html);
        if table.row_count == 0 || table.ids.is_empty() {
            let reason = if table.row_count == 0 {
                StopReason::EmptyPage
            } else {
                StopReason::NoMaterialLinks
            };
            let sample = content_sample(&html);
            warn!(page = page + 1, ?reason, %sample, "unexpected page layout, stopping");
            sink.line(&format!(
                "page {} has no material rows; stopping. First {SAMPLE_CHARS} chars:\n{sample}",
                page + 1
            ));
            break reason;
        }

        let fresh: Vec<MaterialId> = table
            .ids
            .into_iter()
            .filter(|id| known.insert(id.as_str().to_string()))
            .collect();
        appender.append_batch(&fresh)?;
        new_ids += fresh.len();
        sink.line(&format!(
            "page {} done: {} new, {} total",
            page + 1,
            fresh.len(),
            known.len()
        ));
        debug!(page = page + 1, next = ?table.next, "page processed");

        match table.next {
            NextControl::Absent => {
                sink.line("no next-page control, done");
                break StopReason::NoNextControl;
            }
            NextControl::Disabled => {
                sink.line("reached the last page");
                break StopReason::LastPage;
            }
            NextControl::Enabled => {}
        }

        page += 1;
        pause(config.page_interval);
    };

    info!(
        pages = pages_fetched,
        new = new_ids,
        total = known.len(),
        ?stop,
        "scrape finished"
    );

    Ok(ScrapeResult {
        output: config.output.to_string(),
        pages_fetched,
        last_page: last_page.map(|page| page + 1),
        new_ids,
        total_ids: known.len(),
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(rows: &[&str], next: &str) -> String {
        let body: String = rows
            .iter()
            .map(|id| format!("<tr><th><a href=\"/material/{id}\">{id}</a></th><td>x</td></tr>"))
            .collect();
        format!("<html><body><table><tbody>{body}</tbody></table><ul>{next}</ul></body></html>")
    }

    #[test]
    fn extracts_ids_and_enabled_next() {
        let html = page(
            &["2AgBrSe2-1.Ag_Br.0.1", "Cu2O-1"],
            r#"<li class="page-item"><a class="page-link" href="?page=1">›</a></li>"#,
        );
        let table = TableParser::new().unwrap().parse(&html);
        assert_eq!(table.row_count, 2);
        let ids: Vec<&str> = table.ids.iter().map(MaterialId::as_str).collect();
        assert_eq!(ids, vec!["2AgBrSe2-1.Ag_Br.0.1", "Cu2O-1"]);
        assert_eq!(table.next, NextControl::Enabled);
    }

    #[test]
    fn disabled_next_is_detected_on_parent_li() {
        let html = page(
            &["A"],
            r##"<li class="page-item disabled"><a class="page-link" href="#"> Next </a></li>"##,
        );
        assert_eq!(
            TableParser::new().unwrap().parse(&html).next,
            NextControl::Disabled
        );
    }

    #[test]
    fn missing_next_and_foreign_links() {
        let html = page(
            &["A"],
            r#"<li class="page-item"><a class="page-link" href="?page=0">1</a></li>"#,
        );
        assert_eq!(
            TableParser::new().unwrap().parse(&html).next,
            NextControl::Absent
        );
    }

    #[test]
    fn href_tail_is_cut_at_path_and_query() {
        let html = "<table><tbody><tr><th><a href=\"https://h/material/X-1/?tab=cif\">X</a></th></tr>\
                    <tr><td><a href=\"/material/ignored\">no th</a></td></tr></tbody></table>";
        let table = TableParser::new().unwrap().parse(html);
        assert_eq!(table.row_count, 2);
        assert_eq!(table.ids.len(), 1);
        assert_eq!(table.ids[0].as_str(), "X-1");
    }
}
