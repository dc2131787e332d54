//! Breadth-first site crawler.
//!
//! The crawl is a sequential chain of fetches from one base URL. Before every
//! pop the frontier is effectively partitioned so URLs on an important path
//! (about, contact, FAQ, ...) go first, in discovery order. Link-following is
//! gated by `max_depth > 1` as a single comparison; the depth is never
//! decremented per level.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sitechat_shared::{CrawlConfig, Result, Section};
use sitechat_text::TextNormalizer;

use crate::extractor::{Extraction, ExtractionRules, PageExtractor};
use crate::fetch::Fetcher;
use crate::links::{LinkCollector, normalize_url};

// ---------------------------------------------------------------------------
// CrawlReport
// ---------------------------------------------------------------------------

/// Summary of a completed crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// One section per page that yielded text, in scan order.
    pub sections: Vec<Section>,
    /// Pages attempted, successful or not.
    pub pages_scanned: usize,
    /// Pages that failed to fetch (URL, error message).
    pub failures: Vec<(String, String)>,
    /// Wall-clock duration of the crawl.
    pub duration: Duration,
}

/// Progress callback for crawl status.
pub trait CrawlProgress: Send + Sync {
    /// Called before each page is fetched.
    fn page_scanned(&self, url: &str, scanned: usize, max_pages: usize);
    /// Called once the crawl completes.
    fn finished(&self, report: &CrawlReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl CrawlProgress for SilentProgress {
    fn page_scanned(&self, _url: &str, _scanned: usize, _max_pages: usize) {}
    fn finished(&self, _report: &CrawlReport) {}
}

// ---------------------------------------------------------------------------
// CrawlState
// ---------------------------------------------------------------------------

/// Visited set, frontier and page count for one crawl invocation.
///
/// All URLs are canonical strings (see [`crate::canonical_url`]). The
/// frontier never holds a visited URL or the same URL twice.
#[derive(Debug, Default)]
pub struct CrawlState {
    visited: HashSet<String>,
    frontier: VecDeque<String>,
    queued: HashSet<String>,
    pages_scanned: usize,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `url` unless it was already visited or queued.
    pub fn enqueue(&mut self, url: String) -> bool {
        if self.visited.contains(&url) || self.queued.contains(&url) {
            return false;
        }
        self.queued.insert(url.clone());
        self.frontier.push_back(url);
        true
    }

    /// Pop the first important URL, or the head of the frontier.
    ///
    /// Equivalent to a stable partition (important first) before every pop.
    pub fn pop_next(&mut self, important_paths: &[String]) -> Option<String> {
        let index = self
            .frontier
            .iter()
            .position(|url| is_important(url, important_paths))
            .unwrap_or(0);
        let url = self.frontier.remove(index)?;
        self.queued.remove(&url);
        Some(url)
    }

    /// Mark `url` visited. Returns `false` if it already was.
    pub fn mark_visited(&mut self, url: &str) -> bool {
        self.queued.remove(url);
        self.visited.insert(url.to_string())
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    pub fn pages_scanned(&self) -> usize {
        self.pages_scanned
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }
}

/// Case-insensitive substring match of the URL path against the important list.
/// `important_paths` must already be lowercase.
fn is_important(url: &str, important_paths: &[String]) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    important_paths.iter().any(|p| path.contains(p.as_str()))
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Sequential, same-site crawler producing one [`Section`] per page.
pub struct Crawler {
    config: CrawlConfig,
    extractor: PageExtractor,
    links: LinkCollector,
    normalizer: TextNormalizer,
    important_paths: Vec<String>,
    progress: Arc<dyn CrawlProgress>,
}

impl Crawler {
    /// Create a crawler that fetches through `fetcher`.
    pub fn new(config: CrawlConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let rules = ExtractionRules::from_policies(&config.policies);
        let links = LinkCollector::new(&config.policies.skip_patterns);
        let important_paths = config
            .policies
            .important_paths
            .iter()
            .map(|p| p.to_lowercase())
            .collect();

        Self {
            extractor: PageExtractor::new(fetcher, rules),
            links,
            normalizer: TextNormalizer::new(),
            important_paths,
            progress: Arc::new(SilentProgress),
            config,
        }
    }

    /// Report progress to `progress` instead of discarding it.
    pub fn with_progress(mut self, progress: Arc<dyn CrawlProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Crawl `base_url`, scanning at most `max_pages` pages.
    ///
    /// Only an unparseable base URL is an error; page-level failures are
    /// logged, recorded in the report and skipped.
    #[instrument(skip_all, fields(base_url = %base_url, max_depth = max_depth, max_pages = max_pages))]
    pub async fn crawl(
        &self,
        base_url: &str,
        max_depth: u32,
        max_pages: usize,
    ) -> Result<CrawlReport> {
        let start = Instant::now();
        let base = normalize_url(base_url)?;
        let follow_links = max_depth > 1;

        info!(
            %base,
            max_depth,
            max_pages,
            time_budget_secs = self.config.time_budget.map(|b| b.as_secs()),
            "starting crawl"
        );

        let mut state = CrawlState::new();
        let mut report = CrawlReport::default();
        state.enqueue(base.clone());

        while state.pages_scanned < max_pages {
            if self.out_of_time(start) {
                info!(elapsed_ms = start.elapsed().as_millis(), "time budget exhausted");
                break;
            }
            let Some(url) = state.pop_next(&self.important_paths) else {
                break;
            };
            if !state.mark_visited(&url) {
                continue;
            }
            self.visit(&mut state, &mut report, &url, follow_links, max_pages)
                .await;
        }

        if report.sections.len() < self.config.thin_content_threshold {
            self.try_fallback_paths(&mut state, &mut report, &base, max_pages, start)
                .await;
        }

        report.pages_scanned = state.pages_scanned;
        report.duration = start.elapsed();

        info!(
            sections = report.sections.len(),
            pages_scanned = report.pages_scanned,
            failures = report.failures.len(),
            duration_ms = report.duration.as_millis(),
            "crawl completed"
        );
        self.progress.finished(&report);

        Ok(report)
    }

    /// Fetch guessed paths under the base when the crawl found too little.
    async fn try_fallback_paths(
        &self,
        state: &mut CrawlState,
        report: &mut CrawlReport,
        base: &str,
        max_pages: usize,
        start: Instant,
    ) {
        debug!(
            sections = report.sections.len(),
            threshold = self.config.thin_content_threshold,
            "thin content, trying fallback paths"
        );

        for path in &self.config.policies.fallback_paths {
            if state.pages_scanned >= max_pages || self.out_of_time(start) {
                break;
            }
            let url = format!("{base}{path}").trim_end_matches('/').to_string();
            if !state.mark_visited(&url) {
                continue;
            }
            self.visit(state, report, &url, false, max_pages).await;
        }
    }

    /// Scan one page: extract, record a section, enqueue its links.
    async fn visit(
        &self,
        state: &mut CrawlState,
        report: &mut CrawlReport,
        url: &str,
        follow_links: bool,
        max_pages: usize,
    ) {
        state.pages_scanned += 1;
        self.progress.page_scanned(url, state.pages_scanned, max_pages);

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(url, stage = "parse", error = %e, "unparseable URL, skipping");
                report.failures.push((url.to_string(), e.to_string()));
                return;
            }
        };

        let extraction = self.extractor.extract(&parsed).await;
        if let Some(failure) = &extraction.failure {
            report.failures.push((url.to_string(), failure.clone()));
        }

        if extraction.is_empty() {
            debug!(url, "no content extracted");
        } else {
            let normalized = self.normalizer.normalize(&extraction.text);
            debug!(url, chars = extraction.text.len(), "page scanned");
            report
                .sections
                .push(Section::new(url, extraction.text.clone(), normalized));
        }

        if follow_links && state.pages_scanned < max_pages {
            let mut added = 0;
            for link in self.collect_links(&extraction, &parsed) {
                if state.enqueue(link) {
                    added += 1;
                }
            }
            debug!(url, added, frontier = state.frontier_len(), "links queued");
        }
    }

    /// Parse the page body and collect its links; the parsed document never
    /// outlives this call.
    fn collect_links(&self, extraction: &Extraction, base: &Url) -> Vec<String> {
        let doc: Option<Html> = extraction.document();
        doc.map(|doc| self.links.collect(&doc, base).into_iter().collect())
            .unwrap_or_default()
    }

    fn out_of_time(&self, start: Instant) -> bool {
        self.config
            .time_budget
            .is_some_and(|budget| start.elapsed() >= budget)
    }
}
