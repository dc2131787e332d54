//! Per-site context cache with TTL freshness.
//!
//! Entries are replaced wholesale under the write lock. Crawls for one site
//! are serialized by a per-site mutex; a non-forced caller that waited on it
//! re-checks freshness first, so concurrent callers share a single crawl.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use sitechat_crawler::{Crawler, normalize_url};
use sitechat_shared::{AppConfig, ContextCacheEntry, Result, ScanResult};

use crate::assembler::ContextAssembler;
use crate::clock::Clock;

/// Crawl budget and freshness window for regular scans.
#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    pub depth: u32,
    pub max_pages: usize,
    pub ttl: Duration,
}

impl From<&AppConfig> for ScanSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            depth: config.scan.depth,
            max_pages: config.scan.max_pages,
            // Out-of-range values are rejected by `AppConfig::validate`.
            ttl: config.scan.cache_ttl().unwrap_or(Duration::MAX),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Keyed store of assembled site contexts.
pub struct ContextCache {
    crawler: Crawler,
    assembler: ContextAssembler,
    clock: Arc<dyn Clock>,
    settings: ScanSettings,
    entries: RwLock<HashMap<String, Arc<ContextCacheEntry>>>,
    site_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContextCache {
    pub fn new(
        crawler: Crawler,
        assembler: ContextAssembler,
        settings: ScanSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            crawler,
            assembler,
            clock,
            settings,
            entries: RwLock::new(HashMap::new()),
            site_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a scan taken at `scanned_at` is still fresh.
    pub fn is_fresh(&self, scanned_at: DateTime<Utc>) -> bool {
        self.clock.now() - scanned_at < self.settings.ttl
    }

    /// Current stored entry for `site_url`, fresh or not.
    pub async fn entry(&self, site_url: &str) -> Option<Arc<ContextCacheEntry>> {
        let site = normalize_url(site_url).ok()?;
        self.entries.read().await.get(&site).cloned()
    }

    /// Return the site's context, crawling when missing, stale or forced.
    ///
    /// A crawl that yields no sections returns a placeholder result and
    /// leaves the stored entry untouched.
    #[instrument(skip_all, fields(site = %site_url, force = force))]
    pub async fn get_context(&self, site_url: &str, force: bool) -> Result<ScanResult> {
        let site = normalize_url(site_url)?;

        if !force {
            if let Some(entry) = self.fresh_entry(&site).await {
                info!(site = %site, age_secs = self.age_secs(&entry), "using cached context");
                return Ok(ScanResult::from_entry(&entry, true));
            }
        }

        let lock = self.site_lock(&site).await;
        let result = {
            let _guard = lock.lock().await;
            self.scan_locked(&site, force).await
        };
        self.release_site_lock(&site, lock).await;
        result
    }

    async fn scan_locked(&self, site: &str, force: bool) -> Result<ScanResult> {
        // Another caller may have finished a crawl while we waited.
        if !force {
            if let Some(entry) = self.fresh_entry(site).await {
                info!(site = %site, "context refreshed by concurrent scan");
                return Ok(ScanResult::from_entry(&entry, true));
            }
        }

        info!(
            site = %site,
            depth = self.settings.depth,
            max_pages = self.settings.max_pages,
            "scanning site"
        );
        let report = self
            .crawler
            .crawl(site, self.settings.depth, self.settings.max_pages)
            .await?;
        let now = self.clock.now();

        if report.sections.is_empty() {
            warn!(site = %site, pages = report.pages_scanned, "no content extracted");
            return Ok(ScanResult {
                prompt_text: format!("No content could be extracted from {site}"),
                section_count: 0,
                last_scan_at: now,
                from_cache: false,
            });
        }

        let entry = self.store(site, report.sections, now).await;
        Ok(ScanResult::from_entry(&entry, false))
    }

    /// Crawl again with a larger budget; keep the result only if it found
    /// strictly more sections than the stored entry.
    #[instrument(skip_all, fields(site = %site_url, depth = depth, max_pages = max_pages))]
    pub async fn deepen(
        &self,
        site_url: &str,
        depth: u32,
        max_pages: usize,
    ) -> Result<Option<ScanResult>> {
        let site = normalize_url(site_url)?;
        let lock = self.site_lock(&site).await;
        let result = {
            let _guard = lock.lock().await;
            self.deepen_locked(&site, depth, max_pages).await
        };
        self.release_site_lock(&site, lock).await;
        result
    }

    async fn deepen_locked(
        &self,
        site: &str,
        depth: u32,
        max_pages: usize,
    ) -> Result<Option<ScanResult>> {
        let current = self
            .entries
            .read()
            .await
            .get(site)
            .map_or(0, |e| e.section_count);

        let report = self.crawler.crawl(site, depth, max_pages).await?;
        if report.sections.len() <= current {
            warn!(
                site = %site,
                current,
                found = report.sections.len(),
                "deeper scan found no additional content"
            );
            return Ok(None);
        }

        info!(
            site = %site,
            previous = current,
            sections = report.sections.len(),
            "deeper scan expanded context"
        );
        let now = self.clock.now();
        let entry = self.store(site, report.sections, now).await;
        Ok(Some(ScanResult::from_entry(&entry, false)))
    }

    async fn store(
        &self,
        site: &str,
        sections: Vec<sitechat_shared::Section>,
        now: DateTime<Utc>,
    ) -> Arc<ContextCacheEntry> {
        let entry = Arc::new(ContextCacheEntry {
            site_url: site.to_string(),
            prompt_text: self.assembler.build_prompt(&sections, site),
            section_count: sections.len(),
            last_scan_at: now,
            sections,
        });
        self.entries
            .write()
            .await
            .insert(site.to_string(), Arc::clone(&entry));
        entry
    }

    async fn fresh_entry(&self, site: &str) -> Option<Arc<ContextCacheEntry>> {
        self.entries
            .read()
            .await
            .get(site)
            .filter(|e| self.is_fresh(e.last_scan_at))
            .cloned()
    }

    async fn site_lock(&self, site: &str) -> Arc<Mutex<()>> {
        let mut locks = self.site_locks.lock().await;
        Arc::clone(locks.entry(site.to_string()).or_default())
    }

    /// Drop the site's lock once no other caller holds or awaits it.
    async fn release_site_lock(&self, site: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.site_locks.lock().await;
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(site);
        }
    }

    fn age_secs(&self, entry: &ContextCacheEntry) -> i64 {
        (self.clock.now() - entry.last_scan_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::{FixtureFetcher, page};
    use sitechat_shared::CrawlConfig;

    const SITE: &str = "https://x.test";

    fn cache(fetcher: Arc<FixtureFetcher>, clock: Arc<ManualClock>) -> ContextCache {
        ContextCache::new(
            Crawler::new(CrawlConfig::default(), fetcher),
            ContextAssembler::default(),
            ScanSettings::default(),
            clock,
        )
    }

    fn site() -> Arc<FixtureFetcher> {
        FixtureFetcher::new(&[
            (SITE, page("Home", &["/about", "/faq"])),
            ("https://x.test/about", page("About", &[])),
            ("https://x.test/faq", page("FAQ", &[])),
        ])
    }

    #[tokio::test]
    async fn second_scan_within_ttl_is_cached() {
        let fetcher = site();
        let cache = cache(fetcher.clone(), Arc::new(ManualClock::new(Utc::now())));

        let first = cache.get_context(SITE, false).await.unwrap();
        let second = cache.get_context("https://x.test/", false).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.prompt_text, second.prompt_text);
        assert_eq!(second.section_count, 3);
        assert_eq!(fetcher.fetch_count(SITE), 1);
    }

    #[tokio::test]
    async fn rescans_exactly_at_ttl() {
        let fetcher = site();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = cache(fetcher.clone(), clock.clone());

        cache.get_context(SITE, false).await.unwrap();

        clock.advance(Duration::hours(72) - Duration::seconds(1));
        assert!(cache.get_context(SITE, false).await.unwrap().from_cache);
        assert_eq!(fetcher.fetch_count(SITE), 1);

        clock.advance(Duration::seconds(1));
        let rescan = cache.get_context(SITE, false).await.unwrap();
        assert!(!rescan.from_cache);
        assert_eq!(rescan.last_scan_at, clock.now());
        assert_eq!(fetcher.fetch_count(SITE), 2);
    }

    #[tokio::test]
    async fn force_bypasses_fresh_entry() {
        let fetcher = site();
        let cache = cache(fetcher.clone(), Arc::new(ManualClock::new(Utc::now())));

        cache.get_context(SITE, false).await.unwrap();
        let forced = cache.get_context(SITE, true).await.unwrap();

        assert!(!forced.from_cache);
        assert_eq!(fetcher.fetch_count(SITE), 2);
    }

    #[tokio::test]
    async fn empty_scan_keeps_previous_entry() {
        let fetcher = site();
        let cache = cache(fetcher.clone(), Arc::new(ManualClock::new(Utc::now())));

        let first = cache.get_context(SITE, false).await.unwrap();
        fetcher.clear();

        let empty = cache.get_context(SITE, true).await.unwrap();
        assert_eq!(empty.section_count, 0);
        assert_eq!(empty.prompt_text, "No content could be extracted from https://x.test");
        assert!(!empty.from_cache);

        let stored = cache.entry(SITE).await.unwrap();
        assert_eq!(stored.prompt_text, first.prompt_text);
        assert_eq!(stored.section_count, 3);
    }

    #[tokio::test]
    async fn concurrent_scans_share_one_crawl() {
        let fetcher = site();
        let cache = cache(fetcher.clone(), Arc::new(ManualClock::new(Utc::now())));

        let (a, b) = tokio::join!(
            cache.get_context(SITE, false),
            cache.get_context(SITE, false)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(fetcher.fetch_count(SITE), 1);
        assert_eq!(a.prompt_text, b.prompt_text);
        assert!(a.from_cache != b.from_cache);
    }

    #[tokio::test]
    async fn deepen_replaces_only_on_growth() {
        let fetcher = site();
        let cache = cache(fetcher.clone(), Arc::new(ManualClock::new(Utc::now())));
        cache.get_context(SITE, false).await.unwrap();

        assert!(cache.deepen(SITE, 3, 100).await.unwrap().is_none());

        fetcher.insert("https://x.test/contact", page("Contact", &[]));
        fetcher.insert(SITE, page("Home", &["/about", "/faq", "/contact"]));
        let deeper = cache.deepen(SITE, 3, 100).await.unwrap().unwrap();
        assert_eq!(deeper.section_count, 4);
        assert_eq!(cache.entry(SITE).await.unwrap().section_count, 4);
    }

    #[tokio::test]
    async fn site_locks_are_released_after_use() {
        let fetcher = site();
        let cache = cache(fetcher.clone(), Arc::new(ManualClock::new(Utc::now())));

        let (a, b) = tokio::join!(
            cache.get_context(SITE, false),
            cache.get_context(SITE, false)
        );
        a.unwrap();
        b.unwrap();
        cache.deepen(SITE, 3, 100).await.unwrap();
        cache.get_context(SITE, true).await.unwrap();

        assert!(cache.site_locks.lock().await.is_empty());
    }

    #[test]
    fn oversized_ttl_saturates() {
        let mut config = AppConfig::default();
        config.scan.cache_ttl_hours = u64::MAX;
        assert_eq!(ScanSettings::from(&config).ttl, Duration::MAX);
    }

    #[tokio::test]
    async fn invalid_site_url_is_error() {
        let cache = cache(site(), Arc::new(ManualClock::new(Utc::now())));
        assert!(cache.get_context("not a url", false).await.is_err());
    }
}
