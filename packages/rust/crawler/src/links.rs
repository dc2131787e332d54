//! Same-site link collection and URL normalization.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::trace;
use url::Url;

use sitechat_shared::{Result, SiteChatError};

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static REPEATED_SLASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/{2,}").expect("valid regex"));

/// Canonical string form used for every visited/queued membership test:
/// fragment dropped, trailing slashes stripped.
pub fn canonical_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.as_str().trim_end_matches('/').to_string()
}

/// Parse and canonicalize a user-supplied site URL.
pub fn normalize_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| SiteChatError::validation(format!("invalid site URL {raw:?}: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(canonical_url(&url)),
        other => Err(SiteChatError::validation(format!(
            "unsupported URL scheme {other:?} in {raw:?}"
        ))),
    }
}

fn same_site(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Filters a page's anchors down to same-site, content-worthy URLs.
#[derive(Debug, Clone)]
pub struct LinkCollector {
    /// Lowercased href substrings that disqualify a link.
    skip_patterns: Vec<String>,
}

impl LinkCollector {
    pub fn new(skip_patterns: &[String]) -> Self {
        Self {
            skip_patterns: skip_patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Collect canonical same-site URLs linked from `doc`.
    ///
    /// Dedup against visited/queued URLs is left to the scheduler.
    pub fn collect(&self, doc: &Html, base: &Url) -> BTreeSet<String> {
        let mut links = BTreeSet::new();

        for el in doc.select(&LINK_SEL) {
            let Some(href) = el.value().attr("href").map(str::trim) else {
                continue;
            };
            if href.is_empty() || self.is_skipped(href) {
                continue;
            }

            let resolved = if href.starts_with("http://") || href.starts_with("https://") {
                Url::parse(href)
            } else {
                base.join(&REPEATED_SLASH_RE.replace_all(href, "/"))
            };

            match resolved {
                Ok(url) if same_site(&url, base) => {
                    links.insert(canonical_url(&url));
                }
                Ok(url) => trace!(%url, "skipping off-site link"),
                Err(e) => trace!(href, error = %e, "skipping unresolvable link"),
            }
        }

        links
    }

    fn is_skipped(&self, href: &str) -> bool {
        let href = href.to_lowercase();
        self.skip_patterns.iter().any(|p| href.contains(p.as_str()))
    }
}

impl Default for LinkCollector {
    fn default() -> Self {
        Self::new(&sitechat_shared::CrawlPoliciesConfig::default().skip_patterns)
    }
}
