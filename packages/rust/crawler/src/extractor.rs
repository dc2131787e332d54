//! HTML text extraction.
//!
//! Turns one page's markup into article text: noise elements are detached,
//! the main content container is chosen by visible-text length, and block
//! elements are flattened with separators that keep headings, paragraphs and
//! list items apart.

use std::sync::{Arc, LazyLock};

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use sitechat_shared::{CrawlPoliciesConfig, SiteChatError};
use sitechat_text::collapse_whitespace;

use crate::fetch::Fetcher;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static META_DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).expect("valid selector"));
static BLOCK_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, p, li, div").expect("valid selector")
});

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Compiled selector lists from the crawl policy.
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    noise: Vec<Selector>,
    content: Vec<Selector>,
    chrome: Vec<Selector>,
}

impl ExtractionRules {
    /// Compile the policy's selectors. Invalid selectors are logged and skipped.
    pub fn from_policies(policies: &CrawlPoliciesConfig) -> Self {
        Self {
            noise: compile_selectors(&policies.noise_selectors, "noise"),
            content: compile_selectors(&policies.content_selectors, "content"),
            chrome: compile_selectors(&policies.chrome_selectors, "chrome"),
        }
    }
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self::from_policies(&CrawlPoliciesConfig::default())
    }
}

fn compile_selectors(raw: &[String], kind: &str) -> Vec<Selector> {
    raw.iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                let err = SiteChatError::parse(format!("invalid {kind} selector {s:?}: {e:?}"));
                warn!(stage = "rules", error = %err, "skipping invalid selector");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Extraction result
// ---------------------------------------------------------------------------

/// Text of one page plus the untouched body for link collection.
///
/// A failed fetch yields an empty extraction: no text, no document.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Extracted text (`PAGE TITLE: ...` header included), empty on failure.
    pub text: String,
    /// Why the page produced nothing, when it failed.
    pub failure: Option<String>,
    body: Option<String>,
}

impl Extraction {
    fn failed(reason: String) -> Self {
        Self {
            failure: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Parse the unmodified page body for link collection.
    ///
    /// The returned [`Html`] is not `Send`; drop it before the next `.await`.
    pub fn document(&self) -> Option<Html> {
        self.body.as_deref().map(Html::parse_document)
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Fetches pages and extracts their readable text.
pub struct PageExtractor {
    fetcher: Arc<dyn Fetcher>,
    rules: ExtractionRules,
}

impl PageExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>, rules: ExtractionRules) -> Self {
        Self { fetcher, rules }
    }

    /// Fetch `url` and extract its text. Never fails; see [`Extraction`].
    #[instrument(skip(self), fields(url = %url))]
    pub async fn extract(&self, url: &Url) -> Extraction {
        let body = match self.fetcher.fetch(url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(%url, stage = "fetch", error = %e, "page fetch failed, skipping");
                return Extraction::failed(e.to_string());
            }
        };

        let text = self.extract_text(&body, url);
        Extraction {
            text,
            failure: None,
            body: Some(body),
        }
    }

    /// Extract readable text from already-fetched markup.
    pub fn extract_text(&self, body: &str, url: &Url) -> String {
        let mut doc = Html::parse_document(body);

        let title = page_title(&doc).unwrap_or_else(|| url.to_string());
        let description = meta_description(&doc);

        detach_matching(&mut doc, &self.rules.noise);

        let candidates: Vec<_> = {
            let root = doc.root_element();
            self.rules
                .content
                .iter()
                .flat_map(|sel| root.select(sel))
                .map(|el| (el.id(), visible_text_len(el)))
                .collect()
        };
        let lengths: Vec<usize> = candidates.iter().map(|(_, len)| *len).collect();

        let content = match select_main_content(&lengths).map(|i| candidates[i].0) {
            Some(id) => {
                debug!(%url, candidates = candidates.len(), "found main content section");
                doc.tree
                    .get(id)
                    .and_then(ElementRef::wrap)
                    .map(render_blocks)
                    .unwrap_or_default()
            }
            None => {
                debug!(%url, "no main content section, using full page");
                detach_matching(&mut doc, &self.rules.chrome);
                render_blocks(doc.root_element())
            }
        };

        let mut text = format!("PAGE TITLE: {title}\n\n{content}");
        if let Some(description) = description {
            text.push_str(&format!("\n\nMETA DESCRIPTION: {description}"));
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Content selection
// ---------------------------------------------------------------------------

/// Index of the longest candidate; the earliest candidate wins ties.
pub fn select_main_content(text_lengths: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (index, &len) in text_lengths.iter().enumerate() {
        if best.is_none_or(|(_, best_len)| len > best_len) {
            best = Some((index, len));
        }
    }
    best.map(|(index, _)| index)
}

/// Character count of the element's trimmed text nodes.
fn visible_text_len(el: ElementRef) -> usize {
    el.text().map(|t| t.trim().chars().count()).sum()
}

// ---------------------------------------------------------------------------
// DOM helpers
// ---------------------------------------------------------------------------

fn page_title(doc: &Html) -> Option<String> {
    doc.select(&TITLE_SEL)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn meta_description(doc: &Html) -> Option<String> {
    doc.select(&META_DESCRIPTION_SEL)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Detach every element under the document root that matches a selector.
fn detach_matching(doc: &mut Html, selectors: &[Selector]) {
    let ids: Vec<_> = {
        let root = doc.root_element();
        selectors
            .iter()
            .flat_map(|sel| root.select(sel).map(|el| el.id()))
            .collect()
    };

    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn is_text_block(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "li")
}

fn is_block(name: &str) -> bool {
    is_text_block(name) || name == "div"
}

/// Flatten block elements under `root` into separator-delimited text.
fn render_blocks(root: ElementRef) -> String {
    let mut out = String::new();

    for el in root.select(&BLOCK_SEL) {
        // Text inside a heading/paragraph/list item is emitted by the outermost one.
        let nested = el
            .ancestors()
            .take_while(|a| a.id() != root.id())
            .filter_map(ElementRef::wrap)
            .any(|a| is_text_block(a.value().name()));
        if nested {
            continue;
        }

        let name = el.value().name();
        let text = if name == "div" {
            own_text(el)
        } else {
            element_text(el)
        };
        if text.is_empty() {
            continue;
        }

        match name {
            "p" => {
                out.push_str(&text);
                out.push_str("\n\n");
            }
            "li" => {
                out.push_str("• ");
                out.push_str(&text);
                out.push('\n');
            }
            "div" => {
                out.push_str(&text);
                out.push(' ');
            }
            _ => {
                out.push_str("\n\n");
                out.push_str(&text);
                out.push_str("\n\n");
            }
        }
    }

    collapse_whitespace(&out)
}

/// All trimmed text under `el`, space-joined.
fn element_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text under `el` whose nearest enclosing block is `el` itself.
fn own_text(el: ElementRef) -> String {
    el.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let owner = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| is_block(a.value().name()))?;
            (owner.id() == el.id()).then(|| text.trim())
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
