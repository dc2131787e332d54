//! Site crawling and page text extraction.
//!
//! This crate provides:
//! - [`Fetcher`] / [`HttpFetcher`]: the fetch collaborator
//! - [`PageExtractor`]: noise stripping, main-content selection, block flattening
//! - [`LinkCollector`]: same-site link filtering and URL canonicalization
//! - [`Crawler`]: sequential breadth-first crawl with important-path priority

mod extractor;
mod fetch;
mod links;
mod scheduler;

pub use extractor::{Extraction, ExtractionRules, PageExtractor, select_main_content};
pub use fetch::{Fetcher, HttpFetcher};
pub use links::{LinkCollector, canonical_url, normalize_url};
pub use scheduler::{CrawlProgress, CrawlReport, CrawlState, Crawler, SilentProgress};
