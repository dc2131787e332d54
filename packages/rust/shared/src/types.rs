//! Core domain types shared by the crawler, cache and conversation layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for conversation session identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Section
// ---------------------------------------------------------------------------

/// Extracted content of one scanned page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Display title (`Content from <url>`).
    pub title: String,
    /// Stopword-filtered, lemmatized text.
    pub normalized_content: String,
    /// Extracted page text, including the `PAGE TITLE:` header.
    pub raw_content: String,
    /// Normalized URL the page was fetched from.
    pub source_url: String,
}

impl Section {
    /// Build a section for `url`, titled the way the assembler expects.
    pub fn new(url: &str, raw_content: String, normalized_content: String) -> Self {
        Self {
            title: format!("Content from {url}"),
            normalized_content,
            raw_content,
            source_url: url.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ContextCacheEntry
// ---------------------------------------------------------------------------

/// The assembled context for one site, as held by the context cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCacheEntry {
    /// Normalized site URL (cache key).
    pub site_url: String,
    /// Assembled prompt text.
    pub prompt_text: String,
    /// Number of sections the prompt was built from.
    pub section_count: usize,
    /// When the scan that produced this entry finished.
    pub last_scan_at: DateTime<Utc>,
    /// The sections themselves, kept for rebuilding and inspection.
    pub sections: Vec<Section>,
}

// ---------------------------------------------------------------------------
// ScanResult
// ---------------------------------------------------------------------------

/// Result of a `scan` request against the context cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub prompt_text: String,
    pub section_count: usize,
    pub last_scan_at: DateTime<Utc>,
    /// `true` when served from a fresh cache entry without crawling.
    pub from_cache: bool,
}

impl ScanResult {
    /// View a stored cache entry as a scan result.
    pub fn from_entry(entry: &ContextCacheEntry, from_cache: bool) -> Self {
        Self {
            prompt_text: entry.prompt_text.clone(),
            section_count: entry.section_count,
            last_scan_at: entry.last_scan_at,
            from_cache,
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationTurn
// ---------------------------------------------------------------------------

/// One query/response exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    /// Escalation flag as it stood after this turn was processed.
    pub escalation_requested: bool,
}
