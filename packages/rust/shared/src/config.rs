//! Application configuration for SiteChat.
//!
//! User config lives at `~/.sitechat/sitechat.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! Every keyword, phrase and selector list the crawler and the conversation
//! layer consult is declared here, so tuning them never touches control flow.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteChatError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitechat.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitechat";

// ---------------------------------------------------------------------------
// Config structs (matching sitechat.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scan budgets and cache freshness.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Crawl policies (priority paths, skip list, selectors).
    #[serde(default)]
    pub crawl_policies: CrawlPoliciesConfig,

    /// Prompt assembly and history limits.
    #[serde(default)]
    pub context: ContextConfig,

    /// Generation collaborator settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Escalation delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Escalation trigger rules.
    #[serde(default)]
    pub escalation: EscalationRules,

    /// Sentiment keyword lists.
    #[serde(default)]
    pub sentiment: SentimentRules,
}

impl AppConfig {
    /// Reject values that cannot be represented at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.scan.cache_ttl().is_none() {
            return Err(SiteChatError::config(format!(
                "scan.cache_ttl_hours is out of range: {}",
                self.scan.cache_ttl_hours
            )));
        }
        Ok(())
    }
}

/// `[scan]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Depth passed to the scheduler for a regular scan.
    #[serde(default = "default_scan_depth")]
    pub depth: u32,

    /// Page budget for a regular scan.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Depth for the session's deeper recrawl.
    #[serde(default = "default_scan_depth")]
    pub deep_scan_depth: u32,

    /// Page budget for the session's deeper recrawl.
    #[serde(default = "default_deep_scan_max_pages")]
    pub deep_scan_max_pages: usize,

    /// A rescan yielding fewer sections than this triggers the deeper recrawl.
    #[serde(default = "default_deep_scan_threshold")]
    pub deep_scan_threshold: usize,

    /// A crawl yielding fewer sections than this tries the fallback paths.
    #[serde(default = "default_thin_content_threshold")]
    pub thin_content_threshold: usize,

    /// Cache freshness window in hours.
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,

    /// Per-page fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Stop a crawl before the next fetch once this many seconds have elapsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            depth: default_scan_depth(),
            max_pages: default_max_pages(),
            deep_scan_depth: default_scan_depth(),
            deep_scan_max_pages: default_deep_scan_max_pages(),
            deep_scan_threshold: default_deep_scan_threshold(),
            thin_content_threshold: default_thin_content_threshold(),
            cache_ttl_hours: default_cache_ttl_hours(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            time_budget_secs: None,
        }
    }
}

impl ScanConfig {
    /// `cache_ttl_hours` as a duration, or `None` when it is out of range.
    pub fn cache_ttl(&self) -> Option<TimeDelta> {
        i64::try_from(self.cache_ttl_hours)
            .ok()
            .and_then(TimeDelta::try_hours)
    }
}

fn default_scan_depth() -> u32 {
    3
}
fn default_max_pages() -> usize {
    200
}
fn default_deep_scan_max_pages() -> usize {
    100
}
fn default_deep_scan_threshold() -> usize {
    5
}
fn default_thin_content_threshold() -> usize {
    3
}
fn default_cache_ttl_hours() -> u64 {
    72
}
fn default_fetch_timeout_secs() -> u64 {
    15
}

/// `[crawl_policies]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// Path fragments whose URLs are dequeued ahead of everything else.
    #[serde(default = "default_important_paths")]
    pub important_paths: Vec<String>,

    /// Paths appended to the base URL when a crawl finds too little content.
    #[serde(default = "default_fallback_paths")]
    pub fallback_paths: Vec<String>,

    /// Href substrings that disqualify a link.
    #[serde(default = "default_skip_patterns")]
    pub skip_patterns: Vec<String>,

    /// Elements removed before text extraction.
    #[serde(default = "default_noise_selectors")]
    pub noise_selectors: Vec<String>,

    /// Candidate main-content containers, in priority order.
    #[serde(default = "default_content_selectors")]
    pub content_selectors: Vec<String>,

    /// Page chrome removed when no content container matches.
    #[serde(default = "default_chrome_selectors")]
    pub chrome_selectors: Vec<String>,
}

impl Default for CrawlPoliciesConfig {
    fn default() -> Self {
        Self {
            important_paths: default_important_paths(),
            fallback_paths: default_fallback_paths(),
            skip_patterns: default_skip_patterns(),
            noise_selectors: default_noise_selectors(),
            content_selectors: default_content_selectors(),
            chrome_selectors: default_chrome_selectors(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_important_paths() -> Vec<String> {
    strings(&[
        "/about",
        "/about-us",
        "/contact",
        "/faq",
        "/products",
        "/services",
        "/company",
    ])
}
fn default_fallback_paths() -> Vec<String> {
    strings(&["/about", "/about-us", "/company", "/products"])
}
fn default_skip_patterns() -> Vec<String> {
    strings(&[
        ".jpg",
        ".jpeg",
        ".png",
        ".gif",
        ".pdf",
        ".zip",
        ".doc",
        ".docx",
        "#",
        "mailto:",
        "tel:",
        "javascript:",
        "/tag/",
        "/category/",
        "/author/",
        "/wp-content/",
        "/wp-admin/",
    ])
}
fn default_noise_selectors() -> Vec<String> {
    strings(&[
        "script",
        "style",
        "noscript",
        "iframe",
        "img",
        "svg",
        "nav",
        "footer",
        r#"[class*="footer"]"#,
        r#"[class*="sidebar"]"#,
        r#"[class*="widget"]"#,
        r#"[class*="banner"]"#,
        r#"[class*="ad-"]"#,
        r#"[id*="ad-"]"#,
    ])
}
fn default_content_selectors() -> Vec<String> {
    strings(&[
        "main",
        "article",
        r#"[role="main"]"#,
        ".content",
        "#content",
        ".main",
        "#main",
        ".post",
        ".entry",
        ".page-content",
        r#"[class*="content"]"#,
        r#"[id*="content"]"#,
    ])
}
fn default_chrome_selectors() -> Vec<String> {
    strings(&[
        "header",
        "nav",
        r#"[class*="nav"]"#,
        r#"[class*="menu"]"#,
        r#"[id*="menu"]"#,
    ])
}

/// `[context]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum about-page sections emitted under the ABOUT heading.
    #[serde(default = "default_max_about_sections")]
    pub max_about_sections: usize,

    /// Maximum non-about URL groups emitted as `CONTENT FROM` blocks.
    #[serde(default = "default_max_content_groups")]
    pub max_content_groups: usize,

    /// Number of most recent turns replayed to the generator.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Turns retained in memory per session; older turns are evicted.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_about_sections: default_max_about_sections(),
            max_content_groups: default_max_content_groups(),
            history_window: default_history_window(),
            max_history: default_max_history(),
        }
    }
}

fn default_max_about_sections() -> usize {
    3
}
fn default_max_content_groups() -> usize {
    30
}
fn default_history_window() -> usize {
    5
}
fn default_max_history() -> usize {
    200
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Chat model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// OpenAI-compatible API root.
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Request timeout in seconds.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_generation_base_url(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_generation_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_top_p() -> f32 {
    0.95
}
fn default_max_output_tokens() -> u32 {
    800
}
fn default_generation_timeout_secs() -> u64 {
    60
}

/// `[delivery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// EmailJS send endpoint.
    #[serde(default = "default_delivery_endpoint")]
    pub endpoint: String,

    /// EmailJS service id. Delivery is logged only while this is empty.
    #[serde(default)]
    pub service_id: String,

    /// EmailJS template id.
    #[serde(default)]
    pub template_id: String,

    /// Name of the env var holding the EmailJS public key.
    #[serde(default = "default_public_key_env")]
    pub public_key_env: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_delivery_endpoint(),
            service_id: String::new(),
            template_id: String::new(),
            public_key_env: default_public_key_env(),
        }
    }
}

impl DeliveryConfig {
    /// Whether enough is configured to attempt real delivery.
    pub fn is_configured(&self) -> bool {
        !self.service_id.is_empty() && !self.template_id.is_empty()
    }
}

fn default_delivery_endpoint() -> String {
    "https://api.emailjs.com/api/v1.0/email/send".into()
}
fn default_public_key_env() -> String {
    "EMAILJS_PUBLIC_KEY".into()
}

/// `[escalation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRules {
    /// Phrases that count as an explicit request for a human.
    #[serde(default = "default_escalation_keywords")]
    pub keywords: Vec<String>,

    /// Regexes matched against the raw (case-preserved) query.
    #[serde(default = "default_frustration_patterns")]
    pub frustration_patterns: Vec<String>,

    /// Pattern an email address must match to be accepted.
    #[serde(default = "default_email_pattern")]
    pub email_pattern: String,

    /// Prior turns after which a human handoff is offered proactively.
    #[serde(default = "default_long_conversation_turns")]
    pub long_conversation_turns: usize,

    /// Jaccard word-set similarity above which a query counts as repeated.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Number of most recent queries compared for repetition.
    #[serde(default = "default_repetition_window")]
    pub repetition_window: usize,

    /// Prior turns required before repetition is evaluated at all.
    #[serde(default = "default_repetition_min_history")]
    pub repetition_min_history: usize,
}

impl Default for EscalationRules {
    fn default() -> Self {
        Self {
            keywords: default_escalation_keywords(),
            frustration_patterns: default_frustration_patterns(),
            email_pattern: default_email_pattern(),
            long_conversation_turns: default_long_conversation_turns(),
            similarity_threshold: default_similarity_threshold(),
            repetition_window: default_repetition_window(),
            repetition_min_history: default_repetition_min_history(),
        }
    }
}

fn default_escalation_keywords() -> Vec<String> {
    strings(&[
        "speak to a human",
        "talk to a human",
        "speak to a person",
        "talk to a person",
        "speak to someone",
        "talk to someone",
        "speak to an agent",
        "talk to an agent",
        "speak to a representative",
        "talk to a representative",
        "speak to a team member",
        "talk to a team member",
        "speak to staff",
        "talk to staff",
        "contact me",
        "get in touch with me",
        "call me",
        "email me",
        "real person",
        "real human",
        "not helpful",
        "useless",
        "unhelpful",
        "not working",
        "frustrated",
        "annoying",
        "doesn't work",
        "doesn't understand",
        "don't understand",
        "stupid",
        "can't help",
        "manager",
        "supervisor",
        "human support",
        "live chat",
        "wrong",
        "incorrect",
        "not what i asked",
        "not answering",
        "waste of time",
        "terrible",
        "awful",
        "ridiculous",
        "joke",
        "terrible service",
        "poor service",
        "not satisfied",
        "agent",
        "representative",
        "customer service",
        "help desk",
        "support team",
    ])
}
fn default_frustration_patterns() -> Vec<String> {
    strings(&[
        r"\?{2,}",
        r"!{2,}",
        r"[A-Z]{3,}",
        r"\bWHY\b",
        r"\bNOT\b",
        r"\bCAN'T\b",
        r"\bHELP\b",
    ])
}
fn default_email_pattern() -> String {
    r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}".into()
}
fn default_long_conversation_turns() -> usize {
    5
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_repetition_window() -> usize {
    3
}
fn default_repetition_min_history() -> usize {
    2
}

/// `[sentiment]` section. Lists are matched as lowercase substrings,
/// except `curious`, which is matched as a prefix of the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentRules {
    #[serde(default = "default_urgent")]
    pub urgent: Vec<String>,
    #[serde(default = "default_frustrated")]
    pub frustrated: Vec<String>,
    #[serde(default = "default_confused")]
    pub confused: Vec<String>,
    #[serde(default = "default_happy")]
    pub happy: Vec<String>,
    #[serde(default = "default_curious")]
    pub curious: Vec<String>,
}

impl Default for SentimentRules {
    fn default() -> Self {
        Self {
            urgent: default_urgent(),
            frustrated: default_frustrated(),
            confused: default_confused(),
            happy: default_happy(),
            curious: default_curious(),
        }
    }
}

fn default_urgent() -> Vec<String> {
    strings(&[
        "asap",
        "urgent",
        "immediately",
        "emergency",
        "right now",
        "hurry",
        "quickly",
    ])
}
fn default_frustrated() -> Vec<String> {
    strings(&[
        "not working",
        "doesn't work",
        "doesn't help",
        "unhelpful",
        "frustrated",
        "annoying",
        "useless",
        "waste",
        "terrible",
        "awful",
        "stupid",
    ])
}
fn default_confused() -> Vec<String> {
    strings(&[
        "don't understand",
        "confused",
        "unclear",
        "what do you mean",
        "how does",
        "explain",
    ])
}
fn default_happy() -> Vec<String> {
    strings(&[
        "thanks",
        "thank you",
        "great",
        "awesome",
        "excellent",
        "helpful",
        "good",
    ])
}
fn default_curious() -> Vec<String> {
    strings(&[
        "how",
        "what",
        "where",
        "when",
        "why",
        "who",
        "can you",
        "is there",
        "tell me",
    ])
}

// ---------------------------------------------------------------------------
// Runtime crawl config (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration handed to the crawler.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Per-page fetch timeout.
    pub fetch_timeout: Duration,
    /// Fewer sections than this triggers the fallback paths.
    pub thin_content_threshold: usize,
    /// Optional wall-clock limit checked between fetches.
    pub time_budget: Option<Duration>,
    /// Priority paths, skip list and selectors.
    pub policies: CrawlPoliciesConfig,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.scan.fetch_timeout_secs),
            thin_content_threshold: config.scan.thin_content_threshold,
            time_budget: config.scan.time_budget_secs.map(Duration::from_secs),
            policies: config.crawl_policies.clone(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitechat/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SiteChatError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitechat/sitechat.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SiteChatError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| SiteChatError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SiteChatError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteChatError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SiteChatError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the generation API key from the env var named in the config.
pub fn generation_api_key(config: &GenerationConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(SiteChatError::config(format!(
            "generation API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("important_paths"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("cache_ttl_hours"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scan.depth, 3);
        assert_eq!(parsed.scan.max_pages, 200);
        assert_eq!(parsed.scan.cache_ttl_hours, 72);
        assert_eq!(parsed.context.max_content_groups, 30);
        assert_eq!(parsed.escalation.keywords.len(), config.escalation.keywords.len());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml_str = r#"
[scan]
max_pages = 25

[escalation]
keywords = ["operator please"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scan.max_pages, 25);
        assert_eq!(config.scan.depth, 3);
        assert_eq!(config.escalation.keywords, vec!["operator please".to_string()]);
        assert_eq!(config.escalation.repetition_window, 3);
        assert!(config.crawl_policies.important_paths.contains(&"/faq".to_string()));
    }

    #[test]
    fn crawl_config_from_app_config() {
        let mut app = AppConfig::default();
        app.scan.time_budget_secs = Some(30);
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.fetch_timeout, Duration::from_secs(15));
        assert_eq!(crawl.thin_content_threshold, 3);
        assert_eq!(crawl.time_budget, Some(Duration::from_secs(30)));
    }

    #[test]
    fn out_of_range_ttl_is_config_error() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.cache_ttl(), Some(TimeDelta::hours(72)));

        config.scan.cache_ttl_hours = u64::MAX;
        assert!(config.scan.cache_ttl().is_none());
        assert!(matches!(config.validate(), Err(SiteChatError::Config { .. })));

        let parsed: AppConfig =
            toml::from_str("[scan]\ncache_ttl_hours = 9223372036854775807\n").expect("parse");
        assert!(parsed.scan.cache_ttl().is_none());
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn delivery_unconfigured_by_default() {
        let config = DeliveryConfig::default();
        assert!(!config.is_configured());
    }

    #[test]
    fn api_key_lookup_fails_when_unset() {
        let config = GenerationConfig {
            // Unique name so the test never collides with a real env var
            api_key_env: "SITECHAT_TEST_NONEXISTENT_KEY_12345".into(),
            ..GenerationConfig::default()
        };
        let result = generation_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
