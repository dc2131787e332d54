//! Shared types, error model, and configuration for SiteChat.
//!
//! This crate is the foundation depended on by all other SiteChat crates.
//! It provides:
//! - [`SiteChatError`]: the unified error type
//! - Domain types ([`Section`], [`ContextCacheEntry`], [`ConversationTurn`], [`ScanResult`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ContextConfig, CrawlConfig, CrawlPoliciesConfig, DeliveryConfig, EscalationRules,
    GenerationConfig, ScanConfig, SentimentRules, config_dir, config_file_path,
    generation_api_key, init_config, load_config, load_config_from,
};
pub use error::{Result, SiteChatError};
pub use types::{ContextCacheEntry, ConversationTurn, ScanResult, Section, SessionId};
