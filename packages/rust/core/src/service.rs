//! Top-level entry point: one shared context cache, many conversations.

use std::sync::Arc;

use tracing::{info, instrument};

use sitechat_crawler::{CrawlProgress, Crawler, Fetcher, HttpFetcher, SilentProgress};
use sitechat_shared::{AppConfig, CrawlConfig, Result, ScanResult};

use crate::assembler::ContextAssembler;
use crate::cache::{ContextCache, ScanSettings};
use crate::clock::{Clock, SystemClock};
use crate::delivery::{Notifier, notifier_from_config};
use crate::escalation::EscalationPolicy;
use crate::generation::{Generator, OpenRouterGenerator};
use crate::sentiment::SentimentClassifier;
use crate::session::{Conversation, ConversationSettings, SessionDeps};

/// External collaborators, swappable for tests.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub generator: Arc<dyn Generator>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub progress: Arc<dyn CrawlProgress>,
}

impl Collaborators {
    /// HTTP fetcher, OpenRouter generator and EmailJS (or logging) delivery.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let crawl = CrawlConfig::from(config);
        Ok(Self {
            fetcher: Arc::new(HttpFetcher::new(crawl.fetch_timeout)?),
            generator: Arc::new(OpenRouterGenerator::new(config.generation.clone())?),
            notifier: notifier_from_config(&config.delivery),
            clock: Arc::new(SystemClock),
            progress: Arc::new(SilentProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn CrawlProgress>) -> Self {
        self.progress = progress;
        self
    }
}

/// Website chat service.
pub struct SiteChat {
    cache: Arc<ContextCache>,
    deps: SessionDeps,
}

impl SiteChat {
    /// Compile rules from `config` and wire up the collaborators.
    ///
    /// Fails on out-of-range settings or invalid escalation rules.
    pub fn new(config: &AppConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let crawler = Crawler::new(CrawlConfig::from(config), collaborators.fetcher)
            .with_progress(collaborators.progress);
        let cache = Arc::new(ContextCache::new(
            crawler,
            ContextAssembler::from(&config.context),
            ScanSettings::from(config),
            Arc::clone(&collaborators.clock),
        ));

        let deps = SessionDeps {
            cache: Arc::clone(&cache),
            generator: collaborators.generator,
            notifier: collaborators.notifier,
            clock: collaborators.clock,
            policy: EscalationPolicy::from_rules(&config.escalation)?,
            classifier: SentimentClassifier::new(&config.sentiment),
            settings: ConversationSettings::from(config),
        };

        Ok(Self { cache, deps })
    }

    /// Production wiring from config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(config, Collaborators::from_config(config)?)
    }

    /// Scan (or serve from cache) the context for `site_url`.
    #[instrument(skip_all, fields(site = %site_url, force = force))]
    pub async fn scan(&self, site_url: &str, force: bool) -> Result<ScanResult> {
        let result = self.cache.get_context(site_url, force).await?;
        info!(
            sections = result.section_count,
            from_cache = result.from_cache,
            "scan complete"
        );
        Ok(result)
    }

    /// Start a conversation about `site_url`.
    pub fn open_session(&self, site_url: &str) -> Result<Conversation> {
        let conversation = Conversation::new(site_url, self.deps.clone())?;
        info!(session = %conversation.id(), site = %conversation.site_url(), "session opened");
        Ok(conversation)
    }

    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }
}
