//! Conversation sessions.
//!
//! A [`Conversation`] is bound to one site. Each [`Conversation::ask`]
//! refreshes the context when it has expired, generates a reply from the
//! context prompt and a bounded window of prior turns, then runs the
//! escalation state machine over the query.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use sitechat_crawler::normalize_url;
use sitechat_shared::{AppConfig, ConversationTurn, Result, SessionId};

use crate::assembler::default_persona_prompt;
use crate::cache::ContextCache;
use crate::clock::Clock;
use crate::delivery::{EscalationNotice, Notifier};
use crate::escalation::{
    EscalationAction, EscalationPolicy, EscalationState, REQUEST_VALID_EMAIL,
    delivery_apology, delivery_confirmation,
};
use crate::generation::{GenerationRequest, Generator};
use crate::sentiment::{Sentiment, SentimentClassifier};

/// Reply when the generator could not produce an answer.
pub const GENERATION_APOLOGY: &str = "I'm having trouble accessing my knowledge base right now. \
     For specific questions, please try again in a moment or ask to speak with a team member for \
     immediate assistance.";

const ADDITIONAL_INSTRUCTIONS: &str = "Additional instructions:
1. Be conversational and helpful like a human customer service agent.
2. Show empathy when users express frustration or confusion.
3. Use natural language that's professional but not overly formal.
4. If you can't help with a specific request, suggest what the user might do next.
5. Avoid saying 'As an AI' or referring to yourself as a bot or AI.
";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Session-level knobs derived from [`AppConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ConversationSettings {
    pub deep_scan_depth: u32,
    pub deep_scan_max_pages: usize,
    /// A refresh yielding fewer sections than this triggers a deeper crawl.
    pub deep_scan_threshold: usize,
    pub ttl: Duration,
    pub history_window: usize,
    /// Never below `history_window`.
    pub max_history: usize,
}

impl From<&AppConfig> for ConversationSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            deep_scan_depth: config.scan.deep_scan_depth,
            deep_scan_max_pages: config.scan.deep_scan_max_pages,
            deep_scan_threshold: config.scan.deep_scan_threshold,
            ttl: config.scan.cache_ttl().unwrap_or(Duration::MAX),
            history_window: config.context.history_window,
            max_history: config.context.max_history.max(config.context.history_window),
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Shared collaborators and compiled rules a session runs with.
#[derive(Clone)]
pub struct SessionDeps {
    pub cache: Arc<ContextCache>,
    pub generator: Arc<dyn Generator>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub policy: EscalationPolicy,
    pub classifier: SentimentClassifier,
    pub settings: ConversationSettings,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Answer to one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub response: String,
    pub source: String,
}

/// Snapshot of a session for liveness reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub site_url: String,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub section_count: usize,
    pub turns: usize,
    pub escalation: EscalationState,
}

/// A sequential conversation with one site.
pub struct Conversation {
    id: SessionId,
    site_url: String,
    deps: SessionDeps,
    prompt: String,
    section_count: usize,
    last_scan_at: Option<DateTime<Utc>>,
    history: Vec<ConversationTurn>,
    escalation: EscalationState,
}

impl Conversation {
    /// Open a session; no scan happens until the first `ask`.
    pub fn new(site_url: &str, deps: SessionDeps) -> Result<Self> {
        let site_url = normalize_url(site_url)?;
        Ok(Self {
            id: SessionId::new(),
            prompt: default_persona_prompt(&site_url),
            site_url,
            deps,
            section_count: 0,
            last_scan_at: None,
            history: Vec::new(),
            escalation: EscalationState::default(),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// The most recent turns, as replayed to the generator.
    pub fn history_window(&self) -> &[ConversationTurn] {
        let start = self
            .history
            .len()
            .saturating_sub(self.deps.settings.history_window);
        &self.history[start..]
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            site_url: self.site_url.clone(),
            last_scan_at: self.last_scan_at,
            section_count: self.section_count,
            turns: self.history.len(),
            escalation: self.escalation,
        }
    }

    /// Answer `query`. Never fails: generation and delivery problems turn
    /// into fixed response texts.
    #[instrument(skip_all, fields(session = %self.id, site = %self.site_url))]
    pub async fn ask(&mut self, query: &str) -> Reply {
        self.refresh_if_needed().await;

        let sentiment = self.deps.classifier.classify(query);
        let mut reply = self.generate(query, sentiment).await;

        let action = self.deps.policy.evaluate(query, &self.history, self.escalation);
        match &action {
            EscalationAction::None => {}
            EscalationAction::Offer(trigger) => {
                info!(trigger = trigger.as_str(), "offering human handoff");
                reply.response.push_str(trigger.message());
            }
            EscalationAction::Deliver(email) => {
                reply.response = self.deliver(email, query).await;
            }
            EscalationAction::RequestValidEmail => {
                info!("no valid email in reply, asking again");
                reply.response = REQUEST_VALID_EMAIL.to_string();
            }
        }
        self.escalation = self.escalation.transition(&action);

        self.history.push(ConversationTurn {
            query: query.to_string(),
            response: reply.response.clone(),
            timestamp: self.deps.clock.now(),
            escalation_requested: self.escalation.is_requested(),
        });
        let overflow = self
            .history
            .len()
            .saturating_sub(self.deps.settings.max_history);
        self.history.drain(..overflow);

        reply
    }

    fn is_expired(&self) -> bool {
        self.last_scan_at
            .is_none_or(|at| self.deps.clock.now() - at >= self.deps.settings.ttl)
    }

    /// Adopt the shared entry while it is fresh. Otherwise rescan when
    /// expired and widen the crawl once if the rescan came back thin.
    async fn refresh_if_needed(&mut self) {
        match self.deps.cache.entry(&self.site_url).await {
            Some(entry) if self.deps.cache.is_fresh(entry.last_scan_at) => {
                if self.last_scan_at != Some(entry.last_scan_at) {
                    info!(site = %self.site_url, sections = entry.section_count, "using cached context");
                    self.prompt = entry.prompt_text.clone();
                    self.section_count = entry.section_count;
                    self.last_scan_at = Some(entry.last_scan_at);
                }
                return;
            }
            _ => {}
        }
        if !self.is_expired() {
            return;
        }
        info!(site = %self.site_url, "context expired, refreshing");
        self.last_scan_at = Some(self.deps.clock.now());

        // Stale or missing, so this crawls unless a concurrent caller just did.
        let scan = match self.deps.cache.get_context(&self.site_url, false).await {
            Ok(scan) => scan,
            Err(e) => {
                warn!(site = %self.site_url, stage = "scan", error = %e, "refresh failed, keeping current context");
                return;
            }
        };
        if scan.section_count == 0 {
            warn!(site = %self.site_url, "no sections found, keeping current context");
            return;
        }

        self.prompt = scan.prompt_text;
        self.section_count = scan.section_count;
        self.last_scan_at = Some(scan.last_scan_at);

        let settings = self.deps.settings;
        if self.section_count >= settings.deep_scan_threshold {
            return;
        }
        warn!(
            site = %self.site_url,
            sections = self.section_count,
            "thin context, trying deeper scan"
        );
        match self
            .deps
            .cache
            .deepen(
                &self.site_url,
                settings.deep_scan_depth,
                settings.deep_scan_max_pages,
            )
            .await
        {
            Ok(Some(deeper)) => {
                self.prompt = deeper.prompt_text;
                self.section_count = deeper.section_count;
                self.last_scan_at = Some(deeper.last_scan_at);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(site = %self.site_url, stage = "deep_scan", error = %e, "deeper scan failed");
            }
        }
    }

    fn system_prompt(&self, sentiment: Sentiment) -> String {
        format!(
            "{}\n\n{ADDITIONAL_INSTRUCTIONS}6. The user's sentiment appears to be: {sentiment}. \
             Adjust your tone accordingly.\n",
            self.prompt
        )
    }

    async fn generate(&self, query: &str, sentiment: Sentiment) -> Reply {
        let request = GenerationRequest {
            system_prompt: self.system_prompt(sentiment),
            history: self.history_window(),
            query,
            temperature: sentiment.temperature(),
        };

        match self.deps.generator.complete(&request).await {
            Ok(response) => Reply {
                response,
                source: format!("Information from {}", self.site_url),
            },
            Err(e) => {
                warn!(site = %self.site_url, stage = "generation", error = %e, "generation failed");
                Reply {
                    response: GENERATION_APOLOGY.to_string(),
                    source: format!("Limited information from {}", self.site_url),
                }
            }
        }
    }

    async fn deliver(&self, email: &str, query: &str) -> String {
        let notice = EscalationNotice {
            site_url: self.site_url.clone(),
            email: email.to_string(),
            query: query.to_string(),
            transcript: EscalationNotice::transcript(&self.history),
            timestamp: self.deps.clock.now(),
        };

        match self.deps.notifier.notify(&notice).await {
            Ok(()) => {
                info!(email = %email, "escalation delivered");
                delivery_confirmation(email)
            }
            Err(e) => {
                warn!(email = %email, stage = "delivery", error = %e, "escalation delivery failed");
                delivery_apology(email)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ContextAssembler;
    use crate::cache::ScanSettings;
    use crate::clock::ManualClock;
    use crate::test_support::{FixtureFetcher, RecordingNotifier, ScriptedGenerator, page};
    use sitechat_crawler::Crawler;
    use sitechat_shared::{CrawlConfig, SiteChatError};

    const SITE: &str = "https://x.test";

    struct Harness {
        fetcher: Arc<FixtureFetcher>,
        generator: Arc<ScriptedGenerator>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
        conversation: Conversation,
    }

    fn site() -> Arc<FixtureFetcher> {
        FixtureFetcher::new(&[
            (SITE, page("Home", &["/about", "/faq", "/pricing", "/team", "/blog"])),
            ("https://x.test/about", page("About", &[])),
            ("https://x.test/faq", page("FAQ", &[])),
            ("https://x.test/pricing", page("Pricing", &[])),
            ("https://x.test/team", page("Team", &[])),
            ("https://x.test/blog", page("Blog", &[])),
        ])
    }

    fn harness_with(
        fetcher: Arc<FixtureFetcher>,
        notifier: Arc<RecordingNotifier>,
        scan: ScanSettings,
        settings: ConversationSettings,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let generator = ScriptedGenerator::new();
        let cache = Arc::new(ContextCache::new(
            Crawler::new(CrawlConfig::default(), fetcher.clone()),
            ContextAssembler::default(),
            scan,
            clock.clone(),
        ));
        let deps = SessionDeps {
            cache,
            generator: generator.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
            policy: EscalationPolicy::from_rules(&Default::default()).unwrap(),
            classifier: SentimentClassifier::default(),
            settings,
        };
        Harness {
            fetcher,
            generator,
            notifier,
            clock,
            conversation: Conversation::new(SITE, deps).unwrap(),
        }
    }

    fn harness() -> Harness {
        harness_with(
            site(),
            RecordingNotifier::new(),
            ScanSettings::default(),
            ConversationSettings::default(),
        )
    }

    #[tokio::test]
    async fn first_ask_scans_and_answers() {
        let mut h = harness();
        assert!(h.conversation.status().last_scan_at.is_none());

        let reply = h.conversation.ask("do you sell gift cards").await;

        assert_eq!(reply.response, "answer to: do you sell gift cards");
        assert_eq!(reply.source, "Information from https://x.test");
        let status = h.conversation.status();
        assert_eq!(status.section_count, 6);
        assert_eq!(status.turns, 1);
        assert!(status.last_scan_at.is_some());

        let requests = h.generator.requests();
        assert_eq!(requests[0].query, "do you sell gift cards");
        assert!(requests[0].system_prompt.contains("ABOUT THE COMPANY/WEBSITE:"));
        assert!(
            requests[0]
                .system_prompt
                .contains("6. The user's sentiment appears to be: neutral.")
        );

        h.conversation.ask("and birthday cards").await;
        assert_eq!(h.fetcher.fetch_count(SITE), 1);
    }

    #[tokio::test]
    async fn rescans_after_ttl() {
        let mut h = harness();
        h.conversation.ask("do you sell gift cards").await;

        h.clock.advance(Duration::hours(72));
        h.conversation.ask("and birthday cards").await;

        assert_eq!(h.fetcher.fetch_count(SITE), 2);
        assert_eq!(h.conversation.status().last_scan_at, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn fresh_cache_entry_skips_crawl() {
        let mut h = harness();
        let scanned = h.conversation.deps.cache.get_context(SITE, false).await.unwrap();

        h.clock.advance(Duration::hours(1));
        h.conversation.ask("do you sell gift cards").await;

        let status = h.conversation.status();
        assert_eq!(status.section_count, 6);
        assert_eq!(status.last_scan_at, Some(scanned.last_scan_at));
        assert_eq!(h.fetcher.fetch_count(SITE), 1);
    }

    #[tokio::test]
    async fn adopts_newer_shared_scan() {
        let mut h = harness();
        h.conversation.ask("do you sell gift cards").await;

        h.clock.advance(Duration::hours(1));
        h.fetcher.insert("https://x.test/contact", page("Contact", &[]));
        h.fetcher.insert(
            SITE,
            page("Home", &["/about", "/faq", "/pricing", "/team", "/blog", "/contact"]),
        );
        let rescan = h.conversation.deps.cache.get_context(SITE, true).await.unwrap();

        h.conversation.ask("and birthday cards").await;

        let status = h.conversation.status();
        assert_eq!(status.section_count, 7);
        assert_eq!(status.last_scan_at, Some(rescan.last_scan_at));
        assert_eq!(h.fetcher.fetch_count(SITE), 2);
        assert!(
            h.generator.requests()[1]
                .system_prompt
                .contains("CONTENT FROM: https://x.test/contact")
        );
    }

    #[tokio::test]
    async fn email_after_offer_delivers_once() {
        let mut h = harness();

        let offer = h.conversation.ask("can I talk to a human").await;
        assert!(offer.response.ends_with(crate::escalation::Trigger::ExplicitRequest.message()));
        assert!(h.conversation.status().escalation.is_requested());

        let reply = h
            .conversation
            .ask("you can reach me at a.b@example.com")
            .await;

        assert_eq!(reply.response, delivery_confirmation("a.b@example.com"));
        let notices = h.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].email, "a.b@example.com");
        assert_eq!(notices[0].site_url, SITE);
        assert!(notices[0].transcript.starts_with("User: can I talk to a human\nChatbot: "));
        assert_eq!(h.conversation.status().escalation, EscalationState::NotRequested);
        assert!(!h.conversation.history()[1].escalation_requested);
    }

    #[tokio::test]
    async fn malformed_email_reprompts_without_delivery() {
        let mut h = harness();
        h.conversation.ask("can I talk to a human").await;

        let reply = h.conversation.ask("it's bob@example.c").await;

        assert_eq!(reply.response, REQUEST_VALID_EMAIL);
        assert!(h.notifier.notices().is_empty());
        assert!(h.conversation.status().escalation.is_requested());
    }

    #[tokio::test]
    async fn failed_delivery_apologizes_and_resets() {
        let mut h = harness_with(
            site(),
            RecordingNotifier::failing(),
            ScanSettings::default(),
            ConversationSettings::default(),
        );
        h.conversation.ask("can I talk to a human").await;

        let reply = h.conversation.ask("a.b@example.com").await;

        assert_eq!(reply.response, delivery_apology("a.b@example.com"));
        assert_eq!(h.notifier.notices().len(), 1);
        assert_eq!(h.conversation.status().escalation, EscalationState::NotRequested);
    }

    #[tokio::test]
    async fn repeated_question_offers_handoff_on_third_ask() {
        let mut h = harness();
        let q = "what are your opening hours";
        let marker = crate::escalation::Trigger::Repetition.message();

        assert!(!h.conversation.ask(q).await.response.contains(marker));
        assert!(!h.conversation.ask(q).await.response.contains(marker));
        assert!(h.conversation.ask(q).await.response.ends_with(marker));
    }

    #[tokio::test]
    async fn generation_failure_degrades() {
        let mut h = harness();
        h.generator
            .push_reply(Err(SiteChatError::Generation("HTTP 503".into())));

        let reply = h.conversation.ask("do you sell gift cards").await;

        assert_eq!(reply.response, GENERATION_APOLOGY);
        assert_eq!(reply.source, "Limited information from https://x.test");
        assert_eq!(h.conversation.history().len(), 1);
    }

    #[tokio::test]
    async fn urgent_query_lowers_temperature() {
        let mut h = harness();
        h.conversation.ask("I need a refund asap").await;
        h.conversation.ask("what is your address").await;

        let requests = h.generator.requests();
        assert_eq!(requests[0].temperature, 0.3);
        assert_eq!(requests[1].temperature, 0.5);
        assert!(requests[0].system_prompt.contains("appears to be: urgent."));
    }

    #[tokio::test]
    async fn replays_last_five_turns() {
        let mut h = harness();
        for i in 0..7 {
            h.conversation.ask(&format!("question number {i}")).await;
        }

        let lens: Vec<usize> = h.generator.requests().iter().map(|r| r.history_len).collect();
        assert_eq!(lens, vec![0, 1, 2, 3, 4, 5, 5]);
        assert_eq!(h.conversation.history_window().len(), 5);
        assert_eq!(
            h.conversation.history_window()[0].query,
            "question number 2"
        );
    }

    #[tokio::test]
    async fn history_is_capped() {
        let settings = ConversationSettings {
            max_history: 6,
            ..ConversationSettings::default()
        };
        let mut h = harness_with(site(), RecordingNotifier::new(), ScanSettings::default(), settings);
        for i in 0..8 {
            h.conversation.ask(&format!("question number {i}")).await;
        }

        assert_eq!(h.conversation.history().len(), 6);
        assert_eq!(h.conversation.history()[0].query, "question number 2");
    }

    #[tokio::test]
    async fn thin_scan_runs_deeper_crawl() {
        let fetcher = FixtureFetcher::new(&[
            (SITE, page("Home", &["/a", "/b", "/c"])),
            ("https://x.test/a", page("A", &[])),
            ("https://x.test/b", page("B", &[])),
            ("https://x.test/c", page("C", &[])),
        ]);
        let scan = ScanSettings {
            depth: 1,
            ..ScanSettings::default()
        };
        let mut h = harness_with(
            fetcher,
            RecordingNotifier::new(),
            scan,
            ConversationSettings::default(),
        );

        h.conversation.ask("what do you do").await;

        assert_eq!(h.conversation.status().section_count, 4);
        assert_eq!(h.fetcher.fetch_count(SITE), 2);
        assert!(
            h.generator.requests()[0]
                .system_prompt
                .contains("CONTENT FROM: https://x.test/c")
        );
    }

    #[tokio::test]
    async fn empty_site_keeps_persona_prompt() {
        let mut h = harness_with(
            FixtureFetcher::new(&[]),
            RecordingNotifier::new(),
            ScanSettings::default(),
            ConversationSettings::default(),
        );

        h.conversation.ask("hello").await;
        h.conversation.ask("anyone there").await;

        let status = h.conversation.status();
        assert_eq!(status.section_count, 0);
        assert!(status.last_scan_at.is_some());
        assert_eq!(h.fetcher.fetch_count(SITE), 1);
        assert!(
            h.generator.requests()[1]
                .system_prompt
                .starts_with(&default_persona_prompt(SITE))
        );
    }
}
