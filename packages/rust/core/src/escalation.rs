//! Human-handoff escalation.
//!
//! A session is in one of two [`EscalationState`]s. Each query is evaluated
//! by [`EscalationPolicy::evaluate`], a pure function of the query, the prior
//! history and the current state, into an [`EscalationAction`]. The session
//! performs the action and then applies [`EscalationState::transition`].

use std::collections::HashSet;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use sitechat_shared::{ConversationTurn, EscalationRules, Result, SiteChatError};

/// Re-prompt sent when an address-like reply has no valid email in it.
pub const REQUEST_VALID_EMAIL: &str = "I couldn't detect a valid email address. Could you please \
     provide your email address so our team can contact you? For example: yourname@example.com";

/// Reply after the escalation notice was delivered.
pub fn delivery_confirmation(email: &str) -> String {
    format!(
        "Thank you! A team member will contact you at {email} shortly. Your conversation has \
         been forwarded to our support team."
    )
}

/// Reply when delivering the escalation notice failed.
pub fn delivery_apology(email: &str) -> String {
    format!(
        "Thank you for providing your email address ({email}). However, there was an issue \
         sending the notification. A team member will review this conversation and contact you \
         as soon as possible."
    )
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Why a human handoff is being offered, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    LongConversation,
    Repetition,
    ExplicitRequest,
    Frustration,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LongConversation => "long_conversation",
            Self::Repetition => "repetition",
            Self::ExplicitRequest => "explicit_request",
            Self::Frustration => "frustration",
        }
    }

    /// Offer text appended to the generated response.
    pub fn message(&self) -> &'static str {
        match self {
            Self::LongConversation => {
                "\n\nI notice we've been talking for a while. Would you like me to connect you \
                 with a team member who might be able to help further? If so, please provide \
                 your email address, and someone will reach out to you directly."
            }
            Self::Repetition => {
                "\n\nI notice I may not be addressing your question adequately. Would you like \
                 to speak with a team member who can help you more directly? If so, please \
                 share your email address, and someone will contact you soon."
            }
            Self::ExplicitRequest => {
                "\n\nI'd be happy to connect you with a team member. Please provide your email \
                 address, and someone will contact you shortly."
            }
            Self::Frustration => {
                "\n\nI understand this might be frustrating. Would you like to speak with a \
                 team member directly? If so, please provide your email address, and someone \
                 will contact you soon."
            }
        }
    }
}

/// Whether a human handoff has been offered and is awaiting an email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    #[default]
    NotRequested,
    Requested,
}

/// What the session should do about escalation for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationAction {
    None,
    /// Append the trigger's offer to the response.
    Offer(Trigger),
    /// Send the transcript for this address.
    Deliver(String),
    /// Ask again for a usable address.
    RequestValidEmail,
}

impl EscalationState {
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Requested)
    }

    /// | state        | action            | next         |
    /// |--------------|-------------------|--------------|
    /// | NotRequested | Offer             | Requested    |
    /// | Requested    | Deliver           | NotRequested |
    /// | any          | None / RequestValidEmail | unchanged |
    pub fn transition(self, action: &EscalationAction) -> Self {
        match (self, action) {
            (Self::NotRequested, EscalationAction::Offer(_)) => Self::Requested,
            (Self::Requested, EscalationAction::Deliver(_)) => Self::NotRequested,
            (state, _) => state,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Compiled escalation rules.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    keywords: Vec<String>,
    frustration: Vec<Regex>,
    email: Regex,
    long_conversation_turns: usize,
    similarity_threshold: f64,
    repetition_window: usize,
    repetition_min_history: usize,
}

impl EscalationPolicy {
    /// Compile `rules`. An invalid frustration pattern is logged and skipped;
    /// an invalid email pattern is a config error.
    pub fn from_rules(rules: &EscalationRules) -> Result<Self> {
        let frustration = rules
            .frustration_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "skipping invalid frustration pattern");
                    None
                }
            })
            .collect();

        let email = Regex::new(&rules.email_pattern)
            .map_err(|e| SiteChatError::config(format!("invalid escalation.email_pattern: {e}")))?;

        Ok(Self {
            keywords: rules.keywords.iter().map(|k| k.to_lowercase()).collect(),
            frustration,
            email,
            long_conversation_turns: rules.long_conversation_turns,
            similarity_threshold: rules.similarity_threshold,
            repetition_window: rules.repetition_window,
            repetition_min_history: rules.repetition_min_history,
        })
    }

    /// Decide the escalation action for `query`, given the turns before it.
    pub fn evaluate(
        &self,
        query: &str,
        history: &[ConversationTurn],
        state: EscalationState,
    ) -> EscalationAction {
        match state {
            EscalationState::Requested if looks_like_email(query) => {
                match self.extract_email(query) {
                    Some(email) => EscalationAction::Deliver(email),
                    None => EscalationAction::RequestValidEmail,
                }
            }
            EscalationState::Requested => EscalationAction::None,
            EscalationState::NotRequested => self
                .detect_trigger(query, history)
                .map_or(EscalationAction::None, EscalationAction::Offer),
        }
    }

    /// First matching trigger in priority order.
    pub fn detect_trigger(&self, query: &str, history: &[ConversationTurn]) -> Option<Trigger> {
        let lower = query.to_lowercase();

        if history.len() >= self.long_conversation_turns {
            Some(Trigger::LongConversation)
        } else if self.is_repetition(&lower, history) {
            Some(Trigger::Repetition)
        } else if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            Some(Trigger::ExplicitRequest)
        } else if self.frustration.iter().any(|re| re.is_match(query)) {
            Some(Trigger::Frustration)
        } else {
            None
        }
    }

    /// First email address in `text`.
    pub fn extract_email(&self, text: &str) -> Option<String> {
        self.email.find(text).map(|m| m.as_str().to_string())
    }

    fn is_repetition(&self, lower_query: &str, history: &[ConversationTurn]) -> bool {
        if history.len() < self.repetition_min_history {
            return false;
        }
        history
            .iter()
            .rev()
            .take(self.repetition_window)
            .any(|turn| {
                jaccard_similarity(lower_query, &turn.query.to_lowercase())
                    > self.similarity_threshold
            })
    }
}

/// Cheap pre-check: the segment between the first `@` and the next one
/// contains a dot.
fn looks_like_email(text: &str) -> bool {
    text.split('@').nth(1).is_some_and(|domain| domain.contains('.'))
}

/// Jaccard similarity of the whitespace-separated word sets of `a` and `b`.
/// Zero when either side has no words.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn policy() -> EscalationPolicy {
        EscalationPolicy::from_rules(&EscalationRules::default()).unwrap()
    }

    fn turns(queries: &[&str]) -> Vec<ConversationTurn> {
        queries
            .iter()
            .map(|q| ConversationTurn {
                query: q.to_string(),
                response: "ok".into(),
                timestamp: Utc::now(),
                escalation_requested: false,
            })
            .collect()
    }

    #[test]
    fn jaccard_basics() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert_eq!(jaccard_similarity("", "a"), 0.0);
        assert!((jaccard_similarity("a b c d", "a b c e") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn repetition_fires_on_third_query() {
        let policy = policy();
        let q = "what are your opening hours";

        assert_eq!(policy.detect_trigger(q, &[]), None);
        assert_eq!(policy.detect_trigger(q, &turns(&[q])), None);
        assert_eq!(
            policy.detect_trigger(q, &turns(&[q, q])),
            Some(Trigger::Repetition)
        );
    }

    #[test]
    fn repetition_only_looks_at_recent_queries() {
        let policy = policy();
        let history = turns(&[
            "what are your opening hours",
            "do you ship abroad",
            "do you sell gift cards",
            "is parking available",
        ]);
        assert_eq!(
            policy.detect_trigger("what are your opening hours", &history),
            None
        );
    }

    #[test]
    fn trigger_priority_order() {
        let policy = policy();
        let five = turns(&["a", "b", "c", "d", "e"]);
        assert_eq!(
            policy.detect_trigger("talk to a human", &five),
            Some(Trigger::LongConversation)
        );
        assert_eq!(
            policy.detect_trigger("Can I talk to a human please", &[]),
            Some(Trigger::ExplicitRequest)
        );
        assert_eq!(
            policy.detect_trigger("why is this so slow??", &[]),
            Some(Trigger::Frustration)
        );
        assert_eq!(
            policy.detect_trigger("WHY does checkout fail", &[]),
            Some(Trigger::Frustration)
        );
        assert_eq!(policy.detect_trigger("do you sell gift cards", &[]), None);
    }

    #[test]
    fn requested_state_looks_for_email() {
        let policy = policy();
        let requested = EscalationState::Requested;

        assert_eq!(
            policy.evaluate("you can reach me at a.b@example.com", &[], requested),
            EscalationAction::Deliver("a.b@example.com".into())
        );
        assert_eq!(
            policy.evaluate("it's bob@example.c", &[], requested),
            EscalationAction::RequestValidEmail
        );
        assert_eq!(
            policy.evaluate("bob@localhost", &[], requested),
            EscalationAction::None
        );
        assert_eq!(
            policy.evaluate("x@y@z.com", &[], requested),
            EscalationAction::None
        );
        // Triggers are not re-evaluated while a request is pending.
        assert_eq!(
            policy.evaluate("talk to a human NOW!!", &[], requested),
            EscalationAction::None
        );
    }

    #[test]
    fn first_email_wins() {
        let policy = policy();
        assert_eq!(
            policy.extract_email("x@a.io or y@b.io").as_deref(),
            Some("x@a.io")
        );
    }

    #[test]
    fn state_transitions() {
        use EscalationAction as A;
        use EscalationState as S;

        assert_eq!(S::NotRequested.transition(&A::Offer(Trigger::Frustration)), S::Requested);
        assert_eq!(S::NotRequested.transition(&A::None), S::NotRequested);
        assert_eq!(S::Requested.transition(&A::Deliver("a@b.io".into())), S::NotRequested);
        assert_eq!(S::Requested.transition(&A::RequestValidEmail), S::Requested);
        assert_eq!(S::Requested.transition(&A::None), S::Requested);
    }

    #[test]
    fn invalid_email_pattern_is_config_error() {
        let rules = EscalationRules {
            email_pattern: "[".into(),
            ..EscalationRules::default()
        };
        assert!(matches!(
            EscalationPolicy::from_rules(&rules),
            Err(SiteChatError::Config { .. })
        ));
    }
}
