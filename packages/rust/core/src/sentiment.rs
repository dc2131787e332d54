//! Per-query sentiment tagging.
//!
//! Sentiment only biases generation temperature and the tone hint in the
//! system prompt; it never changes control flow.

use serde::Serialize;

use sitechat_shared::SentimentRules;

/// Detected tone of a user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Urgent,
    Frustrated,
    Confused,
    Happy,
    Curious,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Frustrated => "frustrated",
            Self::Confused => "confused",
            Self::Happy => "happy",
            Self::Curious => "curious",
            Self::Neutral => "neutral",
        }
    }

    /// Generation temperature: lower for frustrated and urgent users.
    pub fn temperature(&self) -> f32 {
        match self {
            Self::Urgent => 0.3,
            Self::Frustrated => 0.4,
            Self::Curious => 0.5,
            Self::Confused | Self::Happy | Self::Neutral => 0.7,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First-match-wins keyword classifier over lowercased queries.
#[derive(Debug, Clone)]
pub struct SentimentClassifier {
    rules: SentimentRules,
}

impl SentimentClassifier {
    pub fn new(rules: &SentimentRules) -> Self {
        let lower = |list: &[String]| list.iter().map(|s| s.to_lowercase()).collect();
        Self {
            rules: SentimentRules {
                urgent: lower(&rules.urgent),
                frustrated: lower(&rules.frustrated),
                confused: lower(&rules.confused),
                happy: lower(&rules.happy),
                curious: lower(&rules.curious),
            },
        }
    }

    pub fn classify(&self, query: &str) -> Sentiment {
        let lower = query.to_lowercase();
        let contains_any = |list: &[String]| list.iter().any(|k| lower.contains(k.as_str()));

        if contains_any(&self.rules.urgent) {
            Sentiment::Urgent
        } else if contains_any(&self.rules.frustrated) || query.contains('!') {
            Sentiment::Frustrated
        } else if contains_any(&self.rules.confused) || query.contains('?') {
            Sentiment::Confused
        } else if contains_any(&self.rules.happy) {
            Sentiment::Happy
        } else if self
            .rules
            .curious
            .iter()
            .any(|k| lower.starts_with(k.as_str()))
        {
            Sentiment::Curious
        } else {
            Sentiment::Neutral
        }
    }
}

impl Default for SentimentClassifier {
    fn default() -> Self {
        Self::new(&SentimentRules::default())
    }
}
