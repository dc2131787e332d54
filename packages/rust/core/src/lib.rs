//! Website chat core: context cache, prompt assembly and conversation
//! sessions over a crawled site.
//!
//! [`SiteChat`] owns one shared [`ContextCache`]; each [`Conversation`]
//! borrows it through [`SessionDeps`] and runs sequentially.

pub mod assembler;
pub mod cache;
pub mod clock;
pub mod delivery;
pub mod escalation;
pub mod generation;
pub mod sentiment;
pub mod service;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use assembler::{ContextAssembler, default_persona_prompt};
pub use cache::{ContextCache, ScanSettings};
pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{EmailJsNotifier, EscalationNotice, LogNotifier, Notifier, notifier_from_config};
pub use escalation::{EscalationAction, EscalationPolicy, EscalationState, Trigger};
pub use generation::{GenerationRequest, Generator, OpenRouterGenerator};
pub use sentiment::{Sentiment, SentimentClassifier};
pub use service::{Collaborators, SiteChat};
pub use session::{Conversation, ConversationSettings, Reply, SessionDeps, SessionStatus};
