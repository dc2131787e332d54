//! In-memory collaborators shared by the cache and session tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use sitechat_crawler::Fetcher;
use sitechat_shared::{Result, SiteChatError};

use crate::delivery::{EscalationNotice, Notifier};
use crate::generation::{GenerationRequest, Generator};

/// HTML page with a title, one paragraph and the given links.
pub fn page(name: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{href}">link</a>"#))
        .collect();
    format!(
        "<html><head><title>{name}</title></head><body><main><p>{name} content</p>{anchors}</main></body></html>"
    )
}

/// Site served from a mutable map keyed by canonical URL; logs every fetch.
pub struct FixtureFetcher {
    pages: Mutex<HashMap<String, String>>,
    log: Mutex<Vec<String>>,
}

impl FixtureFetcher {
    pub fn new(pages: &[(&str, String)]) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(
                pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.clone()))
                    .collect(),
            ),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn insert(&self, url: &str, body: String) {
        self.pages.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn clear(&self) {
        self.pages.lock().unwrap().clear();
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        tokio::task::yield_now().await;
        let key = url.as_str().trim_end_matches('/').to_string();
        self.log.lock().unwrap().push(key.clone());
        self.pages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| SiteChatError::Network(format!("{url}: HTTP 404 Not Found")))
    }
}

/// One generator call as the session made it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system_prompt: String,
    pub history_len: usize,
    pub query: String,
    pub temperature: f32,
}

/// Replies from a script, or echoes the query once the script runs out.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_reply(&self, reply: Result<String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, request: &GenerationRequest<'_>) -> Result<String> {
        self.requests.lock().unwrap().push(RecordedRequest {
            system_prompt: request.system_prompt.clone(),
            history_len: request.history.len(),
            query: request.query.to_string(),
            temperature: request.temperature,
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("answer to: {}", request.query)))
    }
}

/// Records notices; fails every delivery when built with `failing()`.
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    notices: Mutex<Vec<EscalationNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn notices(&self) -> Vec<EscalationNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &EscalationNotice) -> Result<()> {
        self.notices.lock().unwrap().push(notice.clone());
        if self.fail {
            Err(SiteChatError::Delivery("HTTP 500: unavailable".into()))
        } else {
            Ok(())
        }
    }
}
