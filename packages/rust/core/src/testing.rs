//! In-process fakes for the fetch and prompt capabilities.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use porter_fetcher::{ContentFormat, FetchResult, Provenance, ResourceFetcher};
use porter_shared::{PorterError, Result};

use crate::llm::PromptExecutor;

pub(crate) fn fetch_result(url: &str, content: &str, html: &str) -> FetchResult {
    FetchResult {
        url: url.to_string(),
        provenance: Provenance::Network,
        format: ContentFormat::Markdown,
        content: content.to_string(),
        title: None,
        status: Some(200),
        final_url: None,
        html: html.to_string(),
        content_hash: String::new(),
        fetched_at: Utc::now(),
    }
}

/// Serves fixed pages; unknown URLs are unavailable.
#[derive(Default)]
pub(crate) struct StaticFetcher {
    pages: HashMap<String, FetchResult>,
    calls: AtomicUsize,
    markdown: Mutex<Vec<bool>>,
}

impl StaticFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_page(self, url: &str, content: &str) -> Self {
        self.with_result(fetch_result(url, content, ""))
    }

    pub(crate) fn with_result(mut self, result: FetchResult) -> Self {
        self.pages.insert(result.url.clone(), result);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn markdown_requests(&self) -> Vec<bool> {
        self.markdown.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceFetcher for StaticFetcher {
    async fn fetch(&self, url: &Url, render_as_markdown: bool) -> Result<FetchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.markdown.lock().unwrap().push(render_as_markdown);
        self.pages.get(url.as_str()).cloned().ok_or_else(|| {
            PorterError::resource_unavailable(url.as_str(), vec!["network: HTTP 404".into()])
        })
    }
}

type Reply = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Answers prompts with a closure and records what it was asked.
pub(crate) struct ScriptedExecutor {
    reply: Reply,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub(crate) fn from_fn(reply: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fixed(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::from_fn(move |_| Ok(reply.clone()))
    }

    pub(crate) fn unavailable() -> Self {
        Self::from_fn(|_| Err(PorterError::LlmUnavailable("connection refused".into())))
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PromptExecutor for ScriptedExecutor {
    async fn invoke(&self, text: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(text.to_string());
        (self.reply)(text)
    }
}
