//! The escalating fetch chain.
//!
//! Strategies run in order. Each one is attempted only if everything before
//! it failed or returned an unusable page; the first usable page wins and is
//! normalized. Strategy failures and timeouts are recovered here and only
//! surface as `ResourceUnavailable` once the chain is exhausted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use porter_markdown::{ConvertOptions, OutputMode};
use porter_shared::{FetchConfig, PorterError, Result};

use crate::assess::{DetectorRegistry, Verdict};
use crate::memo::FetchMemo;
use crate::network::NetworkStrategy;
use crate::page::{ContentFormat, FetchResult, RawPage, compute_hash};
use crate::pool::BrowserPool;
use crate::render::{HeadlessStrategy, VisibleStrategy};
use crate::strategy::{FetchSession, FetchStrategy};

/// The fetch capability as consumed by template expansion.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, render_as_markdown: bool) -> Result<FetchResult>;
}

/// Resource fetcher backed by an ordered strategy chain.
pub struct Fetcher {
    strategies: Vec<Box<dyn FetchStrategy>>,
    detectors: DetectorRegistry,
    pool: Option<Arc<BrowserPool>>,
    memo: Option<FetchMemo>,
}

impl Fetcher {
    /// Network strategy, then headless and visible renders when a browser is configured.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut strategies: Vec<Box<dyn FetchStrategy>> =
            vec![Box::new(NetworkStrategy::new(config)?)];

        let pool = config.browser.clone().map(|browser| {
            let render_budget = Duration::from_secs(config.render_timeout_secs);
            strategies.push(Box::new(HeadlessStrategy::new(render_budget)));
            strategies.push(Box::new(VisibleStrategy::new(render_budget)));
            Arc::new(BrowserPool::new(browser))
        });

        let fetcher = Self::with_strategies(strategies, pool);
        Ok(if config.memoize {
            fetcher.with_memo()
        } else {
            fetcher
        })
    }

    /// Build a chain from explicit strategies.
    pub fn with_strategies(
        strategies: Vec<Box<dyn FetchStrategy>>,
        pool: Option<Arc<BrowserPool>>,
    ) -> Self {
        Self {
            strategies,
            detectors: DetectorRegistry::new(),
            pool,
            memo: None,
        }
    }

    /// Reuse results by URL for the lifetime of this fetcher.
    pub fn with_memo(mut self) -> Self {
        self.memo = Some(FetchMemo::new());
        self
    }

    pub fn with_detectors(mut self, detectors: DetectorRegistry) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn memo(&self) -> Option<&FetchMemo> {
        self.memo.as_ref()
    }

    /// Fetch `url`, using the per-run memo when enabled.
    pub async fn fetch(&self, url: &Url, render_as_markdown: bool) -> Result<FetchResult> {
        let format = ContentFormat::from_markdown_flag(render_as_markdown);
        match &self.memo {
            Some(memo) => {
                memo.get_or_fetch(url.as_str(), format, || self.fetch_uncached(url, format))
                    .await
            }
            None => self.fetch_uncached(url, format).await,
        }
    }

    /// Stop idle render bridges.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch_uncached(&self, url: &Url, format: ContentFormat) -> Result<FetchResult> {
        let mut session = FetchSession::new(self.pool.clone());
        let mut attempts: Vec<String> = Vec::new();
        let mut previous_blocked = false;

        for strategy in &self.strategies {
            let provenance = strategy.provenance();
            if strategy.only_after_block() && !previous_blocked {
                debug!(strategy = %provenance, "skipped, previous strategy was not blocked");
                continue;
            }

            if strategy.needs_browser() {
                // Waiting for a free context is not part of the render budget.
                if let Err(e) = session.acquire_browser().await {
                    warn!(strategy = %provenance, error = %e, "no browser context");
                    attempts.push(format!("{provenance}: {e}"));
                    previous_blocked = false;
                    continue;
                }
            }

            let outcome =
                tokio::time::timeout(strategy.budget(), strategy.attempt(url, &mut session)).await;
            let page = match outcome {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => {
                    warn!(strategy = %provenance, error = %e, "fetch strategy failed");
                    attempts.push(format!("{provenance}: {e}"));
                    previous_blocked = false;
                    continue;
                }
                Err(_) => {
                    warn!(strategy = %provenance, budget = ?strategy.budget(), "fetch strategy timed out");
                    attempts.push(format!(
                        "{provenance}: timed out after {}s",
                        strategy.budget().as_secs()
                    ));
                    previous_blocked = false;
                    continue;
                }
            };

            let verdict = self.detectors.assess(&page);
            if !verdict.is_usable() {
                info!(strategy = %provenance, %verdict, "unusable page, escalating");
                attempts.push(format!("{provenance}: {verdict}"));
                previous_blocked = verdict.is_block();
                continue;
            }

            let result = normalize(url, page, provenance, format)?;
            if result.content.trim().is_empty() {
                info!(strategy = %provenance, "page normalized to nothing, escalating");
                attempts.push(format!("{provenance}: {}", Verdict::Empty));
                previous_blocked = false;
                continue;
            }

            info!(
                strategy = %provenance,
                status = ?result.status,
                len = result.content.len(),
                "fetch succeeded"
            );
            return Ok(result);
        }

        Err(PorterError::resource_unavailable(url.as_str(), attempts))
    }
}

#[async_trait]
impl ResourceFetcher for Fetcher {
    async fn fetch(&self, url: &Url, render_as_markdown: bool) -> Result<FetchResult> {
        Fetcher::fetch(self, url, render_as_markdown).await
    }
}

/// Convert a usable page into a [`FetchResult`].
fn normalize(
    url: &Url,
    page: RawPage,
    provenance: crate::page::Provenance,
    format: ContentFormat,
) -> Result<FetchResult> {
    let mode = match format {
        ContentFormat::Markdown => OutputMode::Markdown,
        ContentFormat::PlainText => OutputMode::PlainText,
    };
    let source_url = page.final_url.clone().unwrap_or_else(|| url.to_string());
    let converted = porter_markdown::convert(
        &page.html,
        &ConvertOptions {
            source_url: Some(source_url),
            mode,
        },
    )?;

    Ok(FetchResult {
        url: url.to_string(),
        provenance,
        format,
        content_hash: compute_hash(&converted.text),
        content: converted.text,
        title: converted.title,
        status: page.status,
        final_url: page.final_url,
        html: page.html,
        fetched_at: Utc::now(),
    })
}
