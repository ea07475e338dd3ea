//! The strategy abstraction the fetch chain is built from.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use porter_shared::{PorterError, Result};

use crate::page::{Provenance, RawPage};
use crate::pool::{BrowserContext, BrowserLease, BrowserPool};

/// One way of retrieving a page.
///
/// Strategies only report what they got; deciding whether a page is usable
/// is the chain's job.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Reported as the result's provenance when this strategy wins.
    fn provenance(&self) -> Provenance;

    /// Time allowed for one attempt before it is abandoned.
    fn budget(&self) -> Duration;

    /// Attempt only when the previous strategy was actively blocked.
    fn only_after_block(&self) -> bool {
        false
    }

    /// Renders through the session's browser context. The chain checks the
    /// context out before the budget starts.
    fn needs_browser(&self) -> bool {
        false
    }

    async fn attempt(&self, url: &Url, session: &mut FetchSession) -> Result<RawPage>;
}

/// State shared by the strategies of one fetch.
///
/// Holds the browser context once a render strategy asks for it, so a later
/// render in the same fetch reuses the same profile and session.
pub struct FetchSession {
    pool: Option<Arc<BrowserPool>>,
    lease: Option<BrowserLease>,
}

impl FetchSession {
    pub fn new(pool: Option<Arc<BrowserPool>>) -> Self {
        Self { pool, lease: None }
    }

    /// Check out a browser context for this fetch unless one is held.
    /// Waits while every context is in use.
    pub async fn acquire_browser(&mut self) -> Result<()> {
        if self.lease.is_none() {
            let pool = self
                .pool
                .clone()
                .ok_or_else(|| PorterError::Render("browser rendering is disabled".into()))?;
            self.lease = Some(pool.checkout().await?);
        }
        Ok(())
    }

    /// The browser context for this fetch, checked out on first use.
    pub async fn browser(&mut self) -> Result<&mut BrowserContext> {
        self.acquire_browser().await?;
        match self.lease.as_mut() {
            Some(lease) => lease.context_mut(),
            None => Err(PorterError::Render("browser lease missing".into())),
        }
    }

    /// Slot of the checked-out context, if any.
    pub fn browser_slot(&mut self) -> Option<usize> {
        self.lease
            .as_mut()
            .and_then(|lease| lease.context_mut().ok())
            .map(|context| context.slot())
    }
}
