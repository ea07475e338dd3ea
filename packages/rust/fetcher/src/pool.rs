//! Pool of browser contexts with exclusive checkout.
//!
//! Each [`BrowserContext`] owns one persistent profile directory and, lazily,
//! the render bridge process driving it. A context is checked out for the
//! whole duration of one fetch so the headless and visible renders of that
//! fetch share one identity, and no two in-flight fetches share cookies.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use porter_shared::{BrowserConfig, PorterError, Result, expand_home};

use crate::bridge::{RenderBridge, RenderRequest};
use crate::page::RawPage;

// ---------------------------------------------------------------------------
// BrowserContext
// ---------------------------------------------------------------------------

/// One browser identity: a profile directory plus its bridge process.
pub struct BrowserContext {
    slot: usize,
    profile_dir: PathBuf,
    config: Arc<BrowserConfig>,
    bridge: Option<RenderBridge>,
    /// Set while a render is awaiting its response.
    in_flight: bool,
}

impl BrowserContext {
    fn new(slot: usize, config: Arc<BrowserConfig>) -> Self {
        let profile_dir = expand_home(&config.profile_dir).join(format!("slot-{slot}"));
        Self {
            slot,
            profile_dir,
            config,
            bridge: None,
            in_flight: false,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Extra wait the bridge applies after the page loads.
    pub fn settle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.settle_ms)
    }

    pub fn profile_dir(&self) -> &std::path::Path {
        &self.profile_dir
    }

    /// Render `url` in this context, starting the bridge on first use.
    pub async fn render(&mut self, url: &str, headless: bool, timeout_ms: u64) -> Result<RawPage> {
        if self.bridge.is_none() {
            self.bridge = Some(RenderBridge::spawn(&self.config, &self.profile_dir).await?);
        }
        let Some(bridge) = self.bridge.as_mut() else {
            return Err(PorterError::Render("render bridge unavailable".into()));
        };

        self.in_flight = true;
        let result = bridge
            .render(RenderRequest {
                url,
                headless,
                timeout_ms,
            })
            .await;
        self.in_flight = false;

        if result.is_err() {
            // Protocol state is unknown after a failure; start fresh next time.
            self.discard_bridge();
        }
        result
    }

    /// Drop the bridge process (killed on drop); the profile stays on disk.
    fn discard_bridge(&mut self) {
        if self.bridge.take().is_some() {
            debug!(slot = self.slot, "discarding render bridge");
        }
    }

    async fn shutdown(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown().await;
        }
    }
}

// ---------------------------------------------------------------------------
// BrowserPool
// ---------------------------------------------------------------------------

/// Fixed-size pool of [`BrowserContext`]s.
pub struct BrowserPool {
    idle: Mutex<Vec<BrowserContext>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl BrowserPool {
    pub fn new(config: BrowserConfig) -> Self {
        let size = config.pool_size.max(1) as usize;
        let config = Arc::new(config);
        let idle = (0..size)
            .rev()
            .map(|slot| BrowserContext::new(slot, Arc::clone(&config)))
            .collect();
        Self {
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Contexts not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free context and take exclusive ownership of it.
    pub async fn checkout(self: &Arc<Self>) -> Result<BrowserLease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PorterError::Render("browser pool is closed".into()))?;

        let context = self
            .idle
            .lock()
            .map_err(|_| PorterError::Render("browser pool lock poisoned".into()))?
            .pop()
            .ok_or_else(|| PorterError::Render("browser pool has no idle context".into()))?;

        debug!(slot = context.slot, "browser context checked out");
        Ok(BrowserLease {
            context: Some(context),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Stop every idle bridge. Contexts checked out at the time are unaffected.
    pub async fn shutdown(&self) {
        let contexts: Vec<BrowserContext> = match self.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => return,
        };
        let mut returned = Vec::with_capacity(contexts.len());
        for mut context in contexts {
            context.shutdown().await;
            returned.push(context);
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.extend(returned);
        }
    }

    fn give_back(&self, mut context: BrowserContext) {
        if context.in_flight {
            // Abandoned mid-render: a late response would desynchronize the protocol.
            warn!(slot = context.slot, "render abandoned, restarting bridge on next use");
            context.in_flight = false;
            context.discard_bridge();
        }
        match self.idle.lock() {
            Ok(mut idle) => idle.push(context),
            Err(_) => warn!("browser pool lock poisoned, dropping context"),
        }
    }
}

// ---------------------------------------------------------------------------
// BrowserLease
// ---------------------------------------------------------------------------

/// Exclusive use of one context; returned to the pool on drop, including
/// when the owning future is cancelled.
pub struct BrowserLease {
    context: Option<BrowserContext>,
    pool: Arc<BrowserPool>,
    _permit: OwnedSemaphorePermit,
}

impl BrowserLease {
    pub fn context_mut(&mut self) -> Result<&mut BrowserContext> {
        self.context
            .as_mut()
            .ok_or_else(|| PorterError::Render("browser lease already released".into()))
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            debug!(slot = context.slot, "browser context returned");
            self.pool.give_back(context);
        }
    }
}
