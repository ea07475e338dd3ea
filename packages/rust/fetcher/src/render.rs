//! Browser render strategies.
//!
//! Both strategies render through the fetch session's browser context, so a
//! visible render that follows a blocked headless one runs on the same
//! profile, cookies and fingerprint.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use porter_shared::Result;

use crate::page::{Provenance, RawPage};
use crate::strategy::{FetchSession, FetchStrategy};

/// Script-capable render with no visible surface.
pub struct HeadlessStrategy {
    budget: Duration,
}

impl HeadlessStrategy {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

#[async_trait]
impl FetchStrategy for HeadlessStrategy {
    fn provenance(&self) -> Provenance {
        Provenance::Headless
    }

    fn budget(&self) -> Duration {
        self.budget
    }

    fn needs_browser(&self) -> bool {
        true
    }

    async fn attempt(&self, url: &Url, session: &mut FetchSession) -> Result<RawPage> {
        render(url, session, true, self.budget).await
    }
}

/// Headed render on the headless strategy's profile; last resort against
/// anti-automation checks.
pub struct VisibleStrategy {
    budget: Duration,
}

impl VisibleStrategy {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

#[async_trait]
impl FetchStrategy for VisibleStrategy {
    fn provenance(&self) -> Provenance {
        Provenance::Visible
    }

    fn budget(&self) -> Duration {
        self.budget
    }

    fn only_after_block(&self) -> bool {
        true
    }

    fn needs_browser(&self) -> bool {
        true
    }

    async fn attempt(&self, url: &Url, session: &mut FetchSession) -> Result<RawPage> {
        render(url, session, false, self.budget).await
    }
}

async fn render(
    url: &Url,
    session: &mut FetchSession,
    headless: bool,
    budget: Duration,
) -> Result<RawPage> {
    let context = session.browser().await?;
    let timeout_ms = navigation_timeout_ms(budget, context.settle());
    debug!(%url, headless, slot = context.slot(), timeout_ms, "browser render");
    context.render(url.as_str(), headless, timeout_ms).await
}

/// Left to the bridge for answering once navigation and settling are done.
const RESPONSE_HEADROOM: Duration = Duration::from_secs(2);

/// Navigation timeout for the bridge, short enough that the bridge reports
/// its own timeout before the strategy budget runs out.
fn navigation_timeout_ms(budget: Duration, settle: Duration) -> u64 {
    let navigation = budget.saturating_sub(settle).saturating_sub(RESPONSE_HEADROOM);
    let navigation = if navigation.is_zero() {
        budget / 2
    } else {
        navigation
    };
    u64::try_from(navigation.as_millis()).unwrap_or(u64::MAX)
}
