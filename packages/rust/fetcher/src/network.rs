//! Plain HTTP fetch strategy.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use porter_shared::{FetchConfig, PorterError, Result};

use crate::page::{Provenance, RawPage};
use crate::strategy::{FetchSession, FetchStrategy};

/// Fetches the page over HTTP without running scripts.
pub struct NetworkStrategy {
    client: Client,
    budget: Duration,
    /// Allow localhost/private IPs (local services, mock servers).
    allow_private_hosts: bool,
}

impl NetworkStrategy {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let budget = Duration::from_secs(config.network_timeout_secs);
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(budget)
            .build()
            .map_err(|e| PorterError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            budget,
            allow_private_hosts: config.allow_private_hosts,
        })
    }
}

#[async_trait]
impl FetchStrategy for NetworkStrategy {
    fn provenance(&self) -> Provenance {
        Provenance::Network
    }

    fn budget(&self) -> Duration {
        self.budget
    }

    async fn attempt(&self, url: &Url, _session: &mut FetchSession) -> Result<RawPage> {
        if is_ssrf_target(url, self.allow_private_hosts) {
            return Err(PorterError::Network(format!("{url}: refusing to fetch this address")));
        }

        debug!(%url, "network fetch");
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| PorterError::Network(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| PorterError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(RawPage {
            html,
            status: Some(status),
            final_url: Some(final_url),
        })
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a resource the fetcher must not touch.
fn is_ssrf_target(url: &Url, allow_private_hosts: bool) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }
    if allow_private_hosts {
        return false;
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
