//! Resource fetching with escalating strategies.
//!
//! This crate provides:
//! - [`Fetcher`]: Ordered strategy chain (network, headless render, visible render)
//! - [`DetectorRegistry`]: Usability assessment and challenge-page detection
//! - [`BrowserPool`]: Exclusive browser contexts with persistent profiles
//! - [`FetchMemo`]: Per-run reuse of fetch results by URL

pub mod assess;
mod bridge;
pub mod chain;
pub mod memo;
pub mod network;
pub mod page;
pub mod pool;
pub mod render;
pub mod strategy;

pub use assess::{ChallengeDetector, DetectorRegistry, SignatureDetector, Verdict};
pub use chain::{Fetcher, ResourceFetcher};
pub use memo::FetchMemo;
pub use network::NetworkStrategy;
pub use page::{ContentFormat, FetchResult, Provenance, RawPage};
pub use pool::{BrowserContext, BrowserLease, BrowserPool};
pub use render::{HeadlessStrategy, VisibleStrategy};
pub use strategy::{FetchSession, FetchStrategy};
