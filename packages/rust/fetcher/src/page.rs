//! Fetch results and the raw pages strategies hand back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Plain HTTP request, no script execution.
    Network,
    /// Browser render without a visible surface.
    Headless,
    /// Browser render with a visible window, same profile as headless.
    Visible,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Headless => "headless",
            Self::Visible => "visible",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text form of [`FetchResult::content`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    Markdown,
    PlainText,
}

impl ContentFormat {
    pub fn from_markdown_flag(render_as_markdown: bool) -> Self {
        if render_as_markdown {
            Self::Markdown
        } else {
            Self::PlainText
        }
    }
}

/// What a single strategy attempt returned, before usability assessment.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub html: String,
    /// HTTP status, when the strategy knows it.
    pub status: Option<u16>,
    /// URL after redirects.
    pub final_url: Option<String>,
}

/// Normalized content for one URL plus where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    /// The URL that was requested.
    pub url: String,
    pub provenance: Provenance,
    pub format: ContentFormat,
    /// Markdown or plain-text rendering of the page.
    pub content: String,
    pub title: Option<String>,
    pub status: Option<u16>,
    pub final_url: Option<String>,
    /// The HTML the content was derived from.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub html: String,
    /// SHA-256 of `content`.
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

/// Compute SHA-256 hash of content.
pub(crate) fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
