//! Usability assessment of fetched pages.
//!
//! A page is unusable when its body is empty, its status is not 2xx, or it is
//! an anti-automation challenge rather than the requested content. Challenge
//! pages are recognized by [`ChallengeDetector`]s tried in registry order.

use crate::page::RawPage;

/// Challenge pages are small; only this much of the body is inspected.
const SCAN_LIMIT: usize = 64 * 1024;

/// Statuses that anti-bot layers answer with.
const BLOCKING_STATUSES: &[u16] = &[401, 403, 429, 503];

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Outcome of assessing one strategy's page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Usable,
    /// No body, or nothing left after normalization.
    Empty,
    /// Non-2xx status without a recognizable challenge.
    HttpStatus(u16),
    /// Anti-automation challenge, named by the detector that matched.
    Blocked(&'static str),
    /// A client-rendered shell asking for JavaScript.
    NeedsScript,
}

impl Verdict {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Usable)
    }

    /// Whether the site actively refused the client, which is what justifies
    /// escalating to a visible browser.
    pub fn is_block(&self) -> bool {
        match self {
            Self::Blocked(_) => true,
            Self::HttpStatus(code) => BLOCKING_STATUSES.contains(code),
            _ => false,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usable => f.write_str("usable"),
            Self::Empty => f.write_str("empty body"),
            Self::HttpStatus(code) => write!(f, "HTTP {code}"),
            Self::Blocked(name) => write!(f, "blocked by {name} challenge"),
            Self::NeedsScript => f.write_str("page requires JavaScript"),
        }
    }
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

/// Recognizes one family of challenge pages.
pub trait ChallengeDetector: Send + Sync {
    /// Detector name reported in [`Verdict::Blocked`].
    fn name(&self) -> &'static str;

    /// Markers only an interstitial challenge page carries. `body` is the
    /// lowercased head of the page.
    fn detect(&self, body: &str) -> bool;

    /// Markers of challenge widgets that also appear embedded in real pages
    /// (a captcha on a contact form). They only block a page with little
    /// visible text.
    fn detect_widget(&self, _body: &str) -> bool {
        false
    }
}

/// Matches when any of its needles appears in the page.
pub struct SignatureDetector {
    name: &'static str,
    interstitial: &'static [&'static str],
    widgets: &'static [&'static str],
}

impl SignatureDetector {
    pub const fn new(
        name: &'static str,
        interstitial: &'static [&'static str],
        widgets: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            interstitial,
            widgets,
        }
    }
}

impl ChallengeDetector for SignatureDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&self, body: &str) -> bool {
        self.interstitial.iter().any(|needle| body.contains(needle))
    }

    fn detect_widget(&self, body: &str) -> bool {
        self.widgets.iter().any(|needle| body.contains(needle))
    }
}

const CLOUDFLARE: SignatureDetector = SignatureDetector::new(
    "cloudflare",
    &[
        "cf-browser-verification",
        "cf-challenge-running",
        "window._cf_chl_opt",
        "attention required! | cloudflare",
        "<title>just a moment...</title>",
    ],
    // The JSD script under /cdn-cgi/challenge-platform/ ships on ordinary pages.
    &["challenge-platform", "cf-turnstile"],
);

const CAPTCHA: SignatureDetector = SignatureDetector::new(
    "captcha",
    &["captcha-delivery.com", "px-captcha"],
    &["g-recaptcha", "h-captcha", "hcaptcha.com/1/api.js"],
);

const BOT_WALL: SignatureDetector = SignatureDetector::new(
    "bot-wall",
    &[
        "verify you are human",
        "are you a robot",
        "unusual traffic from your computer",
        "<title>access denied</title>",
        "request unsuccessful. incapsula",
    ],
    &[],
);

/// Pages with fewer visible words than this are judged by their widgets.
const THIN_PAGE_WORDS: usize = 25;

const SCRIPT_SHELL: &[&str] = &[
    "please enable javascript",
    "you need to enable javascript",
    "this app requires javascript",
    "javascript is required",
];

/// Ordered set of challenge detectors.
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn ChallengeDetector>>,
}

impl DetectorRegistry {
    /// Registry with the built-in detectors.
    pub fn new() -> Self {
        Self {
            detectors: vec![Box::new(CLOUDFLARE), Box::new(CAPTCHA), Box::new(BOT_WALL)],
        }
    }

    /// Add a detector after the built-in ones.
    pub fn register(&mut self, detector: Box<dyn ChallengeDetector>) {
        self.detectors.push(detector);
    }

    /// Judge whether a page can be used as content.
    pub fn assess(&self, page: &RawPage) -> Verdict {
        let body = scan_window(&page.html).to_lowercase();

        let challenge = self
            .detectors
            .iter()
            .find(|d| d.detect(&body))
            .map(|d| d.name());
        let widget = || {
            self.detectors
                .iter()
                .find(|d| d.detect_widget(&body))
                .map(|d| d.name())
        };

        if let Some(status) = page.status.filter(|s| !(200..300).contains(s)) {
            return match challenge.or_else(widget) {
                Some(name) => Verdict::Blocked(name),
                None => Verdict::HttpStatus(status),
            };
        }

        if page.html.trim().is_empty() {
            return Verdict::Empty;
        }

        if let Some(name) = challenge {
            return Verdict::Blocked(name);
        }

        if let Some(name) = widget() {
            if is_thin(&page.html) {
                return Verdict::Blocked(name);
            }
        }

        if SCRIPT_SHELL.iter().any(|needle| body.contains(needle)) && looks_like_shell(&body) {
            return Verdict::NeedsScript;
        }

        Verdict::Usable
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest prefix of `html` within [`SCAN_LIMIT`] that ends on a char boundary.
fn scan_window(html: &str) -> &str {
    if html.len() <= SCAN_LIMIT {
        return html;
    }
    let mut end = SCAN_LIMIT;
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    &html[..end]
}

/// Whether the page has too little visible text to be more than a widget.
fn is_thin(html: &str) -> bool {
    porter_markdown::to_plain_text(html).split_whitespace().count() < THIN_PAGE_WORDS
}

/// Real pages often carry a `<noscript>` nag too; only a near-empty body counts.
fn looks_like_shell(body: &str) -> bool {
    let paragraphs = body.matches("<p").count();
    paragraphs <= 2 && body.len() < 16 * 1024
}
