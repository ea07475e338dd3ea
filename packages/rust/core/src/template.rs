//! Template Engine: field references and resource-injection directives.
//!
//! Syntax:
//! - `{{token}}` is replaced by the row value the token resolves to
//!   (see [`FieldIndex::lookup`]).
//! - `@{URL}` and `@URL` are replaced by the fetched, normalized content of
//!   `URL`. Only absolute `scheme://` URLs are directives; anything else is
//!   left as literal text. In the bare form, trailing sentence punctuation is
//!   not part of the URL.
//!
//! Expansion is a single left-to-right pass. Substituted values and fetched
//! content are never scanned again.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use url::Url;

use porter_fetcher::{Provenance, ResourceFetcher};
use porter_shared::{PorterError, Result, Row, render_value};

use crate::fields::FieldIndex;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\{\s*([^{}]+?)\s*\}\}|@\{([^{}\s]+)\}|@([A-Za-z][A-Za-z0-9+.\-]*://[^\s<>"'`{}]+)"#,
    )
    .expect("valid regex")
});

/// Characters dropped from the end of a bare `@URL`.
const BARE_TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']'];

// ---------------------------------------------------------------------------
// Parsed form
// ---------------------------------------------------------------------------

/// A named prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub body: String,
}

impl Template {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveForm {
    /// `@URL`
    Bare,
    /// `@{URL}`
    Braced,
}

/// A resource-injection directive found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDirective {
    pub url: Url,
    pub form: DirectiveForm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Field(&'a str),
    Directive(ResourceDirective),
}

/// Split a template into literal text, field references and directives.
pub fn parse(body: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in TOKEN_RE.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };

        let (segment, end) = if let Some(token) = caps.get(1) {
            (Some(Segment::Field(token.as_str())), whole.end())
        } else if let Some(address) = caps.get(2) {
            let segment = directive(address.as_str(), DirectiveForm::Braced).map(Segment::Directive);
            (segment, whole.end())
        } else if let Some(address) = caps.get(3) {
            let trimmed = address.as_str().trim_end_matches(BARE_TRAILING);
            let segment = directive(trimmed, DirectiveForm::Bare).map(Segment::Directive);
            (segment, address.start() + trimmed.len())
        } else {
            (None, whole.end())
        };

        // Unrecognized syntax stays in the surrounding literal.
        let Some(segment) = segment else { continue };
        if whole.start() > last {
            segments.push(Segment::Literal(&body[last..whole.start()]));
        }
        segments.push(segment);
        last = end;
    }

    if last < body.len() {
        segments.push(Segment::Literal(&body[last..]));
    }
    segments
}

/// Directives in template order, duplicates included.
pub fn directives(body: &str) -> Vec<ResourceDirective> {
    parse(body)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Directive(directive) => Some(directive),
            _ => None,
        })
        .collect()
}

fn directive(address: &str, form: DirectiveForm) -> Option<ResourceDirective> {
    let url = Url::parse(address).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }
    Some(ResourceDirective { url, form })
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandOptions {
    /// Request Markdown (otherwise plain text) from the fetcher.
    pub render_as_markdown: bool,
    /// Replace directives whose fetch failed with nothing instead of failing.
    pub skip_on_fetch_failure: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            render_as_markdown: true,
            skip_on_fetch_failure: false,
        }
    }
}

/// A fetch failure that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpansionWarning {
    pub url: String,
    pub message: String,
}

impl std::fmt::Display for ExpansionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "skipped {}: {}", self.url, self.message)
    }
}

/// Which strategy produced each injected resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectedResource {
    pub url: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Expansion {
    pub text: String,
    pub warnings: Vec<ExpansionWarning>,
    pub resources: Vec<InjectedResource>,
}

enum Piece<'a> {
    Text(&'a str),
    Value(String),
    Resource(Url),
}

/// Expand `template` against `row`.
///
/// All field references are resolved before anything is fetched, so an
/// unknown field fails without network traffic. Each distinct URL is
/// fetched once per expansion.
#[instrument(skip_all, fields(row = %row.id))]
pub async fn expand(
    template: &str,
    row: &Row,
    fields: &FieldIndex,
    fetcher: &dyn ResourceFetcher,
    options: &ExpandOptions,
) -> Result<Expansion> {
    let segments = parse(template);
    if segments.iter().all(|s| matches!(s, Segment::Literal(_))) {
        return Ok(Expansion {
            text: template.to_string(),
            ..Expansion::default()
        });
    }

    let mut pieces = Vec::with_capacity(segments.len());
    for segment in segments {
        pieces.push(match segment {
            Segment::Literal(text) => Piece::Text(text),
            Segment::Field(token) => {
                let value = fields
                    .value(row, token)
                    .ok_or_else(|| PorterError::unknown_field(token))?;
                Piece::Value(render_value(value))
            }
            Segment::Directive(directive) => Piece::Resource(directive.url),
        });
    }

    let mut expansion = Expansion::default();
    let mut contents: HashMap<String, String> = HashMap::new();
    for piece in &pieces {
        let Piece::Resource(url) = piece else { continue };
        if contents.contains_key(url.as_str()) {
            continue;
        }

        match fetcher.fetch(url, options.render_as_markdown).await {
            Ok(result) => {
                debug!(%url, provenance = %result.provenance, len = result.content.len(), "resource injected");
                expansion.resources.push(InjectedResource {
                    url: url.to_string(),
                    provenance: result.provenance,
                });
                contents.insert(url.to_string(), result.content);
            }
            Err(e) => {
                let err = as_unavailable(url, e);
                if !options.skip_on_fetch_failure {
                    return Err(err);
                }
                warn!(%url, error = %err, "fetch failed, directive skipped");
                expansion.warnings.push(ExpansionWarning {
                    url: url.to_string(),
                    message: err.to_string(),
                });
                contents.insert(url.to_string(), String::new());
            }
        }
    }

    let mut text = String::with_capacity(template.len());
    for piece in &pieces {
        match piece {
            Piece::Text(s) => text.push_str(s),
            Piece::Value(s) => text.push_str(s),
            Piece::Resource(url) => {
                if let Some(content) = contents.get(url.as_str()) {
                    text.push_str(content);
                }
            }
        }
    }
    expansion.text = text;
    Ok(expansion)
}

fn as_unavailable(url: &Url, err: PorterError) -> PorterError {
    if matches!(err.root(), PorterError::ResourceUnavailable { .. }) {
        err
    } else {
        PorterError::resource_unavailable(url.as_str(), vec![err.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticFetcher;

    fn row() -> Row {
        Row::new("rec1")
            .with_field("First Name", "Ana")
            .with_field("Home City", "Lima")
            .with_field("Tags", serde_json::json!(["a", "b"]))
            .with_field("Score", 7)
            .with_field("Notes", serde_json::Value::Null)
    }

    async fn run(template: &str, fetcher: &StaticFetcher, options: ExpandOptions) -> Result<Expansion> {
        let row = row();
        let fields = FieldIndex::resolve(&row);
        expand(template, &row, &fields, fetcher, &options).await
    }

    #[test]
    fn parses_both_directive_forms() {
        let found = directives("See @{https://a.test/x} and @https://b.test/y.");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].url.as_str(), "https://a.test/x");
        assert_eq!(found[0].form, DirectiveForm::Braced);
        assert_eq!(found[1].url.as_str(), "https://b.test/y");
        assert_eq!(found[1].form, DirectiveForm::Bare);
    }

    #[test]
    fn invalid_addresses_stay_literal() {
        for body in [
            "mail ana@example.com",
            "@{not-a-url}",
            "@{mailto:ana@example.com}",
            "@https://",
            "handle @someone",
        ] {
            assert_eq!(parse(body), vec![Segment::Literal(body)], "{body}");
        }
    }

    #[test]
    fn bare_trailing_punctuation_is_literal() {
        let segments = parse("(see @https://a.test/page).");
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Literal("(see "));
        assert!(matches!(&segments[1], Segment::Directive(d) if d.url.as_str() == "https://a.test/page"));
        assert_eq!(segments[2], Segment::Literal(")."));
    }

    #[test]
    fn field_tokens_allow_inner_spaces() {
        let segments = parse("{{ First Name }}!");
        assert_eq!(segments, vec![Segment::Field("First Name"), Segment::Literal("!")]);
    }

    #[tokio::test]
    async fn substitutes_fields_by_identifier() {
        let fetcher = StaticFetcher::new();
        let out = run(
            "{{first_name}} lives in {{home_city}}",
            &fetcher,
            ExpandOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(out.text, "Ana lives in Lima");
        assert!(out.resources.is_empty());
    }

    #[tokio::test]
    async fn identifier_token_reaches_its_own_field() {
        let row = Row::new("rec1")
            .with_field("Home City", "Lima")
            .with_field("Home_City", "Other");
        let fields = FieldIndex::resolve(&row);
        let out = expand(
            "{{Home_City}} / {{Home_City_2}}",
            &row,
            &fields,
            &StaticFetcher::new(),
            &ExpandOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(out.text, "Lima / Other");
    }

    #[tokio::test]
    async fn renders_non_text_values() {
        let fetcher = StaticFetcher::new();
        let out = run("{{Tags}}|{{Score}}|{{Notes}}", &fetcher, ExpandOptions::default())
            .await
            .unwrap();
        assert_eq!(out.text, "a, b|7|");
    }

    #[tokio::test]
    async fn injects_fetched_content() {
        let fetcher = StaticFetcher::new().with_page("https://example.com/a", "# Title\nBody.");
        let out = run("Summarize: @{https://example.com/a}", &fetcher, ExpandOptions::default())
            .await
            .unwrap();
        assert_eq!(out.text, "Summarize: # Title\nBody.");
        assert_eq!(out.resources.len(), 1);
        assert_eq!(out.resources[0].provenance, Provenance::Network);
    }

    #[tokio::test]
    async fn plain_templates_are_returned_unchanged() {
        let fetcher = StaticFetcher::new();
        for template in ["", "no syntax here", "price is {single} braces", "a@b.c"] {
            let out = run(template, &fetcher, ExpandOptions::default()).await.unwrap();
            assert_eq!(out.text, template);
        }
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn reexpansion_is_a_noop() {
        let fetcher = StaticFetcher::new().with_page("https://example.com/a", "# Title\nBody.");
        let first = run("{{First Name}}: @https://example.com/a", &fetcher, ExpandOptions::default())
            .await
            .unwrap();
        let second = run(&first.text, &fetcher, ExpandOptions::default()).await.unwrap();
        assert_eq!(second.text, first.text);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn fetched_content_is_not_rescanned() {
        let fetcher = StaticFetcher::new().with_page("https://a.test/", "{{Home City}} @https://b.test/");
        let out = run("@{https://a.test/}", &fetcher, ExpandOptions::default()).await.unwrap();
        assert_eq!(out.text, "{{Home City}} @https://b.test/");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_field_fails_before_fetching() {
        let fetcher = StaticFetcher::new().with_page("https://a.test/", "content");
        let err = run("@{https://a.test/} {{Missing Field}}", &fetcher, ExpandOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PorterError::UnknownField { ref token } if token == "Missing Field"));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_resource_unavailable() {
        let fetcher = StaticFetcher::new();
        let err = run("Read @{https://down.test/}", &fetcher, ExpandOptions::default())
            .await
            .unwrap_err();
        match err {
            PorterError::ResourceUnavailable { url, .. } => assert_eq!(url, "https://down.test/"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_on_failure_records_warning() {
        let fetcher = StaticFetcher::new().with_page("https://up.test/", "up");
        let options = ExpandOptions {
            skip_on_fetch_failure: true,
            ..ExpandOptions::default()
        };
        let out = run("[@{https://down.test/}] [@{https://up.test/}]", &fetcher, options)
            .await
            .unwrap();
        assert_eq!(out.text, "[] [up]");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].url, "https://down.test/");
    }

    #[tokio::test]
    async fn repeated_url_fetched_once() {
        let fetcher = StaticFetcher::new().with_page("https://a.test/", "A");
        let out = run("@{https://a.test/} and @https://a.test/", &fetcher, ExpandOptions::default())
            .await
            .unwrap();
        assert_eq!(out.text, "A and A");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn plain_text_flag_is_forwarded() {
        let fetcher = StaticFetcher::new().with_page("https://a.test/", "A");
        let options = ExpandOptions {
            render_as_markdown: false,
            ..ExpandOptions::default()
        };
        run("@{https://a.test/}", &fetcher, options).await.unwrap();
        assert_eq!(fetcher.markdown_requests(), vec![false]);
    }
}
