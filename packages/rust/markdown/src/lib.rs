//! HTML normalization for prompt consumption.
//!
//! Fetched pages are reduced to one of two token-lean forms:
//! - **Markdown** via `htmd`, keeping headings, links, lists and tables while
//!   dropping scripts, styles and navigation chrome, followed by a series of
//!   cleanup passes.
//! - **Plain text**: visible text only, one block per line.
//!
//! [`extract_metadata`] pulls the page title, first heading and description.

mod cleanup;
mod metadata;
mod text;

use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use porter_shared::{PorterError, Result};

pub use metadata::{PageMetadata, extract_metadata};
pub use text::to_plain_text;

/// Elements removed together with their content before Markdown conversion.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "aside", "form", "iframe", "noscript", "svg",
    "template", "button",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Output form of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Markdown,
    PlainText,
}

/// Options for [`convert`].
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Page URL, used to resolve relative links in Markdown mode.
    pub source_url: Option<String>,
    pub mode: OutputMode,
}

/// Result of normalizing an HTML page.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// Normalized text in the requested mode.
    pub text: String,
    /// `<title>` (or social fallback), else the first heading.
    pub title: Option<String>,
    pub word_count: usize,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Normalize an HTML page into Markdown or plain text.
#[instrument(skip_all, fields(mode = ?opts.mode))]
pub fn convert(html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let base_url = opts.source_url.as_deref().and_then(|u| Url::parse(u).ok());

    let text = match opts.mode {
        OutputMode::Markdown => to_markdown(html, base_url.as_ref())?,
        OutputMode::PlainText => to_plain_text(html),
    };

    let meta = extract_metadata(html);
    let title = meta.title.or(meta.h1);
    let word_count = text.split_whitespace().count();

    debug!(word_count, len = text.len(), "conversion complete");

    Ok(ConvertResult {
        text,
        title,
        word_count,
    })
}

/// Convert an HTML page to cleaned Markdown.
///
/// 1. Narrows the document to its main content container
/// 2. Replaces HTML tables with placeholders and renders them as pipe tables
/// 3. Converts HTML → Markdown via `htmd`
/// 4. Runs the cleanup pipeline and restores the tables
pub fn to_markdown(html: &str, base_url: Option<&Url>) -> Result<String> {
    let content_html = extract_content_html(html);
    let (content_html, tables) = extract_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| PorterError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), tables = tables.len(), "htmd conversion complete");

    let mut cleaned = cleanup::run_pipeline(&raw_markdown, base_url);
    for (i, table) in tables.iter().enumerate() {
        cleaned = cleaned.replacen(&table_placeholder(i), table.trim_end(), 1);
    }
    Ok(cleaned)
}

// ---------------------------------------------------------------------------
// Content extraction
// ---------------------------------------------------------------------------

/// Narrow the document to its main content, falling back to `<body>`.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    for sel_str in ["main", "[role=\"main\"]"] {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    // A single <article> is the content; several are cards on a listing page.
    if let Ok(selector) = Selector::parse("article") {
        let mut articles = doc.select(&selector);
        if let (Some(only), None) = (articles.next(), articles.next()) {
            return only.inner_html();
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            let mut content = body.inner_html();
            // Site banners sit directly under <body>; headers inside content stay.
            if let Ok(banner_sel) = Selector::parse("body > header") {
                for banner in doc.select(&banner_sel) {
                    content = content.replacen(&banner.html(), "", 1);
                }
            }
            return content;
        }
    }

    html.to_string()
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn table_placeholder(index: usize) -> String {
    format!("PORTERTABLE{index}Z")
}

/// Swap each top-level `<table>` for a placeholder paragraph.
///
/// `htmd` has no table support, so tables are rendered separately and
/// spliced back in after cleanup.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let Ok(table_sel) = Selector::parse("table") else {
        return (html.to_string(), Vec::new());
    };
    let doc = Html::parse_fragment(html);

    let mut result = html.to_string();
    let mut tables = Vec::new();

    for table_el in doc.select(&table_sel) {
        let nested = table_el
            .ancestors()
            .filter_map(scraper::ElementRef::wrap)
            .any(|a| a.value().name() == "table");
        if nested {
            continue;
        }

        let outer = table_el.html();
        if !result.contains(&outer) {
            continue;
        }
        let placeholder = format!("<p>{}</p>", table_placeholder(tables.len()));
        result = result.replacen(&outer, &placeholder, 1);
        tables.push(html_table_to_markdown(&table_el));
    }

    (result, tables)
}

/// Render a single HTML table element as a Markdown pipe table.
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    let Ok(tr_sel) = Selector::parse("tr") else {
        return String::new();
    };
    let Ok(cell_sel) = Selector::parse("th, td") else {
        return String::new();
    };

    let rows: Vec<Vec<String>> = table
        .select(&tr_sel)
        .map(|tr| {
            tr.select(&cell_sel)
                .map(|cell| {
                    cell.text()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .replace('|', "\\|")
                })
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    let render_row = |cells: &[String]| {
        let mut padded = cells.to_vec();
        padded.resize(col_count, String::new());
        format!("| {} |\n", padded.join(" | "))
    };

    let mut md = render_row(&rows[0]);
    md.push_str(&format!("|{}\n", " --- |".repeat(col_count)));
    for row in &rows[1..] {
        md.push_str(&render_row(row));
    }
    md
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
