//! Plain-text rendering of an HTML page.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Node, Selector};

/// Elements whose text is never visible.
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template", "head", "svg"];

/// Elements that start a new line in the text rendering.
const BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Extract the visible text of a page.
///
/// Block elements become line breaks, horizontal whitespace collapses to a
/// single space and there is at most one blank line between blocks.
pub fn to_plain_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let root = match Selector::parse("body")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
    {
        Some(body) => *body,
        None => *doc.root_element(),
    };

    let mut raw = String::new();
    for node in root.descendants() {
        match node.value() {
            Node::Text(text) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .is_some_and(|el| INVISIBLE.contains(&el.name()))
                });
                if !hidden {
                    raw.push_str(text);
                }
            }
            Node::Element(el) if BLOCKS.contains(&el.name()) => raw.push('\n'),
            _ => {}
        }
    }

    tidy(&raw)
}

fn tidy(raw: &str) -> String {
    static SPACES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let lines: Vec<String> = raw
        .lines()
        .map(|line| SPACES_RE.replace_all(line.trim(), " ").to_string())
        .collect();
    let joined = lines.join("\n");
    BLANKS_RE.replace_all(joined.trim(), "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_visible_text_only() {
        let html = r#"<html><head><title>Ignored</title><style>p{}</style></head>
            <body><h1>Acme</h1><script>track()</script><p>We   build
            rockets.</p><noscript>Enable JS</noscript></body></html>"#;
        let text = to_plain_text(html);
        assert_eq!(text, "Acme\nWe build\nrockets.");
    }

    #[test]
    fn blocks_become_lines() {
        let html = "<body><ul><li>One</li><li>Two</li></ul><div>Three</div></body>";
        let text = to_plain_text(html);
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, vec!["One", "Two", "Three"]);
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(tidy("A\n\n\n\n  \nB"), "A\n\nB");
        assert_eq!(tidy("  lead\u{a0}\u{a0}space  "), "lead space");
    }

    #[test]
    fn empty_document_is_empty() {
        assert_eq!(to_plain_text(""), "");
        assert_eq!(to_plain_text("<html><body><script>x()</script></body></html>"), "");
    }
}
