//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The goal is fewer tokens for the same information: duplicate headings are
//! demoted, blank runs collapsed, images dropped and links made absolute.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = normalize_headings(&result);
    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = drop_images(&result);
    result = resolve_links(&result, base_url);
    result = normalize_whitespace(&result);
    result = collapse_blank_lines(&result);

    result.trim_matches('\n').to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Normalize heading levels
// ---------------------------------------------------------------------------

/// Keep the first H1 and demote later ones to H2.
fn normalize_headings(md: &str) -> String {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^#\s+(.+)$").expect("valid regex"));

    let mut seen_h1 = false;
    md.lines()
        .map(|line| match H1_RE.captures(line) {
            Some(caps) if seen_h1 => format!("## {}", &caps[1]),
            Some(_) => {
                seen_h1 = true;
                line.to_string()
            }
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Fix code block language hints
// ---------------------------------------------------------------------------

/// Turn class-style fence hints (`language-js`, `lang-py`, `highlight-rs`) into bare names.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Strip leftover layout tags
// ---------------------------------------------------------------------------

/// Remove layout tags that survived conversion, keeping their text.
/// Fenced code is left untouched.
fn strip_leftover_html(md: &str) -> String {
    static LAYOUT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|header|figure|figcaption|details|summary|picture|source)(?:\s[^>]*)?/?>",
        )
        .expect("valid regex")
    });

    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                LAYOUT_TAG_RE.replace_all(line, "").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Drop images
// ---------------------------------------------------------------------------

/// Images carry no text for a prompt; data URIs in particular can be huge.
fn drop_images(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMAGE_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Resolve relative links
// ---------------------------------------------------------------------------

/// Resolve relative URLs in Markdown links against the page URL.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let text = &caps[1];
            let href = &caps[2];

            if href.starts_with('#') || Url::parse(href).is_ok() {
                return format!("[{text}]({href})");
            }

            match base.join(href) {
                Ok(resolved) => format!("[{text}]({resolved})"),
                Err(_) => format!("[{text}]({href})"),
            }
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 6: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 7: Collapse blank lines
// ---------------------------------------------------------------------------

/// At most one blank line between blocks.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_headings_demotes_duplicate_h1() {
        let input = "# Title\n\nSome text\n\n# Another Title\n\nMore text";
        assert_eq!(
            normalize_headings(input),
            "# Title\n\nSome text\n\n## Another Title\n\nMore text"
        );
    }

    #[test]
    fn normalize_headings_keeps_single_h1() {
        let input = "# Only One\n\n## Sub\n\n### Deep";
        assert_eq!(normalize_headings(input), input);
    }

    #[test]
    fn fix_code_block_languages_strips_prefix() {
        let result = fix_code_block_languages("```language-javascript\nconsole.log('hi');\n```");
        assert!(result.starts_with("```javascript"));
    }

    #[test]
    fn strip_leftover_html_keeps_text_and_code() {
        let input = "<div class=\"note\">Important info</div>\n\n```html\n<div>Preserved</div>\n```";
        let result = strip_leftover_html(input);
        assert!(result.starts_with("Important info"));
        assert!(result.contains("<div>Preserved</div>"));
    }

    #[test]
    fn drop_images_removes_inline_and_data_uris() {
        let input = "Logo ![acme](/logo.png) and ![x](data:image/png;base64,AAAA) done";
        assert_eq!(drop_images(input), "Logo  and  done");
    }

    #[test]
    fn resolve_links_relative_resolved() {
        let base = Url::parse("https://docs.example.com/guide/intro").unwrap();
        assert_eq!(
            resolve_links("[Next](/api/reference)", Some(&base)),
            "[Next](https://docs.example.com/api/reference)"
        );
        assert_eq!(
            resolve_links("[Sibling](setup)", Some(&base)),
            "[Sibling](https://docs.example.com/guide/setup)"
        );
    }

    #[test]
    fn resolve_links_absolute_and_anchor_untouched() {
        let base = Url::parse("https://docs.example.com/page").unwrap();
        assert_eq!(
            resolve_links("[Link](https://other.com/page)", Some(&base)),
            "[Link](https://other.com/page)"
        );
        assert_eq!(
            resolve_links("[Mail](mailto:hi@example.com)", Some(&base)),
            "[Mail](mailto:hi@example.com)"
        );
        assert_eq!(
            resolve_links("[Section](#section-1)", Some(&base)),
            "[Section](#section-1)"
        );
    }

    #[test]
    fn collapse_blank_lines_keeps_one() {
        assert_eq!(collapse_blank_lines("A\n\n\n\n\nB"), "A\n\nB");
        assert_eq!(collapse_blank_lines("A\n\nB"), "A\n\nB");
    }

    #[test]
    fn full_pipeline_cleans_markdown() {
        let input = "\n\n# Title   \n\n\n\n\n## Section\n\n<div>Some content</div>\n\n```language-python\nprint('hi')\n```\n\n![img](a.png)End\n\n";
        let base = Url::parse("https://example.com/page").unwrap();
        let result = run_pipeline(input, Some(&base));

        assert!(result.starts_with("# Title\n\n## Section"));
        assert!(result.contains("```python"));
        assert!(!result.contains("<div>"));
        assert!(result.contains("Some content"));
        assert!(result.ends_with("End"));
    }
}
