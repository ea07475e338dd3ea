//! Page-level metadata: title, first heading, description.

use scraper::{Html, Selector};

/// Descriptive metadata read from a page's `<head>` and first heading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub h1: Option<String>,
    pub description: Option<String>,
}

/// Read title, first `<h1>` and description, with social-card fallbacks.
pub fn extract_metadata(html: &str) -> PageMetadata {
    let doc = Html::parse_document(html);

    let title = first_text(&doc, "title")
        .or_else(|| meta_content(&doc, "meta[property=\"og:title\"]"))
        .or_else(|| meta_content(&doc, "meta[name=\"twitter:title\"]"));

    let h1 = first_text(&doc, "h1");

    let description = meta_content(&doc, "meta[name=\"description\"]")
        .or_else(|| meta_content(&doc, "meta[property=\"og:description\"]"))
        .or_else(|| meta_content(&doc, "meta[name=\"twitter:description\"]"));

    PageMetadata {
        title,
        h1,
        description,
    }
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .map(|el| squash(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(squash)
        .find(|text| !text.is_empty())
}

fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_primary_tags() {
        let html = r#"<html><head>
            <title> Acme |  Rockets </title>
            <meta name="description" content="We build rockets.">
            <meta property="og:description" content="Social blurb">
        </head><body><h1>Launch <em>today</em></h1><h1>Second</h1></body></html>"#;

        let meta = extract_metadata(html);
        assert_eq!(meta.title.as_deref(), Some("Acme | Rockets"));
        assert_eq!(meta.h1.as_deref(), Some("Launch today"));
        assert_eq!(meta.description.as_deref(), Some("We build rockets."));
    }

    #[test]
    fn falls_back_to_social_cards() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG Title">
            <meta name="twitter:description" content="Tweet blurb">
        </head><body><p>No heading</p></body></html>"#;

        let meta = extract_metadata(html);
        assert_eq!(meta.title.as_deref(), Some("OG Title"));
        assert_eq!(meta.h1, None);
        assert_eq!(meta.description.as_deref(), Some("Tweet blurb"));
    }

    #[test]
    fn empty_values_are_skipped() {
        let html = r#"<html><head><title>  </title>
            <meta name="description" content="">
            <meta property="og:description" content="Fallback">
        </head><body></body></html>"#;

        let meta = extract_metadata(html);
        assert_eq!(meta.title, None);
        assert_eq!(meta.description.as_deref(), Some("Fallback"));
    }
}
