//! Page harvest: standard fields read from a row's source page.

use std::collections::BTreeMap;

use serde::Serialize;
use url::Url;

use porter_fetcher::{ContentFormat, FetchResult};
use porter_markdown::{extract_metadata, to_markdown, to_plain_text};
use porter_shared::Row;

/// Prefix for harvested keys exposed to templates without a mapping.
pub const UNMAPPED_PREFIX: &str = "page_";

/// Fields harvested from one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageHarvest {
    pub title: String,
    pub h1: String,
    pub description: String,
    /// Visible text.
    pub text: String,
    pub markdown: String,
}

impl PageHarvest {
    pub fn from_fetch(result: &FetchResult) -> Self {
        let meta = extract_metadata(&result.html);
        let markdown = match result.format {
            ContentFormat::Markdown => result.content.clone(),
            ContentFormat::PlainText => {
                let base = Url::parse(&result.url).ok();
                to_markdown(&result.html, base.as_ref()).unwrap_or_default()
            }
        };
        let text = match result.format {
            ContentFormat::PlainText => result.content.clone(),
            ContentFormat::Markdown => to_plain_text(&result.html),
        };

        Self {
            title: meta.title.or_else(|| result.title.clone()).unwrap_or_default(),
            h1: meta.h1.unwrap_or_default(),
            description: meta.description.unwrap_or_default(),
            text,
            markdown,
        }
    }

    /// `(key, value)` pairs in a fixed order.
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("title", self.title.as_str()),
            ("h1", self.h1.as_str()),
            ("description", self.description.as_str()),
            ("text", self.text.as_str()),
            ("markdown", self.markdown.as_str()),
        ]
    }

    /// Expose the harvest to templates and list the cells to write.
    ///
    /// A mapped key is exposed under its column name unless the row already
    /// has a value there, and is returned for writing when that column is
    /// blank and the harvested value is not. Unmapped keys are exposed as
    /// `page_<key>` and never written.
    pub fn apply(&self, row: &mut Row, mapping: &BTreeMap<String, String>) -> Vec<(String, String)> {
        let mut writes = Vec::new();
        for (key, value) in self.entries() {
            match mapping.get(key) {
                Some(column) => {
                    if row.is_blank(column) {
                        if !value.trim().is_empty() {
                            writes.push((column.clone(), value.to_string()));
                        }
                        row.fields.insert(column.clone(), value.into());
                    }
                }
                None => {
                    row.fields.insert(format!("{UNMAPPED_PREFIX}{key}"), value.into());
                }
            }
        }
        writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fetch_result;

    const PAGE: &str = r#"<html><head>
        <title>Acme Anvils</title>
        <meta name="description" content="Anvils for every occasion.">
        </head><body><main><h1>Welcome to Acme</h1><p>We make anvils.</p></main></body></html>"#;

    fn harvest() -> PageHarvest {
        PageHarvest::from_fetch(&fetch_result(
            "https://acme.test/",
            "# Welcome to Acme\n\nWe make anvils.",
            PAGE,
        ))
    }

    #[test]
    fn reads_metadata_and_text() {
        let h = harvest();
        assert_eq!(h.title, "Acme Anvils");
        assert_eq!(h.h1, "Welcome to Acme");
        assert_eq!(h.description, "Anvils for every occasion.");
        assert_eq!(h.text, "Welcome to Acme\nWe make anvils.");
        assert_eq!(h.markdown, "# Welcome to Acme\n\nWe make anvils.");
    }

    #[test]
    fn mapped_keys_fill_blank_columns_only() {
        let mapping: BTreeMap<String, String> = [
            ("title".to_string(), "Title".to_string()),
            ("description".to_string(), "Meta_Description".to_string()),
        ]
        .into_iter()
        .collect();
        let mut row = Row::new("r")
            .with_field("Title", "Existing title")
            .with_field("Meta_Description", "");

        let writes = harvest().apply(&mut row, &mapping);

        assert_eq!(
            writes,
            vec![("Meta_Description".to_string(), "Anvils for every occasion.".to_string())]
        );
        assert_eq!(row.text("Title").as_deref(), Some("Existing title"));
        assert_eq!(row.text("Meta_Description").as_deref(), Some("Anvils for every occasion."));
        assert_eq!(row.text("page_h1").as_deref(), Some("Welcome to Acme"));
        assert!(row.get("page_title").is_none());
    }

    #[test]
    fn blank_harvest_values_are_not_written() {
        let mapping: BTreeMap<String, String> =
            [("h1".to_string(), "H1".to_string())].into_iter().collect();
        let mut row = Row::new("r");
        let empty = PageHarvest::default();
        assert!(empty.apply(&mut row, &mapping).is_empty());
        assert_eq!(row.text("H1").as_deref(), Some(""));
    }
}
