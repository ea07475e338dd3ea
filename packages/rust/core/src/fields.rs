//! Field Resolver: maps display field names to template identifiers.
//!
//! Identifiers keep the original case. Every run of characters that is not a
//! letter or digit becomes a single `_`, and leading and trailing separators
//! are dropped, so `"Home City"` becomes `Home_City`. When two names map to
//! the same identifier (compared case-insensitively), the later one in row
//! order gets `_2`, `_3` and so on.

use std::collections::HashSet;

use serde_json::Value;

use porter_shared::Row;

/// Identifier used when a field name has no letters or digits at all.
const FALLBACK_IDENTIFIER: &str = "field";

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldEntry {
    identifier: String,
    original: String,
}

/// Per-row mapping between identifiers and original field names.
#[derive(Debug, Clone, Default)]
pub struct FieldIndex {
    entries: Vec<FieldEntry>,
}

impl FieldIndex {
    /// Build the index for `row`, in the row's field order.
    pub fn resolve(row: &Row) -> Self {
        Self::from_names(row.field_names())
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut taken: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();

        for original in names {
            let base = normalize_identifier(original);
            let mut identifier = base.clone();
            let mut suffix = 2;
            while taken.contains(&identifier.to_lowercase()) {
                identifier = format!("{base}_{suffix}");
                suffix += 1;
            }
            taken.insert(identifier.to_lowercase());
            entries.push(FieldEntry {
                identifier,
                original: original.to_string(),
            });
        }

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifier assigned to an original field name.
    pub fn identifier_for(&self, original: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.original == original)
            .map(|e| e.identifier.as_str())
    }

    /// Original field name behind an identifier (exact match).
    pub fn original_for(&self, identifier: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.identifier == identifier)
            .map(|e| e.original.as_str())
    }

    /// Resolve a template token to an original field name.
    ///
    /// Tried in order: the exact identifier, the original name, then a
    /// case-insensitive identifier match. Identifiers come first so every
    /// assigned identifier reaches its own field, even when another field's
    /// original name is spelled the same.
    pub fn lookup(&self, token: &str) -> Option<&str> {
        let token = token.trim();
        if let Some(original) = self.original_for(token) {
            return Some(original);
        }
        if let Some(entry) = self.entries.iter().find(|e| e.original == token) {
            return Some(&entry.original);
        }
        let folded = token.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.identifier.to_lowercase() == folded)
            .map(|e| e.original.as_str())
    }

    /// Value of the field a token refers to.
    pub fn value<'r>(&self, row: &'r Row, token: &str) -> Option<&'r Value> {
        self.lookup(token).and_then(|original| row.get(original))
    }

    /// `(identifier, original)` pairs in row order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.identifier.as_str(), e.original.as_str()))
    }
}

/// Canonical identifier for a field name, before collision suffixing.
pub fn normalize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }

    if out.is_empty() {
        FALLBACK_IDENTIFIER.to_string()
    } else {
        out
    }
}
