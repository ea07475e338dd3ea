//! Response Validator.
//!
//! Two checks that can be combined. Strict membership runs first and needs
//! no prompt. The requirement check runs only if membership passed (or was
//! not requested).

use std::collections::BTreeSet;

use tracing::debug;

use porter_shared::{PermittedValuesConfig, Result, Row, render_value};

use crate::llm::PromptExecutor;
use crate::store::DataStore;

/// The requirement check prompt; `{requirement}` is replaced verbatim.
pub const REQUIREMENT_PROMPT: &str = "Does this response meet these requirements? {requirement} Respond with 1 (yes) or 0 (no). Be strict.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Response was empty after trimming.
    Empty,
    /// Not one of the permitted values.
    NotPermitted,
    /// The checker answered something other than `1`.
    RequirementNotMet { reply: String },
    /// The checker's reply was neither `1` nor `0`.
    Unparseable { reply: String },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty response"),
            Self::NotPermitted => f.write_str("not a permitted value"),
            Self::RequirementNotMet { reply } => write!(f, "requirement not met (reply {reply:?})"),
            Self::Unparseable { reply } => write!(f, "unparseable requirement reply {reply:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The trimmed response.
    Accepted(String),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

// ---------------------------------------------------------------------------
// Permitted values
// ---------------------------------------------------------------------------

/// Where the permitted value set comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermittedValues {
    Explicit(BTreeSet<String>),
    /// Distinct non-empty values of a column in the current table.
    Column(String),
    /// Items held by a field of the current row.
    RowField(String),
}

impl From<&PermittedValuesConfig> for PermittedValues {
    fn from(config: &PermittedValuesConfig) -> Self {
        match config {
            PermittedValuesConfig::Values(values) => Self::Explicit(values.iter().cloned().collect()),
            PermittedValuesConfig::Column(column) => Self::Column(column.clone()),
            PermittedValuesConfig::RowField(field) => Self::RowField(field.clone()),
        }
    }
}

impl PermittedValues {
    /// Compute the current set. Reads the store every time it is called.
    pub async fn resolve(
        &self,
        store: &dyn DataStore,
        table: &str,
        row: &Row,
    ) -> Result<BTreeSet<String>> {
        match self {
            Self::Explicit(values) => Ok(values.clone()),
            Self::Column(column) => store.get_column_values(table, column).await,
            Self::RowField(field) => Ok(row_field_items(row, field)),
        }
    }
}

/// List elements, or the non-empty lines / comma-separated items of text.
fn row_field_items(row: &Row, field: &str) -> BTreeSet<String> {
    let items: Vec<String> = match row.get(field) {
        None => Vec::new(),
        Some(serde_json::Value::Array(items)) => items.iter().map(render_value).collect(),
        Some(value) => render_value(value)
            .split(['\n', ','])
            .map(str::to_string)
            .collect(),
    };
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Strict membership: the trimmed response must equal a permitted value.
pub fn check_membership(response: &str, permitted: &BTreeSet<String>) -> Verdict {
    let value = response.trim();
    if value.is_empty() {
        Verdict::Rejected(Rejection::Empty)
    } else if permitted.contains(value) {
        Verdict::Accepted(value.to_string())
    } else {
        Verdict::Rejected(Rejection::NotPermitted)
    }
}

/// The prompt sent to the checker for one response.
pub fn requirement_prompt(requirement: &str, response: &str) -> String {
    format!(
        "{}\n\nResponse:\n{response}",
        REQUIREMENT_PROMPT.replace("{requirement}", requirement)
    )
}

/// Ask `checker` whether `response` meets `requirement`.
pub async fn check_requirement(
    checker: &dyn PromptExecutor,
    requirement: &str,
    response: &str,
) -> Result<Verdict> {
    let value = response.trim();
    if value.is_empty() {
        return Ok(Verdict::Rejected(Rejection::Empty));
    }

    let reply = checker.invoke(&requirement_prompt(requirement, value)).await?;
    let answer = reply.trim().to_owned();
    let verdict = match answer.as_str() {
        "1" => Verdict::Accepted(value.to_string()),
        "0" => Verdict::Rejected(Rejection::RequirementNotMet { reply }),
        _ => Verdict::Rejected(Rejection::Unparseable { reply }),
    };
    debug!(accepted = verdict.is_accepted(), "requirement checked");
    Ok(verdict)
}

/// Run the requested checks; both must pass when both are given.
pub async fn validate(
    response: &str,
    permitted: Option<&BTreeSet<String>>,
    requirement: Option<&str>,
    checker: &dyn PromptExecutor,
) -> Result<Verdict> {
    let value = response.trim();
    if value.is_empty() {
        return Ok(Verdict::Rejected(Rejection::Empty));
    }

    if let Some(permitted) = permitted {
        let verdict = check_membership(value, permitted);
        if !verdict.is_accepted() {
            return Ok(verdict);
        }
    }

    match requirement {
        Some(requirement) => check_requirement(checker, requirement, value).await,
        None => Ok(Verdict::Accepted(value.to_string())),
    }
}
