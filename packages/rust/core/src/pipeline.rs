//! Pipeline Orchestrator: one row, one template, one output value.
//!
//! resolve fields → expand template → invoke prompt → validate (optional).
//! Failures come back wrapped in [`PorterError::Task`] naming the table, row,
//! column and template. Nothing here retries and nothing here writes to the
//! store; the caller decides what to do with the outcome.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use porter_fetcher::ResourceFetcher;
use porter_shared::{FetchPolicyConfig, PromptColumnConfig, Result, Row, TaskContext};

use crate::fields::FieldIndex;
use crate::llm::PromptExecutor;
use crate::store::DataStore;
use crate::template::{self, ExpandOptions, ExpansionWarning, Template};
use crate::validate::{self, PermittedValues, Rejection, Verdict};

/// Per-call settings for [`Orchestrator::run`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub table: String,
    /// Output column the value is meant for.
    pub column: String,
    pub validate: bool,
    pub permitted: Option<PermittedValues>,
    pub requirement: Option<String>,
    pub expand: ExpandOptions,
}

impl RunConfig {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            validate: false,
            permitted: None,
            requirement: None,
            expand: ExpandOptions::default(),
        }
    }

    /// Settings for one configured prompt column.
    pub fn for_prompt(table: &str, prompt: &PromptColumnConfig, fetch: &FetchPolicyConfig) -> Self {
        Self {
            table: table.to_string(),
            column: prompt.column.clone(),
            validate: prompt.validate,
            permitted: prompt.permitted_values.as_ref().map(PermittedValues::from),
            requirement: prompt.requirement.clone(),
            expand: ExpandOptions {
                render_as_markdown: fetch.render_as_markdown,
                skip_on_fetch_failure: fetch.skip_on_fetch_failure,
            },
        }
    }
}

/// What one pipeline run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Produced {
        value: String,
        warnings: Vec<ExpansionWarning>,
    },
    /// The response did not pass validation. Not a fault.
    Rejected {
        response: String,
        rejection: Rejection,
    },
}

impl PipelineOutcome {
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Produced { value, .. } => Some(value),
            Self::Rejected { .. } => None,
        }
    }
}

/// Composes the resolver, template engine, prompt executor and validator.
pub struct Orchestrator {
    fetcher: Arc<dyn ResourceFetcher>,
    executor: Arc<dyn PromptExecutor>,
    checker: Arc<dyn PromptExecutor>,
    store: Arc<dyn DataStore>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        executor: Arc<dyn PromptExecutor>,
        store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            fetcher,
            checker: Arc::clone(&executor),
            executor,
            store,
        }
    }

    /// Use a different executor for requirement checks.
    pub fn with_checker(mut self, checker: Arc<dyn PromptExecutor>) -> Self {
        self.checker = checker;
        self
    }

    pub fn fetcher(&self) -> &dyn ResourceFetcher {
        self.fetcher.as_ref()
    }

    pub fn store(&self) -> &dyn DataStore {
        self.store.as_ref()
    }

    #[instrument(skip_all, fields(table = %config.table, row = %row.id, column = %config.column, template = %template.name))]
    pub async fn run(
        &self,
        row: &Row,
        template: &Template,
        config: &RunConfig,
    ) -> Result<PipelineOutcome> {
        let context = || TaskContext::new(&config.table, &row.id, &config.column, &template.name);

        let fields = FieldIndex::resolve(row);
        let expansion = template::expand(
            &template.body,
            row,
            &fields,
            self.fetcher.as_ref(),
            &config.expand,
        )
        .await
        .map_err(|e| e.with_context(context()))?;
        debug!(
            len = expansion.text.len(),
            resources = expansion.resources.len(),
            "template expanded"
        );

        let response = self
            .executor
            .invoke(&expansion.text)
            .await
            .map_err(|e| e.with_context(context()))?;

        if !config.validate {
            return Ok(PipelineOutcome::Produced {
                value: response,
                warnings: expansion.warnings,
            });
        }

        // Recomputed on every call: earlier writes may have changed the set.
        let permitted = match &config.permitted {
            Some(source) => Some(
                source
                    .resolve(self.store.as_ref(), &config.table, row)
                    .await
                    .map_err(|e| e.with_context(context()))?,
            ),
            None => None,
        };

        let verdict = validate::validate(
            &response,
            permitted.as_ref(),
            config.requirement.as_deref(),
            self.checker.as_ref(),
        )
        .await
        .map_err(|e| e.with_context(context()))?;

        Ok(match verdict {
            Verdict::Accepted(value) => PipelineOutcome::Produced {
                value,
                warnings: expansion.warnings,
            },
            Verdict::Rejected(rejection) => {
                info!(%rejection, "response rejected");
                PipelineOutcome::Rejected {
                    response,
                    rejection,
                }
            }
        })
    }
}
