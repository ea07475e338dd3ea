//! Prompt execution pipeline for porter.
//!
//! Expands row templates (field references plus fetched `@URL` resources),
//! sends the result to a prompt executor, optionally validates the reply and
//! writes accepted values back to the data store. [`batch::run_table`] drives
//! the pipeline over every row of a configured table.

pub mod batch;
pub mod fields;
pub mod harvest;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod template;
pub mod validate;

#[cfg(test)]
mod testing;

pub use batch::{RowReport, RunProgress, SilentProgress, TableRunOptions, TableRunSummary, run_table};
pub use fields::{FieldIndex, normalize_identifier};
pub use harvest::PageHarvest;
pub use llm::{ChatCompletionsExecutor, PromptExecutor, clean_reply};
pub use pipeline::{Orchestrator, PipelineOutcome, RunConfig};
pub use store::{DataStore, MemoryStore};
pub use template::{ExpandOptions, Expansion, ExpansionWarning, Template, expand};
pub use validate::{PermittedValues, Rejection, Verdict, validate};
