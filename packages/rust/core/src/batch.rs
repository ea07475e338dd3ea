//! Table runner: applies every configured prompt column to every row.
//!
//! Rows run in parallel up to a concurrency limit and never affect each
//! other: a failing row is logged and counted, and the run carries on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};
use url::Url;

use porter_shared::{FetchPolicyConfig, PorterError, Result, Row, TableConfig, TaskContext};

use crate::harvest::PageHarvest;
use crate::pipeline::{Orchestrator, PipelineOutcome, RunConfig};
use crate::template::Template;

/// Settings for [`run_table`].
#[derive(Debug, Clone)]
pub struct TableRunOptions {
    /// Rows processed at the same time.
    pub concurrency: usize,
    pub fetch: FetchPolicyConfig,
}

impl Default for TableRunOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            fetch: FetchPolicyConfig::default(),
        }
    }
}

/// What happened to one row.
///
/// Counters are per cell except `harvest_failed`, which is 0 or 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowReport {
    pub row_id: String,
    /// Harvested cells written.
    pub harvested: usize,
    /// The source page could not be fetched or its cells not written.
    pub harvest_failed: usize,
    /// Prompt cells written.
    pub produced: usize,
    pub rejected: usize,
    /// Prompt cells whose run or write failed.
    pub failed: usize,
    /// Prompt columns that already had a value.
    pub skipped: usize,
}

/// Totals for a whole table run. `harvest_failed` counts rows, the other
/// counters count cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRunSummary {
    pub table: String,
    pub rows: usize,
    pub harvested: usize,
    pub harvest_failed: usize,
    pub produced: usize,
    pub rejected: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl TableRunSummary {
    fn add(&mut self, report: &RowReport) {
        self.rows += 1;
        self.harvested += report.harvested;
        self.harvest_failed += report.harvest_failed;
        self.produced += report.produced;
        self.rejected += report.rejected;
        self.failed += report.failed;
        self.skipped += report.skipped;
    }
}

/// Progress callback for reporting run status.
pub trait RunProgress: Send + Sync {
    /// Called once the rows to process are known.
    fn started(&self, table: &str, rows: usize);
    /// Called as each row finishes, in completion order.
    fn row_finished(&self, report: &RowReport);
    /// Called when the run completes.
    fn done(&self, summary: &TableRunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl RunProgress for SilentProgress {
    fn started(&self, _table: &str, _rows: usize) {}
    fn row_finished(&self, _report: &RowReport) {}
    fn done(&self, _summary: &TableRunSummary) {}
}

/// Run every prompt column of `table` over all of its rows.
#[instrument(skip_all, fields(table = %table.name))]
pub async fn run_table(
    orchestrator: Arc<Orchestrator>,
    table: &TableConfig,
    options: &TableRunOptions,
    progress: Arc<dyn RunProgress>,
) -> Result<TableRunSummary> {
    let start = Instant::now();
    let rows = orchestrator.store().list_rows(&table.name).await?;
    progress.started(&table.name, rows.len());
    info!(
        rows = rows.len(),
        prompts = table.prompts.len(),
        concurrency = options.concurrency,
        "starting table run"
    );

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let table = Arc::new(table.clone());
    let fetch = Arc::new(options.fetch.clone());

    let mut handles = Vec::with_capacity(rows.len());
    for row in rows {
        let sem = Arc::clone(&semaphore);
        let orchestrator = Arc::clone(&orchestrator);
        let table = Arc::clone(&table);
        let fetch = Arc::clone(&fetch);
        let progress = Arc::clone(&progress);

        handles.push(tokio::spawn(async move {
            let row_id = row.id.clone();
            let report = match sem.acquire().await {
                Ok(_permit) => process_row(&orchestrator, &table, &fetch, row).await,
                Err(e) => {
                    error!(row = %row_id, error = %e, "row not started");
                    RowReport {
                        row_id,
                        failed: 1,
                        ..RowReport::default()
                    }
                }
            };
            progress.row_finished(&report);
            report
        }));
    }

    let mut summary = TableRunSummary {
        table: table.name.clone(),
        ..TableRunSummary::default()
    };
    for handle in handles {
        match handle.await {
            Ok(report) => summary.add(&report),
            Err(e) => {
                error!(error = %e, "row task panicked");
                summary.add(&RowReport {
                    failed: 1,
                    ..RowReport::default()
                });
            }
        }
    }
    summary.elapsed = start.elapsed();

    info!(
        rows = summary.rows,
        produced = summary.produced,
        rejected = summary.rejected,
        failed = summary.failed,
        harvest_failed = summary.harvest_failed,
        skipped = summary.skipped,
        duration_ms = summary.elapsed.as_millis(),
        "table run completed"
    );
    progress.done(&summary);
    Ok(summary)
}

/// Harvest, then run each prompt column whose cell is blank.
async fn process_row(
    orchestrator: &Orchestrator,
    table: &TableConfig,
    fetch: &FetchPolicyConfig,
    mut row: Row,
) -> RowReport {
    let mut report = RowReport {
        row_id: row.id.clone(),
        ..RowReport::default()
    };
    let store = orchestrator.store();

    if let Some(source_column) = &table.source_url_column {
        match harvest_row(orchestrator, table, source_column, &mut row).await {
            Ok(writes) => report.harvested = writes,
            Err(e) => {
                // Prompts may not need the page; carry on without it.
                warn!(row = %row.id, error = %e, "page harvest failed");
                report.harvest_failed = 1;
            }
        }
    }

    for prompt in &table.prompts {
        if !row.is_blank(&prompt.column) {
            report.skipped += 1;
            continue;
        }

        let template = Template::new(prompt.template_name(), prompt.template.clone());
        let config = RunConfig::for_prompt(&table.name, prompt, fetch);
        match orchestrator.run(&row, &template, &config).await {
            Ok(PipelineOutcome::Produced { value, warnings }) => {
                for warning in &warnings {
                    warn!(row = %row.id, column = %prompt.column, %warning, "expansion warning");
                }
                match store.set_cell(&table.name, &row.id, &prompt.column, &value).await {
                    Ok(()) => {
                        report.produced += 1;
                        // Later prompts of this row may reference the new value.
                        row.fields.insert(prompt.column.clone(), value.into());
                    }
                    Err(e) => {
                        let context = TaskContext::new(&table.name, &row.id, &prompt.column, template.name.as_str());
                        error!(error = %e.with_context(context), "failed to write cell");
                        report.failed += 1;
                    }
                }
            }
            Ok(PipelineOutcome::Rejected { rejection, .. }) => {
                info!(row = %row.id, column = %prompt.column, %rejection, "cell left unwritten");
                report.rejected += 1;
            }
            Err(e) => {
                error!(error = %e, "prompt failed");
                report.failed += 1;
            }
        }
    }

    report
}

/// Fetch the row's source page, expose the harvest to templates and write
/// mapped columns. Returns the number of cells written.
async fn harvest_row(
    orchestrator: &Orchestrator,
    table: &TableConfig,
    source_column: &str,
    row: &mut Row,
) -> Result<usize> {
    let Some(raw_url) = row.text(source_column).filter(|u| !u.trim().is_empty()) else {
        return Ok(0);
    };
    let url = Url::parse(raw_url.trim())
        .map_err(|e| PorterError::parse(format!("{source_column} is not a URL ({raw_url}): {e}")))?;

    let result = orchestrator.fetcher().fetch(&url, true).await?;
    let harvest = PageHarvest::from_fetch(&result);
    let writes = harvest.apply(row, &table.column_mapping);

    let store = orchestrator.store();
    for (column, value) in &writes {
        store.set_cell(&table.name, &row.id, column, value).await?;
    }
    info!(row = %row.id, %url, provenance = %result.provenance, written = writes.len(), "page harvested");
    Ok(writes.len())
}
