//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use porter_core::{
    ChatCompletionsExecutor, DataStore, ExpandOptions, FieldIndex, Orchestrator, PromptExecutor,
    RowReport, RunProgress, TableRunOptions, TableRunSummary, expand, run_table,
};
use porter_fetcher::Fetcher;
use porter_shared::{
    AppConfig, FetchConfig, config_file_path, expand_home, init_config, load_config, load_config_from,
};
use porter_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// porter: fill table columns from prompt templates and fetched pages.
#[derive(Parser)]
#[command(
    name = "porter",
    version,
    about = "Expand row templates with fetched web resources and write LLM responses back to tables.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.porter/porter.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Table database (overrides `defaults.database`).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Prompt model (overrides `llm.model`).
    #[arg(long, env = "LLM_MODEL_NAME", global = true)]
    pub model: Option<String>,

    /// Requirement-check model (overrides `llm.validation_model`).
    #[arg(long, env = "VALIDATION_MODEL", global = true)]
    pub validation_model: Option<String>,

    /// Chat completions base URL (overrides `llm.base_url`).
    #[arg(long, env = "OPENAI_API_BASE_URL", global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Import rows from a JSON array into a table.
    Import {
        #[arg(long)]
        table: String,

        /// JSON file: `[{"id": .., "fields": {..}}]` or flat objects.
        file: PathBuf,
    },

    /// Print a table's rows as JSON.
    Export {
        #[arg(long)]
        table: String,
    },

    /// List tables in the database.
    Tables,

    /// Run every prompt column of a configured table.
    Run {
        #[arg(long)]
        table: String,

        /// Rows processed in parallel (defaults to `defaults.concurrency`).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Use only the network strategy.
        #[arg(long)]
        no_browser: bool,
    },

    /// Fetch one URL through the strategy chain and print the result.
    Fetch {
        url: String,

        /// Plain text instead of Markdown.
        #[arg(long)]
        text: bool,

        #[arg(long)]
        no_browser: bool,
    },

    /// Expand a template against one row without calling the model.
    Expand {
        #[arg(long)]
        table: String,

        #[arg(long)]
        row: String,

        #[arg(long)]
        template: String,

        /// Inject resources as plain text instead of Markdown.
        #[arg(long)]
        text: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
    /// Print the config file path.
    Path,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "porter=info",
        1 => "porter=debug",
        _ => "porter=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let db = cli
        .db
        .clone()
        .unwrap_or_else(|| expand_home(&config.defaults.database));

    match cli.command {
        Command::Import { table, file } => cmd_import(&db, &table, &file).await,
        Command::Export { table } => cmd_export(&db, &table).await,
        Command::Tables => cmd_tables(&db).await,
        Command::Run {
            table,
            concurrency,
            no_browser,
        } => cmd_run(&config, &db, &table, concurrency, no_browser).await,
        Command::Fetch {
            url,
            text,
            no_browser,
        } => cmd_fetch(&config, &url, text, no_browser).await,
        Command::Expand {
            table,
            row,
            template,
            text,
        } => cmd_expand(&config, &db, &table, &row, &template, text).await,
        Command::Config { ref action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
            ConfigAction::Path => cmd_config_path(&cli),
        },
    }
}

/// Load the config file and apply flag/env overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(model) = &cli.validation_model {
        config.llm.validation_model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.llm.base_url = base_url.clone();
    }
    Ok(config)
}

fn fetcher(config: &AppConfig, no_browser: bool) -> Result<Arc<Fetcher>> {
    let mut fetch_config = FetchConfig::from(config);
    if no_browser {
        fetch_config.browser = None;
    }
    Ok(Arc::new(Fetcher::new(&fetch_config)?))
}

// ---------------------------------------------------------------------------
// Table commands
// ---------------------------------------------------------------------------

async fn cmd_import(db: &Path, table: &str, file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let storage = Storage::open(db).await?;
    let count = storage.import_json(table, &json).await?;
    info!(table, count, "rows imported");
    println!("Imported {count} rows into '{table}'");
    Ok(())
}

async fn cmd_export(db: &Path, table: &str) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    println!("{}", storage.export_json(table).await?);
    Ok(())
}

async fn cmd_tables(db: &Path) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let tables = storage.list_tables().await?;
    if tables.is_empty() {
        println!("No tables in {}", db.display());
        return Ok(());
    }

    println!("{:<24} {:>8} {:>8}", "TABLE", "ROWS", "WRITES");
    for (name, rows) in tables {
        let writes = storage.write_count(&name).await?;
        println!("{name:<24} {rows:>8} {writes:>8}");
    }
    Ok(())
}

async fn cmd_run(
    config: &AppConfig,
    db: &Path,
    table: &str,
    concurrency: Option<usize>,
    no_browser: bool,
) -> Result<()> {
    let table_config = config
        .table(table)
        .ok_or_else(|| eyre!("table '{table}' has no [[tables]] entry in the config"))?;

    let executor = ChatCompletionsExecutor::from_config(&config.llm)?;
    let checker = executor.clone().with_model(config.llm.validation_model());
    let executor: Arc<dyn PromptExecutor> = Arc::new(executor);

    let fetcher = fetcher(config, no_browser)?;
    let store: Arc<dyn DataStore> = Arc::new(Storage::open(db).await?);
    let orchestrator = Orchestrator::new(fetcher.clone(), executor, store).with_checker(Arc::new(checker));

    let options = TableRunOptions {
        concurrency: concurrency.unwrap_or(config.defaults.concurrency as usize),
        fetch: config.fetch.clone(),
    };

    info!(table, model = %config.llm.model, "running table");
    let result = run_table(Arc::new(orchestrator), table_config, &options, Arc::new(CliProgress::new())).await;
    fetcher.shutdown().await;
    let summary = result?;

    println!();
    println!("  Table run complete: {}", summary.table);
    println!("  Rows:      {}", summary.rows);
    println!("  Produced:  {}", summary.produced);
    println!("  Harvested: {}", summary.harvested);
    println!("  Unfetched: {}", summary.harvest_failed);
    println!("  Rejected:  {}", summary.rejected);
    println!("  Failed:    {}", summary.failed);
    println!("  Skipped:   {}", summary.skipped);
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Fetch / expand
// ---------------------------------------------------------------------------

async fn cmd_fetch(config: &AppConfig, url: &str, text: bool, no_browser: bool) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    let fetcher = fetcher(config, no_browser)?;

    let result = fetcher.fetch(&parsed, !text).await;
    fetcher.shutdown().await;
    let result = result?;

    eprintln!(
        "{} via {} ({} words)",
        result.url,
        result.provenance,
        result.content.split_whitespace().count()
    );
    println!("{}", result.content);
    Ok(())
}

async fn cmd_expand(
    config: &AppConfig,
    db: &Path,
    table: &str,
    row_id: &str,
    template: &str,
    text: bool,
) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let row = storage
        .get_row(table, row_id)
        .await?
        .ok_or_else(|| eyre!("row '{row_id}' not found in table '{table}'"))?;

    let fetcher = fetcher(config, false)?;
    let options = ExpandOptions {
        render_as_markdown: !text && config.fetch.render_as_markdown,
        skip_on_fetch_failure: config.fetch.skip_on_fetch_failure,
    };
    let fields = FieldIndex::resolve(&row);
    let expansion = expand(template, &row, &fields, fetcher.as_ref(), &options).await;
    fetcher.shutdown().await;
    let expansion = expansion?;

    for resource in &expansion.resources {
        eprintln!("injected {} via {}", resource.url, resource.provenance);
    }
    for warning in &expansion.warnings {
        eprintln!("warning: {warning}");
    }
    println!("{}", expansion.text);
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

fn cmd_config_path(cli: &Cli) -> Result<()> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config_file_path()?,
    };
    println!("{}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Row progress bar for `run`.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl RunProgress for CliProgress {
    fn started(&self, table: &str, rows: usize) {
        self.bar.set_length(rows as u64);
        self.bar.set_message(table.to_string());
    }

    fn row_finished(&self, report: &RowReport) {
        self.bar.inc(1);
        if report.failed > 0 || report.harvest_failed > 0 {
            self.bar.set_message(format!("row {} had failures", report.row_id));
        } else {
            self.bar.set_message(format!("row {}", report.row_id));
        }
    }

    fn done(&self, _summary: &TableRunSummary) {
        self.bar.finish_and_clear();
    }
}
