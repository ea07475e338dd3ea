//! Application configuration for Porter.
//!
//! User config lives at `~/.porter/porter.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PorterError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "porter.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".porter";

// ---------------------------------------------------------------------------
// Config structs (matching porter.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Prompt-execution endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Resource fetching policy.
    #[serde(default)]
    pub fetch: FetchPolicyConfig,

    /// Per-table enrichment settings.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl AppConfig {
    /// Look up a table's settings by name.
    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the local table database.
    #[serde(default = "default_database")]
    pub database: String,

    /// Rows processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_database() -> String {
    "porter.db".into()
}
fn default_concurrency() -> u32 {
    3
}

/// `[llm]` section: an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the API, without the `/chat/completions` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for prompt execution.
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for the meets-requirements check. Empty means `model`.
    #[serde(default)]
    pub validation_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// The model to use for validation prompts.
    pub fn validation_model(&self) -> &str {
        if self.validation_model.trim().is_empty() {
            &self.model
        } else {
            &self.validation_model
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            validation_model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_llm_timeout() -> u64 {
    60
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPolicyConfig {
    /// Convert fetched HTML to Markdown (otherwise plain text).
    #[serde(default = "default_true")]
    pub render_as_markdown: bool,

    /// Replace failed directives with an empty string instead of failing.
    #[serde(default)]
    pub skip_on_fetch_failure: bool,

    /// Memoize fetches by URL for the duration of one run.
    #[serde(default = "default_true")]
    pub memoize: bool,

    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,

    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Permit loopback/private hosts in the network strategy.
    #[serde(default)]
    pub allow_private_hosts: bool,

    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Default for FetchPolicyConfig {
    fn default() -> Self {
        Self {
            render_as_markdown: true,
            skip_on_fetch_failure: false,
            memoize: true,
            network_timeout_secs: default_network_timeout(),
            render_timeout_secs: default_render_timeout(),
            user_agent: default_user_agent(),
            allow_private_hosts: false,
            browser: BrowserConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_network_timeout() -> u64 {
    15
}
fn default_render_timeout() -> u64 {
    45
}
fn default_user_agent() -> String {
    format!("porter/{}", env!("CARGO_PKG_VERSION"))
}

/// `[fetch.browser]` section: the render bridge subprocess and its pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Disable to use the network strategy only.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Executable that speaks the render bridge protocol.
    #[serde(default = "default_bridge_command")]
    pub command: String,

    #[serde(default = "default_bridge_args")]
    pub args: Vec<String>,

    /// Root directory for persistent browser profiles (one per pool slot).
    #[serde(default = "default_profile_dir")]
    pub profile_dir: String,

    /// Number of browser contexts available for concurrent renders.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Page lifecycle event to wait for before extracting HTML.
    #[serde(default = "default_wait_until")]
    pub wait_until: String,

    /// Extra settle time after the wait condition.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_viewport")]
    pub viewport: [u32; 2],
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_bridge_command(),
            args: default_bridge_args(),
            profile_dir: default_profile_dir(),
            pool_size: default_pool_size(),
            wait_until: default_wait_until(),
            settle_ms: default_settle_ms(),
            viewport: default_viewport(),
        }
    }
}

fn default_bridge_command() -> String {
    "node".into()
}
fn default_bridge_args() -> Vec<String> {
    vec!["scripts/render-bridge.mjs".into()]
}
fn default_profile_dir() -> String {
    "~/.porter/browser".into()
}
fn default_pool_size() -> u32 {
    2
}
fn default_wait_until() -> String {
    "networkidle".into()
}
fn default_settle_ms() -> u64 {
    2000
}
fn default_viewport() -> [u32; 2] {
    [1920, 1920]
}

/// `[[tables]]` entry: how one table is enriched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,

    /// Column holding the page URL to harvest for each row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url_column: Option<String>,

    /// Harvested field (`title`, `h1`, `description`, `text`, `markdown`)
    /// to output column. Unmapped fields are not written.
    #[serde(default)]
    pub column_mapping: BTreeMap<String, String>,

    /// Prompt-filled output columns.
    #[serde(default)]
    pub prompts: Vec<PromptColumnConfig>,
}

/// `[[tables.prompts]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptColumnConfig {
    /// Output column the response is written to.
    pub column: String,

    /// Template body with `{{field}}` references and `@URL` directives.
    pub template: String,

    /// Template name used in logs and error context. Defaults to the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Run the response validator before accepting the value.
    #[serde(default)]
    pub validate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permitted_values: Option<PermittedValuesConfig>,

    /// Requirement text for the meets-requirements check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<String>,
}

impl PromptColumnConfig {
    pub fn template_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.column)
    }
}

/// Where a strict-membership value set comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermittedValuesConfig {
    /// Fixed list.
    Values(Vec<String>),
    /// Distinct non-empty values of a column in the same table.
    Column(String),
    /// Values held in a field of the row being processed.
    RowField(String),
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub network_timeout_secs: u64,
    pub render_timeout_secs: u64,
    pub user_agent: String,
    pub allow_private_hosts: bool,
    pub memoize: bool,
    /// `None` disables the browser strategies.
    pub browser: Option<BrowserConfig>,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let fetch = &config.fetch;
        Self {
            network_timeout_secs: fetch.network_timeout_secs,
            render_timeout_secs: fetch.render_timeout_secs,
            user_agent: fetch.user_agent.clone(),
            allow_private_hosts: fetch.allow_private_hosts,
            memoize: fetch.memoize,
            browser: fetch.browser.enabled.then(|| fetch.browser.clone()),
        }
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.porter/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| PorterError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.porter/porter.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PorterError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PorterError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PorterError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PorterError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PorterError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API key from the configured env var.
pub fn api_key(config: &LlmConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(PorterError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("networkidle"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.concurrency, 3);
        assert_eq!(parsed.llm.max_tokens, 1000);
        assert_eq!(parsed.fetch.browser.viewport, [1920, 1920]);
    }

    #[test]
    fn config_with_tables() {
        let toml_str = r#"
[defaults]
database = "/tmp/porter.db"

[[tables]]
name = "companies"
source_url_column = "URL"

[tables.column_mapping]
title = "Title"
text = "URL_Content"

[[tables.prompts]]
column = "AI_Tags"
template = "Tag {{Title}}"
validate = true
permitted_values = { column = "Known Tags" }

[[tables.prompts]]
column = "AI_Contact"
template = "Find the contact email in {{URL_Content}}"
validate = true
requirement = "must be a valid email"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let table = config.table("companies").expect("table present");
        assert_eq!(table.source_url_column.as_deref(), Some("URL"));
        assert_eq!(table.column_mapping.get("text").map(String::as_str), Some("URL_Content"));
        assert_eq!(table.prompts.len(), 2);
        assert_eq!(
            table.prompts[0].permitted_values,
            Some(PermittedValuesConfig::Column("Known Tags".into()))
        );
        assert_eq!(table.prompts[1].template_name(), "AI_Contact");
        assert!(config.table("missing").is_none());
    }

    #[test]
    fn explicit_permitted_values_parse() {
        let prompt: PromptColumnConfig = toml::from_str(
            r#"
column = "Color"
template = "Pick a color"
permitted_values = { values = ["red", "green", "blue"] }
"#,
        )
        .expect("parse");
        assert_eq!(
            prompt.permitted_values,
            Some(PermittedValuesConfig::Values(vec![
                "red".into(),
                "green".into(),
                "blue".into()
            ]))
        );
    }

    #[test]
    fn validation_model_falls_back_to_model() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.validation_model(), "gpt-3.5-turbo");
        llm.validation_model = "gpt-4o".into();
        assert_eq!(llm.validation_model(), "gpt-4o");
    }

    #[test]
    fn fetch_config_from_app_config() {
        let mut app = AppConfig::default();
        let fetch = FetchConfig::from(&app);
        assert_eq!(fetch.network_timeout_secs, 15);
        assert!(fetch.browser.is_some());

        app.fetch.browser.enabled = false;
        assert!(FetchConfig::from(&app).browser.is_none());
    }

    #[test]
    fn api_key_missing() {
        let config = LlmConfig {
            // Use a unique env var name to avoid interfering with other tests
            api_key_env: "PORTER_TEST_NONEXISTENT_KEY_12345".into(),
            ..LlmConfig::default()
        };
        let result = api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
