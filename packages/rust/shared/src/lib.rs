//! Shared types, error model, and configuration for Porter.
//!
//! This crate is the foundation depended on by all other Porter crates.
//! It provides:
//! - [`PorterError`]: the unified error type
//! - Domain types ([`Row`], [`TaskContext`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BrowserConfig, DefaultsConfig, FetchConfig, FetchPolicyConfig, LlmConfig,
    PermittedValuesConfig, PromptColumnConfig, TableConfig, api_key, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{PorterError, Result};
pub use types::{Row, TaskContext, is_blank, render_value};
