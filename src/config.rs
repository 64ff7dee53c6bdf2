use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::db::TableName;

pub const DEFAULT_CONFIG_FILE: &str = "chronam.toml";

pub const DEFAULT_PROMPT: &str = "Summarize the following newspaper page titled \"{title}\" \
published on {date} in two or three sentences:\n\n{ocr_eng}";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub search: SearchSettings,
    pub table: TableSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    pub base_url: String,
    pub term: String,
    pub state: String,
    pub pages: u32,
    pub page_delay_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSettings {
    pub catalog: String,
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    pub endpoint: String,
    pub name: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub prompt_template: String,
    pub columns: Vec<String>,
    pub date_column: String,
}

impl TableSettings {
    pub fn table_name(&self) -> Result<TableName> {
        TableName::new(&self.catalog, &self.schema, &self.name)
    }
}

/// Defaults, then the optional TOML file, then `CHRONAM_*` environment
/// variables (`__` separates sections, e.g. `CHRONAM_SEARCH__TERM`).
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    Config::builder()
        .set_default("db_path", "data/chronam.sqlite")?
        .set_default("search.base_url", "https://chroniclingamerica.loc.gov/search/pages/results/")?
        .set_default("search.term", "flood")?
        .set_default("search.state", "Pennsylvania")?
        .set_default("search.pages", 10)?
        .set_default("search.page_delay_secs", 20)?
        .set_default("search.request_timeout_secs", 30)?
        .set_default("table.catalog", "main")?
        .set_default("table.schema", "default")?
        .set_default("table.name", "chronam_pages")?
        .set_default("model.endpoint", "https://api.openai.com/v1")?
        .set_default("model.name", "gpt-4o-mini")?
        .set_default("model.max_tokens", 100)?
        .set_default("model.temperature", 0.7)?
        .set_default("model.request_timeout_secs", 60)?
        .set_default("model.prompt_template", DEFAULT_PROMPT)?
        .set_default("model.columns", vec!["title", "date", "ocr_eng"])?
        .set_default("model.date_column", "date")?
        .add_source(file)
        .add_source(
            Environment::with_prefix("CHRONAM")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .context("Failed to load configuration")?
        .try_deserialize()
        .context("Invalid configuration")
}
