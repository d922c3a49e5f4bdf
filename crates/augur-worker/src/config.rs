//! Worker configuration: an optional TOML file, then `AUGUR__*` environment
//! overrides (double underscore nests, e.g. `AUGUR__COLLECTION__BATCH_LIMIT=20`).

use std::collections::HashMap;
use std::path::PathBuf;

use augur_core::Track;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::{Deserialize, Deserializer};

use crate::phases;
use crate::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Falls back to `DATABASE_URL`; without either the worker runs on the in-memory store
    pub database_url: Option<String>,
    /// Falls back to `GITHUB_TOKEN`
    pub github_token: Option<String>,
    /// Phase name -> enabled. Accepts booleans or 0/1.
    #[serde(deserialize_with = "deserialize_phase_flags")]
    pub task_routine: HashMap<String, bool>,
    pub collection: CollectionSection,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            github_token: None,
            task_routine: phases::CONFIGURABLE_PHASES
                .iter()
                .map(|name| (name.to_string(), true))
                .collect(),
            collection: CollectionSection::default(),
        }
    }
}

impl WorkerConfig {
    pub fn enabled_phases(&self) -> &HashMap<String, bool> {
        &self.task_routine
    }
}

/// [collection] section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionSection {
    pub track: Track,
    /// Most repositories picked per pass
    pub batch_limit: usize,
    pub max_concurrent_chains: usize,
    pub interval_secs: u64,
    /// Successful tracks older than this are collected again
    pub recollect_after_days: i64,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            track: Track::Core,
            batch_limit: 50,
            max_concurrent_chains: 4,
            interval_secs: 60,
            recollect_after_days: 1,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PhaseFlag {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PhaseFlag {
    fn enabled(&self) -> bool {
        match self {
            PhaseFlag::Bool(b) => *b,
            PhaseFlag::Int(i) => *i == 1,
            PhaseFlag::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        }
    }
}

fn deserialize_phase_flags<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, PhaseFlag>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, flag)| (name, flag.enabled()))
        .collect())
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("AUGUR")
        .separator("__")
        .try_parsing(true)
}

fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<WorkerConfig> {
    let mut cfg: WorkerConfig = builder.build()?.try_deserialize()?;

    if cfg.database_url.is_none() {
        cfg.database_url = std::env::var("DATABASE_URL").ok();
    }
    if cfg.github_token.is_none() {
        cfg.github_token = std::env::var("GITHUB_TOKEN").ok();
    }

    Ok(cfg)
}

/// Load `config/default.toml` (if present), then `config_path`, then `AUGUR__*`.
pub fn load_config(config_path: Option<PathBuf>) -> Result<WorkerConfig> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    from_builder(builder.add_source(environment()))
}
