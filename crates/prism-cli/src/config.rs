use anyhow::{Context, Result};
use prism_modularity::ModularityOptions;
use prism_navigation::NavigationOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrismConfig {
    pub log: LogConfig,
    pub modularity: ModularityOptions,
    pub navigation: NavigationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

impl PrismConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn resolve_config(cli_config: Option<PathBuf>) -> Result<Self> {
        if let Some(config_path) = cli_config {
            Self::load_from_file(config_path)
        } else if let Ok(env_config) = std::env::var("PRISM_CONFIG") {
            Self::load_from_file(env_config)
        } else {
            Ok(Self::default())
        }
    }

    /// Verbosity flags win over $PRISM_LOG, which wins over the file
    pub fn log_filter(&self, verbose: u8) -> String {
        match verbose {
            0 => std::env::var("PRISM_LOG").unwrap_or_else(|_| self.log.filter.clone()),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}

pub fn init_tracing(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter).with_context(|| format!("invalid log filter '{filter}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
