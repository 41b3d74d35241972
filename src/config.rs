use crate::orchestrator::StrategyKind;
use crate::template::discover_versions;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// What is evaluated and against which versions
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Ratings file, or a directory of ratings files
    pub ratings: PathBuf,
    /// Template root; its sub-directories are the versions when none are listed
    pub templates: Option<PathBuf>,
    /// Index queried when the ratings do not declare one
    pub index: Option<String>,
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Metric identifiers to compute
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub classes: Vec<String>,
    /// alias -> { class, ...parameters }
    #[serde(default)]
    pub parameterized: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_evaluation_workers")]
    pub evaluation_workers: usize,
    #[serde(default = "default_query_workers")]
    pub query_workers: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            evaluation_workers: default_evaluation_workers(),
            query_workers: default_query_workers(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchConfig {
    /// Recorded responses replayed by the offline platform
    pub responses: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistenceConfig {
    pub json_dir: Option<PathBuf>,
    pub sqlite_path: Option<PathBuf>,
}

fn default_name() -> String {
    "evaluation".to_string()
}

fn default_fields() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_evaluation_workers() -> usize {
    4
}

fn default_query_workers() -> usize {
    2
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RANKEVAL_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RANKEVAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));
        Self::load_from(&config_path)
    }

    /// Load and validate the configuration at `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !self.evaluation.ratings.exists() {
            anyhow::bail!(
                "evaluation.ratings path does not exist: {}",
                self.evaluation.ratings.display()
            );
        }

        if self.evaluation.versions.is_empty() && self.evaluation.templates.is_none() {
            anyhow::bail!(
                "no versions: list evaluation.versions or set evaluation.templates to discover them"
            );
        }

        if self.metric_ids().is_empty() {
            anyhow::bail!("metrics.classes must name at least one metric");
        }

        for (alias, entry) in &self.metrics.parameterized {
            let has_class = entry
                .get("class")
                .map_or(false, |class| class.is_string());
            if !has_class {
                anyhow::bail!("metrics.parameterized.{} has no class", alias);
            }
        }

        if self.execution.evaluation_workers == 0 {
            anyhow::bail!("execution.evaluation_workers must be greater than 0");
        }

        if self.execution.query_workers == 0 {
            anyhow::bail!("execution.query_workers must be greater than 0");
        }

        Ok(())
    }

    /// Configured classes followed by parameterized aliases not already listed.
    pub fn metric_ids(&self) -> Vec<String> {
        let mut ids = self.metrics.classes.clone();
        for alias in self.metrics.parameterized.keys() {
            if !ids.contains(alias) {
                ids.push(alias.clone());
            }
        }
        ids
    }

    /// Configured versions, else the sub-directories of the template root.
    pub fn versions(&self) -> Result<Vec<String>> {
        if !self.evaluation.versions.is_empty() {
            return Ok(self.evaluation.versions.clone());
        }
        let root = self
            .evaluation
            .templates
            .as_deref()
            .context("no template root to discover versions from")?;
        let versions = discover_versions(root)
            .with_context(|| format!("Failed to discover versions in {}", root.display()))?;
        if versions.is_empty() {
            anyhow::bail!("no version directories under {}", root.display());
        }
        Ok(versions)
    }

    pub fn ratings(&self) -> &Path {
        &self.evaluation.ratings
    }
}
