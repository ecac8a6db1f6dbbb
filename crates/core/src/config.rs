//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services.
//! Nothing in the engine reads environment variables while serving a call.
//!
//! Settings live in a YAML file with one root mapping per deployment stage:
//!
//! ```yaml
//! dev:
//!   source_db_path: data/source.db
//!   mirror_db_path: data/mirror.db
//!   sample_workers: 4
//! prod:
//!   source_db_path: /srv/emtct/source.db
//!   mirror_db_path: /srv/emtct/mirror.db
//!   sample_workers: 8
//!   lookup_timeout_secs: 30
//! ```

use crate::constants::{
    DEFAULT_MIRROR_DB_PATH, DEFAULT_SAMPLE_WORKERS, DEFAULT_SOURCE_DB_PATH, DEFAULT_STAGE,
};
use crate::{EmtctError, EmtctResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreConfig {
    source_db_path: PathBuf,
    mirror_db_path: PathBuf,
    sample_workers: usize,
    lookup_timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageSettings {
    #[serde(default = "default_source_db_path")]
    source_db_path: PathBuf,
    #[serde(default = "default_mirror_db_path")]
    mirror_db_path: PathBuf,
    #[serde(default = "default_sample_workers")]
    sample_workers: usize,
    #[serde(default)]
    lookup_timeout_secs: Option<u64>,
}

fn default_source_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOURCE_DB_PATH)
}

fn default_mirror_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_MIRROR_DB_PATH)
}

fn default_sample_workers() -> usize {
    DEFAULT_SAMPLE_WORKERS
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            source_db_path: default_source_db_path(),
            mirror_db_path: default_mirror_db_path(),
            sample_workers: DEFAULT_SAMPLE_WORKERS,
            lookup_timeout: None,
        }
    }
}

impl CoreConfig {
    pub fn new(
        source_db_path: PathBuf,
        mirror_db_path: PathBuf,
        sample_workers: usize,
        lookup_timeout: Option<Duration>,
    ) -> EmtctResult<Self> {
        if sample_workers == 0 {
            return Err(EmtctError::InvalidInput(
                "sample_workers must be at least 1".into(),
            ));
        }
        if lookup_timeout.is_some_and(|t| t.is_zero()) {
            return Err(EmtctError::InvalidInput(
                "lookup_timeout must be greater than zero".into(),
            ));
        }

        Ok(Self {
            source_db_path,
            mirror_db_path,
            sample_workers,
            lookup_timeout,
        })
    }

    /// Load the settings for `stage` from a YAML file.
    pub fn from_yaml_file(path: &Path, stage: &str) -> EmtctResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EmtctError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text, stage)
    }

    /// Load the settings for `stage` from YAML text.
    pub fn from_yaml_str(text: &str, stage: &str) -> EmtctResult<Self> {
        let mut stages: BTreeMap<String, StageSettings> = serde_yaml::from_str(text)
            .map_err(|e| EmtctError::Config(format!("invalid configuration: {e}")))?;
        let settings = stages.remove(stage).ok_or_else(|| {
            let known: Vec<&str> = stages.keys().map(String::as_str).collect();
            EmtctError::Config(format!(
                "stage '{stage}' not found (available: {})",
                known.join(", ")
            ))
        })?;

        Self::new(
            settings.source_db_path,
            settings.mirror_db_path,
            settings.sample_workers,
            settings.lookup_timeout_secs.map(Duration::from_secs),
        )
    }

    /// Replace the database paths with explicit overrides where given.
    pub fn with_db_overrides(mut self, source: Option<PathBuf>, mirror: Option<PathBuf>) -> Self {
        if let Some(source) = source {
            self.source_db_path = source;
        }
        if let Some(mirror) = mirror {
            self.mirror_db_path = mirror;
        }
        self
    }

    pub fn source_db_path(&self) -> &Path {
        &self.source_db_path
    }

    pub fn mirror_db_path(&self) -> &Path {
        &self.mirror_db_path
    }

    pub fn sample_workers(&self) -> usize {
        self.sample_workers
    }

    pub fn lookup_timeout(&self) -> Option<Duration> {
        self.lookup_timeout
    }
}

/// Resolve the startup configuration from values the binary read from its environment.
///
/// Without a `config_path` the built-in defaults apply. A missing or blank `stage` selects
/// [`DEFAULT_STAGE`]. Database path overrides win over the file.
pub fn resolve_core_config(
    config_path: Option<PathBuf>,
    stage: Option<String>,
    source_db: Option<PathBuf>,
    mirror_db: Option<PathBuf>,
) -> EmtctResult<CoreConfig> {
    let stage = stage
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_STAGE.to_string());

    let config = match config_path {
        Some(path) => CoreConfig::from_yaml_file(&path, &stage)?,
        None => CoreConfig::default(),
    };
    tracing::debug!(%stage, "resolved core configuration");
    Ok(config.with_db_overrides(source_db, mirror_db))
}
