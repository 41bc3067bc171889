//! Engine configuration: `.taskhive/config.toml` with environment overrides.

use crate::core::error::{Result, TaskhiveError};
use crate::core::lock::LockOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_DIR: &str = ".taskhive";
pub const CONFIG_FILE: &str = "config.toml";

const MODE_ENV: &str = "TASKHIVE_MODE";
const LEDGER_BIN_ENV: &str = "TASKHIVE_LEDGER_BIN";
const FEATURES_DIR_ENV: &str = "TASKHIVE_FEATURES_DIR";

/// Which backend is canonical. Chosen once when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Ledger,
    Local,
}

impl FromStr for BackendMode {
    type Err = TaskhiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ledger" => Ok(BackendMode::Ledger),
            "local" | "off" => Ok(BackendMode::Local),
            other => Err(TaskhiveError::ConfigError(format!(
                "unknown backend mode '{other}' (expected 'ledger' or 'local')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub binary: String,
    pub command_timeout_ms: u64,
    pub auto_import: bool,
    pub auto_flush: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            binary: "bd".to_string(),
            command_timeout_ms: 30_000,
            auto_import: false,
            auto_flush: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: BackendMode,
    /// Relative paths resolve against the project root.
    pub features_dir: PathBuf,
    pub ledger: LedgerConfig,
    pub lock: LockOptions,
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::default(),
            features_dir: PathBuf::from(CONFIG_DIR).join("features"),
            ledger: LedgerConfig::default(),
            lock: LockOptions::default(),
            project_root: PathBuf::from("."),
        }
    }
}

impl EngineConfig {
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Loads the project config. A missing file is not an error; a malformed one is.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = Self::config_path(project_root);
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(TaskhiveError::IoError)?;
            toml::from_str::<EngineConfig>(&content).map_err(|e| {
                TaskhiveError::ConfigError(format!("{}: {}", path.display(), e))
            })?
        } else {
            EngineConfig::default()
        };
        config.project_root = project_root.to_path_buf();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(mode) = std::env::var(MODE_ENV) {
            self.mode = mode.parse()?;
        }
        if let Ok(bin) = std::env::var(LEDGER_BIN_ENV) {
            if !bin.trim().is_empty() {
                self.ledger.binary = bin;
            }
        }
        if let Ok(dir) = std::env::var(FEATURES_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.features_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    pub fn features_root(&self) -> PathBuf {
        if self.features_dir.is_absolute() {
            self.features_dir.clone()
        } else {
            self.project_root.join(&self.features_dir)
        }
    }

    /// Local-only configuration rooted at `project_root`, used by tests and `--mode local`.
    pub fn local(project_root: &Path) -> Self {
        Self {
            mode: BackendMode::Local,
            project_root: project_root.to_path_buf(),
            ..Self::default()
        }
    }
}
