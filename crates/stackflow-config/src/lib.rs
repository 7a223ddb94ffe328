//! Stack file discovery and engine settings

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STACK_FILE_ENV: &str = "STACKFLOW_FILE";
pub const CONCURRENCY_ENV: &str = "STACKFLOW_CONCURRENCY";
pub const STATE_DIR_ENV: &str = "STACKFLOW_STATE_DIR";
pub const MAX_ATTEMPTS_ENV: &str = "STACKFLOW_MAX_ATTEMPTS";

const SETTINGS_FILE: &str = "stackflow.yaml";

/// Find the project's stack file
///
/// Search order:
/// 1. `STACKFLOW_FILE` environment variable (direct path)
/// 2. Current directory: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl
/// 3. The ./.stackflow/ directory, same order
/// 4. ~/.config/stackflow/stack.kdl (global)
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(stack_path) = std::env::var(STACK_FILE_ENV) {
        let path = PathBuf::from(stack_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    let candidates = [
        "stack.local.kdl",
        ".stack.local.kdl",
        "stack.kdl",
        ".stack.kdl",
    ];

    for filename in &candidates {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let stack_dir = current_dir.join(".stackflow");
    if stack_dir.is_dir() {
        for filename in &candidates {
            let path = stack_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("stackflow").join("stack.kdl");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of backend calls in flight
    pub concurrency: usize,

    /// Directory holding per-stack state and locks
    pub state_dir: PathBuf,

    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            state_dir: PathBuf::from(".stackflow"),
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Settings {
    /// Load settings for a project rooted at `project_dir`.
    ///
    /// `stackflow.yaml` in the project directory wins over the one in the
    /// global config directory; environment variables override both.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut candidates = vec![project_dir.join(SETTINGS_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("stackflow").join(SETTINGS_FILE));
        }

        let mut settings = match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                format!("must be a finite number of at least 1, got {}", retry.backoff_multiplier),
            ));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(invalid(
                "retry.initial_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidSettings {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Apply `STACKFLOW_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(concurrency) = env_parse::<usize>(CONCURRENCY_ENV)? {
            self.concurrency = concurrency;
        }
        if let Ok(state_dir) = std::env::var(STATE_DIR_ENV) {
            self.state_dir = PathBuf::from(state_dir);
        }
        if let Some(max_attempts) = env_parse::<u32>(MAX_ATTEMPTS_ENV)? {
            self.retry.max_attempts = max_attempts;
        }
        Ok(())
    }

    /// State directory, relative paths taken from `project_dir`
    pub fn state_dir_in(&self, project_dir: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            project_dir.join(&self.state_dir)
        }
    }
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSetting {
        name: name.to_string(),
        message: message.into(),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
