pub mod apply;
pub mod destroy;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod validate;

use crate::loader;
use anyhow::Context;
use colored::Colorize;
use stackflow_cloud::{
    Cancellation, Engine, ExecuteOptions, FileStateStore, RetryConfig, SimulatedBackend,
};
use stackflow_config::Settings;
use stackflow_core::Stack;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub type SimulatedEngine = Engine<SimulatedBackend, FileStateStore>;

/// The stack file being worked on and everything derived from its location
pub struct Project {
    pub stack_file: PathBuf,
    pub settings: Settings,
    pub stage: Option<String>,
    state_dir: PathBuf,
}

impl Project {
    /// Locate the stack file (explicit path or discovery) and load settings
    /// from its directory; `concurrency` overrides the settings.
    pub fn open(
        file: Option<&Path>,
        stage: Option<&str>,
        concurrency: Option<usize>,
    ) -> anyhow::Result<Self> {
        let stack_file = match file {
            Some(path) => path.to_path_buf(),
            None => stackflow_config::find_stack_file()?,
        };
        if !stack_file.is_file() {
            anyhow::bail!("Stack file not found: {}", stack_file.display());
        }

        let root = stack_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut settings = Settings::load(&root)
            .with_context(|| format!("Failed to load settings for {}", root.display()))?;
        if let Some(concurrency) = concurrency {
            settings.concurrency = concurrency;
        }
        if settings.concurrency == 0 {
            anyhow::bail!("Concurrency must be at least 1");
        }
        let state_dir = settings.state_dir_in(&root);

        tracing::debug!(
            stack_file = %stack_file.display(),
            state_dir = %state_dir.display(),
            concurrency = settings.concurrency,
            "Opened project"
        );

        Ok(Self {
            stack_file,
            settings,
            stage: stage.map(str::to_string),
            state_dir,
        })
    }

    pub fn load_stack(&self) -> anyhow::Result<Stack> {
        loader::load_stack(&self.stack_file, self.stage.as_deref())
            .with_context(|| format!("Failed to load {}", self.stack_file.display()))
    }

    pub fn execute_options(&self) -> ExecuteOptions {
        let retry = &self.settings.retry;
        ExecuteOptions {
            concurrency: self.settings.concurrency,
            retry: RetryConfig {
                max_attempts: retry.max_attempts.max(1),
                initial_delay: Duration::from_millis(retry.initial_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
                backoff_multiplier: retry.backoff_multiplier,
            },
        }
    }

    /// Engine over the file state store and the simulated backend, whose
    /// instances are kept per stack next to the state
    pub fn engine(&self) -> SimulatedEngine {
        let backend = SimulatedBackend::new().persisted_in(&self.state_dir);
        let store = FileStateStore::new(&self.state_dir);

        Engine::new(Arc::new(backend), store).with_options(self.execute_options())
    }

    pub fn print_header(&self, stack: &Stack) {
        println!("Stack file: {}", self.stack_file.display().to_string().cyan());
        println!("Stack: {}", stack.name().cyan());
    }
}

/// Cancellation that trips on Ctrl-C.
///
/// Scheduling stops; calls already in flight run to completion and are
/// recorded.
pub fn cancel_on_ctrl_c() -> Cancellation {
    let cancel = Cancellation::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!(
                "{}",
                "Interrupted: waiting for in-flight operations to finish...".yellow()
            );
            handle.cancel();
        }
    });
    cancel
}
