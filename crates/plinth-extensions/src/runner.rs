//! Migration script runner
//!
//! The migration engine never executes scripts itself; it hands the
//! absolute script path to a [`MigrationRunner`] and records the outcome.

use anyhow::{bail, Context, Result};
use plinth_core::types::RunnerConfig;
use std::path::Path;

/// Executes the up and down units of a migration script
#[cfg_attr(test, mockall::automock)]
pub trait MigrationRunner {
    /// Apply the script
    fn up(&self, script: &Path) -> Result<()>;

    /// Revert the script
    fn down(&self, script: &Path) -> Result<()>;
}

/// Runs each script through an external interpreter:
/// `<interpreter> [args..] <script> up|down`, from the script's directory.
pub struct CommandRunner {
    interpreter: String,
    args: Vec<String>,
}

impl CommandRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args: Vec::new(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            args: config.args.clone(),
        }
    }

    fn run(&self, script: &Path, direction: &str) -> Result<()> {
        if !script.exists() {
            bail!("Migration file \"{}\" not found", script.display());
        }

        let mut args: Vec<String> = self.args.clone();
        args.push(script.display().to_string());
        args.push(direction.to_string());

        let mut command = duct::cmd(&self.interpreter, &args)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked();
        if let Some(dir) = script.parent() {
            command = command.dir(dir);
        }

        tracing::debug!("Running {} {}", self.interpreter, args.join(" "));
        let output = command
            .run()
            .with_context(|| format!("Failed to start {}", self.interpreter))?;

        if !output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            bail!(
                "{} exited with {}: {}",
                script.display(),
                output.status,
                text.trim()
            );
        }

        Ok(())
    }
}

impl MigrationRunner for CommandRunner {
    fn up(&self, script: &Path) -> Result<()> {
        self.run(script, "up")
    }

    fn down(&self, script: &Path) -> Result<()> {
        self.run(script, "down")
    }
}
