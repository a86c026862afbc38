//! Synchronous external-process launcher.
//!
//! Every native tool invocation (cmake, git, tar, configure scripts) goes
//! through [`ProcessCommand`], a small fluent builder over
//! [`std::process::Command`]. Exactly one external process runs at a time;
//! the caller blocks until it exits, and a non-zero exit code surfaces as
//! [`QuarryError::CommandFailed`].
//!
//! Batch mode quiets per-command echo globally via [`set_quiet`]; quiet
//! runs capture output and replay the tail only on failure.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::debug;

use crate::core::QuarryError;

static QUIET: AtomicBool = AtomicBool::new(false);

/// Suppress per-command console echo (used by batch mode).
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

/// Whether console echo is currently suppressed.
pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Fluent builder for a single blocking external command.
pub struct ProcessCommand {
    program: PathBuf,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    context: Option<String>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            context: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory; created before the process starts.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.envs.extend(vars);
        self
    }

    /// Extra context attached to a failure ("Configuring zlib x64 Debug").
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn prepare(&self) -> Result<Command> {
        if let Some(dir) = &self.current_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                QuarryError::fs(format!("can't create directory \"{}\"", dir.display()), e)
            })?;
        }
        if !is_quiet() {
            if let Some(dir) = &self.current_dir {
                println!("{}", dir.display().to_string().dimmed());
            }
            println!("{}", format!("{} {}", self.program_name(), self.args.join(" ")).cyan());
        }
        debug!(program = %self.program.display(), args = ?self.args, "launching process");

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        Ok(command)
    }

    fn failure(&self, code: i32) -> anyhow::Error {
        let err = QuarryError::CommandFailed { program: self.program_name(), code };
        match &self.context {
            Some(context) => anyhow::Error::new(err).context(context.clone()),
            None => err.into(),
        }
    }

    /// Run to completion; error on non-zero exit.
    pub fn run(&self) -> Result<()> {
        let mut command = self.prepare()?;
        if is_quiet() {
            let output = command
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .with_context(|| format!("couldn't start {}", self.program_name()))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: String = stderr
                    .lines()
                    .rev()
                    .take(20)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect::<Vec<_>>()
                    .join("\n");
                let code = output.status.code().unwrap_or(-1);
                return Err(self.failure(code).context(tail));
            }
            Ok(())
        } else {
            let status = command
                .status()
                .with_context(|| format!("couldn't start {}", self.program_name()))?;
            if !status.success() {
                return Err(self.failure(status.code().unwrap_or(-1)));
            }
            Ok(())
        }
    }

    /// Run capturing stdout; error on non-zero exit.
    pub fn run_capture(&self) -> Result<String> {
        let mut command = self.prepare()?;
        let output = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("couldn't start {}", self.program_name()))?;
        if !output.status.success() {
            return Err(self.failure(output.status.code().unwrap_or(-1)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Run a script or tool from `dir` with no extra setup.
pub fn exec(dir: &Path, program: &Path, args: &[&str]) -> Result<()> {
    ProcessCommand::new(program).args(args.iter().copied()).current_dir(dir).run()
}
