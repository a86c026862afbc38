//! Error handling for Quarry.
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`QuarryError`]) for precise handling in code
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! Errors fall into the taxonomy used throughout the tool:
//! - *Template errors* (malformed placeholder, undefined variable) abort the
//!   current resolution with no partial result.
//! - *Module errors* (unknown module, not imported, unknown adapter type)
//!   abort the current command only.
//! - *Process errors* (external tool non-zero exit) abort the current phase.
//! - *Environment errors* (no root directory, unknown platform) are fatal at
//!   startup, before any command runs.
//!
//! Use [`user_friendly_error`] at the top level (main, interactive shell) to
//! convert any [`anyhow::Error`] into a colored report with a suggestion.

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Quarry operations.
#[derive(Error, Debug)]
pub enum QuarryError {
    /// A string contained an unterminated or stray `<`/`>` placeholder.
    #[error("invalid variable format: \"{input}\"")]
    MalformedPlaceholder {
        /// The string being expanded.
        input: String,
    },

    /// A required (non-optional) placeholder named a variable that is not
    /// defined in the active variable set.
    #[error("undefined variable: \"{name}\"")]
    UndefinedVariable {
        /// Lowercased variable name as it appeared in the placeholder.
        name: String,
    },

    /// Value expansion recursed past the safety limit.
    #[error("variable expansion exceeded {limit} nested levels")]
    ExpansionTooDeep {
        /// The configured nesting limit.
        limit: usize,
    },

    /// No metadata file exists for the named module.
    #[error("module {name} doesn't exist")]
    ModuleNotFound { name: String },

    /// The module exists but its import flag is not set.
    #[error("module {name} isn't imported")]
    ModuleNotImported { name: String },

    /// A command that operates on the current project was run with no
    /// project selected.
    #[error("project isn't selected")]
    ProjectNotSelected,

    /// A module metadata file could not be parsed.
    #[error("can't parse module file {path}: {reason}")]
    MetadataParse { path: PathBuf, reason: String },

    /// The module declared (or implied) a builder type quarry doesn't know.
    #[error("unknown builder type: {type_name}")]
    UnknownBuilderType { type_name: String },

    /// The module declared a source fetcher type quarry doesn't know.
    #[error("unknown fetcher type: {type_name}")]
    UnknownFetcherType { type_name: String },

    /// No directory containing `quarry.json` was found.
    #[error("can't find root directory")]
    RootNotFound,

    /// The platform id is not declared in the root configuration.
    #[error("unknown platform id: {id}")]
    UnknownPlatform { id: String },

    /// An architecture mask matched nothing.
    #[error("no architectures matched the pattern {pattern} (available architectures: {available})")]
    NoArchitectureMatch { pattern: String, available: String },

    /// A configuration mask matched nothing.
    #[error("no configurations matched the pattern {pattern} (available configurations: {available})")]
    NoConfigurationMatch { pattern: String, available: String },

    /// An external tool required by an adapter or fetcher is not on PATH.
    #[error("required tool not found: {name}")]
    ToolNotFound { name: String },

    /// An external process exited with a non-zero status.
    #[error("{program} exited with code {code}")]
    CommandFailed { program: String, code: i32 },

    /// Generic I/O failure with the operation that caused it.
    #[error("{message}")]
    FileSystem {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Pass-through I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QuarryError {
    /// Wrap an I/O error with a description of the failed operation.
    pub fn fs(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileSystem { message: message.into(), source }
    }
}

/// An error paired with optional user-facing guidance.
///
/// Produced by [`user_friendly_error`]; displayed by the CLI entry points.
pub struct ErrorContext {
    /// The underlying error chain.
    pub error: anyhow::Error,
    /// A one-line suggestion for resolving the error, when one is known.
    pub suggestion: Option<String>,
}

impl ErrorContext {
    /// Print the error (and its cause chain) to stderr with colors.
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.error);
        for cause in self.error.chain().skip(1) {
            eprintln!("  {} {}", "caused by:".dimmed(), cause);
        }
        if let Some(suggestion) = &self.suggestion {
            eprintln!("{} {}", "hint:".yellow().bold(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

/// Attach a suggestion to known error shapes.
///
/// Walks the error chain looking for a [`QuarryError`] it can advise on.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let suggestion = error.chain().find_map(|cause| {
        let quarry = cause.downcast_ref::<QuarryError>()?;
        match quarry {
            QuarryError::RootNotFound => Some(
                "pass --root=DIR, set QUARRY_ROOT, or run quarry inside a \
                 directory tree containing quarry.json"
                    .to_string(),
            ),
            QuarryError::ModuleNotImported { name } => {
                Some(format!("run `quarry import {name}` first"))
            }
            QuarryError::ToolNotFound { name } => {
                Some(format!("install {name} and make sure it is on PATH"))
            }
            QuarryError::ProjectNotSelected => {
                Some("pass --project=NAME or use `select` in the shell".to_string())
            }
            QuarryError::UnknownPlatform { .. } => {
                Some("declare the platform under \"platforms\" in quarry.json".to_string())
            }
            _ => None,
        }
    });
    ErrorContext { error, suggestion }
}
