//! Core types shared across quarry: the error enum, user-facing error
//! presentation, and the redo-mode command modifier.

pub mod error;

pub use error::{ErrorContext, QuarryError, user_friendly_error};

/// How a command treats work that is already flagged as done.
///
/// The interactive shell spells these as command suffixes: `?` for
/// [`RedoMode::Once`], `!` for [`RedoMode::Force`], and no suffix for
/// [`RedoMode::Always`]. Dependencies of the current target are always
/// processed with once semantics unless the mode is `Force`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoMode {
    /// Skip the target entirely when its flag is already set.
    Once,
    /// Redo the current target; dependencies still use once semantics.
    Always,
    /// Redo the current target and all of its dependencies.
    Force,
}

impl RedoMode {
    /// Resolve the mode from the `--force`/`--once` CLI flags.
    pub fn from_flags(force: bool, once: bool) -> Self {
        match (force, once) {
            (true, _) => Self::Force,
            (_, true) => Self::Once,
            _ => Self::Always,
        }
    }
}
