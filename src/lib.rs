//! quarry: a build orchestrator for third-party native modules.
//!
//! Each module is declared by a metadata document (JSON with comments)
//! under `modules/`. quarry fetches module sources, applies local patches,
//! collects license files, and drives the module's own build system over
//! an architecture/configuration matrix, keeping every output in a shared
//! per-platform directory layout. Progress is tracked through marker files
//! so expensive stages only rerun when asked to.

pub mod builder;
pub mod cli;
pub mod core;
pub mod env;
pub mod fetch;
pub mod flags;
pub mod metadata;
pub mod ops;
pub mod pattern;
pub mod process;
pub mod project;
pub mod resolver;
pub mod template;
pub mod utils;

pub use cli::{Cli, execute};
