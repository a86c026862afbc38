//! Persistent build-state markers.
//!
//! Progress through the import -> configure -> build pipeline is recorded
//! as zero-byte files under `flags/`. Import is platform-independent
//! (`<module>-imported`); configure and build state is tracked per platform
//! and architecture (`<module>-configured-<platform>-<arch>` and the
//! `built` twin). Clearing a stage always clears the stages after it, and
//! may also remove the stage's output directories when `clean` is set.

use crate::core::QuarryError;
use crate::env::{Architecture, Environment};
use crate::project::{OutputDir, output_dir};
use crate::utils::fs::{remove_directory, remove_if_exists, touch_file};

use std::path::PathBuf;

fn flag_path(env: &Environment, name: &str, suffix: &str) -> PathBuf {
    env.flags_dir.join(format!("{name}-{suffix}"))
}

fn imported_flag(env: &Environment, name: &str) -> PathBuf {
    flag_path(env, name, "imported")
}

fn configured_flag(env: &Environment, name: &str, arch: &Architecture) -> PathBuf {
    flag_path(env, name, &format!("configured-{}-{}", env.platform, arch.name))
}

fn built_flag(env: &Environment, name: &str, arch: &Architecture) -> PathBuf {
    flag_path(env, name, &format!("built-{}-{}", env.platform, arch.name))
}

pub fn is_imported(env: &Environment, name: &str) -> bool {
    imported_flag(env, name).is_file()
}

pub fn set_imported(env: &Environment, name: &str) -> Result<(), QuarryError> {
    touch_file(&imported_flag(env, name))
}

/// Forget that a module was imported: drop the marker and clear the
/// configure state for every architecture. With `clean`, the module's
/// source tree and per-stage directories are deleted too; without it the
/// fetched files stay in place.
pub fn clear_imported(env: &Environment, name: &str, clean: bool) -> Result<(), QuarryError> {
    remove_if_exists(&imported_flag(env, name))?;
    if clean {
        remove_directory(&env.source_root_dir.join(name))?;
    }
    clear_configured_all(env, name, clean)
}

pub fn is_configured(env: &Environment, name: &str, arch: &Architecture) -> bool {
    configured_flag(env, name, arch).is_file()
}

pub fn set_configured(env: &Environment, name: &str, arch: &Architecture) -> Result<(), QuarryError> {
    touch_file(&configured_flag(env, name, arch))
}

/// Clear the configure marker for one architecture. With `clean`, the
/// module's configure directories for every configuration (the `All`
/// sentinel included) are deleted too. Build state is cleared either way.
pub fn clear_configured(
    env: &Environment,
    name: &str,
    arch: &Architecture,
    clean: bool,
) -> Result<(), QuarryError> {
    remove_if_exists(&configured_flag(env, name, arch))?;
    if clean {
        for config in &env.configs_all {
            remove_directory(&output_dir(env, arch, config, OutputDir::Configure, name))?;
        }
    }
    clear_built(env, name, arch, clean)
}

/// [`clear_configured`] over every architecture.
pub fn clear_configured_all(env: &Environment, name: &str, clean: bool) -> Result<(), QuarryError> {
    for arch in &env.archs {
        clear_configured(env, name, arch, clean)?;
    }
    Ok(())
}

pub fn is_built(env: &Environment, name: &str, arch: &Architecture) -> bool {
    built_flag(env, name, arch).is_file()
}

pub fn set_built(env: &Environment, name: &str, arch: &Architecture) -> Result<(), QuarryError> {
    touch_file(&built_flag(env, name, arch))
}

/// Clear the build marker for one architecture. With `clean`, the module's
/// library, binary, include, and install directories are deleted for every
/// configuration, the `All` sentinel included.
pub fn clear_built(
    env: &Environment,
    name: &str,
    arch: &Architecture,
    clean: bool,
) -> Result<(), QuarryError> {
    remove_if_exists(&built_flag(env, name, arch))?;
    if clean {
        for config in &env.configs_all {
            for kind in
                [OutputDir::Libraries, OutputDir::Binaries, OutputDir::Includes, OutputDir::Install]
            {
                remove_directory(&output_dir(env, arch, config, kind, name))?;
            }
        }
    }
    Ok(())
}
