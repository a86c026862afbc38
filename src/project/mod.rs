//! A selected module and its variable layers.
//!
//! [`Project`] wraps a loaded metadata document together with the variable
//! sets derived from it. Document expansion composes, later layer winning:
//!
//! 1. external (process environment, globals, dynamic values),
//! 2. own (name, source dir, version variants, scalar `this.*` fields),
//! 3. cross (output directories of every architecture/configuration, for
//!    modules that need to reference a sibling target's layout),
//! 4. work (the architecture/configuration currently being processed).
//!
//! Also home to the output directory layout shared with the flag tracker:
//! `platform_dir/{conf,lib,bin,inc,out}<suffix>/<config>/<module>`.

use std::path::PathBuf;

use serde_json::Value;

use crate::core::QuarryError;
use crate::env::{Architecture, Configuration, Environment, VAR_TRUE};
use crate::flags;
use crate::metadata;
use crate::template::VarMap;

/// One of the five per-architecture output trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDir {
    Configure,
    Libraries,
    Binaries,
    Includes,
    Install,
}

impl OutputDir {
    /// Base directory name under the platform directory.
    pub fn dirname(self) -> &'static str {
        match self {
            OutputDir::Configure => "conf",
            OutputDir::Libraries => "lib",
            OutputDir::Binaries => "bin",
            OutputDir::Includes => "inc",
            OutputDir::Install => "out",
        }
    }

    /// Variable name prefix (`lib_dir`, `install_root_dir`, ...).
    fn var_prefix(self) -> &'static str {
        match self {
            OutputDir::Configure => "configure",
            OutputDir::Libraries => "lib",
            OutputDir::Binaries => "bin",
            OutputDir::Includes => "inc",
            OutputDir::Install => "install",
        }
    }
}

const OUTPUT_KINDS: [OutputDir; 5] = [
    OutputDir::Configure,
    OutputDir::Libraries,
    OutputDir::Binaries,
    OutputDir::Includes,
    OutputDir::Install,
];

/// `platform_dir/<base><arch suffix>`, the per-architecture root of one
/// output tree.
pub fn output_root_dir(env: &Environment, arch: &Architecture, kind: OutputDir) -> PathBuf {
    env.platform_dir.join(format!("{}{}", kind.dirname(), arch.suffix))
}

/// The per-configuration level of one output tree.
pub fn output_cfg_dir(
    env: &Environment,
    arch: &Architecture,
    config: &Configuration,
    kind: OutputDir,
) -> PathBuf {
    output_root_dir(env, arch, kind).join(&config.name)
}

/// The configuration-independent (`All`) level of one output tree.
pub fn output_all_dir(env: &Environment, arch: &Architecture, kind: OutputDir) -> PathBuf {
    output_root_dir(env, arch, kind).join(Configuration::all().name)
}

/// A module's directory in one output tree.
pub fn output_dir(
    env: &Environment,
    arch: &Architecture,
    config: &Configuration,
    kind: OutputDir,
    module: &str,
) -> PathBuf {
    output_cfg_dir(env, arch, config, kind).join(module)
}

/// Variables describing one architecture/configuration slot. With a module
/// name the module-scoped `*_dir` variables are included as well.
pub fn work_vars(
    env: &Environment,
    arch: &Architecture,
    config: &Configuration,
    module: Option<&str>,
) -> VarMap {
    let mut vars = VarMap::new();
    vars.insert(arch.lower_name.clone(), VAR_TRUE);
    vars.insert(config.lower_name.clone(), VAR_TRUE);
    vars.insert("arch", arch.name.clone());
    vars.insert("arch_suffix", arch.suffix.clone());
    vars.insert("arch_bitness", arch.bitness.clone());
    vars.insert("arch_generator", arch.generator.clone());
    vars.insert("config", config.name.clone());
    for kind in OUTPUT_KINDS {
        let prefix = kind.var_prefix();
        vars.insert(
            format!("{prefix}_root_dir"),
            output_root_dir(env, arch, kind).display().to_string(),
        );
        vars.insert(
            format!("{prefix}_all_dir"),
            output_all_dir(env, arch, kind).display().to_string(),
        );
        vars.insert(
            format!("{prefix}_cfg_dir"),
            output_cfg_dir(env, arch, config, kind).display().to_string(),
        );
        if let Some(name) = module {
            vars.insert(
                format!("{prefix}_dir"),
                output_dir(env, arch, config, kind, name).display().to_string(),
            );
        }
    }
    vars
}

/// A loaded, imported module.
pub struct Project<'e> {
    env: &'e Environment,
    pub name: String,
    pub source_dir: PathBuf,
    pub version: String,
    raw: Value,
    own: VarMap,
    cross: VarMap,
}

impl<'e> Project<'e> {
    /// Load `name`. The module must be declared and imported.
    pub fn load(env: &'e Environment, name: &str) -> Result<Self, QuarryError> {
        if !metadata::is_module(env, name) {
            return Err(QuarryError::ModuleNotFound { name: name.to_string() });
        }
        if !flags::is_imported(env, name) {
            return Err(QuarryError::ModuleNotImported { name: name.to_string() });
        }
        Self::load_unchecked(env, name)
    }

    /// Load `name` without the imported-state check. Used by the import
    /// pipeline itself, which needs the document before any state exists.
    pub fn load_unchecked(env: &'e Environment, name: &str) -> Result<Self, QuarryError> {
        let raw = metadata::load_module(env, name)?;
        let source_dir = env.source_root_dir.join(name);
        let version = raw.get("version").map(metadata::value_to_string).unwrap_or_default();

        let mut own = VarMap::new();
        own.insert("project", name);
        own.insert("module", name);
        own.insert("source_dir", source_dir.display().to_string());
        if !version.is_empty() {
            version_vars(&mut own, &version);
        }
        if let Some(obj) = raw.as_object() {
            for (key, value) in obj {
                // conditional keys are resolved at expansion time, not here
                if key.contains('|') {
                    continue;
                }
                if matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                    own.insert(format!("this.{key}"), metadata::value_to_string(value));
                }
            }
        }

        let mut cross = VarMap::new();
        for arch in &env.archs {
            let mut roots = VarMap::new();
            for kind in OUTPUT_KINDS {
                roots.insert(
                    format!("{}_root_dir", kind.var_prefix()),
                    output_root_dir(env, arch, kind).display().to_string(),
                );
            }
            cross.extend(&roots.transform("", &format!("_{}", arch.lower_name)));
            for config in &env.configs_all {
                let mut dirs = VarMap::new();
                for kind in OUTPUT_KINDS {
                    dirs.insert(
                        format!("{}_dir", kind.var_prefix()),
                        output_dir(env, arch, config, kind, name).display().to_string(),
                    );
                }
                cross.extend(
                    &dirs.transform("", &format!("_{}_{}", arch.lower_name, config.lower_name)),
                );
            }
        }

        Ok(Self { env, name: name.to_string(), source_dir, version, raw, own, cross })
    }

    /// The unexpanded metadata document.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Own variables (no environment, no directory layers).
    pub fn variables(&self) -> &VarMap {
        &self.own
    }

    /// The document expanded outside any architecture/configuration slot.
    pub fn data(&self) -> Result<Value, QuarryError> {
        self.env.external_vars().merged(&self.own).merged(&self.cross).expand(&self.raw)
    }

    /// The document expanded for one architecture/configuration slot.
    pub fn data_for(
        &self,
        arch: &Architecture,
        config: &Configuration,
    ) -> Result<Value, QuarryError> {
        self.env
            .external_vars()
            .merged(&self.own)
            .merged(&self.cross)
            .merged(&work_vars(self.env, arch, config, Some(&self.name)))
            .expand(&self.raw)
    }

    /// Variables exported to a child build system: own plus the current
    /// slot, but none of the process environment or cross layers.
    pub fn public_vars(&self, arch: &Architecture, config: &Configuration) -> VarMap {
        self.own.merged(&work_vars(self.env, arch, config, Some(&self.name)))
    }
}

/// Version variants: the raw string, separator rewrites (spelled both as
/// `version(-)` and `version_minus`), and the first four components.
fn version_vars(vars: &mut VarMap, version: &str) {
    let parts: Vec<&str> = version.split('.').collect();
    vars.insert("version", version);
    vars.insert("version(.)", version);
    for (separator, word) in [("", "no"), ("-", "minus"), ("_", "underscore"), ("/", "slash")] {
        let joined = parts.join(separator);
        vars.insert(format!("version({separator})"), joined.clone());
        vars.insert(format!("version_{word}"), joined);
    }
    for i in 0..4 {
        vars.insert(format!("version{}", i + 1), parts.get(i).copied().unwrap_or(""));
    }
}
