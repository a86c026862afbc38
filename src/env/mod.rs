//! Startup environment: root discovery, platform identity, the
//! architecture/configuration lists, tool probing, and the global variable
//! set.
//!
//! The [`Environment`] is constructed exactly once at startup and passed by
//! reference into every component; nothing here mutates after load. Root
//! discovery walks upward from the starting directory until it finds the
//! `quarry.json` marker, the same way cargo finds a workspace root.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::QuarryError;
use crate::metadata;
use crate::pattern::matches_mask;
use crate::template::{VarMap, dynamic_vars};

/// Root configuration marker file name.
pub const ROOT_MARKER: &str = "quarry.json";

/// Variable value used for boolean flag variables.
pub const VAR_TRUE: &str = "1";

/// Tools probed on PATH at startup. A missing tool only becomes an error
/// when a fetcher or build adapter asks for it.
const PROBED_TOOLS: &[&str] = &["git", "cmake", "make", "tar", "curl", "patch", "scons"];

/// A target platform/bitness identity.
#[derive(Debug, Clone)]
pub struct Architecture {
    pub name: String,
    pub lower_name: String,
    /// Appended to output directory base names (`lib` + `64` = `lib64`).
    pub suffix: String,
    pub bitness: String,
    /// Native generator id handed to the cmake adapter.
    pub generator: String,
}

/// A build variant (Debug/Release), or the `All` sentinel meaning "not
/// split by configuration".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub name: String,
    pub lower_name: String,
}

impl Configuration {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let lower_name = name.to_lowercase();
        Self { name, lower_name }
    }

    /// The matrix-collapsing sentinel. Never a member of the declared
    /// configuration set.
    pub fn all() -> Self {
        Self::new("All")
    }

    pub fn is_all(&self) -> bool {
        self.name == "All"
    }
}

/// Overrides taken from the CLI before the environment is constructed.
#[derive(Debug, Default, Clone)]
pub struct EnvOptions {
    pub root: Option<String>,
    pub platform: Option<String>,
}

/// The immutable startup context.
pub struct Environment {
    pub platform: String,
    pub platform_name: String,
    pub root_dir: PathBuf,
    pub source_root_dir: PathBuf,
    pub modules_dir: PathBuf,
    pub licenses_dir: PathBuf,
    pub flags_dir: PathBuf,
    pub platform_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub archs: Vec<Architecture>,
    pub configs: Vec<Configuration>,
    /// Declared configurations plus the `All` sentinel.
    pub configs_all: Vec<Configuration>,
    /// Global declared variables (startup values + `quarry.json` extras).
    pub variables: VarMap,
    /// Process environment exposed as `%name%` variables.
    pub env_vars: VarMap,
    /// Raw root configuration document.
    pub options: Value,
    tools: IndexMap<String, PathBuf>,
}

impl Environment {
    /// Build the environment. Failures here are fatal to the process.
    pub fn load(opts: &EnvOptions) -> Result<Self, QuarryError> {
        let root_dir = discover_root(opts)?;
        let platform = opts
            .platform
            .clone()
            .or_else(|| std::env::var("QUARRY_PLATFORM").ok())
            .unwrap_or_else(|| default_platform().to_string());

        let mut env_vars = VarMap::new();
        for (key, value) in std::env::vars() {
            env_vars.insert(format!("%{key}%"), value);
        }

        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let mut variables = VarMap::new();
        if cfg!(windows) {
            variables.insert("win", VAR_TRUE);
        } else if cfg!(target_os = "macos") {
            variables.insert("mac", VAR_TRUE);
            variables.insert("osx", VAR_TRUE);
        } else {
            variables.insert("linux", VAR_TRUE);
        }
        variables.insert("cpus", cpus.to_string());
        variables.insert("build_cpus", cpus.saturating_sub(1).max(1).to_string());

        let source_root_dir = root_dir.join("source");
        let modules_dir = root_dir.join("modules");
        let licenses_dir = root_dir.join("licenses");
        let flags_dir = root_dir.join("flags");
        let platform_dir = root_dir.join(&platform);
        let temp_dir = std::env::temp_dir();
        for dir in [&source_root_dir, &modules_dir, &licenses_dir, &flags_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                QuarryError::fs(format!("can't create directory \"{}\"", dir.display()), e)
            })?;
        }
        variables.insert("root_dir", root_dir.display().to_string());
        variables.insert("source_root_dir", source_root_dir.display().to_string());
        variables.insert("modules_dir", modules_dir.display().to_string());
        variables.insert("licenses_dir", licenses_dir.display().to_string());
        variables.insert("flags_dir", flags_dir.display().to_string());
        variables.insert("temp_dir", temp_dir.display().to_string());

        let mut tools = IndexMap::new();
        for tool in PROBED_TOOLS {
            if let Ok(path) = which::which(tool) {
                variables.insert(format!("{tool}_path"), path.display().to_string());
                if let Some(dir) = path.parent() {
                    variables.insert(format!("{tool}_dir"), dir.display().to_string());
                }
                tools.insert((*tool).to_string(), path);
            } else {
                debug!(tool, "not found on PATH");
            }
        }

        // root configuration document, expanded with the startup variables
        let marker = root_dir.join(ROOT_MARKER);
        let text = std::fs::read_to_string(&marker).map_err(|e| {
            QuarryError::fs(format!("can't read root configuration \"{}\"", marker.display()), e)
        })?;
        let raw = metadata::parse_document(&text)
            .map_err(|e| QuarryError::MetadataParse { path: marker, reason: e.to_string() })?;

        let platform_name = resolve_platform_name(&raw, &platform)?;
        variables.insert(platform.clone(), VAR_TRUE);
        variables.insert("platform", platform.clone());
        variables.insert("platform_name", platform_name.clone());
        variables.insert("platform_dir", platform_dir.display().to_string());

        let options = variables.merged(&env_vars).expand(&raw)?;

        if let Some(extra) = options.get("variables").and_then(Value::as_object) {
            for (key, value) in extra {
                variables.insert(key.clone(), metadata::value_to_string(value));
            }
        }

        let archs = load_archs(&options);
        let configs = load_configs(&options);
        let mut configs_all = configs.clone();
        configs_all.push(Configuration::all());

        info!(root = %root_dir.display(), platform = %platform, "environment initialized");

        Ok(Self {
            platform,
            platform_name,
            root_dir,
            source_root_dir,
            modules_dir,
            licenses_dir,
            flags_dir,
            platform_dir,
            temp_dir,
            archs,
            configs,
            configs_all,
            variables,
            env_vars,
            options,
            tools,
        })
    }

    /// Architectures matching `mask`; an empty mask selects all. Matching
    /// nothing is an error listing the available names.
    pub fn find_archs(&self, mask: &str) -> Result<Vec<Architecture>, QuarryError> {
        let result: Vec<_> =
            self.archs.iter().filter(|a| matches_mask(mask, &a.name)).cloned().collect();
        if result.is_empty() {
            return Err(QuarryError::NoArchitectureMatch {
                pattern: mask.to_string(),
                available: self.archs.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", "),
            });
        }
        Ok(result)
    }

    /// Declared configurations matching `mask` (the `All` sentinel is never
    /// returned here).
    pub fn find_configs(&self, mask: &str) -> Result<Vec<Configuration>, QuarryError> {
        let result: Vec<_> =
            self.configs.iter().filter(|c| matches_mask(mask, &c.name)).cloned().collect();
        if result.is_empty() {
            return Err(QuarryError::NoConfigurationMatch {
                pattern: mask.to_string(),
                available: self
                    .configs
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        Ok(result)
    }

    /// The external variable layer: process environment, then globals, then
    /// per-load dynamic values (later wins).
    pub fn external_vars(&self) -> VarMap {
        self.env_vars.merged(&self.variables).merged(&dynamic_vars())
    }

    /// A probed tool's path, or a typed error naming it.
    pub fn tool(&self, name: &str) -> Result<&Path, QuarryError> {
        self.tools
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| QuarryError::ToolNotFound { name: name.to_string() })
    }
}

fn default_platform() -> &'static str {
    if cfg!(windows) {
        "msvc"
    } else if cfg!(target_os = "macos") {
        "xcode"
    } else {
        "gcc"
    }
}

fn is_root_dir(dir: &Path) -> bool {
    dir.join(ROOT_MARKER).is_file()
}

fn discover_root(opts: &EnvOptions) -> Result<PathBuf, QuarryError> {
    let start = opts
        .root
        .clone()
        .or_else(|| std::env::var("QUARRY_ROOT").ok())
        .map(|raw| PathBuf::from(shellexpand::tilde(&raw).into_owned()))
        .map_or_else(std::env::current_dir, Ok)?;

    let mut dir = start.as_path();
    loop {
        if is_root_dir(dir) {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Err(QuarryError::RootNotFound),
        }
    }
}

fn resolve_platform_name(config: &Value, platform: &str) -> Result<String, QuarryError> {
    match config.get("platforms").and_then(Value::as_object) {
        Some(platforms) => match platforms.get(platform) {
            Some(Value::String(name)) => Ok(name.clone()),
            Some(Value::Object(obj)) => {
                Ok(obj.get("name").and_then(Value::as_str).unwrap_or(platform).to_string())
            }
            Some(_) => Ok(platform.to_string()),
            None => Err(QuarryError::UnknownPlatform { id: platform.to_string() }),
        },
        None => Ok(platform.to_string()),
    }
}

fn load_archs(config: &Value) -> Vec<Architecture> {
    let mut archs = Vec::new();
    if let Some(obj) = config.get("archs").and_then(Value::as_object) {
        for (name, data) in obj {
            archs.push(Architecture {
                name: name.clone(),
                lower_name: name.to_lowercase(),
                // the directory suffix defaults to the architecture name
                suffix: data.get("suffix").and_then(Value::as_str).unwrap_or(name).to_string(),
                bitness: data.get("bitness").and_then(Value::as_str).unwrap_or("").to_string(),
                generator: data.get("generator").and_then(Value::as_str).unwrap_or("").to_string(),
            });
        }
    }
    if archs.is_empty() {
        let name = std::env::consts::ARCH.to_string();
        archs.push(Architecture {
            lower_name: name.to_lowercase(),
            suffix: name.clone(),
            bitness: String::new(),
            generator: String::new(),
            name,
        });
    }
    archs
}

fn load_configs(config: &Value) -> Vec<Configuration> {
    let mut configs = Vec::new();
    if let Some(obj) = config.get("configs").and_then(Value::as_object) {
        for name in obj.keys() {
            configs.push(Configuration::new(name.clone()));
        }
    }
    if configs.is_empty() {
        configs.push(Configuration::new("Debug"));
        configs.push(Configuration::new("Release"));
    }
    configs
}

#[cfg(test)]
pub mod testing {
    //! Shared fixture: a temporary root tree with a two-arch, two-config
    //! `quarry.json`.

    use super::*;
    use tempfile::TempDir;

    pub const ROOT_CONFIG: &str = r#"{
        // test root configuration
        "archs": {
            "x64": { "suffix": "64", "bitness": "64", "generator": "Test Generator" },
            "x86": { "suffix": "32", "bitness": "32", "generator": "Test Generator" }
        },
        "configs": { "Debug": {}, "Release": {} },
        "variables": { "team": "quarry" }
    }"#;

    pub fn test_env() -> (TempDir, Environment) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(ROOT_MARKER), ROOT_CONFIG).unwrap();
        let opts = EnvOptions {
            root: Some(dir.path().display().to_string()),
            platform: Some("testplat".to_string()),
        };
        let env = Environment::load(&opts).unwrap();
        (dir, env)
    }

    pub fn write_module(env: &Environment, name: &str, body: &str) {
        std::fs::write(env.modules_dir.join(format!("{name}.json")), body).unwrap();
    }
}
