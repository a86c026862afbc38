//! Configure/build matrix and the build-system adapters.
//!
//! A module is processed over a matrix of architectures and configurations.
//! How the configuration axis behaves depends on the module's [`Kind`]:
//!
//! * `SingleConfig`: the build system bakes the configuration in at
//!   configure time (autotools, plain scripts). Both stages run once per
//!   declared configuration.
//! * `MultiConfig`: one configure pass covers every configuration (cmake
//!   with a multi-config generator); the build stage still runs per
//!   configuration. The shared configure tree lives under the `All`
//!   sentinel.
//! * `MultiBuild`: one pass of each stage covers everything (prebuilt
//!   drops).
//!
//! The [`Adapter`] is a closed set of build-system drivers sharing four
//! hooks (configure, build, and their clean counterparts); the matrix owns
//! sequencing, directory preparation, and the state flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::Value;
use tracing::info;

use crate::env::{Architecture, Configuration, Environment};
use crate::flags;
use crate::metadata::{flatten_strings, truthy, value_to_string};
use crate::process::{ProcessCommand, is_quiet};
use crate::project::{OutputDir, Project, output_cfg_dir, output_dir};
use crate::template::VarMap;
use crate::utils::fs::{copy_content, is_nonempty_dir, remove_directory};

/// Environment variable prefix under which module variables are exported
/// to child build systems.
const EXPORT_PREFIX: &str = "QUARRY_";

/// How a module's build system treats the configuration axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    SingleConfig,
    MultiConfig,
    MultiBuild,
}

impl Kind {
    pub fn parse(text: &str) -> Result<Kind> {
        match text.to_lowercase().as_str() {
            "singleconfig" | "single" => Ok(Kind::SingleConfig),
            "multiconfig" | "multi" => Ok(Kind::MultiConfig),
            "multibuild" => Ok(Kind::MultiBuild),
            other => bail!("unknown build kind \"{other}\""),
        }
    }
}

/// Everything an adapter hook needs for one matrix slot.
pub struct BuildContext<'e> {
    pub env: &'e Environment,
    pub name: String,
    pub arch: Architecture,
    pub config: Configuration,
    pub kind: Kind,
    /// Metadata expanded for this slot.
    pub data: Value,
    /// Variables exported to the child build system.
    pub public_vars: VarMap,
    pub source_dir: PathBuf,
    pub configure_dir: PathBuf,
}

impl BuildContext<'_> {
    pub fn out_dir(&self, kind: OutputDir) -> PathBuf {
        output_dir(self.env, &self.arch, &self.config, kind, &self.name)
    }

    fn stage_label(&self) -> String {
        format!("{} [{}/{}]", self.name, self.arch.name, self.config.name)
    }
}

/// Probe the source tree for a known build system.
pub fn guess_type(env: &Environment, source_dir: &Path) -> Result<&'static str> {
    if source_dir.join(format!("prebuilt_{}.txt", env.platform)).is_file() {
        return Ok("prebuilt");
    }
    for stem in [format!("build_{}", env.platform), format!("configure_{}", env.platform)] {
        if find_script(source_dir, &stem).is_some() {
            return Ok("command");
        }
    }
    if source_dir.join("CMakeLists.txt").is_file() {
        return Ok("cmake");
    }
    if cfg!(unix) && source_dir.join("configure").is_file() {
        return Ok("configure");
    }
    if source_dir.join("SConstruct").is_file() {
        return Ok("scons");
    }
    bail!("can't determine the build system of \"{}\"", source_dir.display())
}

fn find_script(dir: &Path, stem: &str) -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(windows) { &["bat", "cmd", "ps1"] } else { &["sh", ""] };
    for ext in candidates {
        let name = if ext.is_empty() { stem.to_string() } else { format!("{stem}.{ext}") };
        let path = dir.join(name);
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

/// A build-system driver.
pub enum Adapter {
    Cmake,
    Command,
    Configure,
    Scons,
    Prebuilt,
    #[cfg(test)]
    Probe(std::sync::Arc<probe::ProbeCounters>),
}

impl Adapter {
    pub fn from_type(name: &str) -> Result<Adapter> {
        match name.to_lowercase().as_str() {
            "cmake" => Ok(Adapter::Cmake),
            "command" => Ok(Adapter::Command),
            "configure" => Ok(Adapter::Configure),
            "scons" => Ok(Adapter::Scons),
            "prebuilt" => Ok(Adapter::Prebuilt),
            other => {
                Err(crate::core::QuarryError::UnknownBuilderType { type_name: other.to_string() }
                    .into())
            }
        }
    }

    pub fn default_kind(&self) -> Kind {
        match self {
            Adapter::Cmake => Kind::MultiConfig,
            Adapter::Prebuilt => Kind::MultiBuild,
            Adapter::Command | Adapter::Configure | Adapter::Scons => Kind::SingleConfig,
            #[cfg(test)]
            Adapter::Probe(_) => Kind::SingleConfig,
        }
    }

    fn configure(&self, ctx: &BuildContext) -> Result<()> {
        match self {
            Adapter::Cmake => cmake_configure(ctx),
            Adapter::Command => run_stage_script(ctx, "configure"),
            Adapter::Configure => autotools_configure(ctx),
            Adapter::Scons | Adapter::Prebuilt => Ok(()),
            #[cfg(test)]
            Adapter::Probe(counters) => counters.record_configure(ctx),
        }
    }

    fn build(&self, ctx: &BuildContext) -> Result<()> {
        match self {
            Adapter::Cmake => cmake_build(ctx),
            Adapter::Command => run_stage_script(ctx, "build"),
            Adapter::Configure => autotools_build(ctx),
            Adapter::Scons => scons_build(ctx),
            Adapter::Prebuilt => prebuilt_drop(ctx),
            #[cfg(test)]
            Adapter::Probe(counters) => counters.record_build(ctx),
        }
    }

    fn configure_clean(&self, ctx: &BuildContext) -> Result<()> {
        match self {
            #[cfg(test)]
            Adapter::Probe(counters) => counters.record_configure_clean(ctx),
            _ => {
                remove_directory(&ctx.configure_dir)?;
                Ok(())
            }
        }
    }

    fn build_clean(&self, ctx: &BuildContext) -> Result<()> {
        match self {
            Adapter::Cmake => cmake_clean(ctx),
            Adapter::Configure => autotools_clean(ctx),
            Adapter::Scons => scons_clean(ctx),
            #[cfg(test)]
            Adapter::Probe(counters) => counters.record_build_clean(ctx),
            _ => default_build_clean(ctx),
        }
    }
}

/// Remove the slot's output directories, leaving the configure tree alone.
fn default_build_clean(ctx: &BuildContext) -> Result<()> {
    for kind in
        [OutputDir::Libraries, OutputDir::Binaries, OutputDir::Includes, OutputDir::Install]
    {
        remove_directory(&ctx.out_dir(kind))?;
    }
    Ok(())
}

// cmake

fn cmake_configure(ctx: &BuildContext) -> Result<()> {
    let cmake = ctx.env.tool("cmake")?;
    let mut command = ProcessCommand::new(cmake)
        .current_dir(&ctx.configure_dir)
        .with_context(format!("configuring {}", ctx.stage_label()));

    if !ctx.arch.generator.is_empty() {
        command = command.arg("-G").arg(&ctx.arch.generator);
    }
    command = command.arg("--no-warn-unused-cli");

    for (key, value) in ctx.public_vars.iter() {
        // computed keys like version(.) are not valid cmake variable names
        if key.contains('(') {
            continue;
        }
        let kind = if key.ends_with("_dir") || key.ends_with("_path") { "PATH" } else { "STRING" };
        command = command.arg(format!(
            "-D{EXPORT_PREFIX}{}:{kind}={value}",
            key.to_uppercase().replace('.', "_")
        ));
    }
    if let Some(options) = ctx.data.get("options").and_then(Value::as_object) {
        for (key, value) in options {
            command = command.arg(match value {
                Value::Bool(b) => {
                    format!("-D{key}:BOOL={}", if *b { "ON" } else { "OFF" })
                }
                other => format!("-D{key}:STRING={}", value_to_string(other)),
            });
        }
    }
    if let Some(value) = ctx.data.get("flags") {
        command =
            command.arg(format!("-D{EXPORT_PREFIX}FLAGS:STRING={}", flatten_strings(value).join(" ")));
    }
    if let Some(value) = ctx.data.get("defines") {
        command = command
            .arg(format!("-D{EXPORT_PREFIX}DEFINES:STRING={}", flatten_strings(value).join(";")));
    }

    let prefix_path = output_cfg_dir(ctx.env, &ctx.arch, &ctx.config, OutputDir::Install);
    command = command
        .arg(format!("-DCMAKE_PREFIX_PATH:PATH={}", prefix_path.display()))
        .arg(format!("-DCMAKE_INSTALL_PREFIX:PATH={}", ctx.out_dir(OutputDir::Install).display()));
    if ctx.kind == Kind::SingleConfig {
        command = command.arg(format!("-DCMAKE_BUILD_TYPE:STRING={}", ctx.config.name));
    }
    let preload = ctx.env.root_dir.join("config.cmake");
    if preload.is_file() {
        command = command.arg("-C").arg(preload.display().to_string());
    }

    let mut source = ctx.source_dir.clone();
    if let Some(sub) = ctx.data.get("cmake_dir").and_then(Value::as_str) {
        source = source.join(sub);
    }
    command.arg(source.display().to_string()).run()
}

fn cmake_build(ctx: &BuildContext) -> Result<()> {
    let cmake = ctx.env.tool("cmake")?;
    let config_args = |mut command: ProcessCommand| {
        if !ctx.config.is_all() {
            command = command.arg("--config").arg(&ctx.config.name);
        }
        command
    };
    config_args(
        ProcessCommand::new(cmake)
            .args(["--build", "."])
            .current_dir(&ctx.configure_dir)
            .with_context(format!("building {}", ctx.stage_label())),
    )
    .run()?;
    if ctx.data.get("cmakeinstall").is_some_and(truthy) {
        config_args(
            ProcessCommand::new(cmake)
                .args(["--build", ".", "--target", "install"])
                .current_dir(&ctx.configure_dir)
                .with_context(format!("installing {}", ctx.stage_label())),
        )
        .run()?;
    }
    Ok(())
}

fn cmake_clean(ctx: &BuildContext) -> Result<()> {
    if !is_nonempty_dir(&ctx.configure_dir) {
        return default_build_clean(ctx);
    }
    let cmake = ctx.env.tool("cmake")?;
    let mut command = ProcessCommand::new(cmake)
        .args(["--build", ".", "--target", "clean"])
        .current_dir(&ctx.configure_dir);
    if !ctx.config.is_all() {
        command = command.arg("--config").arg(&ctx.config.name);
    }
    command.run()?;
    default_build_clean(ctx)
}

// command scripts

fn run_stage_script(ctx: &BuildContext, stage: &str) -> Result<()> {
    let stem = format!("{stage}_{}", ctx.env.platform);
    let Some(script) = find_script(&ctx.source_dir, &stem) else {
        // a command module may carry only one of the two stage scripts
        return Ok(());
    };
    let options = flatten_strings(ctx.data.get("options").unwrap_or(&Value::Null));
    ProcessCommand::new(script)
        .current_dir(&ctx.configure_dir)
        .envs(ctx.public_vars.to_env(EXPORT_PREFIX))
        .env(format!("{EXPORT_PREFIX}OPTIONS"), options.join(" "))
        .with_context(format!("running {stem} for {}", ctx.stage_label()))
        .run()
}

// autotools-style ./configure + make

fn autotools_configure(ctx: &BuildContext) -> Result<()> {
    let script = ctx.source_dir.join("configure");
    ProcessCommand::new(script)
        .arg(format!("--prefix={}", ctx.out_dir(OutputDir::Install).display()))
        .args(flatten_strings(ctx.data.get("options").unwrap_or(&Value::Null)))
        .current_dir(&ctx.configure_dir)
        .envs(ctx.public_vars.to_env(EXPORT_PREFIX))
        .with_context(format!("configuring {}", ctx.stage_label()))
        .run()
}

fn autotools_build(ctx: &BuildContext) -> Result<()> {
    let make = ctx.env.tool("make")?;
    let jobs = ctx.env.variables.get("build_cpus").unwrap_or("1").to_string();
    ProcessCommand::new(make)
        .arg("-j")
        .arg(jobs)
        .current_dir(&ctx.configure_dir)
        .with_context(format!("building {}", ctx.stage_label()))
        .run()?;
    ProcessCommand::new(make)
        .arg("install")
        .current_dir(&ctx.configure_dir)
        .with_context(format!("installing {}", ctx.stage_label()))
        .run()
}

fn autotools_clean(ctx: &BuildContext) -> Result<()> {
    if is_nonempty_dir(&ctx.configure_dir) {
        let make = ctx.env.tool("make")?;
        ProcessCommand::new(make).arg("clean").current_dir(&ctx.configure_dir).run()?;
    }
    default_build_clean(ctx)
}

// scons

fn scons_build(ctx: &BuildContext) -> Result<()> {
    let scons = ctx.env.tool("scons")?;
    let options = flatten_strings(ctx.data.get("options").unwrap_or(&Value::Null));
    ProcessCommand::new(scons)
        .args(options.iter().cloned())
        .current_dir(&ctx.source_dir)
        .envs(ctx.public_vars.to_env(EXPORT_PREFIX))
        .with_context(format!("building {}", ctx.stage_label()))
        .run()?;
    ProcessCommand::new(scons)
        .args(options)
        .arg("install")
        .current_dir(&ctx.source_dir)
        .envs(ctx.public_vars.to_env(EXPORT_PREFIX))
        .with_context(format!("installing {}", ctx.stage_label()))
        .run()
}

fn scons_clean(ctx: &BuildContext) -> Result<()> {
    if is_nonempty_dir(&ctx.source_dir) {
        let scons = ctx.env.tool("scons")?;
        ProcessCommand::new(scons).arg("-c").current_dir(&ctx.source_dir).run()?;
    }
    default_build_clean(ctx)
}

// prebuilt drops

/// Copy prebuilt payload trees into the output layout. The payload lives
/// either under `<source>/<platform>/` or directly in the source tree.
fn prebuilt_drop(ctx: &BuildContext) -> Result<()> {
    let platform_base = ctx.source_dir.join(&ctx.env.platform);
    let base = if platform_base.is_dir() { platform_base } else { ctx.source_dir.clone() };
    for (sub, kind) in [
        ("lib", OutputDir::Libraries),
        ("bin", OutputDir::Binaries),
        ("inc", OutputDir::Includes),
        ("out", OutputDir::Install),
    ] {
        let payload = base.join(sub);
        if payload.is_dir() {
            copy_content(&payload, &ctx.out_dir(kind))?;
        }
    }
    Ok(())
}

/// The configure/build matrix of one module over the selected
/// architectures.
pub struct Matrix<'e> {
    env: &'e Environment,
    project: &'e Project<'e>,
    archs: Vec<Architecture>,
    configs: Vec<Configuration>,
    adapter: Adapter,
    kind: Kind,
}

impl<'e> Matrix<'e> {
    /// Resolve adapter and kind from the module metadata (guessing the
    /// build system from the source tree when `type` is absent) and select
    /// the architecture/configuration axes.
    pub fn create(
        env: &'e Environment,
        project: &'e Project<'e>,
        arch_mask: &str,
        config_mask: &str,
    ) -> Result<Matrix<'e>> {
        let archs = env.find_archs(arch_mask)?;
        let configs = env.find_configs(config_mask)?;
        let data = project.data()?;
        let adapter = match data.get("type").and_then(Value::as_str) {
            Some(name) => Adapter::from_type(name)?,
            None => Adapter::from_type(guess_type(env, &project.source_dir)?)?,
        };
        let kind = match data.get("kind").and_then(Value::as_str) {
            Some(text) => Kind::parse(text)?,
            None => adapter.default_kind(),
        };
        Ok(Matrix { env, project, archs, configs, adapter, kind })
    }

    fn configure_configs(&self) -> Vec<Configuration> {
        match self.kind {
            Kind::SingleConfig => self.configs.clone(),
            Kind::MultiConfig | Kind::MultiBuild => vec![Configuration::all()],
        }
    }

    fn build_configs(&self) -> Vec<Configuration> {
        match self.kind {
            Kind::SingleConfig | Kind::MultiConfig => self.configs.clone(),
            Kind::MultiBuild => vec![Configuration::all()],
        }
    }

    /// Assemble the context for one slot. The configure tree is shared
    /// (`All`-scoped) unless the kind bakes configurations in at configure
    /// time.
    fn prepare(
        &self,
        arch: &Architecture,
        config: &Configuration,
        create_dirs: bool,
    ) -> Result<BuildContext<'e>> {
        let name = &self.project.name;
        let conf_scope =
            if self.kind == Kind::SingleConfig { config.clone() } else { Configuration::all() };
        let configure_dir = output_dir(self.env, arch, &conf_scope, OutputDir::Configure, name);
        if create_dirs {
            let mut dirs = vec![configure_dir.clone()];
            for kind in
                [OutputDir::Libraries, OutputDir::Binaries, OutputDir::Includes, OutputDir::Install]
            {
                dirs.push(output_dir(self.env, arch, config, kind, name));
            }
            for dir in dirs {
                std::fs::create_dir_all(&dir).with_context(|| {
                    format!("can't create directory \"{}\"", dir.display())
                })?;
            }
        }
        Ok(BuildContext {
            env: self.env,
            name: name.clone(),
            arch: arch.clone(),
            config: config.clone(),
            kind: self.kind,
            data: self.project.data_for(arch, config)?,
            public_vars: self.project.public_vars(arch, config),
            source_dir: self.project.source_dir.clone(),
            configure_dir,
        })
    }

    fn banner(&self, verb: &str, arch: &Architecture, config: &Configuration) {
        if !is_quiet() {
            println!(
                "{}",
                format!("{verb} {} [{}/{}]", self.project.name, arch.name, config.name)
                    .green()
                    .bold()
            );
        }
    }

    fn configure_arch(&self, arch: &Architecture, once: bool) -> Result<()> {
        if once && flags::is_configured(self.env, &self.project.name, arch) {
            info!(module = %self.project.name, arch = %arch.name, "already configured");
            return Ok(());
        }
        for config in self.configure_configs() {
            self.banner("configuring", arch, &config);
            let mut ctx = self.prepare(arch, &config, true)?;
            if ctx.data.get("insource").is_some_and(truthy) {
                // in-source build systems work on a disposable copy
                copy_content(&ctx.source_dir, &ctx.configure_dir)?;
                ctx.source_dir = ctx.configure_dir.clone();
            }
            self.adapter.configure(&ctx)?;
        }
        flags::set_configured(self.env, &self.project.name, arch)?;
        Ok(())
    }

    fn build_arch(&self, arch: &Architecture, once: bool) -> Result<()> {
        if once && flags::is_built(self.env, &self.project.name, arch) {
            info!(module = %self.project.name, arch = %arch.name, "already built");
            return Ok(());
        }
        self.configure_arch(arch, true)?;
        for config in self.build_configs() {
            self.banner("building", arch, &config);
            let ctx = self.prepare(arch, &config, true)?;
            self.adapter.build(&ctx)?;
        }
        flags::set_built(self.env, &self.project.name, arch)?;
        Ok(())
    }

    pub fn configure(&self, once: bool) -> Result<()> {
        for arch in &self.archs {
            self.configure_arch(arch, once)?;
        }
        Ok(())
    }

    pub fn build(&self, once: bool) -> Result<()> {
        for arch in &self.archs {
            self.build_arch(arch, once)?;
        }
        Ok(())
    }

    pub fn reconfigure(&self) -> Result<()> {
        for arch in &self.archs {
            flags::clear_configured(self.env, &self.project.name, arch, true)?;
            self.configure_arch(arch, false)?;
        }
        Ok(())
    }

    pub fn rebuild(&self) -> Result<()> {
        for arch in &self.archs {
            flags::clear_built(self.env, &self.project.name, arch, true)?;
            self.build_arch(arch, false)?;
        }
        Ok(())
    }

    /// Run the configure-clean hook and forget the configure state.
    pub fn configure_clean(&self) -> Result<()> {
        for arch in &self.archs {
            for config in self.configure_configs() {
                self.banner("resetting", arch, &config);
                let ctx = self.prepare(arch, &config, false)?;
                self.adapter.configure_clean(&ctx)?;
            }
            flags::clear_configured(self.env, &self.project.name, arch, false)?;
        }
        Ok(())
    }

    /// Run the build-clean hook and forget the build state.
    pub fn build_clean(&self) -> Result<()> {
        for arch in &self.archs {
            for config in self.build_configs() {
                self.banner("cleaning", arch, &config);
                let ctx = self.prepare(arch, &config, false)?;
                self.adapter.build_clean(&ctx)?;
            }
            flags::clear_built(self.env, &self.project.name, arch, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod probe {
    use super::BuildContext;
    use anyhow::Result;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records adapter hook invocations for matrix sequencing tests.
    #[derive(Default)]
    pub struct ProbeCounters {
        pub configure: AtomicUsize,
        pub build: AtomicUsize,
        pub configure_clean: AtomicUsize,
        pub build_clean: AtomicUsize,
        pub configure_slots: Mutex<Vec<String>>,
        pub build_slots: Mutex<Vec<String>>,
        pub configure_dirs: Mutex<Vec<String>>,
    }

    impl ProbeCounters {
        fn slot(ctx: &BuildContext) -> String {
            format!("{}/{}", ctx.arch.name, ctx.config.name)
        }

        pub fn record_configure(&self, ctx: &BuildContext) -> Result<()> {
            self.configure.fetch_add(1, Ordering::SeqCst);
            self.configure_slots.lock().unwrap().push(Self::slot(ctx));
            self.configure_dirs.lock().unwrap().push(ctx.configure_dir.display().to_string());
            Ok(())
        }

        pub fn record_build(&self, ctx: &BuildContext) -> Result<()> {
            self.build.fetch_add(1, Ordering::SeqCst);
            self.build_slots.lock().unwrap().push(Self::slot(ctx));
            self.configure_dirs.lock().unwrap().push(ctx.configure_dir.display().to_string());
            Ok(())
        }

        pub fn record_configure_clean(&self, _ctx: &BuildContext) -> Result<()> {
            self.configure_clean.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        pub fn record_build_clean(&self, _ctx: &BuildContext) -> Result<()> {
            self.build_clean.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::testing::{test_env, write_module};
    use super::probe::ProbeCounters;
    use std::sync::Arc;

    fn probe_matrix<'e>(
        env: &'e Environment,
        project: &'e Project<'e>,
        kind: Kind,
    ) -> (Matrix<'e>, Arc<ProbeCounters>) {
        let counters = Arc::new(ProbeCounters::default());
        let mut matrix = Matrix::create(env, project, "x64", "").unwrap();
        matrix.adapter = Adapter::Probe(counters.clone());
        matrix.kind = kind;
        (matrix, counters)
    }

    fn imported_project<'e>(env: &'e Environment, name: &str) -> Project<'e> {
        write_module(env, name, r#"{"type": "prebuilt"}"#);
        flags::set_imported(env, name).unwrap();
        std::fs::create_dir_all(env.source_root_dir.join(name)).unwrap();
        Project::load(env, name).unwrap()
    }

    #[test]
    fn kind_controls_the_configuration_axes() {
        let (_tmp, env) = test_env();
        let project = imported_project(&env, "mod");

        let (matrix, _) = probe_matrix(&env, &project, Kind::SingleConfig);
        assert_eq!(matrix.configure_configs().len(), 2);
        assert_eq!(matrix.build_configs().len(), 2);

        let (matrix, _) = probe_matrix(&env, &project, Kind::MultiConfig);
        assert!(matrix.configure_configs()[0].is_all());
        assert_eq!(matrix.build_configs().len(), 2);

        let (matrix, _) = probe_matrix(&env, &project, Kind::MultiBuild);
        assert!(matrix.configure_configs()[0].is_all());
        assert!(matrix.build_configs()[0].is_all());
    }

    #[test]
    fn configure_once_skips_when_flagged() {
        let (_tmp, env) = test_env();
        let project = imported_project(&env, "mod");
        let (matrix, counters) = probe_matrix(&env, &project, Kind::SingleConfig);

        matrix.configure(true).unwrap();
        matrix.configure(true).unwrap();
        assert_eq!(counters.configure.load(std::sync::atomic::Ordering::SeqCst), 2);

        matrix.configure(false).unwrap();
        assert_eq!(counters.configure.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn build_configures_first_and_sets_flags() {
        let (_tmp, env) = test_env();
        let project = imported_project(&env, "mod");
        let (matrix, counters) = probe_matrix(&env, &project, Kind::MultiConfig);

        matrix.build(true).unwrap();
        let x64 = &env.find_archs("x64").unwrap()[0];
        assert!(flags::is_configured(&env, "mod", x64));
        assert!(flags::is_built(&env, "mod", x64));
        // one shared configure pass, one build per configuration
        assert_eq!(counters.configure.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(counters.build.load(std::sync::atomic::Ordering::SeqCst), 2);

        // built and once: nothing runs again
        matrix.build(true).unwrap();
        assert_eq!(counters.build.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn multiconfig_builds_share_one_configure_tree() {
        let (_tmp, env) = test_env();
        let project = imported_project(&env, "mod");
        let (matrix, counters) = probe_matrix(&env, &project, Kind::MultiConfig);

        matrix.build(false).unwrap();
        let dirs = counters.configure_dirs.lock().unwrap();
        assert!(dirs.iter().all(|d| d == &dirs[0]));
        assert!(dirs[0].ends_with(&format!("conf64{}All{}mod", std::path::MAIN_SEPARATOR, std::path::MAIN_SEPARATOR)));
    }

    #[test]
    fn clean_hooks_clear_the_flags() {
        let (_tmp, env) = test_env();
        let project = imported_project(&env, "mod");
        let (matrix, counters) = probe_matrix(&env, &project, Kind::SingleConfig);
        matrix.build(false).unwrap();

        matrix.build_clean().unwrap();
        let x64 = &env.find_archs("x64").unwrap()[0];
        assert!(!flags::is_built(&env, "mod", x64));
        assert!(flags::is_configured(&env, "mod", x64));
        assert_eq!(counters.build_clean.load(std::sync::atomic::Ordering::SeqCst), 2);

        matrix.configure_clean().unwrap();
        assert!(!flags::is_configured(&env, "mod", x64));
    }

    #[test]
    fn configure_clean_removes_the_configure_tree() {
        let (_tmp, env) = test_env();
        let project = imported_project(&env, "mod");
        let matrix = Matrix::create(&env, &project, "x64", "").unwrap();
        let x64 = &env.find_archs("x64").unwrap()[0];
        let conf = output_dir(&env, x64, &Configuration::all(), OutputDir::Configure, "mod");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(conf.join("CMakeCache.txt"), "x").unwrap();

        matrix.configure_clean().unwrap();
        // the directory itself goes, not just its contents
        assert!(!conf.exists());
    }

    #[test]
    fn guess_type_probes_in_priority_order() {
        let (_tmp, env) = test_env();
        let dir = tempfile::TempDir::new().unwrap();
        assert!(guess_type(&env, dir.path()).is_err());

        std::fs::write(dir.path().join("SConstruct"), "").unwrap();
        assert_eq!(guess_type(&env, dir.path()).unwrap(), "scons");
        std::fs::write(dir.path().join("CMakeLists.txt"), "").unwrap();
        assert_eq!(guess_type(&env, dir.path()).unwrap(), "cmake");
        std::fs::write(dir.path().join("build_testplat.sh"), "").unwrap();
        assert_eq!(guess_type(&env, dir.path()).unwrap(), "command");
        std::fs::write(dir.path().join("prebuilt_testplat.txt"), "").unwrap();
        assert_eq!(guess_type(&env, dir.path()).unwrap(), "prebuilt");
    }

    #[test]
    fn unknown_type_and_kind_are_errors() {
        assert!(Adapter::from_type("mystery").is_err());
        assert!(Kind::parse("sometimes").is_err());
        assert_eq!(Kind::parse("MultiConfig").unwrap(), Kind::MultiConfig);
    }
}
