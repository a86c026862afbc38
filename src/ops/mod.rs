//! High-level operations: the import pipeline, dependency-tree operations,
//! and batch processing.
//!
//! A [`Session`] holds the current project selection and runs every
//! operation the CLI and the interactive shell expose. Tree operations
//! process the dependency list first (prerequisites get a milder action,
//! usually build-if-needed) and then the selected project itself; a failure
//! anywhere aborts the tree.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use serde_json::Value;
use tracing::{info, warn};

use crate::builder::Matrix;
use crate::core::{QuarryError, RedoMode};
use crate::env::Environment;
use crate::fetch;
use crate::flags;
use crate::metadata::{self, flatten_strings};
use crate::process::{ProcessCommand, is_quiet, set_quiet};
use crate::project::Project;
use crate::resolver;
use crate::utils::fs::{copy_content, touch_file};

/// What a tree operation does to one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixAction {
    Configure,
    ConfigureOnce,
    Build,
    BuildOnce,
    Reconfigure,
    Rebuild,
    ConfigureClean,
    BuildClean,
}

/// Operation driver bound to one environment.
pub struct Session<'e> {
    env: &'e Environment,
    project: Option<String>,
}

impl<'e> Session<'e> {
    pub fn new(env: &'e Environment) -> Self {
        Self { env, project: None }
    }

    pub fn env(&self) -> &'e Environment {
        self.env
    }

    /// Make `name` the current project. The module must be declared.
    pub fn select(&mut self, name: &str) -> Result<()> {
        if !metadata::is_module(self.env, name) {
            return Err(QuarryError::ModuleNotFound { name: name.to_string() }.into());
        }
        self.project = Some(name.to_string());
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.project = None;
    }

    pub fn current(&self) -> Result<&str> {
        self.project.as_deref().ok_or_else(|| QuarryError::ProjectNotSelected.into())
    }

    pub fn selection(&self) -> Option<&str> {
        self.project.as_deref()
    }

    // import

    /// Import `name` and its dependency tree, then select it.
    pub fn import(&mut self, mode: RedoMode, name: &str) -> Result<()> {
        if !metadata::is_module(self.env, name) {
            return Err(QuarryError::ModuleNotFound { name: name.to_string() }.into());
        }
        let mut deps = resolver::dependencies(self.env, name)?;
        deps.reverse();
        for dep in &deps {
            self.do_import(mode != RedoMode::Force, dep)?;
        }
        self.do_import(mode == RedoMode::Once, name)?;
        self.project = Some(name.to_string());
        Ok(())
    }

    /// One module's import: fetch, overlay, patch, license.
    fn do_import(&mut self, once: bool, name: &str) -> Result<()> {
        if once && flags::is_imported(self.env, name) {
            info!(module = %name, "already imported");
            return Ok(());
        }
        if !is_quiet() {
            println!("{}", format!("importing {name}").green().bold());
        }
        let source_dir = self.env.source_root_dir.join(name);
        std::fs::create_dir_all(&source_dir)
            .map_err(|e| QuarryError::fs(format!("can't create directory \"{}\"", source_dir.display()), e))?;
        flags::set_imported(self.env, name)?;
        flags::clear_configured_all(self.env, name, true)?;

        let result = self.import_steps(name, &source_dir);
        if result.is_err() {
            // drop the marker but keep fetched files for inspection
            if let Err(rollback) = flags::clear_imported(self.env, name, false) {
                warn!(module = %name, error = %rollback, "rollback failed");
            }
        }
        result
    }

    fn import_steps(&mut self, name: &str, source_dir: &Path) -> Result<()> {
        let project = Project::load(self.env, name)?;
        let data = project.data()?;
        let source = data.get("source").cloned().unwrap_or(Value::Null);
        fetch::fetch(self.env, &source, source_dir)
            .with_context(|| format!("fetching sources of {name}"))?;
        self.apply_overlay(name, source_dir)?;
        if let Some(line) = data.get("afterimport").and_then(Value::as_str) {
            run_shell(source_dir, line).with_context(|| format!("afterimport step of {name}"))?;
        }
        self.collect_licenses(name, source_dir, &data, &source)?;
        Ok(())
    }

    /// Copy the per-module overlay tree over the sources and apply its
    /// `apply*.patch` files. Each patch runs once; an `.applied` witness
    /// next to it keeps re-imports from double-patching.
    fn apply_overlay(&self, name: &str, source_dir: &Path) -> Result<()> {
        let overlay = self.env.modules_dir.join(name);
        if overlay.is_dir() {
            copy_content(&overlay, source_dir)?;
        }
        let mut patches: Vec<PathBuf> = std::fs::read_dir(source_dir)
            .map_err(|e| {
                QuarryError::fs(format!("can't read directory \"{}\"", source_dir.display()), e)
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .is_some_and(|n| n.starts_with("apply") && n.ends_with(".patch"))
            })
            .collect();
        patches.sort();
        for patch_file in patches {
            let witness = PathBuf::from(format!("{}.applied", patch_file.display()));
            if witness.is_file() {
                continue;
            }
            let tool = self.env.tool("patch")?;
            ProcessCommand::new(tool)
                .args(["-l", "-u", "-p0", "-i"])
                .arg(patch_file.display().to_string())
                .current_dir(source_dir)
                .with_context(format!("applying {}", patch_file.display()))
                .run()?;
            touch_file(&witness)?;
        }
        Ok(())
    }

    /// Copy the module's license files into `licenses/`. Declared paths win;
    /// otherwise the source tree's top level is searched. Locally maintained
    /// modules are exempt from the requirement.
    fn collect_licenses(
        &self,
        name: &str,
        source_dir: &Path,
        data: &Value,
        source: &Value,
    ) -> Result<()> {
        let mut files: Vec<PathBuf> = match data.get("license") {
            Some(value) => {
                flatten_strings(value).into_iter().map(|rel| source_dir.join(rel)).collect()
            }
            None => find_license_files(source_dir)?,
        };
        files.retain(|f| f.is_file());
        if files.is_empty() {
            if fetch::is_local(source) {
                return Ok(());
            }
            bail!("no license file found for {name}");
        }
        let target_dir = self.env.licenses_dir.join(name);
        std::fs::create_dir_all(&target_dir).map_err(|e| {
            QuarryError::fs(format!("can't create directory \"{}\"", target_dir.display()), e)
        })?;
        for file in files {
            let base = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("bad license path for {name}"))?;
            let target = target_dir.join(base);
            std::fs::copy(&file, &target).map_err(|e| {
                QuarryError::fs(
                    format!("can't copy file \"{}\" -> \"{}\"", file.display(), target.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    /// Re-fetch the current project's sources in place.
    pub fn fetch_project(&mut self) -> Result<()> {
        let name = self.current()?.to_string();
        let project = Project::load(self.env, &name)?;
        let data = project.data()?;
        let source = data.get("source").cloned().unwrap_or(Value::Null);
        fetch::fetch(self.env, &source, &project.source_dir)
            .with_context(|| format!("fetching sources of {name}"))
    }

    /// Re-run license collection for the current project.
    pub fn license(&mut self) -> Result<()> {
        let name = self.current()?.to_string();
        let project = Project::load(self.env, &name)?;
        let data = project.data()?;
        let source = data.get("source").cloned().unwrap_or(Value::Null);
        self.collect_licenses(&name, &project.source_dir, &data, &source)
    }

    // matrix operations over the dependency tree

    pub fn configure(&mut self, mode: RedoMode, arch: &str, config: &str) -> Result<()> {
        let (action, deps) = match mode {
            RedoMode::Once => (MatrixAction::ConfigureOnce, MatrixAction::BuildOnce),
            RedoMode::Always => (MatrixAction::Configure, MatrixAction::BuildOnce),
            RedoMode::Force => (MatrixAction::Configure, MatrixAction::Build),
        };
        self.tree_op(action, Some(deps), arch, config)
    }

    pub fn build(&mut self, mode: RedoMode, arch: &str, config: &str) -> Result<()> {
        let (action, deps) = match mode {
            RedoMode::Once => (MatrixAction::BuildOnce, MatrixAction::BuildOnce),
            RedoMode::Always => (MatrixAction::Build, MatrixAction::BuildOnce),
            RedoMode::Force => (MatrixAction::Build, MatrixAction::Build),
        };
        self.tree_op(action, Some(deps), arch, config)
    }

    pub fn reconfigure(&mut self, mode: RedoMode, arch: &str, config: &str) -> Result<()> {
        let deps = match mode {
            RedoMode::Force => MatrixAction::Rebuild,
            _ => MatrixAction::BuildOnce,
        };
        self.tree_op(MatrixAction::Reconfigure, Some(deps), arch, config)
    }

    pub fn rebuild(&mut self, mode: RedoMode, arch: &str, config: &str) -> Result<()> {
        let deps = match mode {
            RedoMode::Force => MatrixAction::Rebuild,
            _ => MatrixAction::BuildOnce,
        };
        self.tree_op(MatrixAction::Rebuild, Some(deps), arch, config)
    }

    /// Drop configure state and trees of the current project.
    pub fn reset(&mut self, arch: &str, config: &str) -> Result<()> {
        self.tree_op(MatrixAction::ConfigureClean, None, arch, config)
    }

    /// Drop build outputs of the current project.
    pub fn clean(&mut self, arch: &str, config: &str) -> Result<()> {
        self.tree_op(MatrixAction::BuildClean, None, arch, config)
    }

    fn tree_op(
        &mut self,
        action: MatrixAction,
        deps_action: Option<MatrixAction>,
        arch: &str,
        config: &str,
    ) -> Result<()> {
        let name = self.current()?.to_string();
        if let Some(dep_action) = deps_action {
            let mut deps = resolver::dependencies(self.env, &name)?;
            deps.reverse();
            for dep in deps {
                self.run_action(&dep, dep_action, arch, config)
                    .with_context(|| format!("processing dependency {dep} of {name}"))?;
            }
        }
        self.run_action(&name, action, arch, config)
    }

    fn run_action(
        &mut self,
        name: &str,
        action: MatrixAction,
        arch: &str,
        config: &str,
    ) -> Result<()> {
        // build-style actions import on demand
        if !flags::is_imported(self.env, name)
            && !matches!(action, MatrixAction::ConfigureClean | MatrixAction::BuildClean)
        {
            self.do_import(true, name)?;
        }
        let project = Project::load(self.env, name)?;
        let matrix = Matrix::create(self.env, &project, arch, config)?;
        match action {
            MatrixAction::Configure => matrix.configure(false),
            MatrixAction::ConfigureOnce => matrix.configure(true),
            MatrixAction::Build => matrix.build(false),
            MatrixAction::BuildOnce => matrix.build(true),
            MatrixAction::Reconfigure => matrix.reconfigure(),
            MatrixAction::Rebuild => matrix.rebuild(),
            MatrixAction::ConfigureClean => matrix.configure_clean(),
            MatrixAction::BuildClean => matrix.build_clean(),
        }
    }

    // batch

    /// Process every project matching `masks` through import, configure,
    /// and build. A stage failure skips the rest of that project only; the
    /// run reports all failures at the end.
    pub fn batch(
        &mut self,
        mode: RedoMode,
        masks: &[String],
        arch: &str,
        config: &str,
    ) -> Result<()> {
        let selected = resolver::select_projects(self.env, masks)?;
        if selected.is_empty() {
            bail!("no projects match {}", masks.join(", "));
        }
        let order = resolver::batch_order(self.env, &selected)?;
        let mut failed: Vec<String> = Vec::new();

        for name in &order {
            let dep_only = !selected.contains(name);
            let effective = if dep_only { RedoMode::Once } else { mode };
            let tag = if dep_only { " (dep)" } else { "" };
            eprintln!("{}", format!("- project: {name}{tag}").cyan().bold());

            let once = effective == RedoMode::Once;
            let force = effective == RedoMode::Force;
            let stages: [(&str, Box<dyn FnMut(&mut Self) -> Result<()> + '_>); 3] = [
                ("import", Box::new(move |s: &mut Self| s.do_import(true, name))),
                (
                    "configure",
                    Box::new(move |s: &mut Self| {
                        let project = Project::load(s.env, name)?;
                        let matrix = Matrix::create(s.env, &project, arch, config)?;
                        if force { matrix.reconfigure() } else { matrix.configure(once) }
                    }),
                ),
                (
                    "build",
                    Box::new(move |s: &mut Self| {
                        let project = Project::load(s.env, name)?;
                        let matrix = Matrix::create(s.env, &project, arch, config)?;
                        if force { matrix.rebuild() } else { matrix.build(once) }
                    }),
                ),
            ];
            for (stage, mut run) in stages {
                if !self.batch_task(&format!("{stage} {name}"), &mut run) {
                    failed.push(name.clone());
                    break;
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            bail!("batch failed for: {}", failed.join(", "))
        }
    }

    /// Run one batch stage quietly, with a timed result banner.
    fn batch_task(
        &mut self,
        task: &str,
        run: &mut dyn FnMut(&mut Self) -> Result<()>,
    ) -> bool {
        let started = Instant::now();
        set_quiet(true);
        let result = run(self);
        set_quiet(false);
        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(()) => {
                eprintln!("{}", format!("--- {task}: ok ({elapsed:.2}s)").green());
                true
            }
            Err(error) => {
                eprintln!("{}", format!("--- {task}: failed ({elapsed:.2}s)").red().bold());
                eprintln!("{error:#}");
                false
            }
        }
    }
}

/// Top-level license file search: `license*`, `copying*`, `lgpl*` in the
/// source tree's root.
fn find_license_files(source_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let entries = std::fs::read_dir(source_dir).map_err(|e| {
        QuarryError::fs(format!("can't read directory \"{}\"", source_dir.display()), e)
    })?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.starts_with("license") || name.starts_with("copying") || name.starts_with("lgpl") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn run_shell(dir: &Path, line: &str) -> Result<()> {
    let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
    ProcessCommand::new(shell).arg(flag).arg(line).current_dir(dir).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::testing::{test_env, write_module};
    use serial_test::serial;
    use tempfile::TempDir;

    /// A module whose sources are copied from a local payload directory.
    fn copy_module(env: &Environment, name: &str, payload: &Path, deps: &[&str]) {
        std::fs::write(payload.join("LICENSE"), "MIT").unwrap();
        let deps: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
        write_module(
            env,
            name,
            &format!(
                r#"{{
                    "type": "prebuilt",
                    "dependencies": [{}],
                    "source": {{ "type": "copy", "path": "{}" }}
                }}"#,
                deps.join(", "),
                payload.display()
            ),
        );
    }

    #[test]
    #[serial]
    fn import_fetches_patches_and_collects_licenses() {
        let (_tmp, env) = test_env();
        let payload = TempDir::new().unwrap();
        std::fs::write(payload.path().join("code.c"), "int x;").unwrap();
        copy_module(&env, "zlib", payload.path(), &[]);
        // overlay tree shipped next to the metadata document
        let overlay = env.modules_dir.join("zlib");
        std::fs::create_dir_all(&overlay).unwrap();
        std::fs::write(overlay.join("extra.h"), "#pragma once").unwrap();

        let mut session = Session::new(&env);
        session.import(RedoMode::Once, "zlib").unwrap();

        assert!(flags::is_imported(&env, "zlib"));
        assert_eq!(session.current().unwrap(), "zlib");
        let source = env.source_root_dir.join("zlib");
        assert!(source.join("code.c").is_file());
        assert!(source.join("extra.h").is_file());
        assert!(env.licenses_dir.join("zlib/LICENSE").is_file());
    }

    #[test]
    #[serial]
    fn import_rolls_back_when_a_step_fails() {
        let (_tmp, env) = test_env();
        let payload = TempDir::new().unwrap();
        // payload without any license file
        std::fs::write(payload.path().join("code.c"), "int x;").unwrap();
        write_module(
            &env,
            "bare",
            &format!(
                r#"{{"source": {{ "type": "copy", "path": "{}" }}}}"#,
                payload.path().display()
            ),
        );

        let mut session = Session::new(&env);
        let err = session.import(RedoMode::Once, "bare").unwrap_err();
        assert!(err.to_string().contains("license"));
        // the flag is rolled back; fetched files stay for inspection
        assert!(!flags::is_imported(&env, "bare"));
        assert!(env.source_root_dir.join("bare/code.c").is_file());
    }

    #[test]
    #[serial]
    fn local_modules_need_no_license() {
        let (_tmp, env) = test_env();
        write_module(&env, "own", r#"{"type": "prebuilt", "source": "local"}"#);
        let mut session = Session::new(&env);
        session.import(RedoMode::Once, "own").unwrap();
        assert!(flags::is_imported(&env, "own"));
    }

    #[test]
    #[serial]
    fn import_covers_the_dependency_tree() {
        let (_tmp, env) = test_env();
        let p1 = TempDir::new().unwrap();
        let p2 = TempDir::new().unwrap();
        copy_module(&env, "base", p1.path(), &[]);
        copy_module(&env, "app", p2.path(), &["base"]);

        let mut session = Session::new(&env);
        session.import(RedoMode::Once, "app").unwrap();
        assert!(flags::is_imported(&env, "app"));
        assert!(flags::is_imported(&env, "base"));
    }

    #[test]
    #[serial]
    fn build_imports_on_demand_and_sets_flags() {
        let (_tmp, env) = test_env();
        let p1 = TempDir::new().unwrap();
        let p2 = TempDir::new().unwrap();
        copy_module(&env, "base", p1.path(), &[]);
        copy_module(&env, "app", p2.path(), &["base"]);

        let mut session = Session::new(&env);
        session.select("app").unwrap();
        session.build(RedoMode::Once, "x64", "").unwrap();

        let x64 = &env.find_archs("x64").unwrap()[0];
        assert!(flags::is_built(&env, "app", x64));
        assert!(flags::is_built(&env, "base", x64));
        let x86 = &env.find_archs("x86").unwrap()[0];
        assert!(!flags::is_built(&env, "app", x86));
    }

    #[test]
    #[serial]
    fn operations_without_selection_fail() {
        let (_tmp, env) = test_env();
        let mut session = Session::new(&env);
        let err = session.build(RedoMode::Once, "", "").unwrap_err();
        assert!(err.downcast_ref::<QuarryError>().is_some());
    }

    #[test]
    #[serial]
    fn batch_processes_matches_and_isolates_failures() {
        let (_tmp, env) = test_env();
        let p1 = TempDir::new().unwrap();
        let p2 = TempDir::new().unwrap();
        copy_module(&env, "good", p1.path(), &[]);
        // this one fails at import: nothing to fetch, no license
        std::fs::write(p2.path().join("code.c"), "int x;").unwrap();
        write_module(
            &env,
            "bad",
            &format!(
                r#"{{"source": {{ "type": "copy", "path": "{}" }}}}"#,
                p2.path().display()
            ),
        );

        let mut session = Session::new(&env);
        let err = session.batch(RedoMode::Once, &["*".to_string()], "x64", "").unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(!err.to_string().contains("good"));

        let x64 = &env.find_archs("x64").unwrap()[0];
        assert!(flags::is_built(&env, "good", x64));
        assert!(!flags::is_imported(&env, "bad"));
    }

    #[test]
    #[serial]
    fn batch_with_no_match_is_an_error() {
        let (_tmp, env) = test_env();
        let mut session = Session::new(&env);
        assert!(session.batch(RedoMode::Once, &["nothing".to_string()], "", "").is_err());
    }
}
