//! Command-line interface.
//!
//! Every operation is available as a subcommand; running without one drops
//! into the interactive shell. `--root` and `--platform` override the
//! environment (or come from `QUARRY_ROOT`/`QUARRY_PLATFORM`), and
//! `--project` preselects a module for project-scoped commands.

mod shell;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::core::RedoMode;
use crate::env::{EnvOptions, Environment};
use crate::metadata;
use crate::ops::Session;
use crate::process;
use crate::project::Project;
use crate::resolver;

#[derive(Parser)]
#[command(
    name = "quarry",
    version,
    about = "Build orchestrator for third-party native modules",
    long_about = "Imports, configures, and builds third-party modules over an \
                  architecture/configuration matrix, keeping their outputs in a \
                  shared per-platform layout."
)]
pub struct Cli {
    /// Root directory (any directory inside it works too)
    #[arg(long, global = true, env = "QUARRY_ROOT")]
    root: Option<String>,

    /// Target platform id (msvc, xcode, gcc, ...)
    #[arg(long, global = true, env = "QUARRY_PLATFORM")]
    platform: Option<String>,

    /// Module to operate on
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Suppress per-command console echo
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Import a module and its dependencies (fetch, patch, licenses)
    Import {
        /// Module to import
        name: String,
        /// Re-import even when already imported
        #[arg(short, long)]
        force: bool,
        /// Skip modules that are already imported
        #[arg(short, long)]
        once: bool,
    },

    /// Configure the selected module (dependencies are built first)
    Configure {
        /// Architecture mask (empty selects all)
        #[arg(default_value = "")]
        arch: String,
        /// Configuration mask (empty selects all)
        #[arg(default_value = "")]
        config: String,
        /// Also rebuild dependencies
        #[arg(short, long)]
        force: bool,
        /// Skip architectures that are already configured
        #[arg(short, long)]
        once: bool,
    },

    /// Build the selected module (dependencies are built first)
    Build {
        #[arg(default_value = "")]
        arch: String,
        #[arg(default_value = "")]
        config: String,
        /// Also rebuild dependencies
        #[arg(short, long)]
        force: bool,
        /// Skip architectures that are already built
        #[arg(short, long)]
        once: bool,
    },

    /// Drop configure state and configure again
    Reconfigure {
        #[arg(default_value = "")]
        arch: String,
        #[arg(default_value = "")]
        config: String,
        /// Also rebuild dependencies
        #[arg(short, long)]
        force: bool,
    },

    /// Drop build state and build again
    Rebuild {
        #[arg(default_value = "")]
        arch: String,
        #[arg(default_value = "")]
        config: String,
        /// Also rebuild dependencies
        #[arg(short, long)]
        force: bool,
    },

    /// Remove build outputs of the selected module
    Clean {
        #[arg(default_value = "")]
        arch: String,
        #[arg(default_value = "")]
        config: String,
    },

    /// Remove configure trees of the selected module
    Reset {
        #[arg(default_value = "")]
        arch: String,
        #[arg(default_value = "")]
        config: String,
    },

    /// Import, configure, and build every matching module
    Batch {
        /// Project name masks
        #[arg(required = true)]
        projects: Vec<String>,
        #[arg(long, default_value = "")]
        arch: String,
        #[arg(long, default_value = "")]
        config: String,
        /// Redo every stage
        #[arg(short, long)]
        force: bool,
        /// Skip stages that are already done
        #[arg(short, long)]
        once: bool,
    },

    /// Re-fetch the selected module's sources
    Fetch,

    /// Re-collect the selected module's license files
    License,

    /// Show the dependency list of a module
    Deps {
        /// Module (defaults to the selection)
        name: Option<String>,
    },

    /// List declared modules and their per-architecture state
    Modules {
        /// Name mask
        #[arg(default_value = "")]
        mask: String,
    },

    /// Show the selected module's metadata after variable expansion
    Data {
        /// Expand for one architecture
        arch: Option<String>,
        /// Expand for one configuration
        config: Option<String>,
    },

    /// Show variables (module variables when a project is selected)
    Vars {
        arch: Option<String>,
        config: Option<String>,
    },

    /// Open the interactive shell
    Shell,
}

/// Run the parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    let env = Environment::load(&EnvOptions { root: cli.root.clone(), platform: cli.platform.clone() })?;
    process::set_quiet(cli.quiet);

    let mut session = Session::new(&env);
    if let Some(project) = &cli.project {
        session.select(project)?;
    }

    match cli.command {
        None | Some(Commands::Shell) => shell::run(&mut session),
        Some(Commands::Import { name, force, once }) => {
            session.import(RedoMode::from_flags(force, once), &name)
        }
        Some(Commands::Configure { arch, config, force, once }) => {
            session.configure(RedoMode::from_flags(force, once), &arch, &config)
        }
        Some(Commands::Build { arch, config, force, once }) => {
            session.build(RedoMode::from_flags(force, once), &arch, &config)
        }
        Some(Commands::Reconfigure { arch, config, force }) => {
            session.reconfigure(RedoMode::from_flags(force, false), &arch, &config)
        }
        Some(Commands::Rebuild { arch, config, force }) => {
            session.rebuild(RedoMode::from_flags(force, false), &arch, &config)
        }
        Some(Commands::Clean { arch, config }) => session.clean(&arch, &config),
        Some(Commands::Reset { arch, config }) => session.reset(&arch, &config),
        Some(Commands::Batch { projects, arch, config, force, once }) => {
            session.batch(RedoMode::from_flags(force, once), &projects, &arch, &config)
        }
        Some(Commands::Fetch) => session.fetch_project(),
        Some(Commands::License) => session.license(),
        Some(Commands::Deps { name }) => print_deps(&session, name.as_deref()),
        Some(Commands::Modules { mask }) => status::print_modules(&env, &mask),
        Some(Commands::Data { arch, config }) => {
            print_data(&session, arch.as_deref(), config.as_deref())
        }
        Some(Commands::Vars { arch, config }) => {
            print_vars(&session, arch.as_deref(), config.as_deref())
        }
    }
}

fn print_deps(session: &Session, name: Option<&str>) -> Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => session.current()?.to_string(),
    };
    let mut deps = resolver::dependencies(session.env(), &name)?;
    // build order: prerequisites first
    deps.reverse();
    for dep in deps {
        println!("{dep}");
    }
    Ok(())
}

fn slot(
    session: &Session,
    arch: Option<&str>,
    config: Option<&str>,
) -> Result<(crate::env::Architecture, crate::env::Configuration)> {
    let env = session.env();
    let arch = env.find_archs(arch.unwrap_or(""))?.remove(0);
    let config = env.find_configs(config.unwrap_or(""))?.remove(0);
    Ok((arch, config))
}

fn print_data(session: &Session, arch: Option<&str>, config: Option<&str>) -> Result<()> {
    let project = Project::load(session.env(), session.current()?)?;
    let data = if arch.is_some() || config.is_some() {
        let (arch, config) = slot(session, arch, config)?;
        project.data_for(&arch, &config)?
    } else {
        project.data()?
    };
    println!("{}", metadata::to_pretty_string(&data));
    Ok(())
}

fn print_vars(session: &Session, arch: Option<&str>, config: Option<&str>) -> Result<()> {
    match session.selection() {
        Some(name) => {
            let project = Project::load(session.env(), name)?;
            let vars = if arch.is_some() || config.is_some() {
                let (arch, config) = slot(session, arch, config)?;
                project.public_vars(&arch, &config)
            } else {
                project.variables().clone()
            };
            for (key, value) in vars.iter() {
                println!("{key} = {value}");
            }
        }
        None => {
            for (key, value) in session.env().variables.iter() {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}
