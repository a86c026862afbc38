//! Interactive shell.
//!
//! Commands mirror the subcommands; a trailing `!` forces a redo and a
//! trailing `?` means only-if-needed (`build!`, `configure?`). Errors are
//! printed and the shell keeps running.

use std::io::Write;

use anyhow::Result;
use colored::Colorize;

use crate::core::{RedoMode, user_friendly_error};
use crate::ops::Session;
use crate::project::Project;
use crate::resolver;

use super::status;

pub fn run(session: &mut Session) -> Result<()> {
    println!(
        "{} {} interactive shell, type {} for commands",
        "quarry".green().bold(),
        env!("CARGO_PKG_VERSION"),
        "help".cyan()
    );
    let stdin = std::io::stdin();
    loop {
        match session.selection() {
            Some(project) => print!("{}> ", format!("quarry {project}").green()),
            None => print!("{}> ", "quarry".green()),
        }
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            // EOF
            println!();
            return Ok(());
        }
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else { continue };
        let args: Vec<&str> = words.collect();

        match dispatch(session, head, &args) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(error) => user_friendly_error(error).display(),
        }
    }
}

/// Split the redo suffix off a command word.
fn parse_mode(word: &str) -> (&str, RedoMode) {
    if let Some(stem) = word.strip_suffix('!') {
        (stem, RedoMode::Force)
    } else if let Some(stem) = word.strip_suffix('?') {
        (stem, RedoMode::Once)
    } else {
        (word, RedoMode::Always)
    }
}

fn arg(args: &[&str], index: usize) -> String {
    args.get(index).copied().unwrap_or("").to_string()
}

/// Returns `Ok(false)` when the shell should exit.
fn dispatch(session: &mut Session, head: &str, args: &[&str]) -> Result<bool> {
    let (command, mode) = parse_mode(head);
    match command {
        "exit" | "quit" => return Ok(false),
        "help" => help(),
        "select" => match args.first() {
            Some(name) => session.select(name)?,
            None => println!("usage: select <module>"),
        },
        "up" => session.deselect(),
        "import" => match args.first() {
            Some(name) => session.import(mode, name)?,
            None => println!("usage: import <module>"),
        },
        "fetch" => session.fetch_project()?,
        "license" => session.license()?,
        "configure" => session.configure(mode, &arg(args, 0), &arg(args, 1))?,
        "build" => session.build(mode, &arg(args, 0), &arg(args, 1))?,
        "reconfigure" => session.reconfigure(mode, &arg(args, 0), &arg(args, 1))?,
        "rebuild" => session.rebuild(mode, &arg(args, 0), &arg(args, 1))?,
        "clean" => session.clean(&arg(args, 0), &arg(args, 1))?,
        "reset" => session.reset(&arg(args, 0), &arg(args, 1))?,
        "batch" => {
            let masks: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            session.batch(mode, &masks, "", "")?;
        }
        "deps" => {
            let name = match args.first() {
                Some(name) => name.to_string(),
                None => session.current()?.to_string(),
            };
            let mut deps = resolver::dependencies(session.env(), &name)?;
            deps.reverse();
            for dep in deps {
                println!("{dep}");
            }
        }
        "modules" => status::print_modules(session.env(), &arg(args, 0))?,
        "data" => {
            let project = Project::load(session.env(), session.current()?)?;
            println!("{}", crate::metadata::to_pretty_string(&project.data()?));
        }
        "vars" => {
            let project = Project::load(session.env(), session.current()?)?;
            for (key, value) in project.variables().iter() {
                println!("{key} = {value}");
            }
        }
        other => println!("unknown command \"{other}\", type {} for commands", "help".cyan()),
    }
    Ok(true)
}

fn help() {
    let lines = [
        ("select <module> / up", "choose or drop the current project"),
        ("import <module>", "fetch sources, apply patches, collect licenses"),
        ("configure [arch] [config]", "configure (deps are built first)"),
        ("build [arch] [config]", "build (deps are built first)"),
        ("reconfigure / rebuild", "drop state and redo the stage"),
        ("reset / clean", "remove configure trees / build outputs"),
        ("batch <masks...>", "import+configure+build matching modules"),
        ("fetch / license", "redo one import step"),
        ("deps [module]", "show the dependency build order"),
        ("modules [mask]", "list modules and their state"),
        ("data / vars", "show expanded metadata / variables"),
        ("exit", "leave the shell"),
    ];
    println!("append {} to force a redo, {} to skip work already done", "!".bold(), "?".bold());
    for (command, description) in lines {
        println!("  {:<28} {description}", command.cyan());
    }
}
