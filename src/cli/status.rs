//! The `modules` status table.

use anyhow::Result;
use colored::Colorize;

use crate::env::Environment;
use crate::flags;
use crate::metadata;
use crate::pattern::matches_mask;

/// Print every declared module matching `mask` with its version and
/// per-architecture state. Each architecture column shows two dots:
/// configured and built.
pub fn print_modules(env: &Environment, mask: &str) -> Result<()> {
    let names = metadata::list_modules(env)?;
    let width = names.iter().map(String::len).max().unwrap_or(6).max(6);

    let versions: Vec<String> = names.iter().map(|name| module_version(env, name)).collect();
    let vwidth = versions.iter().map(String::len).max().unwrap_or(7).max(7);

    let mut header = format!("{:<width$}  {:<vwidth$}  imp", "module", "version");
    for arch in &env.archs {
        header.push_str(&format!("  {}[cb]", arch.name));
    }
    println!("{}", header.bold());

    for (name, version) in names.into_iter().zip(versions) {
        if !matches_mask(mask, &name) {
            continue;
        }
        let mut line = format!(
            "{name:<width$}  {version:<vwidth$}  {:^3}",
            if flags::is_imported(env, &name) { "Y" } else { "." }
        );
        for arch in &env.archs {
            let configured = if flags::is_configured(env, &name, arch) { 'Y' } else { '.' };
            let built = if flags::is_built(env, &name, arch) { 'Y' } else { '.' };
            line.push_str(&format!("  {:^width2$}", format!("{configured}{built}"), width2 = arch.name.len() + 4));
        }
        println!("{line}");
    }
    Ok(())
}

/// The raw `version` field of a module, or `-` when absent or unreadable.
fn module_version(env: &Environment, name: &str) -> String {
    metadata::load_module(env, name)
        .ok()
        .and_then(|doc| doc.get("version").map(metadata::value_to_string))
        .unwrap_or_else(|| "-".to_string())
}
