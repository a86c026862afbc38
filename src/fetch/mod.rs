//! Source fetchers.
//!
//! A module's `source` field describes where its source tree comes from.
//! The field is loosely typed: an object with a `type` tag picks one
//! fetcher, an array (or an object without a tag) fans out recursively, and
//! the string `"local"` means the tree is maintained by hand and nothing is
//! fetched. All fetchers land their content in the module's source
//! directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::info;

use crate::env::Environment;
use crate::metadata::str_or;
use crate::process::ProcessCommand;
use crate::utils::fs::copy_content;

/// Fetch a source specification (already expanded) into `destination`.
pub fn fetch(env: &Environment, spec: &Value, destination: &Path) -> Result<()> {
    match spec {
        Value::Null => Ok(()),
        Value::String(s) if s == "local" => Ok(()),
        Value::String(s) => bail!("unknown source \"{s}\" (expected \"local\" or a source object)"),
        Value::Array(items) => {
            for item in items {
                fetch(env, item, destination)?;
            }
            Ok(())
        }
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("git") => fetch_git(env, spec, destination),
            Some("archive") => fetch_archive(env, spec, destination),
            Some("copy") => fetch_copy(spec, destination),
            Some(other) => {
                Err(crate::core::QuarryError::UnknownFetcherType { type_name: other.to_string() }
                    .into())
            }
            // untagged object: treat each member as its own specification
            None => {
                for item in obj.values() {
                    fetch(env, item, destination)?;
                }
                Ok(())
            }
        },
        other => bail!("unsupported source specification: {other}"),
    }
}

/// True when a specification (or any part of it) is the `"local"` marker.
/// Local modules are exempt from the license requirement.
pub fn is_local(spec: &Value) -> bool {
    match spec {
        // an absent source means the tree is maintained in place
        Value::Null => true,
        Value::String(s) => s == "local",
        Value::Array(items) => items.iter().any(is_local),
        Value::Object(obj) => obj.get("type").is_none() && obj.values().any(is_local),
        _ => false,
    }
}

fn fetch_git(env: &Environment, spec: &Value, destination: &Path) -> Result<()> {
    let git = env.tool("git")?;
    let url = spec
        .get("url")
        .and_then(Value::as_str)
        .context("git source needs a \"url\" field")?;
    if destination.join(".git").is_dir() {
        info!(url, "updating git checkout");
        ProcessCommand::new(git).arg("pull").current_dir(destination).run()
    } else {
        let branch = spec.get("branch").map(|b| str_or(b, "master")).unwrap_or("master");
        info!(url, branch, "cloning");
        ProcessCommand::new(git)
            .args(["clone", "-b", branch, "--single-branch", "--depth", "1"])
            .arg(url)
            .arg(destination.display().to_string())
            .run()
    }
}

fn fetch_archive(env: &Environment, spec: &Value, destination: &Path) -> Result<()> {
    let url = spec
        .get("url")
        .and_then(Value::as_str)
        .context("archive source needs a \"url\" field")?;
    let filename = archive_filename(spec, url)?;
    let strip = spec
        .get("strip")
        .and_then(Value::as_u64)
        .unwrap_or(1) as usize;

    let temp = tempfile::tempdir_in(&env.temp_dir).context("can't create download directory")?;
    let archive_path = temp.path().join(&filename);
    download(url, &archive_path)?;

    std::fs::create_dir_all(destination).with_context(|| {
        format!("can't create directory \"{}\"", destination.display())
    })?;
    if filename.to_lowercase().ends_with(".zip") {
        extract_zip(&archive_path, destination, strip)
    } else {
        let tar = env.tool("tar")?;
        ProcessCommand::new(tar)
            .arg("-xf")
            .arg(archive_path.display().to_string())
            .arg(format!("--strip-components={strip}"))
            .arg("-C")
            .arg(destination.display().to_string())
            .run()
    }
}

fn fetch_copy(spec: &Value, destination: &Path) -> Result<()> {
    let path = spec
        .get("path")
        .or_else(|| spec.get("copy_dir"))
        .and_then(Value::as_str)
        .context("copy source needs a \"path\" field")?;
    let source = PathBuf::from(shellexpand::tilde(path).into_owned());
    info!(from = %source.display(), "copying source tree");
    copy_content(&source, destination)?;
    Ok(())
}

/// Name of the downloaded file: the explicit `file` field, else the last
/// URL segment. Sourceforge-style `/download` tails fall back to the
/// preceding segment.
fn archive_filename(spec: &Value, url: &str) -> Result<String> {
    if let Some(file) = spec.get("file").and_then(Value::as_str) {
        return Ok(file.to_string());
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mut segments = path.trim_end_matches('/').rsplit('/');
    let mut name = segments.next().unwrap_or("");
    if name.eq_ignore_ascii_case("download") {
        name = segments.next().unwrap_or("");
    }
    if name.is_empty() || name.contains(':') {
        bail!("can't derive an archive file name from \"{url}\"");
    }
    Ok(name.to_string())
}

fn download(url: &str, target: &Path) -> Result<()> {
    info!(url, "downloading");
    let mut response = reqwest::blocking::get(url)
        .and_then(reqwest::blocking::Response::error_for_status)
        .with_context(|| format!("download failed: {url}"))?;
    let mut file = File::create(target)
        .with_context(|| format!("can't create file \"{}\"", target.display()))?;
    std::io::copy(&mut response, &mut file)
        .with_context(|| format!("can't write \"{}\"", target.display()))?;
    Ok(())
}

fn extract_zip(archive_path: &Path, target: &Path, strip: usize) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("can't open archive \"{}\"", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("can't read archive \"{}\"", archive_path.display()))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(path) = entry.enclosed_name() else { continue };
        let stripped: PathBuf = path.components().skip(strip).collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        let dest = target.join(stripped);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest)
                .with_context(|| format!("can't create file \"{}\"", dest.display()))?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}
