//! Dependency ordering.
//!
//! [`dependencies`] walks the declared `dependencies` lists depth-first and keeps a single
//! flat list in which a dependency named again later is promoted to the end
//! of the list. The result reads most-dependent first; callers reverse it
//! to get a build order where prerequisites come first.
//!
//! [`batch_order`] is the multi-project variant: each selected project is
//! preceded by its own prerequisites, and a module claimed by several
//! projects stays at its first position.

use tracing::debug;

use crate::core::QuarryError;
use crate::env::Environment;
use crate::metadata;
use crate::pattern::matches_mask;

/// Direct dependencies declared by a module, in declaration order.
pub fn direct_deps(env: &Environment, name: &str) -> Result<Vec<String>, QuarryError> {
    let raw = metadata::load_module(env, name)?;
    Ok(raw.get("dependencies").map(metadata::flatten_strings).unwrap_or_default())
}

/// The transitive dependency list of `name`, most-dependent first. `name`
/// itself is not included. Every listed dependency must be a declared
/// module.
pub fn dependencies(env: &Environment, name: &str) -> Result<Vec<String>, QuarryError> {
    let mut list = Vec::new();
    let mut trail = vec![name.to_string()];
    visit(env, name, &mut list, &mut trail)?;
    Ok(list)
}

fn visit(
    env: &Environment,
    name: &str,
    list: &mut Vec<String>,
    trail: &mut Vec<String>,
) -> Result<(), QuarryError> {
    for dep in direct_deps(env, name)? {
        if !metadata::is_module(env, &dep) {
            return Err(QuarryError::ModuleNotFound { name: dep });
        }
        if let Some(pos) = list.iter().position(|d| d == &dep) {
            // seen before: promote to the end so it builds before everything
            // that mentioned it, without re-walking its own dependencies
            list.remove(pos);
            list.push(dep);
        } else if trail.iter().any(|t| t == &dep) {
            // back-edge: append without re-walking, or the cycle never ends
            debug!(module = %name, dep = %dep, "dependency cycle");
            list.push(dep);
        } else {
            list.push(dep.clone());
            trail.push(dep.clone());
            visit(env, &dep, list, trail)?;
            trail.pop();
        }
    }
    Ok(())
}

/// Expand project masks over the declared modules.
pub fn select_projects(env: &Environment, masks: &[String]) -> Result<Vec<String>, QuarryError> {
    let all = metadata::list_modules(env)?;
    let mut selected = Vec::new();
    for mask in masks {
        for name in &all {
            if matches_mask(mask, name) && !selected.contains(name) {
                selected.push(name.clone());
            }
        }
    }
    Ok(selected)
}

/// Order a batch run: every project is preceded by its prerequisites
/// (nearest first), and a module appearing more than once keeps its first
/// position.
pub fn batch_order(env: &Environment, projects: &[String]) -> Result<Vec<String>, QuarryError> {
    let mut list: Vec<String> = projects.to_vec();
    let mut i = 0;
    while i < list.len() {
        let mut deps = dependencies(env, &list[i])?;
        deps.reverse();
        let count = deps.len();
        list.splice(i..i, deps);
        i += 1 + count;
    }
    // keep the first occurrence of each module
    let mut i = 1;
    while i < list.len() {
        if list[..i].contains(&list[i]) {
            list.remove(i);
        } else {
            i += 1;
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::testing::{test_env, write_module};

    fn module(env: &Environment, name: &str, deps: &[&str]) {
        let list: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
        write_module(env, name, &format!(r#"{{"dependencies": [{}]}}"#, list.join(", ")));
    }

    #[test]
    fn chain_lists_most_dependent_first() {
        let (_tmp, env) = test_env();
        module(&env, "app", &["mid"]);
        module(&env, "mid", &["base"]);
        module(&env, "base", &[]);
        assert_eq!(dependencies(&env, "app").unwrap(), ["mid", "base"]);
    }

    #[test]
    fn shared_dependency_is_promoted_to_last() {
        let (_tmp, env) = test_env();
        // both branches need "zlib"; the second mention pushes it to the end
        module(&env, "app", &["png", "zlib", "tiff"]);
        module(&env, "png", &["zlib"]);
        module(&env, "tiff", &[]);
        module(&env, "zlib", &[]);
        assert_eq!(dependencies(&env, "app").unwrap(), ["png", "zlib", "tiff"]);

        module(&env, "app", &["png", "tiff"]);
        module(&env, "tiff", &["zlib"]);
        assert_eq!(dependencies(&env, "app").unwrap(), ["png", "tiff", "zlib"]);
    }

    #[test]
    fn every_module_appears_once() {
        let (_tmp, env) = test_env();
        module(&env, "app", &["a", "b"]);
        module(&env, "a", &["common"]);
        module(&env, "b", &["common"]);
        module(&env, "common", &[]);
        let deps = dependencies(&env, "app").unwrap();
        assert_eq!(deps.len(), 3);
        for name in ["a", "b", "common"] {
            assert_eq!(deps.iter().filter(|d| *d == name).count(), 1, "{name}");
        }
        // reversed, prerequisites come before their dependents
        let order: Vec<_> = deps.iter().rev().collect();
        let pos = |n: &str| order.iter().position(|d| *d == n).unwrap();
        assert!(pos("common") < pos("a"));
        assert!(pos("common") < pos("b"));
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let (_tmp, env) = test_env();
        module(&env, "app", &["ghost"]);
        assert!(matches!(
            dependencies(&env, "app"),
            Err(QuarryError::ModuleNotFound { name }) if name == "ghost"
        ));
    }

    #[test]
    fn cycles_do_not_recurse_forever() {
        let (_tmp, env) = test_env();
        module(&env, "a", &["b"]);
        module(&env, "b", &["a"]);
        let deps = dependencies(&env, "a").unwrap();
        assert_eq!(deps, ["b", "a"]);
    }

    #[test]
    fn masks_select_projects() {
        let (_tmp, env) = test_env();
        module(&env, "libpng", &[]);
        module(&env, "libtiff", &[]);
        module(&env, "zlib", &[]);
        let selected = select_projects(&env, &["lib*".to_string()]).unwrap();
        assert_eq!(selected, ["libpng", "libtiff"]);
        let all = select_projects(&env, &["*".to_string()]).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn batch_order_places_prerequisites_before_each_project() {
        let (_tmp, env) = test_env();
        module(&env, "app", &["png"]);
        module(&env, "png", &["zlib"]);
        module(&env, "zlib", &[]);
        module(&env, "tool", &["zlib"]);

        let order =
            batch_order(&env, &["app".to_string(), "tool".to_string()]).unwrap();
        assert_eq!(order, ["zlib", "png", "app", "tool"]);
    }

    #[test]
    fn batch_order_keeps_first_occurrence() {
        let (_tmp, env) = test_env();
        module(&env, "a", &["common"]);
        module(&env, "b", &["common"]);
        module(&env, "common", &[]);
        let order = batch_order(&env, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(order, ["common", "a", "b"]);
    }
}
