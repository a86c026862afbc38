//! Recursive copy/remove helpers used for source trees, patch overlays,
//! and output directory cleanup.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::core::QuarryError;

/// Recursively copy the *contents* of `source` into `target`, creating
/// `target` as needed and overwriting existing files.
pub fn copy_content(source: &Path, target: &Path) -> Result<(), QuarryError> {
    fs::create_dir_all(target)
        .map_err(|e| QuarryError::fs(format!("can't create directory \"{}\"", target.display()), e))?;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| {
            QuarryError::fs(
                format!("can't read directory \"{}\"", source.display()),
                e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk error")),
            )
        })?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir yields paths under its root");
        let dest = target.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| {
                QuarryError::fs(format!("can't create directory \"{}\"", dest.display()), e)
            })?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    QuarryError::fs(format!("can't create directory \"{}\"", parent.display()), e)
                })?;
            }
            // clear a read-only leftover so the overwrite can't fail
            if dest.exists() {
                let _ = fs::remove_file(&dest);
            }
            fs::copy(entry.path(), &dest).map_err(|e| {
                QuarryError::fs(
                    format!(
                        "can't copy file \"{}\" -> \"{}\"",
                        entry.path().display(),
                        dest.display()
                    ),
                    e,
                )
            })?;
        }
    }
    Ok(())
}

/// Remove `dir` and everything inside it. Missing directories are not an
/// error.
pub fn remove_directory(dir: &Path) -> Result<(), QuarryError> {
    if !dir.exists() {
        return Ok(());
    }
    fs::remove_dir_all(dir)
        .map_err(|e| QuarryError::fs(format!("can't remove directory \"{}\"", dir.display()), e))
}

/// Create an empty marker file (parent directories included).
pub fn touch_file(path: &Path) -> Result<(), QuarryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            QuarryError::fs(format!("can't create directory \"{}\"", parent.display()), e)
        })?;
    }
    fs::File::create(path)
        .map(|_| ())
        .map_err(|e| QuarryError::fs(format!("can't create file \"{}\"", path.display()), e))
}

/// Remove a file if it exists.
pub fn remove_if_exists(path: &Path) -> Result<(), QuarryError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(QuarryError::fs(format!("can't remove file \"{}\"", path.display()), e)),
    }
}

/// True when `path` is a directory with at least one entry.
pub fn is_nonempty_dir(path: &Path) -> bool {
    fs::read_dir(path).map(|mut entries| entries.next().is_some()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_content_copies_nested_tree() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("sub/inner")).unwrap();
        fs::write(src.path().join("top.txt"), "top").unwrap();
        fs::write(src.path().join("sub/inner/deep.txt"), "deep").unwrap();

        copy_content(src.path(), dst.path()).unwrap();

        assert_eq!(fs::read_to_string(dst.path().join("top.txt")).unwrap(), "top");
        assert_eq!(fs::read_to_string(dst.path().join("sub/inner/deep.txt")).unwrap(), "deep");
    }

    #[test]
    fn copy_content_overwrites_existing_files() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("f.txt"), "new").unwrap();
        fs::write(dst.path().join("f.txt"), "old").unwrap();

        copy_content(src.path(), dst.path()).unwrap();
        assert_eq!(fs::read_to_string(dst.path().join("f.txt")).unwrap(), "new");
    }

    #[test]
    fn remove_helpers_tolerate_missing_paths() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        remove_directory(&missing).unwrap();
        remove_if_exists(&missing.join("file")).unwrap();
    }

    #[test]
    fn touch_and_nonempty() {
        let dir = TempDir::new().unwrap();
        assert!(!is_nonempty_dir(dir.path()));
        touch_file(&dir.path().join("marker")).unwrap();
        assert!(is_nonempty_dir(dir.path()));
    }
}
