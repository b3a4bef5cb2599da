use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Publish a complete set of files as the new contents of `dest`.
///
/// Files are written into a staging sibling of `dest` first. Only when every
/// write succeeded is the previous `dest` removed and the staging directory
/// renamed into place. On failure the staging directory is deleted and `dest`
/// is left exactly as it was.
///
/// Each entry is `(relative path, bytes)`; relative paths must not escape
/// the destination.
///
/// # Errors
/// Returns the first I/O error encountered, or `InvalidInput` for a path that
/// is absolute or contains `..`.
pub fn publish_dir(dest: &Path, files: &[(PathBuf, Vec<u8>)]) -> io::Result<()> {
    let staging = staging_path(dest);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    if let Err(e) = write_all(&staging, files) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if dest.exists() {
        if let Err(e) = fs::remove_dir_all(dest) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    }
    fs::rename(&staging, dest)
}

fn write_all(staging: &Path, files: &[(PathBuf, Vec<u8>)]) -> io::Result<()> {
    fs::create_dir_all(staging)?;
    for (rel, bytes) in files {
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("output path escapes destination: {}", rel.display()),
            ));
        }
        let target = staging.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        file.write_all(bytes)?;
    }
    Ok(())
}

fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("out");
    let parent = dest.parent().unwrap_or(Path::new("."));
    parent.join(format!(".{name}.staging.{}", std::process::id()))
}

/// List every file under `root`, as paths relative to `root`, sorted.
///
/// Returns an empty list when `root` does not exist.
#[must_use]
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_publish_dir_replaces_previous_output() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dist");
        fs::create_dir_all(dest.join("js")).unwrap();
        fs::write(dest.join("js/stale.js"), "old").unwrap();

        let files = vec![
            (PathBuf::from("index.html"), b"<html></html>".to_vec()),
            (PathBuf::from("js/main.js"), b"main".to_vec()),
        ];
        publish_dir(&dest, &files).unwrap();

        assert_eq!(
            list_files(&dest),
            vec![PathBuf::from("index.html"), PathBuf::from("js/main.js")]
        );
        // Only dist remains; the staging directory is gone.
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_publish_dir_failure_leaves_previous_output() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dist");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.js"), "previous").unwrap();

        let files = vec![
            (PathBuf::from("ok.js"), b"fine".to_vec()),
            (PathBuf::from("../escape.js"), b"nope".to_vec()),
        ];
        let err = publish_dir(&dest, &files).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        assert_eq!(fs::read_to_string(dest.join("keep.js")).unwrap(), "previous");
        assert!(!dest.join("ok.js").exists());
        assert!(!dir.path().join("escape.js").exists());
    }

    #[test]
    fn test_list_files_missing_root() {
        assert!(list_files(Path::new("/nonexistent/shipyard/dir")).is_empty());
    }
}
