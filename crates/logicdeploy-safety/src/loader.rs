//! Builds a snapshot from a directory of vendor exports.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use logicdeploy_state::{LogicFile, Snapshot, VendorDialect};
use tracing::debug;

use crate::error::{Result, SafetyError};

/// Load every recognised logic file under `dir`, recursively.
///
/// Paths are stored relative to `dir` with `/` separators, and files are
/// ordered by path. Files with an unknown extension are skipped.
pub fn load_dir(dir: &Path, snapshot_id: &str, version_id: &str) -> Result<Snapshot> {
    if !dir.is_dir() {
        return Err(SafetyError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    if files.is_empty() {
        return Err(SafetyError::NoLogicFiles {
            path: dir.to_path_buf(),
        });
    }
    files.sort_by(|a: &LogicFile, b: &LogicFile| a.path.cmp(&b.path));

    debug!(dir = %dir.display(), files = files.len(), "Loaded logic files");
    Ok(Snapshot::new(snapshot_id, version_id, files))
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<LogicFile>) -> Result<()> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SafetyError::Io { path, source }
    };

    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_err(&path))?;
        if file_type.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        let Some(dialect) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(VendorDialect::from_extension)
        else {
            continue;
        };

        let bytes = fs::read(&path).map_err(io_err(&path))?;
        let content =
            String::from_utf8(bytes).map_err(|_| SafetyError::Encoding { path: path.clone() })?;
        let modified: DateTime<Utc> = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        out.push(LogicFile::new(relative, dialect, content, modified));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_nested_files_sorted_and_skips_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("blocks")).expect("mkdir");
        fs::write(dir.path().join("main.st"), "PROGRAM Main\nEND_PROGRAM").expect("write");
        fs::write(dir.path().join("blocks/ob1.scl"), "ORGANIZATION_BLOCK OB1\nEND_ORGANIZATION_BLOCK")
            .expect("write");
        fs::write(dir.path().join("README.md"), "# notes").expect("write");

        let snapshot = load_dir(dir.path(), "snap-1", "ver-1").expect("load");
        let paths: Vec<&str> = snapshot.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["blocks/ob1.scl", "main.st"]);
        assert_eq!(snapshot.files[0].dialect, VendorDialect::SiemensScl);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_dir(&dir.path().join("nope"), "s", "v").unwrap_err();
        assert!(matches!(err, SafetyError::NotADirectory { .. }));
    }

    #[test]
    fn directory_without_logic_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "x").expect("write");
        let err = load_dir(dir.path(), "s", "v").unwrap_err();
        assert!(matches!(err, SafetyError::NoLogicFiles { .. }));
    }
}
