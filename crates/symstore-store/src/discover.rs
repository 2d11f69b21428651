//! Expansion of command-line inputs into the list of files to process.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};

/// Expand `inputs` into file paths.
///
/// - `@name` reads a response file with one path per line. Relative paths
///   are resolved against the response file's directory and directories
///   listed there are explored one level deep.
/// - A directory is explored one level deep, or fully when `recursive`.
/// - Anything else is taken as-is, or only if it exists when `exist_only`.
pub fn build_files_list<P: AsRef<Path>>(
    inputs: &[P],
    recursive: bool,
    exist_only: bool,
) -> StoreResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if let Some(response) = input.to_str().and_then(|s| s.strip_prefix('@')) {
            files.extend(read_response_file(Path::new(response))?);
        } else if input.is_dir() {
            files.extend(explore_dir(input, recursive)?);
        } else if !exist_only || input.exists() {
            files.push(input.to_path_buf());
        }
    }
    debug!(count = files.len(), "input files collected");
    Ok(files)
}

fn read_response_file(path: &Path) -> StoreResult<Vec<PathBuf>> {
    if !path.is_file() {
        warn!(path = %path.display(), "response file not found");
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).map_err(|e| StoreError::read(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut files = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let entry = base.join(line);
        if entry.is_dir() {
            files.extend(explore_dir(&entry, false)?);
        } else {
            files.push(entry);
        }
    }
    Ok(files)
}

/// Regular files under `dir`, sorted by path.
fn explore_dir(dir: &Path, recursive: bool) -> StoreResult<Vec<PathBuf>> {
    let depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(depth) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            StoreError::read(path, e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn directories_one_level_or_recursive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.pdb"));
        touch(&dir.path().join("a.exe"));
        touch(&dir.path().join("sub/c.dll"));

        let flat = build_files_list(&[dir.path()], false, false).unwrap();
        assert_eq!(flat, vec![dir.path().join("a.exe"), dir.path().join("b.pdb")]);

        let deep = build_files_list(&[dir.path()], true, false).unwrap();
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&dir.path().join("sub/c.dll")));
    }

    #[test]
    fn plain_paths_and_exist_only() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.pdb");
        touch(&present);
        let missing = dir.path().join("missing.pdb");

        let all = build_files_list(&[&present, &missing], false, false).unwrap();
        assert_eq!(all, vec![present.clone(), missing.clone()]);
        let existing = build_files_list(&[&present, &missing], false, true).unwrap();
        assert_eq!(existing, vec![present]);
    }

    #[test]
    fn response_file_resolves_relative_entries() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("bin/app.exe"));
        touch(&dir.path().join("syms/app.pdb"));
        touch(&dir.path().join("syms/deep/skip.pdb"));
        let response = dir.path().join("inputs.rsp");
        fs::write(&response, "bin/app.exe\n\n  syms  \n").unwrap();

        let arg = PathBuf::from(format!("@{}", response.display()));
        let files = build_files_list(&[arg], false, false).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("bin/app.exe"), dir.path().join("syms").join("app.pdb")]
        );
    }

    #[test]
    fn missing_response_file_is_ignored() {
        let files = build_files_list(&["@/definitely/not/here.rsp"], false, false).unwrap();
        assert!(files.is_empty());
    }
}
