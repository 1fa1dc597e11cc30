//! File walker & filter (§4.B).
//!
//! Grounded on `server/src/scan.rs`'s `walk_files_parallel`/`is_text_file`:
//! a parallel, gitignore-independent directory walk via `ignore::WalkBuilder`
//! with a `filter_entry` skip-dir closure, followed by extension/path
//! blacklist filtering.

use ignore::{WalkBuilder, WalkState};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::Config;
use crate::parser::all_supported_extensions;

/// One candidate file discovered under the project root.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    /// Forward-slash, project-relative path.
    pub rel_path: String,
    pub ext: String,
}

/// Enumerate files under `root` per spec §4.B's policy. Ordering is stable
/// (sorted by `rel_path`) within a single call so progress counters make
/// sense across runs of the same tree.
pub fn find_files(root: &Path, config: &Config) -> Vec<WalkedFile> {
    let allowed_exts = all_supported_extensions();
    let path_blacklist = config.path_blacklist.clone();

    let results: Mutex<Vec<WalkedFile>> = Mutex::new(Vec::new());

    WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .threads(rayon::current_num_threads().min(12))
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') && name.len() > 1 {
                return false;
            }
            if entry.file_type().is_some_and(|ft| ft.is_dir()) && path_blacklist.contains(name.as_ref()) {
                return false;
            }
            true
        })
        .build_parallel()
        .run(|| {
            let results = &results;
            let allowed_exts = &allowed_exts;
            let ext_blacklist = &config.extension_blacklist;
            let path_blacklist = &config.path_blacklist;
            let root = root.to_path_buf();
            Box::new(move |entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return WalkState::Continue,
                };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return WalkState::Continue;
                }

                let abs_path = entry.path().to_path_buf();
                let rel_path = abs_path
                    .strip_prefix(&root)
                    .unwrap_or(&abs_path)
                    .to_string_lossy()
                    .replace('\\', "/");

                if path_blacklist.iter().any(|seg| rel_path.contains(seg.as_str())) {
                    return WalkState::Continue;
                }

                let ext = abs_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();

                if ext_blacklist.contains(&ext) {
                    return WalkState::Continue;
                }
                if !allowed_exts.contains(ext.as_str()) {
                    return WalkState::Continue;
                }
                if !is_regular_file(&abs_path) {
                    return WalkState::Continue;
                }

                results.lock().unwrap().push(WalkedFile { abs_path, rel_path, ext });
                WalkState::Continue
            })
        });

    let mut files = results.into_inner().unwrap();
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    files
}

/// Check whether a path's event should be processed by auto-sync (§4.I):
/// same allow/deny rules as the walker, applied to a single path.
pub fn path_passes_filters(rel_path: &str, config: &Config) -> bool {
    if config.path_blacklist.iter().any(|seg| rel_path.contains(seg.as_str())) {
        return false;
    }
    if rel_path
        .split('/')
        .any(|seg| seg.starts_with('.') && seg.len() > 1)
    {
        return false;
    }
    let ext = Path::new(rel_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if config.extension_blacklist.contains(&ext) {
        return false;
    }
    all_supported_extensions().contains(ext.as_str())
}

fn is_regular_file(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

#[allow(dead_code)]
fn is_text_file(path: &Path) -> bool {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut buf = [0u8; 8192];
    let n = match std::io::Read::read(&mut file, &mut buf) {
        Ok(n) => n,
        Err(_) => return false,
    };
    !buf[..n].contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn finds_supported_extensions_and_skips_blacklisted_dirs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.py", "def f(): pass\n");
        write(tmp.path(), "node_modules/dep.py", "def g(): pass\n");
        write(tmp.path(), ".git/hooks/pre-commit.py", "def h(): pass\n");

        let config = Config::default();
        let files: HashSet<String> = find_files(tmp.path(), &config)
            .into_iter()
            .map(|f| f.rel_path)
            .collect();

        assert!(files.contains("a.py"));
        assert!(!files.iter().any(|p| p.contains("node_modules")));
        assert!(!files.iter().any(|p| p.contains(".git")));
    }

    #[test]
    fn excludes_unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "x.bin", "\0\0\0binary");

        let config = Config::default();
        let files = find_files(tmp.path(), &config);
        assert!(files.is_empty());
    }

    #[test]
    fn path_filter_matches_walker_policy() {
        let config = Config::default();
        assert!(path_passes_filters("src/main.rs", &config));
        assert!(!path_passes_filters("node_modules/x.rs", &config));
        assert!(!path_passes_filters("archive.zip", &config));
    }
}
