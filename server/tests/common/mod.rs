//! Fixture project scaffolding for end-to-end engine tests.

use std::path::Path;

/// Write `content` to `rel_path` under `root`, creating parent directories.
pub fn write_file(root: &Path, rel_path: &str, content: &str) {
    let path = root.join(rel_path);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}
