//! Project layout (§4.A): per-project directories keyed by a hash of the
//! absolute project path, and atomic `metadata.json` lifecycle.
//!
//! Grounded on `original_source/app/utils/config.py`'s `get_project_hash` /
//! `get_project_dir` / `get_project_data_dir` / `load_project_metadata` /
//! `save_project_metadata` methods (constants only — the metaclass lazy-load
//! mechanism those methods sat on is not ported, per spec §9).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectMetadata {
    pub path: String,
    pub name: String,
    /// Set the first time a project is seen (via `register_project`), before
    /// it has necessarily been indexed. Distinguishes "known but never
    /// indexed" from "indexed" in `list_all_projects` (spec §4 supplemented
    /// features), matching `ProjectManager.set_current_project`'s
    /// auto-register-on-first-use behavior.
    pub registered_at: Option<String>,
    pub indexed_at: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dim: Option<usize>,
}

/// Resolves project directories under a configurable home (defaults to
/// `~/.codesearch`, the Rust analogue of the original's `~/.codebox`).
pub struct ProjectLayout {
    home: PathBuf,
}

impl ProjectLayout {
    pub fn new(home: PathBuf) -> Self {
        ProjectLayout { home }
    }

    pub fn default_home() -> PathBuf {
        dirs_home().join(".codesearch")
    }

    /// 16-hex-character project identifier: `truncate(sha256(P), 16 chars)`.
    pub fn hash_for(project_path: &Path) -> String {
        let resolved = project_path
            .canonicalize()
            .unwrap_or_else(|_| project_path.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(resolved.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        hex::encode(digest)[..16].to_string()
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.home.join("projects")
    }

    pub fn dir_for(&self, project_path: &Path) -> PathBuf {
        self.projects_dir().join(Self::hash_for(project_path))
    }

    pub fn data_dir_for(&self, project_path: &Path) -> PathBuf {
        self.dir_for(project_path).join(".lancedb")
    }

    pub fn metadata_path_for(&self, project_path: &Path) -> PathBuf {
        self.dir_for(project_path).join("metadata.json")
    }

    /// Create `projects/<hash>/` and `.lancedb/` if absent.
    pub fn ensure_dirs(&self, project_path: &Path) -> Result<(), EngineError> {
        std::fs::create_dir_all(self.data_dir_for(project_path))?;
        Ok(())
    }

    /// Load `metadata.json`, returning a default (empty) record on absence.
    pub fn load_metadata(&self, project_path: &Path) -> ProjectMetadata {
        let path = self.metadata_path_for(project_path);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_else(|| ProjectMetadata {
                path: project_path.to_string_lossy().to_string(),
                name: project_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                registered_at: None,
                indexed_at: None,
                embedding_model: None,
                embedding_dim: None,
            })
    }

    /// Record that `project_path` is known to the engine, without indexing
    /// it. A no-op if a metadata record already exists (first-use only;
    /// subsequent indexing fills in `indexed_at` without disturbing this).
    pub fn register_project(&self, project_path: &Path) -> Result<(), EngineError> {
        if self.is_registered(project_path) {
            return Ok(());
        }
        let mut metadata = self.load_metadata(project_path);
        metadata.registered_at = Some(chrono::Utc::now().to_rfc3339());
        self.save_metadata(project_path, &metadata)
    }

    /// Whether `project_path` has a metadata record at all, indexed or not.
    pub fn is_registered(&self, project_path: &Path) -> bool {
        self.metadata_path_for(project_path).exists()
    }

    /// Write `metadata.json` atomically (write-temp-then-rename).
    pub fn save_metadata(
        &self,
        project_path: &Path,
        metadata: &ProjectMetadata,
    ) -> Result<(), EngineError> {
        self.ensure_dirs(project_path)?;
        let path = self.metadata_path_for(project_path);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(metadata)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Scan `projects/<hash>/metadata.json` for every project. A single
    /// corrupt/missing metadata file must not fail the whole scan — it is
    /// skipped, matching `AppConfig.get_all_projects`'s per-entry isolation.
    pub fn list_all_projects(&self) -> BTreeMap<String, ProjectMetadata> {
        let mut out = BTreeMap::new();
        let Ok(entries) = std::fs::read_dir(self.projects_dir()) else {
            return out;
        };
        for entry in entries.flatten() {
            let hash_dir = entry.path();
            if !hash_dir.is_dir() {
                continue;
            }
            let Some(hash) = hash_dir.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let metadata_path = hash_dir.join("metadata.json");
            let Ok(text) = std::fs::read_to_string(&metadata_path) else {
                continue;
            };
            let Ok(metadata) = serde_json::from_str::<ProjectMetadata>(&text) else {
                continue;
            };
            out.insert(hash, metadata);
        }
        out
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hash_is_stable_and_16_hex_chars() {
        let tmp = TempDir::new().unwrap();
        let h1 = ProjectLayout::hash_for(tmp.path());
        let h2 = ProjectLayout::hash_for(tmp.path());
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn metadata_round_trips_through_save_and_load() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let layout = ProjectLayout::new(home.path().to_path_buf());

        let meta = ProjectMetadata {
            path: project.path().to_string_lossy().to_string(),
            name: "demo".to_string(),
            registered_at: Some("2024-01-01T00:00:00Z".to_string()),
            indexed_at: Some("2024-01-01T00:00:00Z".to_string()),
            embedding_model: Some("all-MiniLM-L6-v2".to_string()),
            embedding_dim: Some(384),
        };
        layout.save_metadata(project.path(), &meta).unwrap();

        let loaded = layout.load_metadata(project.path());
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.embedding_dim, Some(384));
    }

    #[test]
    fn missing_metadata_yields_default_not_error() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let layout = ProjectLayout::new(home.path().to_path_buf());
        let loaded = layout.load_metadata(project.path());
        assert!(loaded.indexed_at.is_none());
    }

    #[test]
    fn registering_a_project_makes_it_listable_before_indexing() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let layout = ProjectLayout::new(home.path().to_path_buf());

        assert!(!layout.is_registered(project.path()));
        layout.register_project(project.path()).unwrap();
        assert!(layout.is_registered(project.path()));

        let loaded = layout.load_metadata(project.path());
        assert!(loaded.registered_at.is_some());
        assert!(loaded.indexed_at.is_none());

        let all = layout.list_all_projects();
        let hash = ProjectLayout::hash_for(project.path());
        let entry = all.get(&hash).expect("registered project should be listed");
        assert!(entry.registered_at.is_some());
        assert!(entry.indexed_at.is_none());
    }

    #[test]
    fn registering_an_already_indexed_project_does_not_clobber_indexed_at() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let layout = ProjectLayout::new(home.path().to_path_buf());

        let mut meta = layout.load_metadata(project.path());
        meta.indexed_at = Some("2024-01-01T00:00:00Z".to_string());
        layout.save_metadata(project.path(), &meta).unwrap();

        layout.register_project(project.path()).unwrap();
        let loaded = layout.load_metadata(project.path());
        assert_eq!(loaded.indexed_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn corrupt_metadata_for_one_project_does_not_fail_list_all() {
        let home = TempDir::new().unwrap();
        let layout = ProjectLayout::new(home.path().to_path_buf());
        let projects_dir = layout.projects_dir();

        let good_hash = "aaaaaaaaaaaaaaaa";
        std::fs::create_dir_all(projects_dir.join(good_hash)).unwrap();
        std::fs::write(
            projects_dir.join(good_hash).join("metadata.json"),
            serde_json::to_string(&ProjectMetadata {
                path: "/tmp/good".to_string(),
                name: "good".to_string(),
                registered_at: None,
                indexed_at: None,
                embedding_model: None,
                embedding_dim: None,
            })
            .unwrap(),
        )
        .unwrap();

        let bad_hash = "bbbbbbbbbbbbbbbb";
        std::fs::create_dir_all(projects_dir.join(bad_hash)).unwrap();
        std::fs::write(projects_dir.join(bad_hash).join("metadata.json"), "not json").unwrap();

        let all = layout.list_all_projects();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(good_hash));
    }
}
