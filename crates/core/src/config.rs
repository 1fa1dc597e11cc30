//! Explicit, immutable engine configuration (spec §6, §9).
//!
//! The original threads configuration through a process-wide class
//! (`AppConfig`) with metaclass-intercepted lazy attribute access. Per spec
//! §9's redesign note, this is replaced with a plain, `Clone`-able value
//! passed by the caller into `index`/`search`/`auto_sync_start` — no global
//! mutable singleton. Defaults mirror `original_source/app/utils/
//! config.py`'s constants.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One entry of the supported-embedding-model table (spec §6:
/// `supported_models`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub full_name: String,
    pub dim: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_file_size: u64,
    pub search_limit: usize,
    pub rrf_k: u32,
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    pub preview_length: usize,
    pub rerank_enabled: bool,
    pub rerank_top_k: usize,
    pub rerank_model: String,
    pub extension_blacklist: HashSet<String>,
    pub path_blacklist: HashSet<String>,
    pub supported_models: BTreeMap<String, ModelInfo>,
    /// `auto` profile switches to `large` above this many reachable files.
    pub medium_max_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: 1536,
            chunk_overlap: 200,
            max_file_size: 5_242_880,
            search_limit: 100,
            rrf_k: 60,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_batch_size: 100,
            preview_length: 200,
            rerank_enabled: true,
            rerank_top_k: 20,
            rerank_model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            extension_blacklist: default_extension_blacklist(),
            path_blacklist: default_path_blacklist(),
            supported_models: default_supported_models(),
            medium_max_files: 5_000,
        }
    }
}

impl Config {
    /// Load a `Config` from a TOML file, falling back to defaults for any
    /// key the file doesn't set. Missing file is not an error.
    pub fn load_from(path: &std::path::Path) -> Result<Self, crate::error::EngineError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| crate::error::EngineError::Config(e.to_string()))
    }

    /// Resolve `profile=auto` against a reachable file count (spec §6).
    pub fn resolve_profile(&self, file_count: usize) -> ProfileName {
        if file_count <= self.medium_max_files {
            ProfileName::Medium
        } else {
            ProfileName::Large
        }
    }

    /// Return a copy tuned for the given profile. `large` widens the
    /// indexer's commit batch and chunk target so bulk indexing amortizes
    /// store writes over bigger batches.
    pub fn for_profile(&self, profile: ProfileName) -> Config {
        let mut cfg = self.clone();
        match profile {
            ProfileName::Medium => {}
            ProfileName::Large => {
                cfg.embedding_batch_size = cfg.embedding_batch_size.max(200);
                cfg.chunk_size = cfg.chunk_size.max(2048);
            }
        }
        cfg
    }

    pub fn resolved_embedding_dim(&self) -> usize {
        self.supported_models
            .get(&self.embedding_model)
            .map(|m| m.dim)
            .unwrap_or(384)
    }

    /// Record `project_path` as known to the engine, independent of whether
    /// it has been indexed yet. `index()` calls this on first use (spec §4
    /// supplemented features: "`Config` exposes `register_project`/
    /// `is_project_registered` helpers ... matching `ProjectManager.
    /// set_current_project`'s auto-register-on-first-use behavior").
    pub fn register_project(&self, project_path: &std::path::Path) -> Result<(), crate::error::EngineError> {
        let layout = crate::project::ProjectLayout::new(crate::project::ProjectLayout::default_home());
        layout.register_project(project_path)
    }

    pub fn is_project_registered(&self, project_path: &std::path::Path) -> bool {
        let layout = crate::project::ProjectLayout::new(crate::project::ProjectLayout::default_home());
        layout.is_registered(project_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileName {
    Medium,
    Large,
}

fn default_extension_blacklist() -> HashSet<String> {
    [
        "zip", "tar", "gz", "rar", "7z", "jpg", "jpeg", "png", "gif", "svg", "ico", "webp", "mp4",
        "avi", "mkv", "mov", "wmv", "flv", "mp3", "wav", "flac", "aac", "ogg", "pdf", "doc",
        "docx", "xls", "xlsx", "ppt", "pptx", "exe", "dll", "so", "dylib", "bin", "lock", "log",
        "tmp", "cache", "swp",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_path_blacklist() -> HashSet<String> {
    [
        "node_modules",
        "__pycache__",
        "venv",
        "env",
        "dist",
        "build",
        "migrations",
        "test_data",
        "vendor",
        "coverage",
        "htmlcov",
        ".git",
        "target",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_supported_models() -> BTreeMap<String, ModelInfo> {
    let mut m = BTreeMap::new();
    m.insert(
        "sfr-embedding-code-2b".to_string(),
        ModelInfo {
            full_name: "Salesforce/SFR-Embedding-Code-2B_R".to_string(),
            dim: 768,
            description: "Salesforce code embedding, 2B params".to_string(),
        },
    );
    m.insert(
        "jina-embeddings-v3".to_string(),
        ModelInfo {
            full_name: "jinaai/jina-embeddings-v3".to_string(),
            dim: 1024,
            description: "General-purpose multilingual embeddings".to_string(),
        },
    );
    m.insert(
        "jina-code-embeddings-1.5b".to_string(),
        ModelInfo {
            full_name: "jinaai/jina-code-embeddings-1.5b".to_string(),
            dim: 1536,
            description: "Jina code embeddings, 1.5B params".to_string(),
        },
    );
    m.insert(
        "sfr-embedding-code".to_string(),
        ModelInfo {
            full_name: "Salesforce/SFR-Embedding-Code_R".to_string(),
            dim: 768,
            description: "Salesforce code embedding".to_string(),
        },
    );
    m.insert(
        "all-MiniLM-L6-v2".to_string(),
        ModelInfo {
            full_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dim: 384,
            description: "Small, fast general-purpose embedding".to_string(),
        },
    );
    m.insert(
        "all-mpnet-base-v2".to_string(),
        ModelInfo {
            full_name: "sentence-transformers/all-mpnet-base-v2".to_string(),
            dim: 768,
            description: "General-purpose embedding, higher quality".to_string(),
        },
    );
    m.insert(
        "bge-small-en-v1.5".to_string(),
        ModelInfo {
            full_name: "BAAI/bge-small-en-v1.5".to_string(),
            dim: 384,
            description: "Small general-purpose embedding".to_string(),
        },
    );
    m.insert(
        "codebert-base".to_string(),
        ModelInfo {
            full_name: "microsoft/codebert-base".to_string(),
            dim: 768,
            description: "Deprecated code embedding".to_string(),
        },
    );
    m.insert(
        "graphcodebert-base".to_string(),
        ModelInfo {
            full_name: "microsoft/graphcodebert-base".to_string(),
            dim: 768,
            description: "Deprecated code embedding".to_string(),
        },
    );
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_original_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.chunk_size, 1536);
        assert_eq!(cfg.chunk_overlap, 200);
        assert_eq!(cfg.max_file_size, 5_242_880);
        assert_eq!(cfg.rrf_k, 60);
        assert_eq!(cfg.rerank_top_k, 20);
        assert_eq!(cfg.supported_models.len(), 9);
    }

    #[test]
    fn profile_auto_switches_at_medium_max_files() {
        let cfg = Config::default();
        assert_eq!(cfg.resolve_profile(100), ProfileName::Medium);
        assert_eq!(cfg.resolve_profile(cfg.medium_max_files + 1), ProfileName::Large);
    }

    #[test]
    fn missing_config_file_falls_back_to_default() {
        let cfg = Config::load_from(std::path::Path::new("/nonexistent/codesearch.toml")).unwrap();
        assert_eq!(cfg.chunk_size, Config::default().chunk_size);
    }

    #[test]
    fn register_project_makes_it_report_as_registered() {
        let project = tempfile::TempDir::new().unwrap();

        let cfg = Config::default();
        assert!(!cfg.is_project_registered(project.path()));
        cfg.register_project(project.path()).unwrap();
        assert!(cfg.is_project_registered(project.path()));
    }
}
