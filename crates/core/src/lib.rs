//! `codesearch-core`: a per-project code search engine — AST-aware chunking,
//! hybrid dense+lexical retrieval, and an auto-sync worker that keeps the
//! index current as files change.
//!
//! This module is the public facade (spec §6): `index`, `search`, `stats`,
//! `auto_sync_start`, `list_projects`. It owns nothing long-lived itself —
//! every call opens the store/embedder it needs and tears them down when
//! done, except `auto_sync_start`, which hands back a live handle. Grounded
//! on `server/src/lib.rs`'s thin re-export-facade shape in the teacher.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod parser;
pub mod project;
pub mod retriever;
pub mod store;
pub mod types;
pub mod walker;
pub mod watch;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub use config::{Config, ProfileName};
pub use error::{EngineError, EngineResult, StoreError};
pub use indexer::{IndexCallbacks, NoopCallbacks};
pub use project::ProjectMetadata;
pub use types::{CodeChunk, FailedFile, IndexingResult, ResultRow, SearchMode};
pub use watch::{AutoSyncWorker, HealthStatus, WorkerState};

use embedder::Embedder;
use retriever::Retriever;
use store::ChunkStore;

/// Full re-index of `project_path`, replacing any prior index for it.
pub async fn index(project_path: &Path, config: &Config, callbacks: &dyn IndexCallbacks) -> EngineResult<IndexingResult> {
    indexer::index_project(project_path, config, callbacks).await
}

/// Search an already-indexed project. Fails with `InvalidQuery`/
/// `InvalidLimit` before touching the store for obviously bad input (spec
/// §7: "surfaced as a typed input error without side effects"). `filters` are
/// equality predicates over indexed string columns (e.g. `[("language",
/// "python")]`), ANDed together (spec §6, §4.F/§4.G).
pub async fn search(
    project_path: &Path,
    query: &str,
    mode: SearchMode,
    limit: usize,
    config: &Config,
    filters: &[(String, String)],
) -> EngineResult<Vec<ResultRow>> {
    if query.trim().is_empty() {
        return Err(EngineError::InvalidQuery);
    }
    if limit == 0 {
        return Err(EngineError::InvalidLimit);
    }
    if !project_path.is_dir() {
        return Err(EngineError::InvalidPath(project_path.display().to_string()));
    }

    let layout = project::ProjectLayout::new(project::ProjectLayout::default_home());
    let embedder = Embedder::new(config);
    let store = ChunkStore::open(&layout.data_dir_for(project_path), embedder.dim()).await?;

    let retriever = Retriever::new(&store, &embedder, config);
    retriever.search(query, mode, limit, filters).await
}

/// Combined project/database/model stats (§4's supplemented stats surface).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProjectStats {
    pub project_path: String,
    pub indexed_at: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dim: Option<usize>,
    pub total_chunks: usize,
    pub database_size_mb: f64,
    pub language_breakdown: BTreeMap<String, usize>,
    pub chunk_type_breakdown: BTreeMap<String, usize>,
}

pub async fn stats(project_path: &Path, config: &Config) -> EngineResult<ProjectStats> {
    if !project_path.is_dir() {
        return Err(EngineError::InvalidPath(project_path.display().to_string()));
    }

    let layout = project::ProjectLayout::new(project::ProjectLayout::default_home());
    let metadata = layout.load_metadata(project_path);
    let data_dir = layout.data_dir_for(project_path);

    let embedder = Embedder::new(config);
    let store = ChunkStore::open(&data_dir, embedder.dim()).await?;

    Ok(ProjectStats {
        project_path: project_path.display().to_string(),
        indexed_at: metadata.indexed_at,
        embedding_model: metadata.embedding_model,
        embedding_dim: metadata.embedding_dim,
        total_chunks: store.count_rows().await?,
        database_size_mb: store::database_size_mb(&data_dir),
        language_breakdown: store.language_breakdown().await?,
        chunk_type_breakdown: store.chunk_type_breakdown().await?,
    })
}

/// Start watching `project_path` for changes and keeping its index current.
/// The project must already have been indexed at least once.
pub async fn auto_sync_start(project_path: &Path, config: Arc<Config>) -> EngineResult<AutoSyncWorker> {
    let layout = project::ProjectLayout::new(project::ProjectLayout::default_home());
    let embedder = Arc::new(Embedder::new(&config));
    let store = Arc::new(ChunkStore::open(&layout.data_dir_for(project_path), embedder.dim()).await?);
    let worker = AutoSyncWorker::start(project_path.to_path_buf(), config, store, embedder).await?;
    Ok(worker)
}

/// Every project this engine has ever indexed, keyed by its directory hash.
pub fn list_projects() -> BTreeMap<String, ProjectMetadata> {
    let layout = project::ProjectLayout::new(project::ProjectLayout::default_home());
    layout.list_all_projects()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn search_rejects_empty_query_before_touching_store() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let err = search(tmp.path(), "   ", SearchMode::Hybrid, 10, &config, &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuery));
    }

    #[tokio::test]
    async fn search_rejects_zero_limit() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let err = search(tmp.path(), "hello", SearchMode::Hybrid, 0, &config, &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidLimit));
    }

    #[tokio::test]
    async fn search_rejects_nonexistent_project_path() {
        let config = Config::default();
        let err = search(Path::new("/does/not/exist"), "hello", SearchMode::Hybrid, 10, &config, &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn index_then_search_round_trips_a_simple_function() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("math_utils.py"), "def add(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n").unwrap();

        let config = Config::default();
        let result = index(tmp.path(), &config, &NoopCallbacks).await.unwrap();
        assert!(result.success);
        assert!(result.total_chunks > 0);

        let rows = search(tmp.path(), "add", SearchMode::Keyword, 10, &config, &[]).await.unwrap();
        assert!(rows.iter().any(|r| r.node_name == "add"));
    }

    #[tokio::test]
    async fn search_filter_excludes_languages_that_do_not_match() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("math_utils.py"), "def add(a, b):\n    return a + b\n").unwrap();
        std::fs::write(tmp.path().join("math_utils.rs"), "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n").unwrap();

        let config = Config::default();
        index(tmp.path(), &config, &NoopCallbacks).await.unwrap();

        let filters = [("language".to_string(), "python".to_string())];
        let rows = search(tmp.path(), "add", SearchMode::Keyword, 10, &config, &filters).await.unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.file_path.ends_with(".py")));
    }
}
