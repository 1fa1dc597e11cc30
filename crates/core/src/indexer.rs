//! Indexer pipeline (§4.H): full-reset, per-file classification, batched
//! embed-and-commit, cancellation, and the final summary result.
//!
//! Grounded on `original_source/app/indexer/indexer.py`'s `CoreIndexer.index`
//! — same eight-step shape (clear project dir, open store, walk files,
//! per-file size/encoding/parse classification, batch flush at
//! `embedding_batch_size`, final flush, metadata write, timing summary) —
//! adapted to `crates/core`'s async store/embedder instead of the original's
//! synchronous SQLite-adjacent VectorDatabase.

use std::path::Path;
use std::time::Instant;

use crate::chunker;
use crate::config::Config;
use crate::embedder::{EmbedOutcome, Embedder};
use crate::error::EngineResult;
use crate::parser;
use crate::project::ProjectLayout;
use crate::store::ChunkStore;
use crate::types::{CodeChunk, EmbedTask, FailedFile, IndexingResult};
use crate::walker;

/// Caller-supplied hooks into a running index operation. All methods have
/// no-op defaults so a caller only overrides what it needs.
pub trait IndexCallbacks: Send + Sync {
    fn on_progress(&self, _current: usize, _total: usize, _filename: &str) {}
    fn on_log(&self, _message: &str) {}
    fn should_cancel(&self) -> bool {
        false
    }
    fn on_file_processed(&self, _filename: &str, _status: &str, _chunks: usize) {}
}

pub struct NoopCallbacks;
impl IndexCallbacks for NoopCallbacks {}

/// Run a full index of `project_path`, replacing any previously indexed
/// data for it (spec §4.H step 1: full reset, not incremental).
pub async fn index_project(
    project_path: &Path,
    config: &Config,
    callbacks: &dyn IndexCallbacks,
) -> EngineResult<IndexingResult> {
    let processing_start = Instant::now();
    let mut result = IndexingResult {
        success: false,
        total_files: 0,
        total_chunks: 0,
        error: None,
        embedding_model: config.embedding_model.clone(),
        database_location: String::new(),
        project_path: project_path.display().to_string(),
        indexed_files_count: 0,
        failed_files_count: 0,
        skipped_files_count: 0,
        processing_time_ms: 0,
        embedding_time_ms: 0,
        language_breakdown: Default::default(),
        failed_files: Vec::new(),
        skipped_files: Vec::new(),
        indexed_files: Vec::new(),
    };

    if !project_path.is_dir() {
        result.error = Some(format!("path does not exist: {}", project_path.display()));
        return Ok(result);
    }

    callbacks.on_log("initializing indexer");

    let layout = ProjectLayout::new(ProjectLayout::default_home());
    let project_dir = layout.dir_for(project_path);
    if project_dir.exists() {
        callbacks.on_log("clearing existing project data");
        std::fs::remove_dir_all(&project_dir)?;
    }
    layout.ensure_dirs(project_path)?;
    config.register_project(project_path)?;

    let embedder = Embedder::new(config);
    let store = ChunkStore::open(&layout.data_dir_for(project_path), embedder.dim()).await?;
    store.reset().await?;

    callbacks.on_log(&format!("scanning directory: {}", project_path.display()));
    let files = walker::find_files(project_path, config);
    result.total_files = files.len();
    callbacks.on_log(&format!("found {} files to index", files.len()));

    if files.is_empty() {
        callbacks.on_log("no files found to index");
        result.success = true;
        return Ok(result);
    }

    let mut pending: Vec<CodeChunk> = Vec::new();
    let mut total_embedding_time_ms: u64 = 0;
    let mut total_chunks = 0usize;

    for (i, file) in files.iter().enumerate() {
        if callbacks.should_cancel() {
            callbacks.on_log("indexing cancelled by user");
            if !pending.is_empty() {
                let flushed = flush_batch(&store, &embedder, std::mem::take(&mut pending), true).await?;
                total_embedding_time_ms += flushed.1;
                total_chunks += flushed.0;
            }
            result.error = Some("Cancelled".to_string());
            result.total_chunks = total_chunks;
            result.database_location = layout.data_dir_for(project_path).display().to_string();
            result.processing_time_ms = processing_start.elapsed().as_millis() as u64;
            result.embedding_time_ms = total_embedding_time_ms;
            return Ok(result);
        }

        let filename = file.abs_path.file_name().and_then(|n| n.to_str()).unwrap_or(&file.rel_path);
        callbacks.on_progress(i + 1, files.len(), filename);

        let metadata = match std::fs::metadata(&file.abs_path) {
            Ok(m) => m,
            Err(e) => {
                record_failure(&mut result, callbacks, filename, &file.rel_path, "permission_error", &e.to_string());
                continue;
            }
        };
        let size_bytes = metadata.len();
        let modified_at = modified_at_rfc3339(&metadata);

        if size_bytes > config.max_file_size {
            let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
            result.skipped_files.push(file.rel_path.clone());
            result.skipped_files_count += 1;
            callbacks.on_log(&format!("skipping {filename} (file too large: {size_mb:.1}MB)"));
            callbacks.on_file_processed(filename, "skipped", 0);
            continue;
        }

        let content = match std::fs::read(&file.abs_path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                record_failure(&mut result, callbacks, filename, &file.rel_path, "encoding_error", &e.to_string());
                continue;
            }
        };

        let parsed = parser::parse_file(&file.rel_path, &content);
        if parsed.is_none() && parser::language_for_path(&file.rel_path).is_some() {
            record_failure(&mut result, callbacks, filename, &file.rel_path, "parse_error", "failed to parse file");
            continue;
        }

        let chunks = chunker::chunk_file(&file.rel_path, &content, parsed.as_ref(), config, &modified_at);
        if chunks.is_empty() {
            result.skipped_files.push(file.rel_path.clone());
            result.skipped_files_count += 1;
            callbacks.on_file_processed(filename, "skipped", 0);
            continue;
        }

        let chunk_count = chunks.len();
        let language = parsed.map(|p| p.language).unwrap_or_else(|| "text".to_string());
        *result.language_breakdown.entry(language).or_insert(0) += 1;
        result.indexed_files.push(file.rel_path.clone());
        result.indexed_files_count += 1;
        callbacks.on_log(&format!("processed {filename}: {chunk_count} chunks"));
        callbacks.on_file_processed(filename, "indexed", chunk_count);

        pending.extend(chunks);

        if pending.len() >= config.embedding_batch_size {
            let flushed = flush_batch(&store, &embedder, std::mem::take(&mut pending), false).await?;
            total_embedding_time_ms += flushed.1;
            total_chunks += flushed.0;
            callbacks.on_log(&format!("batch indexed: {} chunks", flushed.0));
        }
    }

    if !pending.is_empty() {
        let count = pending.len();
        callbacks.on_log(&format!("processing final batch: {count} chunks"));
        let flushed = flush_batch(&store, &embedder, pending, true).await?;
        total_embedding_time_ms += flushed.1;
        total_chunks += flushed.0;
        callbacks.on_log(&format!("final batch indexed: {} chunks", flushed.0));
    }

    let mut saved_metadata = layout.load_metadata(project_path);
    saved_metadata.embedding_model = Some(config.embedding_model.clone());
    saved_metadata.embedding_dim = Some(embedder.dim());
    saved_metadata.indexed_at = Some(now_rfc3339());
    saved_metadata.name = project_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    saved_metadata.path = project_path.display().to_string();
    layout.save_metadata(project_path, &saved_metadata)?;

    result.success = true;
    result.total_chunks = total_chunks;
    result.database_location = layout.data_dir_for(project_path).display().to_string();
    result.processing_time_ms = processing_start.elapsed().as_millis() as u64;
    result.embedding_time_ms = total_embedding_time_ms;

    callbacks.on_log(&format!("indexing complete! total chunks: {total_chunks}"));
    callbacks.on_log(&format!(
        "stats: {} indexed, {} failed, {} skipped",
        result.indexed_files_count, result.failed_files_count, result.skipped_files_count
    ));

    Ok(result)
}

fn record_failure(
    result: &mut IndexingResult,
    callbacks: &dyn IndexCallbacks,
    filename: &str,
    rel_path: &str,
    error_type: &str,
    message: &str,
) {
    result.failed_files.push(FailedFile { file: rel_path.to_string(), error_type: error_type.to_string(), message: message.to_string() });
    result.failed_files_count += 1;
    callbacks.on_log(&format!("failed {filename} ({error_type}): {message}"));
    callbacks.on_file_processed(filename, "failed", 0);
}

/// Embed and commit one batch, returning `(chunk_count, embedding_time_ms)`.
/// A degraded embedder does not fail the run: chunks are stored with
/// deterministic unit vectors so both vector and keyword search still find
/// them (spec §4.E, P4). `update_fts` is forwarded to `add_chunks` — bulk
/// indexing passes `false` for every batch but the last to amortize the FTS
/// rebuild (spec §4.H step f/6).
async fn flush_batch(store: &ChunkStore, embedder: &Embedder, chunks: Vec<CodeChunk>, update_fts: bool) -> EngineResult<(usize, u64)> {
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let embed_start = Instant::now();
    let outcome = embedder.embed(&texts, EmbedTask::Passage);
    if let EmbedOutcome::Degraded { reason, .. } = &outcome {
        tracing::warn!(%reason, "embedding degraded, storing deterministic fallback vectors");
    }
    let vectors = outcome.into_vectors();
    let elapsed_ms = embed_start.elapsed().as_millis() as u64;

    let count = chunks.len();
    let rows: Vec<(CodeChunk, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();
    store.add_chunks(&rows, update_fts).await?;
    Ok((count, elapsed_ms))
}

fn modified_at_rfc3339(metadata: &std::fs::Metadata) -> String {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| chrono::DateTime::<chrono::Utc>::from_timestamp(d.as_secs() as i64, 0).unwrap_or_default().to_rfc3339())
        .unwrap_or_default()
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Reindex a single changed file in place (§4.I auto-sync tick), reusing
/// the same per-file classification and batch-of-one commit.
pub async fn reindex_file(
    project_path: &Path,
    rel_path: &str,
    config: &Config,
    store: &ChunkStore,
    embedder: &Embedder,
) -> EngineResult<usize> {
    store.delete_by_file(rel_path).await?;

    let abs_path = project_path.join(rel_path);
    if !abs_path.is_file() {
        return Ok(0);
    }
    if !walker::path_passes_filters(rel_path, config) {
        return Ok(0);
    }

    let metadata = std::fs::metadata(&abs_path)?;
    if metadata.len() > config.max_file_size {
        return Ok(0);
    }
    let modified_at = modified_at_rfc3339(&metadata);

    let content = match std::fs::read(&abs_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => return Ok(0),
    };

    let parsed = parser::parse_file(rel_path, &content);
    let chunks = chunker::chunk_file(rel_path, &content, parsed.as_ref(), config, &modified_at);
    if chunks.is_empty() {
        return Ok(0);
    }

    let (count, _) = flush_batch(store, embedder, chunks, true).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn indexing_nonexistent_path_reports_error_not_panic() {
        let config = Config::default();
        let result = index_project(Path::new("/does/not/exist"), &config, &NoopCallbacks).await.unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn indexing_empty_project_succeeds_with_zero_chunks() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let result = index_project(tmp.path(), &config, &NoopCallbacks).await.unwrap();
        assert!(result.success);
        assert_eq!(result.total_chunks, 0);
    }

    #[tokio::test]
    async fn oversized_file_is_skipped_not_failed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("big.py"), "x = 1\n".repeat(10)).unwrap();
        let mut config = Config::default();
        config.max_file_size = 5;
        let result = index_project(tmp.path(), &config, &NoopCallbacks).await.unwrap();
        assert!(result.success);
        assert_eq!(result.skipped_files_count, 1);
        assert_eq!(result.failed_files_count, 0);
    }
}
