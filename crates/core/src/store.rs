//! Columnar store (§4.F): one `lancedb` table per project, holding chunk
//! metadata, content, and dense vectors side by side.
//!
//! Schema and operations are grounded on
//! `original_source/app/search/vector_db.py`'s `VectorDatabase` (table
//! schema, `keyword_search`'s FTS-index approach, `delete_by_file`'s
//! refresh-then-reindex-FTS discipline, `get_language_breakdown`/
//! `get_chunk_type_breakdown`'s differing aggregation axes, directory-walk
//! size accounting) — adapted to the async `lancedb`/`arrow-array` API shown
//! in `JoeyEamigh-ccmemory`'s `db/connection.rs` and `db/code/codes.rs`
//! (batched `RecordBatch` inserts, `only_if` filters, `_distance` column
//! extraction).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, Table};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::types::CodeChunk;

fn chunks_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("file_path", DataType::Utf8, false),
        Field::new("start_line", DataType::Int32, false),
        Field::new("end_line", DataType::Int32, false),
        Field::new("language", DataType::Utf8, false),
        Field::new("chunk_type", DataType::Utf8, false),
        Field::new("node_name", DataType::Utf8, false),
        Field::new("signature", DataType::Utf8, false),
        Field::new("parameters", DataType::Utf8, false),
        Field::new("return_type", DataType::Utf8, false),
        Field::new("docstring", DataType::Utf8, false),
        Field::new("decorators", DataType::Utf8, false),
        Field::new("imports", DataType::Utf8, false),
        Field::new("parent_scope", DataType::Utf8, false),
        Field::new("full_path", DataType::Utf8, false),
        Field::new("scope_depth", DataType::Int32, false),
        Field::new("size_bytes", DataType::Int64, false),
        Field::new("modified_at", DataType::Utf8, false),
        Field::new("calls", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
            false,
        ),
    ]))
}

const TABLE_NAME: &str = "chunks";

/// Columns a caller may filter on (indexed string columns only, per §4.F).
const FILTERABLE_COLUMNS: &[&str] = &[
    "language", "chunk_type", "node_name", "file_path", "parent_scope", "full_path",
];

/// Build an ANDed `only_if` predicate from equality filters, escaping single
/// quotes to prevent injection of predicate syntax (spec §4.F: "any
/// user-supplied string that enters a predicate MUST be doubled-quote-escaped
/// to prevent injection"). Filters on columns outside the allow-list are
/// silently dropped rather than erroring, matching the adapter's
/// best-effort posture elsewhere.
fn filters_to_predicate(filters: &[(String, String)]) -> Option<String> {
    let clauses: Vec<String> = filters
        .iter()
        .filter(|(column, _)| FILTERABLE_COLUMNS.contains(&column.as_str()))
        .map(|(column, value)| format!("{column} = '{}'", value.replace('\'', "''")))
        .collect();
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

/// Per-project columnar store. Serializes writes behind a `tokio::Mutex`
/// (spec §5: "a single writer per project database at a time") while
/// allowing concurrent reads through cloned `Table` handles.
pub struct ChunkStore {
    connection: Connection,
    vector_dim: usize,
    write_lock: Mutex<()>,
    fts_indexed: std::sync::atomic::AtomicBool,
}

impl ChunkStore {
    pub async fn open(db_path: &Path, vector_dim: usize) -> StoreResult<Self> {
        tokio::fs::create_dir_all(db_path).await?;
        let connection = connect(&db_path.to_string_lossy())
            .execute()
            .await
            .map_err(|source| StoreError::Connect { path: db_path.display().to_string(), source })?;

        let store = ChunkStore {
            connection,
            vector_dim,
            write_lock: Mutex::new(()),
            fts_indexed: std::sync::atomic::AtomicBool::new(false),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    async fn ensure_table(&self) -> StoreResult<()> {
        let names = self.connection.table_names().execute().await?;
        if !names.iter().any(|n| n == TABLE_NAME) {
            self.connection
                .create_empty_table(TABLE_NAME, chunks_schema(self.vector_dim))
                .execute()
                .await?;
        }
        Ok(())
    }

    async fn table(&self) -> StoreResult<Table> {
        Ok(self.connection.open_table(TABLE_NAME).execute().await?)
    }

    /// Drop and recreate the table empty — used by a full re-index (§4.H
    /// step 1).
    pub async fn reset(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let names = self.connection.table_names().execute().await?;
        if names.iter().any(|n| n == TABLE_NAME) {
            self.connection.drop_table(TABLE_NAME).await?;
        }
        self.connection
            .create_empty_table(TABLE_NAME, chunks_schema(self.vector_dim))
            .execute()
            .await?;
        self.fts_indexed.store(false, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Batch-insert `(chunk, embedding)` pairs in a single `RecordBatch`
    /// (spec §4.F: "writes are batched, never one row per call"). `update_fts`
    /// controls whether the FTS index is invalidated (and thus rebuilt on the
    /// next keyword search) after this write — bulk indexers pass `false` for
    /// every batch but the last to amortize the rebuild cost (§4.H step f/6).
    pub async fn add_chunks(&self, rows: &[(CodeChunk, Vec<f32>)], update_fts: bool) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for (_, vec) in rows {
            if vec.len() != self.vector_dim {
                return Err(StoreError::DimensionMismatch { expected: self.vector_dim, actual: vec.len() });
            }
        }

        let _guard = self.write_lock.lock().await;
        let table = self.table().await?;
        let batch = chunks_to_batch(rows, self.vector_dim)?;
        let iter = RecordBatchIterator::new(vec![Ok(batch)], chunks_schema(self.vector_dim));
        table.add(Box::new(iter)).execute().await?;
        if update_fts {
            self.fts_indexed.store(false, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(())
    }

    /// Remove every chunk belonging to `rel_path` (spec §4.H: re-index of a
    /// changed file deletes its old chunks before inserting new ones).
    pub async fn delete_by_file(&self, rel_path: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let table = self.table().await?;
        let escaped = rel_path.replace('\'', "''");
        table.delete(&format!("file_path = '{escaped}'")).await?;
        self.fts_indexed.store(false, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Approximate nearest-neighbor vector search, cosine distance. `filters`
    /// are equality predicates over indexed string columns, ANDed together
    /// and applied with safe escaping (spec §4.F).
    pub async fn vector_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filters: &[(String, String)],
    ) -> StoreResult<Vec<(CodeChunk, f32)>> {
        let table = self.table().await?;
        let mut query = table
            .vector_search(query_vector.to_vec())?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(limit);
        if let Some(predicate) = filters_to_predicate(filters) {
            query = query.only_if(predicate);
        }
        let results: Vec<RecordBatch> = query.execute().await?.try_collect().await?;

        let mut out = Vec::new();
        for batch in &results {
            for row in 0..batch.num_rows() {
                let chunk = batch_to_chunk(batch, row)?;
                let distance = batch
                    .column_by_name("_distance")
                    .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                    .map(|a| a.value(row))
                    .unwrap_or(0.0);
                out.push((chunk, distance));
            }
        }
        Ok(out)
    }

    /// Full-text search over `content`. Lazily (re)builds the FTS index
    /// before the first search after a write, mirroring
    /// `_ensure_fts_index`/`_update_fts_index`'s rebuild-on-mutation policy.
    /// `filters` are the same equality predicates `vector_search` accepts.
    pub async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filters: &[(String, String)],
    ) -> StoreResult<Vec<(CodeChunk, f32)>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        self.ensure_fts_index(&table).await;

        let fts_query = lancedb::query::FullTextSearchQuery::new(query.to_string());
        let mut builder = table.query().full_text_search(fts_query).limit(limit);
        if let Some(predicate) = filters_to_predicate(filters) {
            builder = builder.only_if(predicate);
        }
        let results: Vec<RecordBatch> = match builder.execute().await {
            Ok(stream) => stream.try_collect().await?,
            Err(_) => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        for batch in &results {
            for row in 0..batch.num_rows() {
                let chunk = batch_to_chunk(batch, row)?;
                let score = batch
                    .column_by_name("_score")
                    .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                    .map(|a| a.value(row))
                    .unwrap_or(0.0);
                out.push((chunk, score));
            }
        }
        Ok(out)
    }

    async fn ensure_fts_index(&self, table: &Table) {
        if self.fts_indexed.load(std::sync::atomic::Ordering::Relaxed) {
            return;
        }
        use lancedb::index::Index;
        match table.create_index(&["content"], Index::FTS(Default::default())).execute().await {
            Ok(_) => self.fts_indexed.store(true, std::sync::atomic::Ordering::Relaxed),
            Err(e) => tracing::warn!(error = %e, "FTS index build failed, keyword search may return no rows"),
        }
    }

    pub async fn count_rows(&self) -> StoreResult<usize> {
        let table = self.table().await?;
        Ok(table.count_rows(None).await?)
    }

    /// Distinct files per language (§4.F: intentionally different axis than
    /// `chunk_type_breakdown` — mirrors the original's `nunique` vs.
    /// `value_counts` asymmetry).
    pub async fn language_breakdown(&self) -> StoreResult<BTreeMap<String, usize>> {
        let table = self.table().await?;
        let batches: Vec<RecordBatch> = table.query().select_columns(["language", "file_path"]).execute().await?.try_collect().await?;
        let mut files_by_lang: BTreeMap<String, std::collections::HashSet<String>> = BTreeMap::new();
        for batch in &batches {
            let langs = column_str(batch, "language")?;
            let paths = column_str(batch, "file_path")?;
            for i in 0..batch.num_rows() {
                files_by_lang.entry(langs.value(i).to_string()).or_default().insert(paths.value(i).to_string());
            }
        }
        Ok(files_by_lang.into_iter().map(|(k, v)| (k, v.len())).collect())
    }

    /// Chunk count per chunk type.
    pub async fn chunk_type_breakdown(&self) -> StoreResult<BTreeMap<String, usize>> {
        let table = self.table().await?;
        let batches: Vec<RecordBatch> = table.query().select_columns(["chunk_type"]).execute().await?.try_collect().await?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for batch in &batches {
            let kinds = column_str(batch, "chunk_type")?;
            for i in 0..batch.num_rows() {
                *counts.entry(kinds.value(i).to_string()).or_default() += 1;
            }
        }
        Ok(counts)
    }
}

/// On-disk size of a project's `.lancedb` directory, in megabytes.
pub fn database_size_mb(db_path: &Path) -> f64 {
    fn walk(dir: &Path, total: &mut u64) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, total);
            } else if let Ok(meta) = entry.metadata() {
                *total += meta.len();
            }
        }
    }
    let mut total = 0u64;
    walk(db_path, &mut total);
    ((total as f64 / (1024.0 * 1024.0)) * 100.0).round() / 100.0
}

pub fn default_db_dir(project_data_dir: &Path) -> PathBuf {
    project_data_dir.join("chunks.lancedb")
}

fn chunks_to_batch(rows: &[(CodeChunk, Vec<f32>)], vector_dim: usize) -> StoreResult<RecordBatch> {
    let n = rows.len();
    macro_rules! strcol {
        ($f:ident) => {
            StringArray::from(rows.iter().map(|(c, _)| c.$f.as_str()).collect::<Vec<_>>())
        };
    }

    let mut all_vectors = Vec::with_capacity(n * vector_dim);
    for (_, v) in rows {
        all_vectors.extend_from_slice(v);
    }
    let values = Float32Array::from(all_vectors);
    let item_field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_list = FixedSizeListArray::try_new(item_field, vector_dim as i32, Arc::new(values), None)?;

    let batch = RecordBatch::try_new(
        chunks_schema(vector_dim),
        vec![
            Arc::new(strcol!(id)),
            Arc::new(strcol!(content)),
            Arc::new(strcol!(file_path)),
            Arc::new(Int32Array::from(rows.iter().map(|(c, _)| c.start_line).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(rows.iter().map(|(c, _)| c.end_line).collect::<Vec<_>>())),
            Arc::new(strcol!(language)),
            Arc::new(strcol!(chunk_type)),
            Arc::new(strcol!(node_name)),
            Arc::new(strcol!(signature)),
            Arc::new(strcol!(parameters)),
            Arc::new(strcol!(return_type)),
            Arc::new(strcol!(docstring)),
            Arc::new(strcol!(decorators)),
            Arc::new(strcol!(imports)),
            Arc::new(strcol!(parent_scope)),
            Arc::new(strcol!(full_path)),
            Arc::new(Int32Array::from(rows.iter().map(|(c, _)| c.scope_depth).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(rows.iter().map(|(c, _)| c.size_bytes).collect::<Vec<_>>())),
            Arc::new(strcol!(modified_at)),
            Arc::new(strcol!(calls)),
            Arc::new(vector_list),
        ],
    )?;
    Ok(batch)
}

fn column_str<'a>(batch: &'a RecordBatch, name: &str) -> StoreResult<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Arrow(arrow_schema::ArrowError::SchemaError(format!("missing column {name}"))))
}

fn batch_to_chunk(batch: &RecordBatch, row: usize) -> StoreResult<CodeChunk> {
    let get_str = |name: &str| -> StoreResult<String> { Ok(column_str(batch, name)?.value(row).to_string()) };
    let get_i32 = |name: &str| -> i32 {
        batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int32Array>()).map(|a| a.value(row)).unwrap_or(0)
    };
    let get_i64 = |name: &str| -> i64 {
        batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int64Array>()).map(|a| a.value(row)).unwrap_or(0)
    };
    Ok(CodeChunk {
        id: get_str("id")?,
        content: get_str("content")?,
        file_path: get_str("file_path")?,
        start_line: get_i32("start_line"),
        end_line: get_i32("end_line"),
        language: get_str("language")?,
        chunk_type: get_str("chunk_type")?,
        node_name: get_str("node_name")?,
        signature: get_str("signature")?,
        parameters: get_str("parameters")?,
        return_type: get_str("return_type")?,
        docstring: get_str("docstring")?,
        decorators: get_str("decorators")?,
        imports: get_str("imports")?,
        parent_scope: get_str("parent_scope")?,
        full_path: get_str("full_path")?,
        scope_depth: get_i32("scope_depth"),
        size_bytes: get_i64("size_bytes"),
        modified_at: get_str("modified_at")?,
        calls: get_str("calls")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_chunk(file: &str, start: i32, content: &str) -> CodeChunk {
        CodeChunk {
            id: CodeChunk::make_id(file, start),
            content: content.to_string(),
            file_path: file.to_string(),
            start_line: start,
            end_line: start,
            language: "python".to_string(),
            chunk_type: "function_definition".to_string(),
            node_name: "f".to_string(),
            signature: String::new(),
            parameters: String::new(),
            return_type: String::new(),
            docstring: String::new(),
            decorators: String::new(),
            imports: "[]".to_string(),
            parent_scope: String::new(),
            full_path: "f".to_string(),
            scope_depth: 0,
            size_bytes: content.len() as i64,
            modified_at: "2024-01-01T00:00:00Z".to_string(),
            calls: "[]".to_string(),
        }
    }

    #[tokio::test]
    async fn add_and_count_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path(), 4).await.unwrap();
        let chunk = test_chunk("a.py", 1, "def f(): pass");
        store.add_chunks(&[(chunk, vec![0.1, 0.2, 0.3, 0.4])], true).await.unwrap();
        assert_eq!(store.count_rows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected_before_write() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path(), 4).await.unwrap();
        let chunk = test_chunk("a.py", 1, "def f(): pass");
        let err = store.add_chunks(&[(chunk, vec![0.1, 0.2])], true).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn delete_by_file_removes_only_its_rows() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path(), 4).await.unwrap();
        store
            .add_chunks(
                &[
                    (test_chunk("a.py", 1, "def f(): pass"), vec![0.0; 4]),
                    (test_chunk("b.py", 1, "def g(): pass"), vec![0.0; 4]),
                ],
                true,
            )
            .await
            .unwrap();
        store.delete_by_file("a.py").await.unwrap();
        assert_eq!(store.count_rows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn vector_search_returns_nearest_rows() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path(), 4).await.unwrap();
        store
            .add_chunks(
                &[
                    (test_chunk("a.py", 1, "def f(): pass"), vec![1.0, 0.0, 0.0, 0.0]),
                    (test_chunk("b.py", 1, "def g(): pass"), vec![0.0, 1.0, 0.0, 0.0]),
                ],
                true,
            )
            .await
            .unwrap();
        let results = store.vector_search(&[1.0, 0.0, 0.0, 0.0], 1, &[]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.file_path, "a.py");
    }

    #[tokio::test]
    async fn language_and_chunk_type_breakdowns_use_different_axes() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path(), 4).await.unwrap();
        store
            .add_chunks(
                &[
                    (test_chunk("a.py", 1, "def f(): pass"), vec![0.0; 4]),
                    (test_chunk("a.py", 5, "def g(): pass"), vec![0.0; 4]),
                ],
                true,
            )
            .await
            .unwrap();
        let lang = store.language_breakdown().await.unwrap();
        assert_eq!(lang.get("python"), Some(&1)); // one distinct file
        let kinds = store.chunk_type_breakdown().await.unwrap();
        assert_eq!(kinds.get("function_definition"), Some(&2)); // two chunks
    }

    fn test_chunk_lang(file: &str, start: i32, content: &str, language: &str) -> CodeChunk {
        let mut chunk = test_chunk(file, start, content);
        chunk.language = language.to_string();
        chunk
    }

    #[tokio::test]
    async fn vector_search_filter_excludes_other_languages() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path(), 4).await.unwrap();
        store
            .add_chunks(
                &[
                    (test_chunk_lang("a.py", 1, "def f(): pass", "python"), vec![1.0, 0.0, 0.0, 0.0]),
                    (test_chunk_lang("a.rs", 1, "fn f() {}", "rust"), vec![1.0, 0.0, 0.0, 0.0]),
                ],
                true,
            )
            .await
            .unwrap();

        let filters = vec![("language".to_string(), "python".to_string())];
        let results = store.vector_search(&[1.0, 0.0, 0.0, 0.0], 10, &filters).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|(chunk, _)| chunk.language == "python"));
    }

    #[tokio::test]
    async fn keyword_search_filter_excludes_other_languages() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::open(tmp.path(), 4).await.unwrap();
        store
            .add_chunks(
                &[
                    (test_chunk_lang("a.py", 1, "def marker(): pass", "python"), vec![0.0; 4]),
                    (test_chunk_lang("a.rs", 1, "fn marker() {}", "rust"), vec![0.0; 4]),
                ],
                true,
            )
            .await
            .unwrap();

        let filters = vec![("language".to_string(), "rust".to_string())];
        let results = store.keyword_search("marker", 10, &filters).await.unwrap();
        assert!(results.iter().all(|(chunk, _)| chunk.language == "rust"));
    }
}
