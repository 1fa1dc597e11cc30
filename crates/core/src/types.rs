//! Shared data model (spec §3): parsed nodes, `CodeChunk`, and the search
//! result shape returned across the engine boundary.

use serde::{Deserialize, Serialize};

/// A single semantic unit extracted by the parser adapter (§4.C), prior to
/// chunking. Mirrors the node dict built by the original's
/// `_extract_important_nodes`, but as a concrete struct rather than a dict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedNode {
    /// Parser node kind, e.g. `function_definition`, `class_declaration`.
    pub node_type: String,
    pub name: String,
    /// 0-based inclusive line span.
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub signature: String,
    /// JSON-encoded list of `{name, type}`.
    pub parameters: String,
    pub return_type: String,
    pub docstring: String,
    /// JSON-encoded list of decorator strings.
    pub decorators: String,
    /// Dotted chain of ancestor important-node names.
    pub parent_scope: String,
    /// `parent_scope` joined with `name`.
    pub full_path: String,
    pub scope_depth: usize,
    /// JSON-encoded list of `{caller, callee, line}`.
    pub calls: String,
}

/// The result of parsing one file (§4.C).
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub language: String,
    pub nodes: Vec<ParsedNode>,
    /// Ordered, de-duplicated file-level import statements.
    pub imports: Vec<String>,
}

/// The unit of index and retrieval (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub content: String,
    pub file_path: String,
    pub start_line: i32,
    pub end_line: i32,
    pub language: String,
    pub chunk_type: String,
    pub node_name: String,
    pub signature: String,
    pub parameters: String,
    pub return_type: String,
    pub docstring: String,
    pub decorators: String,
    pub imports: String,
    pub parent_scope: String,
    pub full_path: String,
    pub scope_depth: i32,
    pub size_bytes: i64,
    pub modified_at: String,
    pub calls: String,
}

impl CodeChunk {
    /// Stable id per invariant I4: unique within a project, scoped to a file
    /// revision — `"<rel_path>:<start_line>"`.
    pub fn make_id(file_path: &str, start_line: i32) -> String {
        format!("{file_path}:{start_line}")
    }
}

/// A row returned from search: every `CodeChunk` field except `vector`, plus
/// the scoring metadata spec §6 names for `ResultRow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: String,
    pub content: String,
    pub file_path: String,
    pub start_line: i32,
    pub end_line: i32,
    pub language: String,
    pub chunk_type: String,
    pub node_name: String,
    pub signature: String,
    pub parameters: String,
    pub return_type: String,
    pub docstring: String,
    pub decorators: String,
    pub imports: String,
    pub parent_scope: String,
    pub full_path: String,
    pub scope_depth: i32,
    pub size_bytes: i64,
    pub modified_at: String,
    pub calls: String,

    pub search_mode: SearchMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_encoder_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_boost: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_k: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl ResultRow {
    pub fn from_chunk(chunk: CodeChunk, search_mode: SearchMode) -> Self {
        ResultRow {
            id: chunk.id,
            content: chunk.content,
            file_path: chunk.file_path,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            language: chunk.language,
            chunk_type: chunk.chunk_type,
            node_name: chunk.node_name,
            signature: chunk.signature,
            parameters: chunk.parameters,
            return_type: chunk.return_type,
            docstring: chunk.docstring,
            decorators: chunk.decorators,
            imports: chunk.imports,
            parent_scope: chunk.parent_scope,
            full_path: chunk.full_path,
            scope_depth: chunk.scope_depth,
            size_bytes: chunk.size_bytes,
            modified_at: chunk.modified_at,
            calls: chunk.calls,
            search_mode,
            rrf_score: None,
            cross_encoder_score: None,
            symbol_boost: None,
            adaptive_k: None,
            distance: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Keyword,
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(SearchMode::Vector),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(other.to_string()),
        }
    }
}

/// The unit passed through the indexer's embed/file-task selector (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    Passage,
    Query,
}

/// Per-file failure record for `IndexingResult.failed_files` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFile {
    pub file: String,
    pub error_type: String,
    pub message: String,
}

/// Result of a full-project index run (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingResult {
    pub success: bool,
    pub total_files: usize,
    pub total_chunks: usize,
    pub error: Option<String>,
    pub embedding_model: String,
    pub database_location: String,
    pub project_path: String,
    pub indexed_files_count: usize,
    pub failed_files_count: usize,
    pub skipped_files_count: usize,
    pub processing_time_ms: u64,
    pub embedding_time_ms: u64,
    pub language_breakdown: std::collections::BTreeMap<String, usize>,
    pub failed_files: Vec<FailedFile>,
    pub skipped_files: Vec<String>,
    pub indexed_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_path_and_start_line() {
        assert_eq!(CodeChunk::make_id("a/b.py", 12), "a/b.py:12");
    }

    #[test]
    fn search_mode_round_trips_through_str() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert!("bogus".parse::<SearchMode>().is_err());
    }

    #[test]
    fn result_row_omits_absent_scores_in_json() {
        let chunk = CodeChunk {
            id: "a.py:1".into(),
            content: "def f(): pass".into(),
            file_path: "a.py".into(),
            start_line: 1,
            end_line: 1,
            language: "python".into(),
            chunk_type: "function_definition".into(),
            node_name: "f".into(),
            signature: String::new(),
            parameters: String::new(),
            return_type: String::new(),
            docstring: String::new(),
            decorators: String::new(),
            imports: String::new(),
            parent_scope: String::new(),
            full_path: "f".into(),
            scope_depth: 0,
            size_bytes: 10,
            modified_at: "2024-01-01T00:00:00Z".into(),
            calls: String::new(),
        };
        let row = ResultRow::from_chunk(chunk, SearchMode::Vector);
        let json = serde_json::to_string(&row).unwrap();
        assert!(!json.contains("rrf_score"));
    }
}
