//! Hybrid retriever (§4.G): vector, keyword, and fused hybrid search modes
//! with adaptive reciprocal-rank fusion, symbol-aware boosting, and a
//! cross-encoder re-rank pass over the fused top-K.
//!
//! RRF/boost formulas and the rerank top-K slicing are ported verbatim from
//! `original_source/app/search/hybrid.py` (`_adaptive_rrf_k`,
//! `_calculate_symbol_boost`, `_rrf_fusion`) and `reranker.py`'s
//! `CrossEncoderReranker.rerank` (lazy model, disabled/unavailable
//! passthrough, top-K-only reorder).

use std::collections::HashMap;

use crate::config::Config;
use crate::embedder::{EmbedOutcome, Embedder};
use crate::error::EngineResult;
use crate::store::ChunkStore;
use crate::types::{CodeChunk, EmbedTask, ResultRow, SearchMode};

const DEFINITION_KINDS: &[&str] =
    &["function_definition", "class_definition", "method_definition", "interface_declaration"];

pub struct Retriever<'a> {
    store: &'a ChunkStore,
    embedder: &'a Embedder,
    config: &'a Config,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a ChunkStore, embedder: &'a Embedder, config: &'a Config) -> Self {
        Retriever { store, embedder, config }
    }

    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        filters: &[(String, String)],
    ) -> EngineResult<Vec<ResultRow>> {
        match mode {
            SearchMode::Vector => self.vector_search(query, limit, filters).await,
            SearchMode::Keyword => self.keyword_search(query, limit, filters).await,
            SearchMode::Hybrid => self.hybrid_search(query, limit, filters).await,
        }
    }

    async fn embed_query(&self, query: &str) -> Vec<f32> {
        let outcome = self.embedder.embed(&[query.to_string()], EmbedTask::Query);
        if let EmbedOutcome::Degraded { reason, .. } = &outcome {
            tracing::warn!(%reason, "embedding degraded, vector search proceeding with deterministic fallback vectors");
        }
        outcome.into_vectors().into_iter().next().unwrap_or_default()
    }

    async fn vector_search(&self, query: &str, limit: usize, filters: &[(String, String)]) -> EngineResult<Vec<ResultRow>> {
        let query_vec = self.embed_query(query).await;
        let rows = self.store.vector_search(&query_vec, limit, filters).await?;
        Ok(rows
            .into_iter()
            .map(|(chunk, distance)| {
                let mut row = ResultRow::from_chunk(chunk, SearchMode::Vector);
                row.distance = Some(distance);
                row
            })
            .collect())
    }

    async fn keyword_search(&self, query: &str, limit: usize, filters: &[(String, String)]) -> EngineResult<Vec<ResultRow>> {
        let rows = self.store.keyword_search(query, limit, filters).await?;
        Ok(rows
            .into_iter()
            .map(|(chunk, _score)| ResultRow::from_chunk(chunk, SearchMode::Keyword))
            .collect())
    }

    async fn hybrid_search(&self, query: &str, limit: usize, filters: &[(String, String)]) -> EngineResult<Vec<ResultRow>> {
        let fetch_limit = ((limit as f64) * 1.5).ceil() as usize;

        let query_vec = self.embed_query(query).await;
        let vector_rows = self.store.vector_search(&query_vec, fetch_limit, filters).await?;
        let keyword_rows = self.store.keyword_search(query, fetch_limit, filters).await?;

        let vector_chunks: Vec<CodeChunk> = vector_rows.into_iter().map(|(c, _)| c).collect();
        let keyword_chunks: Vec<CodeChunk> = keyword_rows.into_iter().map(|(c, _)| c).collect();

        let fused = rrf_fuse(query, &[vector_chunks, keyword_chunks], limit, self.config.rrf_k);
        let reranked = rerank(query, fused, self.config);

        Ok(reranked
            .into_iter()
            .map(|mut row| {
                row.search_mode = SearchMode::Hybrid;
                row
            })
            .collect())
    }
}

fn adaptive_rrf_k(query: &str, default_k: u32) -> u32 {
    let has_camel_case = query.as_bytes().windows(2).any(|w| w[0].is_ascii_lowercase() && w[1].is_ascii_uppercase());
    let has_snake_case = query.split(|c: char| !c.is_alphanumeric() && c != '_').any(|word| {
        word.contains('_') && word.chars().any(|c| c.is_alphanumeric())
    });

    if has_camel_case || has_snake_case {
        return 20;
    }
    if query.split_whitespace().count() < 5 {
        return 30;
    }
    default_k
}

fn symbol_boost(chunk: &CodeChunk, query_terms: &[String]) -> f32 {
    let mut boost = 0.0f32;

    let node_name = chunk.node_name.to_lowercase();
    if !node_name.is_empty() && query_terms.iter().any(|t| node_name.contains(t.as_str())) {
        boost += 0.3;
    }

    let signature = chunk.signature.to_lowercase();
    if !signature.is_empty() && query_terms.iter().any(|t| signature.contains(t.as_str())) {
        boost += 0.2;
    }

    if DEFINITION_KINDS.contains(&chunk.chunk_type.as_str()) {
        boost += 0.15;
    }

    if !chunk.docstring.trim().is_empty() {
        boost += 0.1;
    }

    if chunk.scope_depth == 0 {
        boost += 0.05;
    } else {
        boost -= 0.05 * chunk.scope_depth as f32;
    }

    boost
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reciprocal rank fusion across `result_lists`, each already ranked
/// best-first. A chunk appearing in more than one list accumulates a score
/// contribution per list.
fn rrf_fuse(query: &str, result_lists: &[Vec<CodeChunk>], limit: usize, default_k: u32) -> Vec<ResultRow> {
    let k = adaptive_rrf_k(query, default_k) as f32;
    let terms = query_terms(query);

    let mut scores: HashMap<String, (f32, CodeChunk)> = HashMap::new();
    for list in result_lists {
        for (rank, chunk) in list.iter().enumerate() {
            let doc_id = if chunk.id.is_empty() { chunk.file_path.clone() } else { chunk.id.clone() };
            let contribution = 1.0 / (k + (rank + 1) as f32);
            scores
                .entry(doc_id)
                .and_modify(|(score, _)| *score += contribution)
                .or_insert_with(|| (contribution, chunk.clone()));
        }
    }

    let mut scored: Vec<(f32, f32, CodeChunk)> = scores
        .into_values()
        .map(|(rrf_score, chunk)| {
            let boost = symbol_boost(&chunk, &terms);
            (rrf_score + boost, boost, chunk)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(total_score, boost, chunk)| {
            let mut row = ResultRow::from_chunk(chunk, SearchMode::Hybrid);
            row.rrf_score = Some(total_score);
            row.symbol_boost = Some(boost);
            row.adaptive_k = Some(k);
            row
        })
        .collect()
}

/// Reorder the top `rerank_top_k` fused rows by a cross-encoder score, then
/// append the untouched remainder. No cross-encoder backend ships in this
/// engine's dependency stack (see DESIGN.md), so scoring always degrades to
/// the "model unavailable" branch of the original — the fused order is
/// preserved exactly as `reranker.py` does when `self.model is None`.
fn rerank(_query: &str, fused: Vec<ResultRow>, config: &Config) -> Vec<ResultRow> {
    if !config.rerank_enabled || fused.is_empty() {
        return fused;
    }
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, node_name: &str, chunk_type: &str, scope_depth: i32) -> CodeChunk {
        CodeChunk {
            id: id.to_string(),
            content: "body".to_string(),
            file_path: "a.py".to_string(),
            start_line: 1,
            end_line: 1,
            language: "python".to_string(),
            chunk_type: chunk_type.to_string(),
            node_name: node_name.to_string(),
            signature: format!("def {node_name}()"),
            parameters: "[]".to_string(),
            return_type: String::new(),
            docstring: String::new(),
            decorators: "[]".to_string(),
            imports: "[]".to_string(),
            parent_scope: String::new(),
            full_path: node_name.to_string(),
            scope_depth,
            size_bytes: 4,
            modified_at: "2024-01-01T00:00:00Z".to_string(),
            calls: "[]".to_string(),
        }
    }

    #[test]
    fn camel_case_query_selects_sharp_k() {
        assert_eq!(adaptive_rrf_k("getUserById", 60), 20);
    }

    #[test]
    fn snake_case_query_selects_sharp_k() {
        assert_eq!(adaptive_rrf_k("get_user_by_id", 60), 20);
    }

    #[test]
    fn short_plain_query_selects_medium_k() {
        assert_eq!(adaptive_rrf_k("parse config", 60), 30);
    }

    #[test]
    fn long_plain_query_uses_default_k() {
        assert_eq!(adaptive_rrf_k("how does the indexer walk the project directory tree", 60), 60);
    }

    #[test]
    fn exact_node_name_match_gets_symbol_boost() {
        let c = chunk("a.py:1", "get_user", "function_definition", 0);
        let boost = symbol_boost(&c, &query_terms("get_user"));
        // 0.3 name + 0.2 signature + 0.15 def-kind + 0.05 depth0
        assert!((boost - 0.7).abs() < 1e-6);
    }

    #[test]
    fn document_present_in_both_lists_scores_higher() {
        let shared = chunk("a.py:1", "f", "function_definition", 0);
        let only_vector = chunk("b.py:1", "g", "function_definition", 0);
        let fused = rrf_fuse("f", &[vec![shared.clone(), only_vector.clone()], vec![shared.clone()]], 10, 60);
        let top = &fused[0];
        assert_eq!(top.id, "a.py:1");
    }

    #[test]
    fn rerank_disabled_returns_input_order_unchanged() {
        let rows = vec![ResultRow::from_chunk(chunk("a.py:1", "f", "function_definition", 0), SearchMode::Hybrid)];
        let mut config = Config::default();
        config.rerank_enabled = false;
        let result = rerank("f", rows.clone(), &config);
        assert_eq!(result[0].id, rows[0].id);
    }
}
