//! Chunker (§4.D): turns a file's content and parsed nodes into `CodeChunk`
//! rows.
//!
//! Grounded on `original_source/app/indexer/chunker.py`'s two strategies —
//! semantic (one chunk per important node, oversized nodes split at
//! blank-line boundaries) and sliding-window (fixed-size overlapping windows
//! for files with no extracted nodes, e.g. plain text or an unsupported
//! grammar).

use crate::config::Config;
use crate::types::{CodeChunk, ParseResult, ParsedNode};

/// Produce the chunk set for one file. `modified_at` is an RFC3339 timestamp
/// the caller stamps from the file's mtime.
pub fn chunk_file(
    rel_path: &str,
    content: &str,
    parsed: Option<&ParseResult>,
    config: &Config,
    modified_at: &str,
) -> Vec<CodeChunk> {
    match parsed {
        Some(result) if !result.nodes.is_empty() => {
            semantic_chunks(rel_path, content, result, config, modified_at)
        }
        Some(result) => sliding_window_chunks(rel_path, content, &result.language, config, modified_at),
        None => sliding_window_chunks(rel_path, content, "text", config, modified_at),
    }
}

fn line_offsets(content: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            offsets.push(i + 1);
        }
    }
    offsets
}

/// Context padding (in lines) added on each side of a node's span before
/// slicing (§4.D step 1: "small context padding, Δ is an implementation
/// constant, e.g. 3").
const CONTEXT_PADDING_LINES: usize = 3;

fn lines_slice(content: &str, offsets: &[usize], start_line: usize, end_line: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let end = end_line.min(lines.len().saturating_sub(1));
    if lines.is_empty() || start_line > end {
        return String::new();
    }
    let _ = offsets;
    lines[start_line..=end].join("\n")
}

/// Pad `[start_line, end_line]` by `CONTEXT_PADDING_LINES` on each side,
/// clamped to the file's bounds (§4.D step 1: `[max(0, start-Δ) .. min(last,
/// end+Δ)]`).
fn padded_span(start_line: usize, end_line: usize, last_line: usize) -> (usize, usize) {
    let start = start_line.saturating_sub(CONTEXT_PADDING_LINES);
    let end = (end_line + CONTEXT_PADDING_LINES).min(last_line);
    (start, end)
}

/// Split `body` into pieces at logical boundaries (consecutive blank lines),
/// each piece at least `chunk_size` bytes where the remaining text allows it
/// (§4.D step 1). `line_base` offsets returned line numbers for a node body
/// sliced out of a larger file.
fn split_at_blank_lines(body: &str, line_base: usize, chunk_size: usize) -> Vec<(String, usize, usize)> {
    let lines: Vec<&str> = body.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut boundaries = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            boundaries.push(i);
        }
    }

    let mut out = Vec::new();
    let mut piece_start = 0usize;
    let mut piece_len = 0usize;

    for &blank in &boundaries {
        if blank <= piece_start {
            continue;
        }
        piece_len += lines[piece_start..blank].iter().map(|l| l.len() + 1).sum::<usize>();
        if piece_len < chunk_size {
            continue;
        }
        let piece_end = blank.saturating_sub(1).max(piece_start);
        let piece = lines[piece_start..=piece_end].join("\n");
        out.push((piece, line_base + piece_start, line_base + piece_end));
        piece_start = blank + 1;
        piece_len = 0;
    }

    if piece_start < lines.len() {
        let piece = lines[piece_start..].join("\n");
        out.push((piece, line_base + piece_start, line_base + lines.len() - 1));
    }

    if out.is_empty() {
        out.push((body.to_string(), line_base, line_base + lines.len() - 1));
    }

    out
}

/// One chunk per important node; a node whose body exceeds `chunk_size`
/// bytes is split into overlapping sub-slices that each carry the parent
/// node's signature/docstring/parameters metadata (§4.D: "semantic chunks
/// inherit the node's identity; oversized bodies are sliced, not summarized").
fn semantic_chunks(
    rel_path: &str,
    content: &str,
    parsed: &ParseResult,
    config: &Config,
    modified_at: &str,
) -> Vec<CodeChunk> {
    let offsets = line_offsets(content);
    let imports_json = serde_json::to_string(&parsed.imports).unwrap_or_else(|_| "[]".to_string());
    let mut chunks = Vec::new();

    let last_line = content.lines().count().saturating_sub(1);

    for node in &parsed.nodes {
        let (start_line, end_line) = padded_span(node.start_line, node.end_line, last_line);
        let body = lines_slice(content, &offsets, start_line, end_line);
        if body.is_empty() {
            continue;
        }

        if body.len() <= 2 * config.chunk_size {
            chunks.push(build_chunk(
                rel_path,
                &body,
                start_line as i32 + 1,
                end_line as i32 + 1,
                &parsed.language,
                node,
                &imports_json,
                modified_at,
            ));
            continue;
        }

        for (sub_body, sub_start, sub_end) in split_at_blank_lines(&body, start_line, config.chunk_size) {
            chunks.push(build_chunk(
                rel_path,
                &sub_body,
                sub_start as i32 + 1,
                sub_end as i32 + 1,
                &parsed.language,
                node,
                &imports_json,
                modified_at,
            ));
        }
    }

    chunks
}

fn build_chunk(
    rel_path: &str,
    body: &str,
    start_line: i32,
    end_line: i32,
    language: &str,
    node: &ParsedNode,
    imports_json: &str,
    modified_at: &str,
) -> CodeChunk {
    CodeChunk {
        id: CodeChunk::make_id(rel_path, start_line),
        content: body.to_string(),
        file_path: rel_path.to_string(),
        start_line,
        end_line,
        language: language.to_string(),
        chunk_type: node.node_type.clone(),
        node_name: node.name.clone(),
        signature: node.signature.clone(),
        parameters: node.parameters.clone(),
        return_type: node.return_type.clone(),
        docstring: node.docstring.clone(),
        decorators: node.decorators.clone(),
        imports: imports_json.to_string(),
        parent_scope: node.parent_scope.clone(),
        full_path: node.full_path.clone(),
        scope_depth: node.scope_depth as i32,
        size_bytes: body.len() as i64,
        modified_at: modified_at.to_string(),
        calls: node.calls.clone(),
    }
}

/// Fixed-size overlapping windows over the whole file, for files with no
/// extracted nodes. Each chunk is a generic `"code"` chunk with no symbol
/// metadata (§4.D step 2).
fn sliding_window_chunks(
    rel_path: &str,
    content: &str,
    language: &str,
    config: &Config,
    modified_at: &str,
) -> Vec<CodeChunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    slide_lines(content, 0, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .map(|(body, start, end)| CodeChunk {
            id: CodeChunk::make_id(rel_path, start as i32 + 1),
            content: body.clone(),
            file_path: rel_path.to_string(),
            start_line: start as i32 + 1,
            end_line: end as i32 + 1,
            language: language.to_string(),
            chunk_type: "code".to_string(),
            node_name: String::new(),
            signature: String::new(),
            parameters: String::new(),
            return_type: String::new(),
            docstring: String::new(),
            decorators: String::new(),
            imports: "[]".to_string(),
            parent_scope: String::new(),
            full_path: String::new(),
            scope_depth: 0,
            size_bytes: body.len() as i64,
            modified_at: modified_at.to_string(),
            calls: "[]".to_string(),
        })
        .collect()
}

/// Slide a byte-size window over `text`'s lines, returning
/// `(slice, abs_start_line, abs_end_line)` triples. `line_base` offsets the
/// returned line numbers (0-based) for callers slicing a node body out of a
/// larger file. Advances by at least one line per step so an overlap
/// greater than or equal to the window width can't loop forever.
fn slide_lines(text: &str, line_base: usize, window: usize, overlap: usize) -> Vec<(String, usize, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut end = start;
        let mut size = lines[start].len();
        while end + 1 < lines.len() && size + lines[end + 1].len() + 1 <= window {
            end += 1;
            size += lines[end].len() + 1;
        }
        let body = lines[start..=end].join("\n");
        out.push((body, line_base + start, line_base + end));

        if end + 1 >= lines.len() {
            break;
        }

        let overlap_lines = estimate_overlap_lines(&lines, start, end, overlap);
        let next_start = end + 1 - overlap_lines;
        start = next_start.max(start + 1);
    }

    out
}

fn estimate_overlap_lines(lines: &[&str], start: usize, end: usize, overlap_bytes: usize) -> usize {
    let mut consumed = 0usize;
    let mut count = 0usize;
    for i in (start..=end).rev() {
        consumed += lines[i].len() + 1;
        count += 1;
        if consumed >= overlap_bytes {
            break;
        }
    }
    count.min(end - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn semantic_chunk_carries_node_metadata() {
        let src = "def foo(x):\n    \"\"\"Doc.\"\"\"\n    return x\n";
        let parsed = parser::parse_file("a.py", src).unwrap();
        let config = Config::default();
        let chunks = chunk_file("a.py", src, Some(&parsed), &config, "2024-01-01T00:00:00Z");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].node_name, "foo");
        assert_eq!(chunks[0].docstring, "Doc.");
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn sliding_window_used_when_no_nodes_parsed() {
        let content = "line one\nline two\nline three\n";
        let config = Config::default();
        let chunks = chunk_file("readme.txt", content, None, &config, "2024-01-01T00:00:00Z");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "code");
    }

    #[test]
    fn oversized_node_is_split_at_blank_line_boundaries() {
        let mut body = String::from("def big():\n");
        for block in 0..20 {
            for i in 0..10 {
                body.push_str(&format!("    x{block}_{i} = {i}\n"));
            }
            body.push('\n');
        }
        let parsed = parser::parse_file("big.py", &body).unwrap();
        let mut config = Config::default();
        config.chunk_size = 200;
        config.chunk_overlap = 40;
        let chunks = chunk_file("big.py", &body, Some(&parsed), &config, "t");
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert_eq!(c.node_name, "big");
            assert!(c.content.len() >= config.chunk_size || c.content.contains("x19_9"));
        }
    }

    #[test]
    fn empty_file_produces_no_chunks() {
        let config = Config::default();
        let chunks = chunk_file("empty.txt", "   \n\n", None, &config, "t");
        assert!(chunks.is_empty());
    }
}
