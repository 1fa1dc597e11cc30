//! Parser adapter (§4.C).
//!
//! Grounded on `server/src/ast.rs`'s tree-sitter walk (language resolution,
//! node classification, parent-chain tracking) extended with the richer
//! per-node metadata `original_source/app/indexer/parser.py` extracts
//! (parameters, return type, docstring, calls, imports) that the teacher's
//! AST module doesn't attempt.

use std::collections::HashSet;
use tree_sitter::{Language as TsLanguage, Node, Parser};

use crate::types::{ParseResult, ParsedNode};

/// Per-language set of tree-sitter node kinds considered "important" (spec
/// §Glossary). Mirrors `IMPORTANT_NODE_TYPES` in the original parser.
fn important_node_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &["function_definition", "class_definition"],
        "javascript" => &[
            "function_declaration",
            "class_declaration",
            "method_definition",
            "arrow_function",
        ],
        "typescript" | "tsx" => &[
            "function_declaration",
            "class_declaration",
            "method_definition",
            "arrow_function",
            "interface_declaration",
        ],
        "java" => &["class_declaration", "method_declaration", "interface_declaration"],
        "cpp" | "c" => &["function_definition", "class_specifier", "struct_specifier"],
        "go" => &["function_declaration", "method_declaration", "type_declaration"],
        "rust" => &["function_item", "impl_item", "trait_item", "struct_item", "enum_item"],
        _ => &[],
    }
}

/// Detect a normalized language tag from a filename's extension. Stands in
/// for "detect from filename via an external lexer library" (spec §4.C) —
/// the extension table is the glob-pattern intersection the adapter ships.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "py" | "pyi" => Some("python"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "ts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "java" => Some("java"),
        "c" | "h" => Some("c"),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some("cpp"),
        "go" => Some("go"),
        "rs" => Some("rust"),
        _ => None,
    }
}

/// The glob extensions the adapter can produce nodes for — the intersection
/// of what a language-detection library would report and what this adapter
/// ships a tree-sitter grammar for (spec §4.C: `all_supported_extensions()`).
pub fn all_supported_extensions() -> HashSet<&'static str> {
    [
        "py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "tsx", "java", "c", "h", "cpp", "cc", "cxx",
        "hpp", "hh", "hxx", "go", "rs",
    ]
    .into_iter()
    .collect()
}

fn ts_language_for(language: &str) -> Option<TsLanguage> {
    match language {
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "c" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        _ => None,
    }
}

/// Parse `(path, content)` and produce a full §4.C result, or `None` if the
/// language is undetected/unsupported (a skip, not a failure).
pub fn parse_file(rel_path: &str, content: &str) -> Option<ParseResult> {
    let language = language_for_path(rel_path)?;
    let ts_lang = ts_language_for(language)?;

    let mut parser = Parser::new();
    parser.set_language(&ts_lang).ok()?;
    let tree = parser.parse(content, None)?;

    let mut nodes = Vec::new();
    let source = content.as_bytes();
    let important = important_node_kinds(language);

    let mut cursor = tree.root_node().walk();
    for child in tree.root_node().children(&mut cursor) {
        walk_node(&child, source, language, important, "", 0, &mut nodes);
    }

    let imports = extract_imports(content, language);

    Some(ParseResult { language: language.to_string(), nodes, imports })
}

fn walk_node(
    node: &Node,
    source: &[u8],
    language: &str,
    important: &[&str],
    parent_scope: &str,
    scope_depth: usize,
    out: &mut Vec<ParsedNode>,
) {
    let kind = node.kind();

    if important.contains(&kind) {
        let name = extract_name(node, source, language).unwrap_or_default();
        let full_path = if parent_scope.is_empty() || name.is_empty() {
            name.clone()
        } else {
            format!("{parent_scope}.{name}")
        };

        let parsed = ParsedNode {
            node_type: kind.to_string(),
            name: name.clone(),
            start_line: node.start_position().row,
            end_line: node.end_position().row,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            signature: extract_signature(node, source, language),
            parameters: extract_parameters(node, source, language),
            return_type: extract_return_type(node, source, language),
            docstring: extract_docstring(node, source, language),
            decorators: extract_decorators(node, source, language),
            parent_scope: parent_scope.to_string(),
            full_path,
            scope_depth,
            calls: extract_calls(node, source, language, &name),
        };

        // Ancestor-name propagation uses only important-kind names (§4.C
        // traversal rule): descend with the *new* scope, keyed on this name.
        let next_scope = if parent_scope.is_empty() {
            name
        } else if name.is_empty() {
            parent_scope.to_string()
        } else {
            format!("{parent_scope}.{name}")
        };

        out.push(parsed);

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, language, important, &next_scope, scope_depth + 1, out);
        }
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, language, important, parent_scope, scope_depth, out);
        }
    }
}

fn extract_name(node: &Node, source: &[u8], language: &str) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        if let Ok(text) = name_node.utf8_text(source) {
            let t = text.trim();
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
    }

    if node.kind() == "impl_item" && language == "rust" {
        if let Some(type_node) = node.child_by_field_name("type") {
            if let Ok(text) = type_node.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if node.kind() == "type_spec" && language == "go" {
        if let Some(child) = node.named_child(0) {
            if let Ok(text) = child.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if node.kind() == "function_definition" && matches!(language, "c" | "cpp") {
        if let Some(decl) = node.child_by_field_name("declarator") {
            if let Some(inner) = decl.child_by_field_name("declarator") {
                if let Ok(text) = inner.utf8_text(source) {
                    return Some(text.trim().to_string());
                }
            }
            if let Ok(text) = decl.utf8_text(source) {
                let s = text.trim();
                if let Some(paren) = s.find('(') {
                    return Some(s[..paren].trim().to_string());
                }
                return Some(s.to_string());
            }
        }
    }

    None
}

fn extract_signature(node: &Node, source: &[u8], language: &str) -> String {
    let text = node.utf8_text(source).unwrap_or("");
    let first_line = text.lines().next().unwrap_or("").trim();

    let sig = if language == "python" {
        match first_line.find(':') {
            Some(colon) => &first_line[..=colon],
            None => first_line,
        }
    } else if let Some(brace) = first_line.find('{') {
        first_line[..brace].trim()
    } else {
        first_line
    };

    if sig.len() > 200 {
        format!("{}...", &sig[..sig.floor_char_boundary(200)])
    } else {
        sig.to_string()
    }
}

/// Best-effort: walk a `parameters`/`parameter_list` child, collect
/// identifier-like children as `{name, type}` pairs. Falls back to an empty
/// JSON array when the shape is unexpected — parsing must never fail here
/// (spec §4.C: "if the AST shape is unexpected, the field is left empty").
fn extract_parameters(node: &Node, source: &[u8], _language: &str) -> String {
    let Some(params_node) = node
        .child_by_field_name("parameters")
        .or_else(|| node.child_by_field_name("parameter_list"))
    else {
        return "[]".to_string();
    };

    let mut entries = Vec::new();
    let mut cursor = params_node.walk();
    for child in params_node.named_children(&mut cursor) {
        let kind = child.kind();
        if !matches!(
            kind,
            "identifier"
                | "typed_parameter"
                | "default_parameter"
                | "required_parameter"
                | "optional_parameter"
                | "parameter_declaration"
                | "parameter"
        ) {
            continue;
        }
        let name = child
            .child_by_field_name("name")
            .or_else(|| child.child_by_field_name("pattern"))
            .and_then(|n| n.utf8_text(source).ok())
            .unwrap_or_else(|| child.utf8_text(source).unwrap_or(""))
            .trim()
            .to_string();
        let ty = child
            .child_by_field_name("type")
            .and_then(|n| n.utf8_text(source).ok())
            .unwrap_or("")
            .trim()
            .to_string();
        if name.is_empty() {
            continue;
        }
        entries.push(serde_json::json!({ "name": name, "type": ty }));
    }

    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
}

fn extract_return_type(node: &Node, source: &[u8], _language: &str) -> String {
    node.child_by_field_name("return_type")
        .or_else(|| node.child_by_field_name("type"))
        .and_then(|n| n.utf8_text(source).ok())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Docstring extraction: for Python, the first statement in the body being a
/// string-expression statement; for comment-documented languages, the
/// immediately preceding doc-comment block.
fn extract_docstring(node: &Node, source: &[u8], language: &str) -> String {
    if language == "python" {
        if let Some(body) = node.child_by_field_name("body") {
            if let Some(first) = body.named_child(0) {
                if first.kind() == "expression_statement" {
                    if let Some(string_node) = first.named_child(0) {
                        if string_node.kind() == "string" {
                            if let Ok(text) = string_node.utf8_text(source) {
                                return strip_python_string(text);
                            }
                        }
                    }
                }
            }
        }
        return String::new();
    }

    if let Some(prev) = node.prev_sibling() {
        if prev.kind() == "comment" {
            if let Ok(text) = prev.utf8_text(source) {
                let trimmed = text.trim();
                if trimmed.starts_with("/**") || trimmed.starts_with("///") {
                    return trimmed.to_string();
                }
            }
        }
    }
    String::new()
}

fn strip_python_string(s: &str) -> String {
    let s = s.trim();
    for quote in ["\"\"\"", "'''"] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner.trim().to_string();
        }
    }
    for quote in ["\"", "'"] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner.trim().to_string();
        }
    }
    s.to_string()
}

/// Python `decorated_definition` wraps a preceding sibling chain of
/// `decorator` nodes; other languages (annotations) are left empty.
fn extract_decorators(node: &Node, source: &[u8], language: &str) -> String {
    if language != "python" {
        return "[]".to_string();
    }
    let Some(parent) = node.parent() else {
        return "[]".to_string();
    };
    if parent.kind() != "decorated_definition" {
        return "[]".to_string();
    }
    let mut decorators = Vec::new();
    let mut cursor = parent.walk();
    for child in parent.named_children(&mut cursor) {
        if child.kind() == "decorator" {
            if let Ok(text) = child.utf8_text(source) {
                decorators.push(text.trim().to_string());
            }
        }
    }
    serde_json::to_string(&decorators).unwrap_or_else(|_| "[]".to_string())
}

/// Best-effort call-expression walk, scoped to `node`'s own subtree (spec
/// §4.C: `calls` is a JSON list of `{caller, callee, line}`). Implemented for
/// Python (`call` nodes) and Rust (`call_expression` nodes); other languages
/// fall back to an empty list rather than guessing at an unfamiliar AST shape.
fn extract_calls(node: &Node, source: &[u8], language: &str, caller: &str) -> String {
    let call_kind = match language {
        "python" => "call",
        "rust" => "call_expression",
        _ => return "[]".to_string(),
    };

    let mut calls = Vec::new();
    collect_calls(node, source, call_kind, caller, &mut calls);
    serde_json::to_string(&calls).unwrap_or_else(|_| "[]".to_string())
}

fn collect_calls(node: &Node, source: &[u8], call_kind: &str, caller: &str, out: &mut Vec<serde_json::Value>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == call_kind {
            if let Some(callee) = call_callee_name(&child, source) {
                out.push(serde_json::json!({
                    "caller": caller,
                    "callee": callee,
                    "line": child.start_position().row + 1,
                }));
            }
        }
        collect_calls(&child, source, call_kind, caller, out);
    }
}

/// Extract the plain name of the thing being called, stripping attribute
/// access (`obj.method()` → `method`) and module paths (`mod::func()` →
/// `func`) down to the final segment.
fn call_callee_name(call_node: &Node, source: &[u8]) -> Option<String> {
    let function_node = call_node
        .child_by_field_name("function")
        .or_else(|| call_node.named_child(0))?;
    let text = function_node.utf8_text(source).ok()?.trim();
    let last_segment = text.rsplit(['.', ':']).next().unwrap_or(text).trim();
    if last_segment.is_empty() {
        None
    } else {
        Some(last_segment.to_string())
    }
}

/// Ordered, de-duplicated file-level import statements, per-language regex
/// scan — intentionally simple compared to the teacher's cross-repo import
/// graph in `scan.rs::scan_imports`, since spec §4.C only asks for the flat
/// list propagated onto every chunk of the file, not graph edges.
fn extract_imports(content: &str, language: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut imports = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        let matched = match language {
            "python" => trimmed.starts_with("import ") || trimmed.starts_with("from "),
            "javascript" | "typescript" | "tsx" => {
                trimmed.starts_with("import ") || trimmed.contains("require(")
            }
            "rust" => trimmed.starts_with("use "),
            "go" => trimmed.starts_with("import "),
            "java" => trimmed.starts_with("import "),
            "c" | "cpp" => trimmed.starts_with("#include"),
            _ => false,
        };
        if matched && seen.insert(trimmed.to_string()) {
            imports.push(trimmed.to_string());
        }
    }
    imports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_language_from_extension() {
        assert_eq!(language_for_path("a/b.py"), Some("python"));
        assert_eq!(language_for_path("a/b.rs"), Some("rust"));
        assert_eq!(language_for_path("a/b.unknown"), None);
    }

    #[test]
    fn unsupported_language_is_a_skip_not_a_failure() {
        assert!(parse_file("x.bin", "whatever").is_none());
    }

    #[test]
    fn parses_python_function_with_docstring() {
        let src = "def foo():\n    \"\"\"Returns one.\"\"\"\n    return 1\n";
        let result = parse_file("a.py", src).expect("should parse");
        assert_eq!(result.language, "python");
        let foo = result.nodes.iter().find(|n| n.name == "foo").expect("foo node");
        assert_eq!(foo.docstring, "Returns one.");
        assert_eq!(foo.full_path, "foo");
        assert_eq!(foo.scope_depth, 0);
    }

    #[test]
    fn nested_method_gets_dotted_full_path_and_depth() {
        let src = "class Config:\n    def validate(self):\n        return True\n";
        let result = parse_file("a.py", src).expect("should parse");
        let method = result
            .nodes
            .iter()
            .find(|n| n.name == "validate")
            .expect("validate node");
        assert_eq!(method.parent_scope, "Config");
        assert_eq!(method.full_path, "Config.validate");
        assert_eq!(method.scope_depth, 1);
    }

    #[test]
    fn rust_function_signature_has_no_body() {
        let src = "pub fn greet(name: &str) -> String {\n    name.to_string()\n}\n";
        let result = parse_file("a.rs", src).expect("should parse");
        let greet = result.nodes.iter().find(|n| n.name == "greet").unwrap();
        assert!(!greet.signature.contains('{'));
        assert!(greet.signature.contains("greet"));
    }

    #[test]
    fn python_function_records_its_calls() {
        let src = "def foo():\n    bar()\n    obj.baz()\n";
        let result = parse_file("a.py", src).expect("should parse");
        let foo = result.nodes.iter().find(|n| n.name == "foo").unwrap();
        let calls: Vec<serde_json::Value> = serde_json::from_str(&foo.calls).unwrap();
        let callees: Vec<&str> = calls.iter().map(|c| c["callee"].as_str().unwrap()).collect();
        assert!(callees.contains(&"bar"));
        assert!(callees.contains(&"baz"));
        assert_eq!(calls[0]["caller"], "foo");
    }

    #[test]
    fn unsupported_language_yields_empty_calls() {
        let src = "public class A { void m() { other(); } }\n";
        let result = parse_file("a.java", src).expect("should parse");
        let m = result.nodes.iter().find(|n| n.name == "m").unwrap();
        assert_eq!(m.calls, "[]");
    }

    #[test]
    fn imports_are_ordered_and_deduplicated() {
        let src = "use std::fmt;\nuse std::fmt;\nuse std::collections::HashMap;\nfn f() {}\n";
        let result = parse_file("a.rs", src).expect("should parse");
        assert_eq!(result.imports, vec!["use std::fmt;", "use std::collections::HashMap;"]);
    }
}
