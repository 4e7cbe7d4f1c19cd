use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

/// A syntactically meaningful fragment (function, method, class, type
/// declaration) extracted from one source file.
///
/// The id `"<file_path>:<name>:<line>:<column>"` is deterministic, so
/// re-extracting an unchanged file yields the same ids and upserts are
/// idempotent. Lines are 1-based, columns 0-based, paths forward-slashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: String,
    pub file_path: String,
    pub line_number: usize,
    pub end_line_number: usize,
    pub code: String,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LangKind {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    #[cfg(feature = "lang-go")]
    Go,
    #[cfg(feature = "lang-java")]
    Java,
    #[cfg(feature = "lang-c")]
    C,
    #[cfg(feature = "lang-cpp")]
    Cpp,
}

fn lang_for_ext(ext: &str) -> Option<LangKind> {
    match ext {
        "py" => Some(LangKind::Python),
        "js" | "jsx" | "mjs" => Some(LangKind::JavaScript),
        "ts" => Some(LangKind::TypeScript),
        "tsx" => Some(LangKind::Tsx),
        #[cfg(feature = "lang-go")]
        "go" => Some(LangKind::Go),
        #[cfg(feature = "lang-java")]
        "java" => Some(LangKind::Java),
        #[cfg(feature = "lang-c")]
        "c" => Some(LangKind::C),
        #[cfg(feature = "lang-cpp")]
        "cpp" | "cc" | "cxx" => Some(LangKind::Cpp),
        _ => None,
    }
}

impl LangKind {
    fn grammar(self) -> tree_sitter::Language {
        match self {
            LangKind::Python => tree_sitter_python::LANGUAGE.into(),
            LangKind::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            LangKind::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            LangKind::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            #[cfg(feature = "lang-go")]
            LangKind::Go => tree_sitter_go::LANGUAGE.into(),
            #[cfg(feature = "lang-java")]
            LangKind::Java => tree_sitter_java::LANGUAGE.into(),
            #[cfg(feature = "lang-c")]
            LangKind::C => tree_sitter_c::LANGUAGE.into(),
            #[cfg(feature = "lang-cpp")]
            LangKind::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }

    /// Node kinds that become blocks for this language.
    fn block_kinds(self) -> &'static [&'static str] {
        match self {
            LangKind::Python => &["function_definition", "class_definition"],
            LangKind::JavaScript | LangKind::TypeScript | LangKind::Tsx => {
                &["function_declaration", "class_declaration", "method_definition"]
            }
            #[cfg(feature = "lang-go")]
            LangKind::Go => &["function_declaration", "method_declaration", "type_declaration"],
            #[cfg(feature = "lang-java")]
            LangKind::Java => &["class_declaration", "method_declaration"],
            #[cfg(feature = "lang-c")]
            LangKind::C => &["function_definition"],
            #[cfg(feature = "lang-cpp")]
            LangKind::Cpp => &["function_definition", "class_specifier"],
        }
    }
}

/// Parse one source file and return its blocks. Read and parse failures are
/// logged and yield an empty list; a bad file never aborts a pass.
pub fn extract_blocks(rel_path: &str, abs_path: &Path) -> Vec<CodeBlock> {
    let ext = abs_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let Some(lang) = lang_for_ext(&ext) else {
        debug!(path = rel_path, "no grammar for extension; skipping");
        return Vec::new();
    };

    let content = match std::fs::read_to_string(abs_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = rel_path, error = %e, "failed to read source file");
            return Vec::new();
        }
    };

    match parse_blocks(rel_path, &content, lang) {
        Ok(blocks) => blocks,
        Err(e) => {
            warn!(path = rel_path, error = %e, "failed to parse source file");
            Vec::new()
        }
    }
}

fn parse_blocks(rel_path: &str, content: &str, lang: LangKind) -> Result<Vec<CodeBlock>> {
    let mut parser = Parser::new();
    parser
        .set_language(&lang.grammar())
        .context("Failed to set tree-sitter language")?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| anyhow!("parser produced no tree"))?;

    let mut blocks = Vec::new();
    walk(tree.root_node(), content, rel_path, lang, &mut blocks);
    Ok(blocks)
}

/// Depth-first walk. Recursion continues inside matched nodes so nested
/// declarations (a method inside a class) become independent blocks.
fn walk(node: Node, src: &str, rel_path: &str, lang: LangKind, out: &mut Vec<CodeBlock>) {
    if lang.block_kinds().contains(&node.kind()) {
        out.push(block_from_node(node, src, rel_path, lang));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, src, rel_path, lang, out);
    }
}

fn block_from_node(node: Node, src: &str, rel_path: &str, lang: LangKind) -> CodeBlock {
    let start = node.start_position();
    let line_number = start.row + 1;
    let end_line_number = node.end_position().row + 1;
    let code = src[node.byte_range()].to_string();

    let (block_type, name, signature) = if lang == LangKind::Python {
        python_shape(node, src)
    } else {
        // `name` is the first direct identifier child; nodes without one
        // (e.g. a TS class, whose name is a type_identifier) fall back to
        // the node kind itself.
        let name = first_identifier(node, src).unwrap_or_else(|| node.kind().to_string());
        (node.kind().to_string(), name.clone(), name)
    };

    CodeBlock {
        id: format!("{}:{}:{}:{}", rel_path, name, line_number, start.column),
        block_type,
        name,
        file_path: rel_path.to_string(),
        line_number,
        end_line_number,
        code,
        signature,
    }
}

/// Python gets friendlier shapes: `function` / `async_function` / `class`
/// types and a `name(arg1, arg2)` signature for callables.
fn python_shape(node: Node, src: &str) -> (String, String, String) {
    let name = node
        .child_by_field_name("name")
        .and_then(|n| node_text(n, src))
        .unwrap_or("<anon>")
        .to_string();

    if node.kind() == "class_definition" {
        return ("class".to_string(), name.clone(), name);
    }

    let is_async = node
        .child(0)
        .map(|c| c.kind() == "async")
        .unwrap_or(false);
    let block_type = if is_async { "async_function" } else { "function" };

    let params = node
        .child_by_field_name("parameters")
        .map(|p| python_param_names(p, src))
        .unwrap_or_default();
    let signature = format!("{}({})", name, params.join(", "));

    (block_type.to_string(), name, signature)
}

fn python_param_names(params: Node, src: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        // Bare names are identifiers; typed/defaulted/splatted parameters
        // wrap the identifier one level down.
        let name = if child.kind() == "identifier" {
            node_text(child, src).map(str::to_string)
        } else {
            child
                .child_by_field_name("name")
                .and_then(|n| node_text(n, src))
                .map(str::to_string)
                .or_else(|| first_identifier(child, src))
        };
        if let Some(n) = name {
            names.push(n);
        }
    }
    names
}

fn first_identifier(node: Node, src: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "identifier" {
            return node_text(child, src).map(str::to_string);
        }
    }
    None
}

fn node_text<'a>(node: Node, src: &'a str) -> Option<&'a str> {
    node.utf8_text(src.as_bytes()).ok()
}
