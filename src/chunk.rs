//! Syntax-aware and fixed-window chunking of source files.
//!
//! Recognized source files (by extension) are parsed with tree-sitter and
//! every function, class, method, and arrow function becomes its own chunk.
//! Constructs nest: a class chunk spans the same lines as the method chunks
//! inside it, giving retrieval both a coarse and a fine target.
//!
//! Everything else is cut into consecutive, non-overlapping line windows
//! that cover the file exactly once. Source files in which the parser finds
//! no constructs fall back to the same windowing at a wider size.

use std::collections::HashSet;

use tree_sitter::{Language, Node, Parser};

use crate::config::ChunkingConfig;
use crate::error::ChunkError;
use crate::models::{ChunkDraft, ChunkKind};
use crate::walker::extension_of;

/// Name recorded for constructs without an identifier.
pub const ANONYMOUS: &str = "Anonymous";

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "method_definition",
    "arrow_function",
];

const CLASS_KINDS: &[&str] = &["class_declaration", "abstract_class_declaration"];

const NAME_KINDS: &[&str] = &["identifier", "type_identifier", "property_identifier"];

/// Splits file text into [`ChunkDraft`]s.
#[derive(Debug, Clone)]
pub struct Chunker {
    source_extensions: HashSet<String>,
    window_lines: usize,
    fallback_window_lines: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            source_extensions: config
                .source_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            window_lines: config.window_lines.max(1),
            fallback_window_lines: config.fallback_window_lines.max(1),
        }
    }

    /// Chunk `text`, choosing the strategy from `file_name`'s extension.
    pub fn chunk(&self, file_name: &str, text: &str) -> Result<Vec<ChunkDraft>, ChunkError> {
        let grammar = extension_of(file_name)
            .filter(|ext| self.source_extensions.contains(ext))
            .and_then(|ext| grammar_for(&ext).map(|lang| (ext, lang)));

        match grammar {
            Some((ext, language)) => {
                let chunks = chunk_syntax(file_name, &ext, text, &language)?;
                if chunks.is_empty() && !text.trim().is_empty() {
                    return Ok(chunk_windows(text, self.fallback_window_lines));
                }
                Ok(chunks)
            }
            None => Ok(chunk_windows(text, self.window_lines)),
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(&ChunkingConfig::default())
    }
}

fn grammar_for(ext: &str) -> Option<Language> {
    match ext {
        "ts" | "mts" | "cts" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        _ => None,
    }
}

/// Extract every function-like and class construct, in document order.
fn chunk_syntax(
    file_name: &str,
    ext: &str,
    text: &str,
    language: &Language,
) -> Result<Vec<ChunkDraft>, ChunkError> {
    let mut parser = Parser::new();
    parser
        .set_language(language)
        .map_err(|e| ChunkError::Grammar(ext.to_string(), e.to_string()))?;

    let tree = parser
        .parse(text, None)
        .ok_or_else(|| ChunkError::Parse(file_name.to_string()))?;

    let mut chunks = Vec::new();
    let mut stack = vec![tree.root_node()];

    while let Some(node) = stack.pop() {
        let kind = node.kind();
        let chunk_kind = if CLASS_KINDS.contains(&kind) {
            Some(ChunkKind::Class)
        } else if FUNCTION_KINDS.contains(&kind) {
            Some(ChunkKind::Function)
        } else {
            None
        };

        if let Some(chunk_kind) = chunk_kind {
            chunks.push(ChunkDraft {
                kind: chunk_kind,
                name: construct_name(&node, text),
                content: text[node.byte_range()].to_string(),
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
            });
        }

        // Push in reverse so children pop in source order.
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }

    Ok(chunks)
}

fn construct_name(node: &Node, text: &str) -> String {
    node.child_by_field_name("name")
        .filter(|n| NAME_KINDS.contains(&n.kind()))
        .and_then(|n| n.utf8_text(text.as_bytes()).ok())
        .map(str::to_string)
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

/// Partition `text` into windows of `window` lines.
///
/// Lines are the `\n`-separated segments of `text`, so joining the chunk
/// contents with `\n` reproduces the input exactly. Empty text yields no
/// chunks.
pub fn chunk_windows(text: &str, window: usize) -> Vec<ChunkDraft> {
    if text.is_empty() {
        return Vec::new();
    }
    let window = window.max(1);
    let lines: Vec<&str> = text.split('\n').collect();

    lines
        .chunks(window)
        .enumerate()
        .map(|(i, slice)| {
            let start_line = i * window + 1;
            let end_line = start_line + slice.len() - 1;
            ChunkDraft {
                kind: ChunkKind::Window,
                name: format!("Lines {}-{}", start_line, end_line),
                content: slice.join("\n"),
                start_line,
                end_line,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_count(text: &str) -> usize {
        if text.is_empty() {
            0
        } else {
            text.split('\n').count()
        }
    }

    fn lines_of(text: &str, start: usize, end: usize) -> String {
        text.split('\n')
            .skip(start - 1)
            .take(end - start + 1)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every chunk must be the text of its own line range: it begins on
    /// `start_line`, ends on `end_line`, and the lines between match exactly.
    fn assert_exact_spans(text: &str, chunks: &[ChunkDraft]) {
        let lines: Vec<&str> = text.split('\n').collect();
        for c in chunks {
            let label = format!("{} {}-{}", c.name, c.start_line, c.end_line);
            assert!(c.start_line >= 1, "{}", label);
            assert!(c.start_line <= c.end_line && c.end_line <= lines.len(), "{}", label);

            let span = &lines[c.start_line - 1..c.end_line];
            let parts: Vec<&str> = c.content.split('\n').collect();
            assert_eq!(parts.len(), span.len(), "{}", label);

            let last = span.len() - 1;
            if last == 0 {
                assert!(span[0].contains(parts[0]), "{}", label);
                continue;
            }
            assert!(span[0].ends_with(parts[0]), "{}", label);
            for i in 1..last {
                assert_eq!(span[i], parts[i], "{}", label);
            }
            assert!(span[last].starts_with(parts[last]), "{}", label);
        }
    }

    fn twenty_line_ts() -> String {
        let mut lines = vec![
            "import { db } from './db';".to_string(),
            String::new(),
            "export function loadUser(id: string) {".to_string(),
        ];
        for i in 0..14 {
            lines.push(format!("  const step{} = db.get(id, {});", i, i));
        }
        lines.push("}".to_string());
        lines.push(String::new());
        lines.push("const VERSION = 2;".to_string());
        lines.join("\n")
    }

    #[test]
    fn test_single_exported_function() {
        let text = twenty_line_ts();
        assert_eq!(line_count(&text), 20);

        let chunks = Chunker::default().chunk("user.ts", &text).unwrap();
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.kind, ChunkKind::Function);
        assert_eq!(chunk.name, "loadUser");
        assert_eq!((chunk.start_line, chunk.end_line), (3, 18));
        assert!(chunk.content.starts_with("function loadUser"));
        assert!(chunk.content.ends_with('}'));
        assert!(lines_of(&text, 3, 18).contains(&chunk.content));
        assert_exact_spans(&text, &chunks);
    }

    #[test]
    fn test_class_and_methods_nest() {
        let text = "class Counter {\n  count = 0;\n  inc() {\n    this.count++;\n  }\n  reset() {\n    this.count = 0;\n  }\n}\n";
        let chunks = Chunker::default().chunk("counter.js", text).unwrap();
        let summary: Vec<(ChunkKind, &str, usize, usize)> = chunks
            .iter()
            .map(|c| (c.kind, c.name.as_str(), c.start_line, c.end_line))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChunkKind::Class, "Counter", 1, 9),
                (ChunkKind::Function, "inc", 3, 5),
                (ChunkKind::Function, "reset", 6, 8),
            ]
        );
        for c in &chunks {
            assert!(text.contains(&c.content));
            assert!(lines_of(text, c.start_line, c.end_line).contains(&c.content));
        }
        assert_exact_spans(text, &chunks);
    }

    #[test]
    fn test_several_constructs_keep_their_line_ranges() {
        let text = [
            "import { x } from './x';",
            "",
            "export function alpha(n: number) {",
            "  return n * 2;",
            "}",
            "",
            "export class Store {",
            "  private items: Record<string, number> = {};",
            "  read(key: string) {",
            "    const pick = (k: string) => this.items[k];",
            "    return pick(key);",
            "  }",
            "  write(key: string, value: number) {",
            "    this.items[key] = value;",
            "  }",
            "}",
            "",
            "function beta() {",
            "  return alpha(1);",
            "}",
            "",
        ]
        .join("\n");

        let chunks = Chunker::default().chunk("store.ts", &text).unwrap();
        let summary: Vec<(ChunkKind, &str, usize, usize)> = chunks
            .iter()
            .map(|c| (c.kind, c.name.as_str(), c.start_line, c.end_line))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChunkKind::Function, "alpha", 3, 5),
                (ChunkKind::Class, "Store", 7, 16),
                (ChunkKind::Function, "read", 9, 12),
                (ChunkKind::Function, ANONYMOUS, 10, 10),
                (ChunkKind::Function, "write", 13, 15),
                (ChunkKind::Function, "beta", 18, 20),
            ]
        );
        assert_eq!(chunks[3].content, "(k: string) => this.items[k]");
        assert_exact_spans(&text, &chunks);
    }

    #[test]
    fn test_windows_keep_blank_stretches() {
        let text = (1..=120)
            .map(|i| if (51..=100).contains(&i) { String::new() } else { format!("x = {}", i) })
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = Chunker::default().chunk("gaps.py", &text).unwrap();
        let ranges: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
        assert_eq!(ranges, vec![(1, 50), (51, 100), (101, 120)]);
        assert!(chunks[1].content.trim().is_empty());
        assert_exact_spans(&text, &chunks);
    }

    #[test]
    fn test_arrow_function_is_anonymous() {
        let text = "export const add = (a: number, b: number) => a + b;\n";
        let chunks = Chunker::default().chunk("math.ts", text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name, ANONYMOUS);
        assert_eq!(chunks[0].content, "(a: number, b: number) => a + b");
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
    }

    #[test]
    fn test_tsx_component() {
        let text = "export function App() {\n  return <div>hello</div>;\n}\n";
        let chunks = Chunker::default().chunk("App.tsx", text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name, "App");
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
    }

    #[test]
    fn test_declarations_only_fall_back_to_wide_windows() {
        let text = (1..=150)
            .map(|i| format!("export const C{} = {};", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = Chunker::default().chunk("constants.ts", &text).unwrap();
        let ranges: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
        assert_eq!(ranges, vec![(1, 100), (101, 150)]);
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Window));
        assert_exact_spans(&text, &chunks);
    }

    #[test]
    fn test_unrecognized_extension_partitions_exactly() {
        let text = (1..=120)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        let chunks = Chunker::default().chunk("script.py", &text).unwrap();
        let ranges: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
        assert_eq!(ranges, vec![(1, 50), (51, 100), (101, 121)]);
        assert_eq!(chunks.last().unwrap().end_line, line_count(&text));
        assert_eq!(chunks[1].name, "Lines 51-100");

        let rebuilt = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(rebuilt, text);

        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_line + 1, pair[1].start_line);
        }
        assert_exact_spans(&text, &chunks);
    }

    #[test]
    fn test_window_sizes_smaller_than_file() {
        let chunks = chunk_windows("a\nb\nc", 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
        assert_eq!(chunks[0].content, "a\nb\nc");
    }

    #[test]
    fn test_empty_and_blank_inputs() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("empty.ts", "").unwrap().is_empty());
        assert!(chunker.chunk("blank.ts", "  \n\n ").unwrap().is_empty());
        assert!(chunker.chunk("empty.rb", "").unwrap().is_empty());
    }

    #[test]
    fn test_extension_not_in_config_uses_windows() {
        let config = ChunkingConfig {
            source_extensions: vec!["ts".to_string()],
            ..ChunkingConfig::default()
        };
        let text = "function f() {\n  return 1;\n}";
        let chunks = Chunker::new(&config).chunk("f.js", text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Window);
    }
}
