//! Chunker scenarios exercised through the public API.

use std::path::Path;

use pretty_assertions::assert_eq;

use coderag::ChunkOptions;
use coderag::Chunker;

fn chunker() -> Chunker {
    Chunker::with_defaults()
}

#[test]
fn typescript_functions_chunk_per_declaration() {
    let source = "export function foo(){return 1}\nexport function bar(){return 2}";
    let chunks = chunker().chunk(source, Path::new("a.ts"));

    assert_eq!(chunks.len(), 2);

    assert_eq!(chunks[0].chunk_type, "function");
    assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
    assert!(chunks[0].content.contains("function foo"));

    assert_eq!(chunks[1].chunk_type, "function");
    assert_eq!((chunks[1].start_line, chunks[1].end_line), (2, 2));
    assert!(chunks[1].content.contains("function bar"));

    // No imports: the context prefix is empty, content is the declaration.
    assert!(chunks[0].content.starts_with("export function"));
}

#[test]
fn markdown_fence_produces_embedded_chunks_not_raw_block() {
    let source = "# Title\n\n```ts\nexport function x(){}\n```\n";
    let chunks = chunker().chunk(source, Path::new("readme.md"));

    let types: Vec<&str> = chunks.iter().map(|c| c.chunk_type.as_str()).collect();
    assert!(types.contains(&"heading"));
    assert!(types.contains(&"function"));

    let embedded = chunks.iter().find(|c| c.chunk_type == "function").unwrap();
    assert_eq!(embedded.metadata.embedded_in.as_deref(), Some("code_block"));
    assert_eq!(embedded.metadata.embedded_language.as_deref(), Some("ts"));

    // The raw fenced block never appears as chunk content.
    assert!(chunks.iter().all(|c| !c.content.contains("```")));
}

#[test]
fn nested_markdown_recursion_is_bounded() {
    // Markdown inside markdown inside markdown: recursion must terminate
    // and still produce chunks.
    let inner = "```ts\nexport function deep(){}\n```";
    let mid = format!("```md\n# Mid\n\n{inner}\n```");
    let source = format!("# Outer\n\n{mid}\n");

    let chunks = chunker().chunk(&source, Path::new("nested.md"));
    assert!(!chunks.is_empty());
    let combined: String = chunks.iter().map(|c| c.content.as_str()).collect();
    assert!(combined.contains("deep"));
}

#[test]
fn unknown_language_uses_character_windows() {
    let source = "y".repeat(1500);
    let chunks = chunker().chunk(&source, Path::new("data.unknown"));

    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.metadata.fallback));
    assert_eq!(chunks[0].content.len(), 1000);
    assert_eq!(chunks[1].content.len(), 500);
}

#[test]
fn fallback_line_spans_count_newlines() {
    let source = "line one\nline two\nline three";
    let chunks = chunker().chunk(source, Path::new("notes.txt"));

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].start_line, 1);
    assert_eq!(chunks[0].end_line, 3);
}

#[test]
fn empty_source_yields_no_chunks() {
    assert!(chunker().chunk("", Path::new("a.rs")).is_empty());
    assert!(chunker().chunk("", Path::new("a.unknown")).is_empty());
    assert!(chunker().chunk("", Path::new("a.md")).is_empty());
}

#[test]
fn chunking_is_deterministic_across_runs() {
    let source = r#"use std::fmt;

pub struct Message {
    pub body: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body)
    }
}

pub fn render(message: &Message) -> String {
    message.to_string()
}
"#;
    let first = chunker().chunk(source, Path::new("message.rs"));
    let second = chunker().chunk(source, Path::new("message.rs"));
    assert_eq!(first, second);
    assert!(first.len() >= 2);
}

#[test]
fn spans_stay_within_file_bounds() {
    let sources: &[(&str, &str)] = &[
        ("a.ts", "export function one(){}\nconst two = 3;\nexport class Three {}\n"),
        ("b.py", "import os\n\ndef fn():\n    return os.name\n\nprint(fn())\n"),
        ("c.md", "# Head\n\ntext body here\n\n```py\nprint(1)\n```\n"),
        ("d.unknown", "no structure at all\njust lines\n"),
    ];

    for (name, source) in sources {
        let line_count = source.lines().count() as i32;
        for chunk in chunker().chunk(source, Path::new(name)) {
            assert!(chunk.start_line >= 1, "{name}: start {}", chunk.start_line);
            assert!(
                chunk.start_line <= chunk.end_line,
                "{name}: span {}..{}",
                chunk.start_line,
                chunk.end_line
            );
            assert!(
                chunk.end_line <= line_count,
                "{name}: end {} past {}",
                chunk.end_line,
                line_count
            );
        }
    }
}

#[test]
fn boundary_chunks_cover_all_declarations() {
    let source = "export function alpha(){return 1}\nexport function beta(){return 2}\nexport function gamma(){return 3}\n";
    let chunks = chunker().chunk(source, Path::new("three.ts"));

    assert_eq!(chunks.len(), 3);
    let combined: String = chunks.iter().map(|c| c.content.as_str()).collect();
    for name in ["alpha", "beta", "gamma"] {
        assert_eq!(
            combined.matches(name).count(),
            1,
            "{name} should appear exactly once"
        );
    }
}

#[test]
fn min_chunk_size_merges_small_statements() {
    let statements: Vec<String> = (0..8).map(|i| format!("print({i})")).collect();
    let source = statements.join("\n");

    let small_min = Chunker::new(ChunkOptions {
        min_chunk_size: 10,
        ..Default::default()
    })
    .chunk(&source, Path::new("s.py"));

    let large_min = Chunker::new(ChunkOptions {
        min_chunk_size: 1000,
        max_chunk_size: 2000,
        ..Default::default()
    })
    .chunk(&source, Path::new("s.py"));

    // A small minimum yields several synthetic chunks, a large one merges
    // everything into a single chunk.
    assert!(small_min.len() > large_min.len());
    assert_eq!(large_min.len(), 1);
}

#[test]
fn oversized_boundaries_split_with_marker() {
    let body: String = (0..200)
        .map(|i| format!("    const value_{i} = source_{i}();\n"))
        .collect();
    let source = format!("export function enormous(){{\n{body}}}\n");
    let chunks = chunker().chunk(&source, Path::new("big.ts"));

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.metadata.split));

    let combined: String = chunks.iter().map(|c| c.content.as_str()).collect();
    assert!(combined.contains("value_0"));
    assert!(combined.contains("value_199"));
}

#[test]
fn context_prefix_applies_to_every_chunk() {
    let source = "import { a } from \"./a\";\nimport { b } from \"./b\";\nexport function first(){return a}\nexport function second(){return b}\n";
    let chunks = chunker().chunk(source, Path::new("ctx.ts"));

    assert_eq!(chunks.len(), 2);
    for chunk in &chunks {
        assert!(chunk.content.starts_with("import { a }"));
        assert!(chunk.content.contains("import { b }"));
    }
    // Spans still point at the functions.
    assert_eq!(chunks[0].start_line, 3);
    assert_eq!(chunks[1].start_line, 4);
}
