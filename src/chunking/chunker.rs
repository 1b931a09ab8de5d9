//! AST-aware chunker.
//!
//! Parses source text with the registry grammar for its language and emits
//! size-bounded chunks at semantic boundaries. Top-level boundary nodes
//! become chunks; everything between them accumulates into synthetic chunks
//! subject to the minimum size; oversized chunks split recursively on their
//! own children, then on character windows. Nested boundaries are absorbed
//! by the outer node since only root children are walked.
//!
//! Chunking is a pure function of (source, path, options): identical inputs
//! produce an identical chunk sequence.

use std::path::Path;

use tree_sitter::Node;
use tree_sitter::Parser;

use crate::chunking::markdown;
use crate::chunking::markdown::Segment;
use crate::config::ChunkingConfig;
use crate::language;
use crate::language::LanguageSpec;
use crate::types::Chunk;
use crate::types::ChunkMetadata;

/// Maximum embedded-language recursion depth.
///
/// Fence bodies can themselves be markdown with fences; deeper nesting than
/// this is pathological input.
pub const EMBEDDED_DEPTH_CAP: usize = 3;

/// Chunking options.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Chunks larger than this (in characters, before the context prefix)
    /// are recursively split.
    pub max_chunk_size: usize,
    /// Adjacent non-semantic fragments below this are merged left-to-right.
    pub min_chunk_size: usize,
    /// Prepend context nodes (imports, type aliases, openers) to each chunk.
    pub preserve_context: bool,
    /// Recursively parse embedded code blocks.
    pub parse_embedded: bool,
    /// Override of the descriptor's boundary node kinds.
    pub node_types: Option<Vec<String>>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            min_chunk_size: 100,
            preserve_context: true,
            parse_embedded: true,
            node_types: None,
        }
    }
}

impl From<&ChunkingConfig> for ChunkOptions {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            min_chunk_size: config.min_chunk_size,
            preserve_context: config.preserve_context,
            parse_embedded: config.parse_embedded,
            node_types: None,
        }
    }
}

/// AST-aware chunker.
#[derive(Debug, Clone)]
pub struct Chunker {
    options: ChunkOptions,
}

impl Chunker {
    /// Create a chunker with the given options.
    pub fn new(options: ChunkOptions) -> Self {
        Self { options }
    }

    /// Create a chunker with default options.
    pub fn with_defaults() -> Self {
        Self::new(ChunkOptions::default())
    }

    /// Chunk a source file.
    ///
    /// An empty input yields an empty chunk list. Unknown extensions fall
    /// back to character windows with `metadata.fallback = true`.
    pub fn chunk(&self, source: &str, path: &Path) -> Vec<Chunk> {
        if source.is_empty() {
            return Vec::new();
        }
        match language::detect(path) {
            Some(spec) => self.chunk_with_spec(source, spec, 0, &ChunkMetadata::default()),
            None => self.fallback_chunks(source, None, &ChunkMetadata::default()),
        }
    }

    /// Chunk source text with a known language descriptor.
    fn chunk_with_spec(
        &self,
        source: &str,
        spec: &'static LanguageSpec,
        depth: usize,
        base_meta: &ChunkMetadata,
    ) -> Vec<Chunk> {
        if source.is_empty() {
            return Vec::new();
        }
        match spec.grammar() {
            Some(grammar) => self.chunk_tree(source, spec, &grammar, base_meta),
            // Markdown: built-in segmenter with embedded recursion.
            None => self.chunk_markdown(source, spec, depth, base_meta),
        }
    }

    // ------------------------------------------------------------------
    // Tree-sitter path
    // ------------------------------------------------------------------

    fn chunk_tree(
        &self,
        source: &str,
        spec: &'static LanguageSpec,
        grammar: &tree_sitter::Language,
        base_meta: &ChunkMetadata,
    ) -> Vec<Chunk> {
        let mut parser = Parser::new();
        if parser.set_language(grammar).is_err() {
            return self.fallback_chunks(source, Some("grammar_mismatch"), base_meta);
        }
        let Some(tree) = parser.parse(source, None) else {
            return self.fallback_chunks(source, Some("parse_failed"), base_meta);
        };
        let root = tree.root_node();
        if root.kind() == "ERROR" {
            return self.fallback_chunks(source, Some("syntax_error"), base_meta);
        }

        let mut cursor = root.walk();
        let children: Vec<Node> = root.children(&mut cursor).collect();

        // Context prefix: all context nodes in document order.
        let context_prefix = if self.options.preserve_context {
            let parts: Vec<&str> = children
                .iter()
                .filter(|n| spec.is_context(n.kind()))
                .map(|n| node_text(source, n))
                .collect();
            parts.join("\n")
        } else {
            String::new()
        };

        let mut chunks = Vec::new();
        let mut fragments: Vec<Node> = Vec::new();

        for child in &children {
            // Context nodes live in the prefix, not in fragments.
            if self.options.preserve_context && spec.is_context(child.kind()) {
                continue;
            }

            if self.is_boundary(spec, child.kind()) {
                self.flush_fragments(source, &mut fragments, base_meta, &mut chunks);
                self.emit_boundary(source, child, base_meta, &mut chunks);
            } else {
                fragments.push(*child);
            }
        }
        self.flush_fragments(source, &mut fragments, base_meta, &mut chunks);

        if !context_prefix.is_empty() {
            for chunk in &mut chunks {
                chunk.content = format!("{context_prefix}\n{}", chunk.content);
            }
        }

        chunks
    }

    fn is_boundary(&self, spec: &LanguageSpec, kind: &str) -> bool {
        match &self.options.node_types {
            Some(kinds) => kinds.iter().any(|k| k == kind),
            None => spec.is_boundary(kind),
        }
    }

    /// Emit one boundary node, splitting when oversized.
    fn emit_boundary(
        &self,
        source: &str,
        node: &Node,
        base_meta: &ChunkMetadata,
        out: &mut Vec<Chunk>,
    ) {
        let text = node_text(source, node);
        let chunk_type = boundary_type(node);

        if text.chars().count() <= self.options.max_chunk_size {
            out.push(Chunk {
                content: text.to_string(),
                chunk_type,
                start_line: node.start_position().row as i32 + 1,
                end_line: node.end_position().row as i32 + 1,
                metadata: base_meta.clone(),
            });
        } else {
            self.split_oversized(source, node, &chunk_type, base_meta, out);
        }
    }

    /// Split an oversized node on its children, recursing into children that
    /// are themselves oversized; leaf nodes fall back to character windows.
    /// Every produced piece carries `metadata.split = true`. Pieces are cut
    /// at child starts so the node's bytes stay covered.
    fn split_oversized(
        &self,
        source: &str,
        node: &Node,
        chunk_type: &str,
        base_meta: &ChunkMetadata,
        out: &mut Vec<Chunk>,
    ) {
        let mut split_meta = base_meta.clone();
        split_meta.split = true;

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();

        if children.is_empty() {
            let start_line = node.start_position().row as i32 + 1;
            self.char_windows(node_text(source, node), start_line, chunk_type, &split_meta, out);
            return;
        }

        let mut piece_start = node.start_byte();

        for child in &children {
            let range = child.byte_range();
            let child_len = source[range.clone()].chars().count();

            if child_len > self.options.max_chunk_size {
                // Emit whatever accumulated before this child, then recurse.
                self.emit_piece(source, piece_start, range.start, chunk_type, &split_meta, out);
                self.split_oversized(source, child, chunk_type, base_meta, out);
                piece_start = range.end;
                continue;
            }

            let accumulated = source[piece_start..range.end].chars().count();
            if accumulated > self.options.max_chunk_size && piece_start < range.start {
                self.emit_piece(source, piece_start, range.start, chunk_type, &split_meta, out);
                piece_start = range.start;
            }
        }
        self.emit_piece(source, piece_start, node.end_byte(), chunk_type, &split_meta, out);
    }

    fn emit_piece(
        &self,
        source: &str,
        start_byte: usize,
        end_byte: usize,
        chunk_type: &str,
        meta: &ChunkMetadata,
        out: &mut Vec<Chunk>,
    ) {
        if start_byte >= end_byte {
            return;
        }
        let text = &source[start_byte..end_byte];
        if text.trim().is_empty() {
            return;
        }
        let start_line = line_of_byte(source, start_byte);
        let end_line = start_line + trimmed_newlines(text);
        out.push(Chunk {
            content: text.to_string(),
            chunk_type: chunk_type.to_string(),
            start_line,
            end_line,
            metadata: meta.clone(),
        });
    }

    /// Merge adjacent leaf fragments into synthetic chunks.
    ///
    /// Fragments accumulate left-to-right until the minimum size is reached;
    /// they never absorb a boundary chunk. The trailing remainder is emitted
    /// even when below the minimum so no content is dropped.
    fn flush_fragments(
        &self,
        source: &str,
        fragments: &mut Vec<Node>,
        base_meta: &ChunkMetadata,
        out: &mut Vec<Chunk>,
    ) {
        let mut group_start: Option<usize> = None;
        let mut group_end = 0usize;

        for node in fragments.iter() {
            let range = node.byte_range();
            if group_start.is_none() {
                group_start = Some(range.start);
            }
            group_end = range.end;

            let start = group_start.unwrap_or(range.start);
            if source[start..group_end].chars().count() >= self.options.min_chunk_size {
                self.emit_fragment_group(source, start, group_end, base_meta, out);
                group_start = None;
            }
        }
        if let Some(start) = group_start {
            self.emit_fragment_group(source, start, group_end, base_meta, out);
        }

        fragments.clear();
    }

    fn emit_fragment_group(
        &self,
        source: &str,
        start_byte: usize,
        end_byte: usize,
        base_meta: &ChunkMetadata,
        out: &mut Vec<Chunk>,
    ) {
        let text = &source[start_byte..end_byte];
        if text.trim().is_empty() {
            return;
        }
        let start_line = line_of_byte(source, start_byte);

        if text.chars().count() <= self.options.max_chunk_size {
            out.push(Chunk {
                content: text.to_string(),
                chunk_type: "text".to_string(),
                start_line,
                end_line: start_line + trimmed_newlines(text),
                metadata: base_meta.clone(),
            });
        } else {
            let mut split_meta = base_meta.clone();
            split_meta.split = true;
            self.char_windows(text, start_line, "text", &split_meta, out);
        }
    }

    // ------------------------------------------------------------------
    // Markdown path
    // ------------------------------------------------------------------

    fn chunk_markdown(
        &self,
        source: &str,
        spec: &'static LanguageSpec,
        depth: usize,
        base_meta: &ChunkMetadata,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for segment in markdown::segment(source) {
            match segment {
                Segment::Section {
                    text,
                    start_line,
                    end_line,
                    has_heading,
                } => {
                    let chunk_type = if has_heading { "heading" } else { "text" };
                    if text.chars().count() <= self.options.max_chunk_size {
                        chunks.push(Chunk {
                            content: text,
                            chunk_type: chunk_type.to_string(),
                            start_line,
                            end_line,
                            metadata: base_meta.clone(),
                        });
                    } else {
                        let mut split_meta = base_meta.clone();
                        split_meta.split = true;
                        self.char_windows(&text, start_line, chunk_type, &split_meta, &mut chunks);
                    }
                }
                Segment::Fence {
                    info,
                    body,
                    body_start_line,
                    start_line,
                    end_line,
                } => {
                    self.emit_fence(
                        spec,
                        info,
                        &body,
                        body_start_line,
                        start_line,
                        end_line,
                        depth,
                        base_meta,
                        &mut chunks,
                    );
                }
            }
        }

        chunks
    }

    /// Emit a fenced code block, recursively parsed when possible.
    #[allow(clippy::too_many_arguments)]
    fn emit_fence(
        &self,
        spec: &'static LanguageSpec,
        info: Option<String>,
        body: &str,
        body_start_line: i32,
        start_line: i32,
        end_line: i32,
        depth: usize,
        base_meta: &ChunkMetadata,
        out: &mut Vec<Chunk>,
    ) {
        let rule = spec.embedded_rule("code_block");
        let resolved = info
            .as_deref()
            .or(rule.and_then(|r| r.default_language))
            .and_then(language::resolve);

        let embedded_language = info
            .clone()
            .or_else(|| rule.and_then(|r| r.default_language.map(String::from)))
            .unwrap_or_else(|| "text".to_string());

        if self.options.parse_embedded
            && depth < EMBEDDED_DEPTH_CAP
            && !body.is_empty()
            && let Some(inner_spec) = resolved
        {
            let mut embedded_meta = base_meta.clone();
            embedded_meta.embedded_in = Some("code_block".to_string());
            embedded_meta.embedded_language = Some(embedded_language.clone());

            let mut inner = self.chunk_with_spec(body, inner_spec, depth + 1, &embedded_meta);
            if !inner.is_empty() {
                // Inner spans are relative to the fence body; shift them to
                // document coordinates.
                for chunk in &mut inner {
                    chunk.start_line += body_start_line - 1;
                    chunk.end_line += body_start_line - 1;
                }
                out.extend(inner);
                return;
            }
        }

        // Unresolvable, disabled, or zero sub-chunks: the container itself
        // is the chunk, with the raw body as content.
        let mut meta = base_meta.clone();
        meta.embedded_language = Some(embedded_language);
        out.push(Chunk {
            content: body.to_string(),
            chunk_type: "code_block".to_string(),
            start_line,
            end_line,
            metadata: meta,
        });
    }

    // ------------------------------------------------------------------
    // Fallback path
    // ------------------------------------------------------------------

    /// Character-window chunks for unknown languages and parse failures.
    fn fallback_chunks(
        &self,
        source: &str,
        parse_error: Option<&str>,
        base_meta: &ChunkMetadata,
    ) -> Vec<Chunk> {
        let mut meta = base_meta.clone();
        meta.fallback = true;
        meta.parse_error = parse_error.map(String::from);

        let mut chunks = Vec::new();
        self.char_windows(source, 1, "fallback", &meta, &mut chunks);
        chunks
    }

    /// Emit fixed-size character windows (no overlap) with line spans
    /// computed by counting newlines.
    fn char_windows(
        &self,
        text: &str,
        first_line: i32,
        chunk_type: &str,
        meta: &ChunkMetadata,
        out: &mut Vec<Chunk>,
    ) {
        let max = self.options.max_chunk_size;
        let mut line = first_line;
        let mut window = String::new();
        let mut window_chars = 0usize;

        let mut emit = |window: &mut String, line: &mut i32, out: &mut Vec<Chunk>| {
            if window.trim().is_empty() {
                window.clear();
                return;
            }
            let newlines = window.matches('\n').count() as i32;
            let trailing = window.ends_with('\n');
            let end_line = (*line + newlines - i32::from(trailing)).max(*line);
            out.push(Chunk {
                content: std::mem::take(window),
                chunk_type: chunk_type.to_string(),
                start_line: *line,
                end_line,
                metadata: meta.clone(),
            });
            *line = end_line + i32::from(trailing);
        };

        for c in text.chars() {
            window.push(c);
            window_chars += 1;
            if window_chars >= max {
                emit(&mut window, &mut line, out);
                window_chars = 0;
            }
        }
        emit(&mut window, &mut line, out);
    }
}

/// Text of a node within its source.
fn node_text<'a>(source: &'a str, node: &Node) -> &'a str {
    &source[node.byte_range()]
}

/// 1-based line of a byte offset.
fn line_of_byte(source: &str, byte: usize) -> i32 {
    source[..byte].matches('\n').count() as i32 + 1
}

/// Newline count of a chunk body, ignoring a trailing newline.
fn trimmed_newlines(text: &str) -> i32 {
    text.trim_end_matches('\n').matches('\n').count() as i32
}

/// Chunk type for a boundary node.
///
/// Export statements report the kind of the declaration they wrap so that
/// `export function f() {}` reads as a function, not an export.
fn boundary_type(node: &Node) -> String {
    if node.kind() == "export_statement" {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.is_named() && child.kind() != "comment" {
                return language::normalize_kind(child.kind()).to_string();
            }
        }
        return "export".to_string();
    }
    language::normalize_kind(node.kind()).to_string()
}
