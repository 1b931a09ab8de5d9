//! Snippet construction.
//!
//! Renders a chunk as line-number-prefixed text, expanded around matched
//! lines and coalesced into a bounded number of contiguous blocks.
//! Oversized chunks keep their head (70% of the budget) and tail (20%),
//! with a `[N chars truncated]` marker in between.

/// Snippet rendering options.
#[derive(Debug, Clone, Copy)]
pub struct SnippetOptions {
    /// Context lines around each matched line.
    pub context_lines: usize,
    /// Character budget for the chunk content.
    pub max_chars: usize,
    /// Maximum contiguous blocks.
    pub max_blocks: usize,
}

/// Build a snippet for a chunk.
///
/// `start_line` is the chunk's first line in its file; line prefixes in the
/// snippet refer to file coordinates. `matched_terms` drives which lines
/// anchor the blocks; with no terms (vector hits), the chunk renders from
/// the top as a single block.
pub fn build_snippet(
    content: &str,
    start_line: i32,
    matched_terms: &[String],
    options: SnippetOptions,
) -> String {
    if content.is_empty() {
        return String::new();
    }

    let total_chars = content.chars().count();
    if total_chars > options.max_chars {
        return build_truncated(content, start_line, total_chars, options);
    }

    let lines: Vec<&str> = content.lines().collect();
    let blocks = select_blocks(&lines, matched_terms, options);

    let mut rendered = Vec::with_capacity(blocks.len());
    for (block_start, block_end) in blocks {
        rendered.push(render_lines(
            &lines[block_start..=block_end],
            start_line + block_start as i32,
        ));
    }
    rendered.join("\n...\n")
}

/// Line ranges (inclusive indexes into `lines`) to render.
fn select_blocks(
    lines: &[&str],
    matched_terms: &[String],
    options: SnippetOptions,
) -> Vec<(usize, usize)> {
    if lines.is_empty() {
        return Vec::new();
    }

    let matched: Vec<usize> = if matched_terms.is_empty() {
        Vec::new()
    } else {
        lines
            .iter()
            .enumerate()
            .filter(|(_, line)| {
                let lower = line.to_lowercase();
                matched_terms.iter().any(|term| lower.contains(term.as_str()))
            })
            .map(|(i, _)| i)
            .collect()
    };

    // No anchors: the whole chunk is one block.
    if matched.is_empty() {
        return vec![(0, lines.len() - 1)];
    }

    // Expand each match by the context window, then coalesce overlaps.
    let mut blocks: Vec<(usize, usize)> = Vec::new();
    for &line in &matched {
        let block_start = line.saturating_sub(options.context_lines);
        let block_end = (line + options.context_lines).min(lines.len() - 1);
        match blocks.last_mut() {
            Some((_, last_end)) if block_start <= *last_end + 1 => {
                *last_end = (*last_end).max(block_end);
            }
            _ => blocks.push((block_start, block_end)),
        }
    }

    blocks.truncate(options.max_blocks.max(1));
    blocks
}

/// Head + marker + tail rendering for oversized chunks.
fn build_truncated(
    content: &str,
    start_line: i32,
    total_chars: usize,
    options: SnippetOptions,
) -> String {
    let head_chars = (options.max_chars * 7) / 10;
    let tail_chars = options.max_chars / 5;
    let omitted = total_chars - head_chars - tail_chars;

    let head: String = content.chars().take(head_chars).collect();
    let tail: String = {
        let skip = total_chars - tail_chars;
        content.chars().skip(skip).collect()
    };

    let head_rendered = render_lines(&head.lines().collect::<Vec<_>>(), start_line);
    let tail_start_line =
        start_line + content[..content.len() - tail.len()].matches('\n').count() as i32;
    let tail_rendered = render_lines(&tail.lines().collect::<Vec<_>>(), tail_start_line);

    format!("{head_rendered}\n[{omitted} chars truncated]\n{tail_rendered}")
}

/// Prefix each line with its file line number.
fn render_lines(lines: &[&str], first_line: i32) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>4} | {}", first_line + i as i32, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SnippetOptions {
        SnippetOptions {
            context_lines: 3,
            max_chars: 2000,
            max_blocks: 4,
        }
    }

    #[test]
    fn test_small_chunk_renders_whole() {
        let snippet = build_snippet("fn main() {\n    run();\n}", 10, &[], options());
        assert_eq!(snippet, "  10 | fn main() {\n  11 |     run();\n  12 | }");
    }

    #[test]
    fn test_matched_lines_anchor_blocks() {
        let lines: Vec<String> = (0..30).map(|i| format!("line number {i}")).collect();
        let content = lines.join("\n");
        let snippet = build_snippet(
            &content,
            1,
            &["number 20".to_string()],
            SnippetOptions {
                context_lines: 1,
                max_chars: 5000,
                max_blocks: 4,
            },
        );

        // Only the matched line and its context appear.
        assert!(snippet.contains("line number 20"));
        assert!(snippet.contains("line number 19"));
        assert!(snippet.contains("line number 21"));
        assert!(!snippet.contains("line number 5"));
        // Line prefixes are file coordinates (content starts at line 1).
        assert!(snippet.contains("  21 | line number 20"));
    }

    #[test]
    fn test_blocks_coalesce_and_cap() {
        let lines: Vec<String> = (0..100)
            .map(|i| {
                if i % 10 == 0 {
                    format!("target {i}")
                } else {
                    format!("filler {i}")
                }
            })
            .collect();
        let content = lines.join("\n");
        let snippet = build_snippet(
            &content,
            1,
            &["target".to_string()],
            SnippetOptions {
                context_lines: 1,
                max_chars: 10_000,
                max_blocks: 2,
            },
        );

        // At most two blocks → exactly one separator or none.
        let separators = snippet.matches("\n...\n").count();
        assert!(separators <= 1);
        assert!(snippet.contains("target 0"));
        assert!(snippet.contains("target 10"));
        assert!(!snippet.contains("target 90"));
    }

    #[test]
    fn test_truncation_marker() {
        // 3400 chars: head 1400, tail 400, omitted 1600.
        let content = "x".repeat(3400);
        let snippet = build_snippet(&content, 1, &[], options());
        assert!(snippet.contains("[1600 chars truncated]"));

        let head_len = snippet.split("\n[").next().unwrap().len();
        // "   1 | " prefix plus 1400 chars of head.
        assert_eq!(head_len, 7 + 1400);
        assert!(snippet.ends_with(&"x".repeat(400)));
    }

    #[test]
    fn test_truncation_line_numbers() {
        // 100 lines of 50 chars each (~5100 chars) starting at file line 11.
        let lines: Vec<String> = (0..100).map(|i| format!("{:048}x", i)).collect();
        let content = lines.join("\n");
        let snippet = build_snippet(&content, 11, &[], options());

        assert!(snippet.starts_with("  11 | "));
        assert!(snippet.contains("chars truncated]"));
        // Tail line numbers land near the end of the chunk's range.
        let last_line = snippet.lines().last().unwrap();
        assert!(last_line.starts_with(" 1"));
    }

    #[test]
    fn test_empty_content() {
        assert_eq!(build_snippet("", 1, &[], options()), "");
    }
}
