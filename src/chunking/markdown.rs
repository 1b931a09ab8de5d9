//! Markdown segmentation.
//!
//! Splits a markdown document into heading-led sections and fenced code
//! blocks. The chunker turns sections into `heading` chunks and hands fence
//! bodies back to the language registry for embedded parsing.

/// A structural segment of a markdown document.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// A run of prose, optionally led by a heading.
    Section {
        text: String,
        start_line: i32,
        end_line: i32,
        has_heading: bool,
    },
    /// A fenced code block.
    Fence {
        /// Info string after the opening fence, e.g. "ts".
        info: Option<String>,
        /// Body text between the fences, without the fence lines.
        body: String,
        /// Line number of the first body line (1-based).
        body_start_line: i32,
        /// Span of the whole fence including the fence lines.
        start_line: i32,
        end_line: i32,
    },
}

/// Segment a markdown document.
///
/// Fences open with three or more backticks or tildes and close with a fence
/// of the same character at least as long. An unclosed fence runs to the end
/// of the document. Headings start a new section.
pub fn segment(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let lines: Vec<&str> = source.lines().collect();

    let mut section_lines: Vec<&str> = Vec::new();
    let mut section_start = 0usize;
    let mut section_has_heading = false;

    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];

        if let Some((fence_char, fence_len, info)) = fence_open(line) {
            flush_section(
                &mut segments,
                &mut section_lines,
                section_start,
                section_has_heading,
            );
            section_has_heading = false;

            let fence_start = i;
            let body_start = i + 1;
            let mut j = body_start;
            while j < lines.len() && !fence_close(lines[j], fence_char, fence_len) {
                j += 1;
            }
            let body = lines[body_start..j.min(lines.len())].join("\n");
            let fence_end = j.min(lines.len().saturating_sub(1));

            segments.push(Segment::Fence {
                info,
                body,
                body_start_line: body_start as i32 + 1,
                start_line: fence_start as i32 + 1,
                end_line: fence_end as i32 + 1,
            });

            i = j + 1;
            section_start = i;
            continue;
        }

        if is_heading(line) {
            flush_section(
                &mut segments,
                &mut section_lines,
                section_start,
                section_has_heading,
            );
            section_start = i;
            section_has_heading = true;
        } else if section_lines.is_empty() && line.trim().is_empty() {
            // Skip leading blank lines between segments.
            i += 1;
            section_start = i;
            continue;
        }

        section_lines.push(line);
        i += 1;
    }

    flush_section(
        &mut segments,
        &mut section_lines,
        section_start,
        section_has_heading,
    );
    segments
}

fn flush_section(
    segments: &mut Vec<Segment>,
    section_lines: &mut Vec<&str>,
    start: usize,
    has_heading: bool,
) {
    // Drop trailing blank lines but keep the span honest.
    let mut end = section_lines.len();
    while end > 0 && section_lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    if end == 0 {
        section_lines.clear();
        return;
    }
    let text = section_lines[..end].join("\n");
    segments.push(Segment::Section {
        text,
        start_line: start as i32 + 1,
        end_line: (start + end) as i32,
        has_heading,
    });
    section_lines.clear();
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#')
        && trimmed
            .trim_start_matches('#')
            .chars()
            .next()
            .is_none_or(|c| c == ' ')
}

/// Parse an opening fence line. Returns (fence char, fence length, info).
fn fence_open(line: &str) -> Option<(char, usize, Option<String>)> {
    let trimmed = line.trim_start();
    for fence_char in ['`', '~'] {
        let len = trimmed.chars().take_while(|&c| c == fence_char).count();
        if len >= 3 {
            let info = trimmed[len..].trim();
            let info = if info.is_empty() {
                None
            } else {
                // The info string's first word names the language.
                Some(
                    info.split_whitespace()
                        .next()
                        .unwrap_or(info)
                        .to_string(),
                )
            };
            return Some((fence_char, len, info));
        }
    }
    None
}

fn fence_close(line: &str, fence_char: char, open_len: usize) -> bool {
    let trimmed = line.trim();
    let len = trimmed.chars().take_while(|&c| c == fence_char).count();
    len >= open_len && trimmed.chars().all(|c| c == fence_char)
}
