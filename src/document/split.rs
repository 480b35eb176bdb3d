//! Markdown segmentation for the document pipeline
//!
//! Three strategies: split at top-level headings, fixed-size windows
//! over paragraph boundaries with overlap, or headers first with
//! oversized sections windowed.

use crate::graph::ChunkStrategy;
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// One segment produced by a split, before chunk notes exist.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    /// Heading that opens the segment, when the strategy knows one.
    pub heading: Option<String>,
}

/// Split a markdown body into ordered segments. Empty segments are
/// dropped; the result is empty only for a blank body.
pub fn split(body: &str, strategy: &ChunkStrategy) -> Vec<Segment> {
    match strategy {
        ChunkStrategy::Headers => split_headers(body),
        ChunkStrategy::SizeOverlap { size, overlap } => split_size(body, *size, *overlap, None),
        ChunkStrategy::Hybrid { size, overlap } => {
            let mut out = Vec::new();
            for segment in split_headers(body) {
                if segment.text.len() > *size {
                    out.extend(split_size(
                        &segment.text,
                        *size,
                        *overlap,
                        segment.heading.clone(),
                    ));
                } else {
                    out.push(segment);
                }
            }
            out
        }
    }
}

/// Heading levels that open a new segment.
fn is_section_level(level: HeadingLevel) -> bool {
    matches!(level, HeadingLevel::H1 | HeadingLevel::H2)
}

fn split_headers(body: &str) -> Vec<Segment> {
    // Collect (byte offset, heading text) for every section heading.
    let parser = Parser::new_ext(body, Options::all()).into_offset_iter();
    let mut boundaries: Vec<(usize, String)> = Vec::new();
    let mut current_heading: Option<(usize, String)> = None;
    for (event, range) in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) if is_section_level(level) => {
                current_heading = Some((range.start, String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, buf)) = current_heading.as_mut() {
                    buf.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(level)) if is_section_level(level) => {
                if let Some((offset, text)) = current_heading.take() {
                    boundaries.push((offset, text.trim().to_string()));
                }
            }
            _ => {}
        }
    }

    if boundaries.is_empty() {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![Segment {
            text: trimmed.to_string(),
            heading: None,
        }];
    }

    let mut segments = Vec::new();
    // Preamble before the first heading keeps no heading label.
    let first = boundaries[0].0;
    if !body[..first].trim().is_empty() {
        segments.push(Segment {
            text: body[..first].trim().to_string(),
            heading: None,
        });
    }
    for (i, (offset, heading)) in boundaries.iter().enumerate() {
        let end = boundaries
            .get(i + 1)
            .map(|(next, _)| *next)
            .unwrap_or(body.len());
        let text = body[*offset..end].trim();
        if !text.is_empty() {
            segments.push(Segment {
                text: text.to_string(),
                heading: if heading.is_empty() {
                    None
                } else {
                    Some(heading.clone())
                },
            });
        }
    }
    segments
}

fn split_size(body: &str, size: usize, overlap: usize, heading: Option<String>) -> Vec<Segment> {
    let size = size.max(1);
    let paragraphs: Vec<&str> = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut segments: Vec<Segment> = Vec::new();
    let mut current = String::new();
    for paragraph in paragraphs {
        if !current.is_empty() && current.len() + 2 + paragraph.len() > size {
            let tail = overlap_tail(&current, overlap);
            segments.push(Segment {
                text: std::mem::take(&mut current),
                heading: if segments.is_empty() {
                    heading.clone()
                } else {
                    None
                },
            });
            if let Some(tail) = tail {
                current.push_str(&tail);
            }
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        segments.push(Segment {
            text: current,
            heading: if segments.is_empty() { heading } else { None },
        });
    }
    segments
}

/// The last paragraph of a closing window, carried into the next one
/// when it fits the overlap budget.
fn overlap_tail(text: &str, overlap: usize) -> Option<String> {
    if overlap == 0 {
        return None;
    }
    let tail = text.rsplit("\n\n").next()?;
    if tail.len() <= overlap {
        Some(tail.to_string())
    } else {
        None
    }
}
