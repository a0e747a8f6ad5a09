//! Text chunking for ingest.
//!
//! Splits on paragraph boundaries and accumulates paragraphs up to a
//! target size, so chunks keep natural edges while staying near the size
//! the embedding model handles well. Oversized single paragraphs fall
//! back to a hard character split.

/// Target chunk size in characters (~375 tokens).
pub const DEFAULT_CHUNK_CHARS: usize = 1500;

/// Split text into chunk-sized pieces.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if paragraph.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(hard_split(paragraph, max_chars));
            continue;
        }

        if !current.is_empty() && current.len() + paragraph.len() + 2 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split an oversized paragraph on char boundaries, preferring spaces.
fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > max_chars {
        let window = &rest[..floor_char_boundary(rest, max_chars)];
        let cut = window.rfind(' ').filter(|c| *c > 0).unwrap_or(window.len());
        pieces.push(rest[..cut].trim().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
