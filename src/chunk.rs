//! Paragraph- and sentence-aware markdown chunker.
//!
//! Splits a page body into [`Chunk`]s of at most `max_chars` characters.
//! Paragraphs (`\n\n`) are packed together while they fit; a paragraph
//! that is too long on its own is split on sentence boundaries (`". "`),
//! and a sentence that is still too long is hard-split on whitespace.
//!
//! Lengths are counted in `char`s, not bytes, so Hangul and other
//! multi-byte text is never split inside a code point.
//!
//! Each chunk carries a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split markdown into chunks with contiguous indices starting at 0.
/// Blank input yields no chunks.
pub fn chunk_text(page_id: &str, text: &str, max_chars: usize) -> Vec<Chunk> {
    split_text(text, max_chars)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(page_id, i as i64, &piece))
        .collect()
}

/// The text-only half of [`chunk_text`].
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        if char_len(trimmed) > max_chars {
            flush(&mut pieces, &mut current);
            split_paragraph(trimmed, max_chars, &mut pieces);
            continue;
        }

        // +2 for the \n\n separator
        let would_be = if current.is_empty() {
            char_len(trimmed)
        } else {
            char_len(&current) + 2 + char_len(trimmed)
        };

        if would_be > max_chars {
            flush(&mut pieces, &mut current);
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(trimmed);
    }

    flush(&mut pieces, &mut current);
    pieces
}

fn split_paragraph(para: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut current = String::new();

    for sentence in para.split(". ") {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if char_len(sentence) > max_chars {
            flush(pieces, &mut current);
            hard_split(sentence, max_chars, pieces);
            continue;
        }

        let would_be = if current.is_empty() {
            char_len(sentence)
        } else {
            char_len(&current) + 2 + char_len(sentence)
        };

        if would_be > max_chars {
            flush(pieces, &mut current);
        }
        if !current.is_empty() {
            current.push_str(". ");
        }
        current.push_str(sentence);
    }

    flush(pieces, &mut current);
}

/// Split at `max_chars` boundaries, preferring the last newline or space.
fn hard_split(text: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut remaining = text;
    while !remaining.is_empty() {
        if char_len(remaining) <= max_chars {
            pieces.push(remaining.trim().to_string());
            break;
        }

        let limit = byte_offset(remaining, max_chars);
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .map(|pos| pos + 1)
            .unwrap_or(limit);

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

fn flush(pieces: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        pieces.push(trimmed.to_string());
    }
    current.clear();
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th char, or the string length.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

fn make_chunk(page_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        page_id: page_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
