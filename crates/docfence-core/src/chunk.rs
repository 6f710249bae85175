//! Paragraph-boundary text chunker.
//!
//! Splits extracted document text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! to preserve semantic coherence within each chunk.
//!
//! Chunk ids are derived from the document path, the ordinal and the SHA-256
//! of the chunk text, so re-chunking unchanged content yields the same ids
//! and upserts stay idempotent.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`.
//! 4. When exceeded, flush the buffer as a chunk and start a new one.
//! 5. If a single paragraph exceeds `max_chars`, perform a hard split at
//!    the nearest newline or space boundary.
//!
//! Whitespace-only text produces no chunks.
//!
//! # Example
//!
//! ```rust
//! use docfence_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("/docs/a.txt", "Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;
use crate::tokenize::tokenize;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
///
/// Ordinals are contiguous starting at 0. Offsets are byte offsets of each
/// chunk's first character within `text`.
pub fn chunk_text(document_path: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut current_offset = 0usize;
    let mut ordinal: u32 = 0;

    let mut push = |buf: &str, offset: usize, chunks: &mut Vec<Chunk>| {
        chunks.push(make_chunk(document_path, ordinal, offset, buf));
        ordinal += 1;
    };

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_offset = offset_in(text, trimmed);

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            push(&current_buf, current_offset, &mut chunks);
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = split_point(remaining, max_chars);
                let piece = &remaining[..split_at];
                if !piece.trim().is_empty() {
                    let piece_trimmed = piece.trim();
                    push(piece_trimmed, offset_in(text, piece_trimmed), &mut chunks);
                }
                remaining = &remaining[split_at..];
            }
        } else {
            if current_buf.is_empty() {
                current_offset = para_offset;
            } else {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        push(&current_buf, current_offset, &mut chunks);
    }

    chunks
}

/// Stable chunk id for `(document_path, ordinal, content_hash)`.
pub fn chunk_id(document_path: &str, ordinal: u32, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(ordinal.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(content_hash.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

/// SHA-256 of arbitrary bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Byte offset of `part` inside `whole`. `part` must be a subslice.
fn offset_in(whole: &str, part: &str) -> usize {
    (part.as_ptr() as usize).saturating_sub(whole.as_ptr() as usize)
}

/// Pick a split index no larger than `max_chars`, preferring newline or
/// space boundaries and always advancing by at least one character.
fn split_point(s: &str, max_chars: usize) -> usize {
    if s.len() <= max_chars {
        return s.len();
    }
    let hard = snap_to_char_boundary(s, max_chars);
    let soft = s[..hard]
        .rfind('\n')
        .or_else(|| s[..hard].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(hard);
    let soft = snap_to_char_boundary(s, soft);
    if soft == 0 {
        s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
    } else {
        soft
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(document_path: &str, ordinal: u32, offset: usize, text: &str) -> Chunk {
    let hash = content_hash(text.as_bytes());
    Chunk {
        id: chunk_id(document_path, ordinal, &hash),
        document_path: document_path.to_string(),
        ordinal,
        offset: offset as u64,
        text: text.to_string(),
        tokens: tokenize(text),
        content_hash: hash,
        vector: None,
    }
}
