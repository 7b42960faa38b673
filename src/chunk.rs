//! Recursive text chunker with configurable overlap.
//!
//! Splits normalized document text into bounded, position-ordered chunks.
//! Splitting tries a prioritized separator list — paragraph break, line
//! break, sentence end, space — narrowing to finer separators only where a
//! piece still exceeds `chunk_size`, and falling back to character
//! boundaries as a last resort. Separators stay attached to the preceding
//! piece, so concatenating the chunks (minus the carried overlap) restores
//! the original text exactly.
//!
//! Each chunk after the first is prefixed with up to `overlap` characters
//! of its predecessor's tail so context survives a boundary cut. Identical
//! `(text, chunk_size, overlap)` inputs always produce an identical
//! sequence.

use serde_json::{json, Value};

use crate::config::ChunkingConfig;
use crate::models::ChunkDraft;

/// Separators in priority order; character boundaries are the implicit
/// final fallback.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split `text` into chunks of at most `chunk_size` characters, each chunk
/// after the first carrying up to `overlap` trailing characters of the
/// previous chunk. Empty input yields an empty vector.
///
/// The carry is "up to" `overlap`: when the piece arriving at a boundary is
/// longer than `chunk_size - overlap`, the carried tail shrinks so the next
/// chunk still fits `chunk_size`. Stripping a fixed `overlap` prefix to
/// reconstruct the input therefore only works when every piece stays within
/// `chunk_size - overlap` characters.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    // Enforced by config validation; clamped here so the splitter can never
    // stall on a degenerate overlap.
    let overlap = overlap.min(chunk_size.saturating_sub(1));

    let mut pieces = Vec::new();
    decompose(text, &SEPARATORS, chunk_size, &mut pieces);

    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for piece in pieces {
        let piece_chars = piece.chars().count();
        if buf_chars > 0 && buf_chars + piece_chars > chunk_size {
            chunks.push(buf.clone());
            // Carry the tail forward, shrinking it if the incoming piece
            // would otherwise push the next chunk past the limit.
            let carry = overlap.min(chunk_size.saturating_sub(piece_chars));
            buf = tail_chars(&buf, carry).to_string();
            buf_chars = buf.chars().count();
        }
        buf.push_str(piece);
        buf_chars += piece_chars;
    }

    if buf_chars > 0 {
        chunks.push(buf);
    }

    chunks
}

/// Split `text` into pieces no longer than `max` characters, preferring the
/// coarsest separator that appears in the text. Pieces concatenate back to
/// `text` unchanged.
fn decompose<'a>(text: &'a str, seps: &[&str], max: usize, out: &mut Vec<&'a str>) {
    if text.chars().count() <= max {
        out.push(text);
        return;
    }

    for (i, sep) in seps.iter().enumerate() {
        if !text.contains(sep) {
            continue;
        }
        for piece in split_keep_separator(text, sep) {
            if piece.chars().count() <= max {
                out.push(piece);
            } else {
                decompose(piece, &seps[i + 1..], max, out);
            }
        }
        return;
    }

    // No separator left: emit single characters; the merge phase packs them
    // into sliding windows of exactly `chunk_size`.
    let mut iter = text.char_indices().peekable();
    while let Some((start, _)) = iter.next() {
        let end = iter.peek().map(|(i, _)| *i).unwrap_or(text.len());
        out.push(&text[start..end]);
    }
}

/// Split on `sep`, keeping the separator attached to the preceding piece.
fn split_keep_separator<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut search = 0;
    while let Some(pos) = text[search..].find(sep) {
        let end = search + pos + sep.len();
        pieces.push(&text[start..end]);
        start = end;
        search = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Last `n` characters of `s`, sliced on a char boundary.
fn tail_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    if n >= total {
        return s;
    }
    let skip = total - n;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

/// Chunk a document's text and attach inherited metadata plus
/// `chunk_index` / `total_chunks` to every draft.
pub fn chunk_document(text: &str, doc_metadata: &Value, cfg: &ChunkingConfig) -> Vec<ChunkDraft> {
    let texts = chunk_text(text, cfg.chunk_size, cfg.overlap);
    let total = texts.len();

    texts
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut metadata = match doc_metadata {
                Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            metadata.insert("chunk_index".to_string(), json!(i));
            metadata.insert("total_chunks".to_string(), json!(total));
            ChunkDraft {
                text: chunk,
                position: i as i64,
                metadata: Value::Object(metadata),
            }
        })
        .collect()
}
