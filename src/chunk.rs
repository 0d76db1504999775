//! Sliding-window text chunker.
//!
//! Splits extracted document text into overlapping [`Passage`]s of at most
//! `chunk_chars` characters, with consecutive passages sharing exactly
//! `overlap_chars` characters so context is not lost at boundaries.
//!
//! The windows tile the input with no gaps: passage 0 followed by each
//! subsequent passage minus its leading overlap reconstructs the original
//! text byte for byte. Spans are measured in characters (Unicode scalar
//! values), and all slicing lands on UTF-8 boundaries.

use crate::error::{Error, Result};
use crate::models::Passage;

/// Split text into overlapping passages with contiguous sequence indices
/// starting at 0.
///
/// Fails with [`Error::EmptyDocument`] if `text` is empty or
/// whitespace-only. `overlap_chars < chunk_chars` is enforced by config
/// validation before this is reached.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Result<Vec<Passage>> {
    debug_assert!(chunk_chars > 0 && overlap_chars < chunk_chars);

    if text.trim().is_empty() {
        return Err(Error::EmptyDocument);
    }

    let step = chunk_chars - overlap_chars;
    let mut passages = Vec::new();
    let mut start_byte = 0usize;
    let mut start_char = 0usize;
    let mut seq: i64 = 0;

    loop {
        let (window_bytes, window_chars) = take_chars(&text[start_byte..], chunk_chars);
        let end_byte = start_byte + window_bytes;

        passages.push(Passage {
            seq,
            start_char,
            end_char: start_char + window_chars,
            text: text[start_byte..end_byte].to_string(),
        });

        if end_byte == text.len() {
            break;
        }

        // A window that did not reach the end was full, so the step always
        // lands inside it and the next window starts `overlap_chars` before
        // this one ended.
        let (step_bytes, step_chars) = take_chars(&text[start_byte..], step);
        start_byte += step_bytes;
        start_char += step_chars;
        seq += 1;
    }

    Ok(passages)
}

/// Byte length and character count of up to `max_chars` characters from the
/// front of `s`.
fn take_chars(s: &str, max_chars: usize) -> (usize, usize) {
    let mut count = 0usize;
    for (offset, _) in s.char_indices() {
        if count == max_chars {
            return (offset, count);
        }
        count += 1;
    }
    (s.len(), count)
}
