//! Groups LLM token fragments into speakable chunks.
//!
//! Raw token streams arrive a few bytes at a time; feeding them to TTS
//! directly yields choppy, per-token noise. The chunker accumulates
//! fragments and flushes on completed words, sentence boundaries, or a
//! byte-length safety valve so synthesis latency stays bounded.

use crate::defaults;

/// Bytes that end a word when one is open.
fn is_word_byte(b: u8) -> bool {
    // Treat non-ASCII bytes as word characters so multi-byte UTF-8
    // sequences never split words.
    b.is_ascii_alphanumeric() || b == b'\'' || b >= 0x80
}

fn is_closer_byte(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'.' | b'!' | b'?' | b',' | b';' | b':')
}

fn is_sentence_end(fragment: &str) -> bool {
    fragment
        .bytes()
        .any(|b| matches!(b, b'.' | b'!' | b'?'))
}

/// Stateful transducer from token fragments to utterance-shaped chunks.
#[derive(Debug, Default)]
pub struct Chunker {
    buffer: String,
    word_count: u32,
    in_word: bool,
}

impl Chunker {
    /// Creates an empty chunker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one token fragment. Returns a chunk when a flush condition is
    /// met: `WORD_FLUSH_THRESHOLD` completed words, a sentence-ending byte
    /// in the fragment, or a buffer of `MAX_CHUNK_BYTES` or more.
    pub fn feed(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);

        for b in fragment.bytes() {
            if is_word_byte(b) {
                self.in_word = true;
            } else if self.in_word && is_closer_byte(b) {
                self.word_count += 1;
                self.in_word = false;
            }
        }

        let sentence_ended = is_sentence_end(fragment);
        if self.word_count >= defaults::WORD_FLUSH_THRESHOLD
            || sentence_ended
            || self.buffer.len() >= defaults::MAX_CHUNK_BYTES
        {
            let chunk = std::mem::take(&mut self.buffer);
            self.word_count = 0;
            // A byte-length flush can land mid-word; keep the word open so
            // the count stays accurate across the boundary.
            if sentence_ended {
                self.in_word = false;
            }
            return Some(chunk);
        }
        None
    }

    /// Flushes whatever is buffered at end of generation.
    pub fn finish(&mut self) -> Option<String> {
        self.word_count = 0;
        self.in_word = false;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Text accumulated since the last flush.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Removes the first occurrence of `needle` from the pending buffer.
    /// Used to strip a matched antiprompt before the final flush.
    pub fn strip_pending(&mut self, needle: &str) -> bool {
        if needle.is_empty() {
            return false;
        }
        match self.buffer.find(needle) {
            Some(pos) => {
                self.buffer.replace_range(pos..pos + needle.len(), "");
                true
            }
            None => false,
        }
    }
}
