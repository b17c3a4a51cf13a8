//! Incremental UTF-8 decoding of streamed response bodies.
//!
//! Chunk boundaries fall wherever the network puts them, including in the
//! middle of a multi-byte character. The decoder holds back an incomplete
//! trailing sequence until the next chunk completes it.

/// Stateful decoder that turns byte chunks into text.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `chunk` as possible.
    ///
    /// Invalid sequences become U+FFFD; an incomplete sequence at the end is
    /// kept for the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8.
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    /// Whether bytes are being held back for the next chunk.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
