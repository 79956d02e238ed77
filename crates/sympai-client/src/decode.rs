//! Incremental UTF-8 decoding across chunk boundaries.
//!
//! Network chunks split the reply at arbitrary byte offsets, so a multi-byte
//! character can straddle two chunks. The decoder holds the incomplete tail
//! of one chunk and prepends it to the next, so a split character decodes to
//! itself rather than to replacement characters. Bytes that are invalid
//! outright (not merely incomplete) become U+FFFD and decoding continues.

/// Stateful decoder for one stream. Do not reuse across streams.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    partial: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk, returning the completed text.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    return out;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is well-formed
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(invalid_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid_len..];
                        }
                        None => {
                            // Incomplete sequence at the chunk tail: carry
                            // it into the next decode.
                            self.partial = after.to_vec();
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush at end-of-stream. A dangling partial sequence can never be
    /// completed, so it decodes to a single replacement character.
    pub fn finish(&mut self) -> String {
        if self.partial.is_empty() {
            String::new()
        } else {
            self.partial.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}
