//! Newline splitting with carry-over of the trailing partial line, and
//! byte-to-text decoding for raw process streams.

/// Splits a continuous text stream into complete lines.
///
/// The last incomplete line of a chunk is kept and prefixed to the next
/// chunk. Trailing `\r` is stripped so CRLF terminals parse like LF ones.
#[derive(Debug, Default, Clone)]
pub struct LineSplitter {
    partial: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the lines it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);

        let Some(last_newline) = self.partial.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        complete
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

    /// Take the pending partial line, leaving the splitter empty.
    pub fn take_partial(&mut self) -> String {
        std::mem::take(&mut self.partial)
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

/// Decodes a byte stream that may split multi-byte characters across reads.
///
/// An incomplete UTF-8 sequence at the end of a read is held back until the
/// next one. Invalid bytes are replaced.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());
        let mut consumed = 0;
        while consumed < self.pending.len() {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    consumed += valid;
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed += len;
                        }
                        // Incomplete sequence at the end: wait for more.
                        None => break,
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        text
    }
}
