//! Sentence-boundary TTS chunking (§4.6): buffers LLM token output and
//! yields chunks at `. ! ? \n`, or after `max_chunk_chars` at the nearest
//! whitespace.

const BOUNDARY_CHARS: &[char] = &['.', '!', '?', '\n'];

pub struct SentenceChunker {
    buffer: String,
    max_chunk_chars: usize,
}

impl SentenceChunker {
    pub fn new(max_chunk_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            max_chunk_chars,
        }
    }

    /// Appends newly streamed text and returns every chunk that became
    /// complete as a result.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut chunks = Vec::new();

        loop {
            if let Some(idx) = self.buffer.find(BOUNDARY_CHARS) {
                let split_at = idx + self.buffer[idx..].chars().next().unwrap().len_utf8();
                let chunk = self.buffer[..split_at].to_string();
                self.buffer = self.buffer[split_at..].to_string();
                chunks.push(chunk);
                continue;
            }

            if self.buffer.chars().count() > self.max_chunk_chars {
                if let Some(ws_idx) = find_last_whitespace_within(&self.buffer, self.max_chunk_chars) {
                    let chunk = self.buffer[..ws_idx].to_string();
                    self.buffer = self.buffer[ws_idx..].trim_start().to_string();
                    chunks.push(chunk);
                    continue;
                }
            }

            break;
        }

        chunks
    }

    /// Drains any remaining buffered text at the end of the LLM stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

fn find_last_whitespace_within(text: &str, max_chars: usize) -> Option<usize> {
    let cutoff_byte = text
        .char_indices()
        .nth(max_chars)
        .map(|(b, _)| b)
        .unwrap_or(text.len());
    text[..cutoff_byte].rfind(char::is_whitespace).map(|idx| idx + 1)
}
