/// One line extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    /// `true` when the line was newline terminated.
    pub is_full_line: bool,
}

/// Accumulates chunks and cuts them into lines.
///
/// Full lines lose their `\n` and a trailing `\r`. The unterminated tail stays
/// in the buffer and is reported again, grown, on every following feed until
/// its newline arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    tail: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<RawLine> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.tail.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.tail.find('\n') {
            let mut text = self.tail.drain(..=newline_pos).collect::<String>();
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
            lines.push(RawLine {
                text,
                is_full_line: true,
            });
        }
        if !self.tail.is_empty() {
            lines.push(RawLine {
                text: self.tail.clone(),
                is_full_line: false,
            });
        }
        lines
    }

    /// The unterminated tail.
    pub fn partial(&self) -> &str {
        &self.tail
    }

    pub fn clear(&mut self) {
        self.tail.clear();
    }
}
