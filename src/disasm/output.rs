//! Indentation-aware text sink.
//!
//! Indentation is written lazily at the first text of a line, so blank
//! lines carry no trailing tabs.

use std::fmt;

#[derive(Debug, Default)]
pub struct TextOutput {
    buf: String,
    indent: usize,
    mid_line: bool,
}

impl TextOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn unindent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn write(&mut self, text: &str) {
        for (i, piece) in text.split('\n').enumerate() {
            if i > 0 {
                self.line();
            }
            if piece.is_empty() {
                continue;
            }
            if !self.mid_line {
                for _ in 0..self.indent {
                    self.buf.push('\t');
                }
                self.mid_line = true;
            }
            self.buf.push_str(piece);
        }
    }

    pub fn write_line(&mut self, text: &str) {
        self.write(text);
        self.line();
    }

    /// End the current line.
    pub fn line(&mut self) {
        self.buf.push('\n');
        self.mid_line = false;
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

impl fmt::Write for TextOutput {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    #[test]
    fn indents_lazily() {
        let mut out = TextOutput::new();
        out.write_line("{");
        out.indent();
        write!(out, "a {}\n\nb", 1).unwrap();
        out.line();
        out.unindent();
        out.write_line("}");
        assert_eq!(out.into_string(), "{\n\ta 1\n\n\tb\n}\n");
    }
}
