//! Tokenizer for both dialects.
//!
//! Words are not classified here: keywords are recognised by the parsers,
//! case-insensitively for Basic. Basic is line oriented, so its lexer emits
//! [`Tok::Newline`] for line ends and `:` separators and swallows ` _` line
//! continuations.

use super::ast::Pos;
use super::messages::{DiagnosticSink, Message};
use super::Dialect;
use crate::core::session::CompilationSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tok<'a> {
    Word(&'a str),
    /// Unsigned literal; negation is applied by the parser.
    Int(u32),
    Str(&'a str),
    Punct(&'static str),
    Newline,
    Eof,
}

#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    pub tok: Tok<'a>,
    pub pos: Pos,
    /// Position just past the last character.
    pub end: Pos,
}

const BRACE_PUNCT: &[&str] = &[
    "++", "--", "+=", "-=", "*=", "/=", "%=", "==", "!=", "<=", ">=", "&&", "||", "{", "}", "(", ")",
    "[", "]", ";", ",", ".", "+", "-", "*", "/", "%", "<", ">", "!", "=",
];

const BASIC_PUNCT: &[&str] = &[
    "+=", "-=", "*=", "&=", "<>", "<=", ">=", "(", ")", ",", ".", "+", "-", "*", "/", "\\", "&", "<",
    ">", "=",
];

pub struct Lexer<'s, 'a> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
    line: u32,
    column: u32,
    dialect: Dialect,
    session: &'s CompilationSession<'a>,
}

impl<'s, 'a> Lexer<'s, 'a> {
    pub fn new(src: &'s str, dialect: Dialect, session: &'s CompilationSession<'a>) -> Self {
        Self { src, bytes: src.as_bytes(), pos: 0, line: 1, column: 1, dialect, session }
    }

    /// Tokenize the whole source. Lexical errors are reported and skipped.
    pub fn tokenize(mut self, sink: &mut DiagnosticSink) -> Vec<Token<'a>> {
        let mut tokens: Vec<Token<'a>> = Vec::new();
        loop {
            let token = self.next_token(sink);
            let is_eof = token.tok == Tok::Eof;
            // Collapse blank lines and leading separators.
            let redundant_newline = token.tok == Tok::Newline
                && tokens.last().map_or(true, |prev| prev.tok == Tok::Newline);
            if !redundant_newline {
                tokens.push(token);
            }
            if is_eof {
                break;
            }
        }
        log::trace!("lexed {} tokens", tokens.len());
        tokens
    }

    fn here(&self) -> Pos {
        Pos::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn token(&self, tok: Tok<'a>, pos: Pos) -> Token<'a> {
        Token { tok, pos, end: self.here() }
    }

    fn next_token(&mut self, sink: &mut DiagnosticSink) -> Token<'a> {
        loop {
            self.skip_trivia();
            let start = self.here();
            let Some(c) = self.peek() else {
                return self.token(Tok::Eof, start);
            };

            if c == '\n' {
                self.bump();
                if self.dialect == Dialect::Basic {
                    return self.token(Tok::Newline, start);
                }
                continue;
            }
            if c.is_ascii_alphabetic() || c == '_' {
                return self.word(start);
            }
            if c.is_ascii_digit() || (self.dialect == Dialect::Basic && c == '&' && matches!(self.peek_at(1), Some(b'H' | b'h'))) {
                return self.number(start, sink);
            }
            if c == '"' || (c == '@' && self.peek_at(1) == Some(b'"') && self.dialect == Dialect::Brace) {
                return self.string(start, sink);
            }
            if self.dialect == Dialect::Basic && c == ':' {
                self.bump();
                return self.token(Tok::Newline, start);
            }

            let table = match self.dialect {
                Dialect::Brace => BRACE_PUNCT,
                Dialect::Basic => BASIC_PUNCT,
            };
            if let Some(p) = table.iter().find(|p| self.src[self.pos..].starts_with(**p)) {
                for _ in 0..p.len() {
                    self.bump();
                }
                return self.token(Tok::Punct(*p), start);
            }

            self.bump();
            sink.report(start, Message::UnexpectedChar(c));
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.bump();
                }
                Some('/') if self.dialect == Dialect::Brace && self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.bump();
                    }
                }
                Some('/') if self.dialect == Dialect::Brace && self.peek_at(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    while self.peek().is_some() && !self.src[self.pos..].starts_with("*/") {
                        self.bump();
                    }
                    self.bump();
                    self.bump();
                }
                Some('\'') if self.dialect == Dialect::Basic => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.bump();
                    }
                }
                Some('_') if self.dialect == Dialect::Basic && self.is_continuation() => {
                    while self.bump() != Some('\n') {}
                }
                _ => return,
            }
        }
    }

    /// A lone `_` followed only by spaces up to the line end.
    fn is_continuation(&self) -> bool {
        let rest = &self.src[self.pos + 1..];
        let line = rest.split('\n').next().unwrap_or("");
        let preceded_by_space = self.pos == 0 || matches!(self.bytes[self.pos - 1], b' ' | b'\t');
        preceded_by_space && line.trim().is_empty() && rest.contains('\n')
    }

    fn word(&mut self, start: Pos) -> Token<'a> {
        let begin = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        let text = &self.src[begin..self.pos];
        if self.dialect == Dialect::Basic && text.eq_ignore_ascii_case("rem") {
            while !matches!(self.peek(), None | Some('\n')) {
                self.bump();
            }
            return self.next_after_comment(start);
        }
        self.token(Tok::Word(self.session.alloc_str(text)), start)
    }

    fn next_after_comment(&mut self, start: Pos) -> Token<'a> {
        match self.peek() {
            Some('\n') => {
                self.bump();
                self.token(Tok::Newline, start)
            }
            _ => self.token(Tok::Eof, start),
        }
    }

    fn number(&mut self, start: Pos, sink: &mut DiagnosticSink) -> Token<'a> {
        let rest = &self.src[self.pos..];
        let hex = rest.starts_with("0x") || rest.starts_with("0X") || rest.starts_with('&');
        if hex {
            self.bump();
            self.bump();
        }
        let begin = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit() && (hex || c.is_ascii_digit())) {
            self.bump();
        }
        let digits = &self.src[begin..self.pos];
        let parsed = if hex { u64::from_str_radix(digits, 16) } else { digits.parse::<u64>() };
        let value = match parsed {
            Ok(v) if hex && v <= u32::MAX as u64 => v as u32,
            Ok(v) if v <= 1u64 << 31 => v as u32,
            _ => {
                sink.report(start, Message::IntegerTooLarge);
                0
            }
        };
        self.token(Tok::Int(value), start)
    }

    fn string(&mut self, start: Pos, sink: &mut DiagnosticSink) -> Token<'a> {
        let verbatim = self.peek() == Some('@');
        if verbatim {
            self.bump();
        }
        self.bump();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => {
                    sink.report(start, Message::NewlineInConstant);
                    break;
                }
                Some('\n') if !verbatim => {
                    sink.report(start, Message::NewlineInConstant);
                    break;
                }
                Some('"') => {
                    self.bump();
                    // Doubled quote escapes a quote in Basic and verbatim strings.
                    if (self.dialect == Dialect::Basic || verbatim) && self.peek() == Some('"') {
                        self.bump();
                        text.push('"');
                        continue;
                    }
                    break;
                }
                Some('\\') if self.dialect == Dialect::Brace && !verbatim => {
                    self.bump();
                    match self.bump() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('0') => text.push('\0'),
                        Some(other) => text.push(other),
                        None => {}
                    }
                }
                Some(c) => {
                    self.bump();
                    text.push(c);
                }
            }
        }
        self.token(Tok::Str(self.session.alloc_str(&text)), start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    fn lex<'a>(src: &str, dialect: Dialect, session: &CompilationSession<'a>) -> (Vec<Tok<'a>>, DiagnosticSink) {
        let mut sink = DiagnosticSink::new(dialect, "snippet.0");
        let tokens = Lexer::new(src, dialect, session).tokenize(&mut sink);
        (tokens.into_iter().map(|t| t.tok).collect(), sink)
    }

    #[test]
    fn brace_tokens() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (toks, sink) = lex("x += 0x10; // hi\n\"a\\tb\" <= y++", Dialect::Brace, &session);
        assert!(!sink.has_errors());
        assert_eq!(
            toks,
            vec![
                Tok::Word("x"),
                Tok::Punct("+="),
                Tok::Int(16),
                Tok::Punct(";"),
                Tok::Str("a\tb"),
                Tok::Punct("<="),
                Tok::Word("y"),
                Tok::Punct("++"),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn basic_lines_and_continuations() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let src = "Dim s = \"a\"\"b\" ' note\n\nx = 1 + _\n  2 : y = &HFF\n";
        let (toks, sink) = lex(src, Dialect::Basic, &session);
        assert!(!sink.has_errors());
        assert_eq!(
            toks,
            vec![
                Tok::Word("Dim"),
                Tok::Word("s"),
                Tok::Punct("="),
                Tok::Str("a\"b"),
                Tok::Newline,
                Tok::Word("x"),
                Tok::Punct("="),
                Tok::Int(1),
                Tok::Punct("+"),
                Tok::Int(2),
                Tok::Newline,
                Tok::Word("y"),
                Tok::Punct("="),
                Tok::Int(255),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn positions_are_one_based() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut sink = DiagnosticSink::new(Dialect::Brace, "f");
        let tokens = Lexer::new("a\n  bc", Dialect::Brace, &session).tokenize(&mut sink);
        assert_eq!(tokens[1].pos, Pos::new(2, 3));
        assert_eq!(tokens[1].end, Pos::new(2, 5));
    }

    #[test]
    fn lexical_errors() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (_, sink) = lex("x $ \"open\n", Dialect::Brace, &session);
        let codes: Vec<_> = sink.diagnostics().iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, vec!["CS1056", "CS1010"]);
    }

    #[test]
    fn verbatim_strings_span_lines_until_end_of_file() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let (toks, sink) = lex("@\"a\nb\"", Dialect::Brace, &session);
        assert!(!sink.has_errors());
        assert_eq!(toks, vec![Tok::Str("a\nb"), Tok::Eof]);

        let (toks, sink) = lex("@\"abc", Dialect::Brace, &session);
        assert_eq!(toks, vec![Tok::Str("abc"), Tok::Eof]);
        let codes: Vec<_> = sink.diagnostics().iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, vec!["CS1010"]);
    }
}
