//! Token cursor shared by the two parsers.

use super::ast::Pos;
use super::lexer::{Tok, Token};
use super::Dialect;

/// Parsing stopped after an unrecoverable syntax error. The error itself
/// has already been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort;

pub type PResult<T> = Result<T, Abort>;

pub struct Cursor<'a> {
    tokens: Vec<Token<'a>>,
    index: usize,
    dialect: Dialect,
}

impl<'a> Cursor<'a> {
    /// `tokens` must end with [`Tok::Eof`].
    pub fn new(tokens: Vec<Token<'a>>, dialect: Dialect) -> Self {
        Self { tokens, index: 0, dialect }
    }

    pub fn peek(&self) -> Token<'a> {
        self.peek_nth(0)
    }

    pub fn peek_nth(&self, n: usize) -> Token<'a> {
        let last = self.tokens.len().saturating_sub(1);
        self.tokens.get((self.index + n).min(last)).copied().unwrap_or(Token {
            tok: Tok::Eof,
            pos: Pos::default(),
            end: Pos::default(),
        })
    }

    pub fn tok(&self) -> Tok<'a> {
        self.peek().tok
    }

    pub fn pos(&self) -> Pos {
        self.peek().pos
    }

    /// End of the most recently consumed token.
    pub fn prev_end(&self) -> Pos {
        match self.index.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(token) => token.end,
            None => Pos::new(1, 1),
        }
    }

    pub fn advance(&mut self) -> Token<'a> {
        let token = self.peek();
        if token.tok != Tok::Eof {
            self.index += 1;
        }
        token
    }

    pub fn at_eof(&self) -> bool {
        self.tok() == Tok::Eof
    }

    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.tok(), Tok::Punct(q) if q == p)
    }

    pub fn is_punct_at(&self, n: usize, p: &str) -> bool {
        matches!(self.peek_nth(n).tok, Tok::Punct(q) if q == p)
    }

    /// Keyword test, case-insensitive for Basic.
    pub fn is_word(&self, kw: &str) -> bool {
        self.is_word_at(0, kw)
    }

    pub fn is_word_at(&self, n: usize, kw: &str) -> bool {
        match self.peek_nth(n).tok {
            Tok::Word(w) => match self.dialect {
                Dialect::Brace => w == kw,
                Dialect::Basic => w.eq_ignore_ascii_case(kw),
            },
            _ => false,
        }
    }

    pub fn eat_punct(&mut self, p: &str) -> bool {
        let found = self.is_punct(p);
        if found {
            self.advance();
        }
        found
    }

    pub fn eat_word(&mut self, kw: &str) -> bool {
        let found = self.is_word(kw);
        if found {
            self.advance();
        }
        found
    }

    /// Text of the current token for messages.
    pub fn describe(&self) -> String {
        match self.tok() {
            Tok::Word(w) => w.to_string(),
            Tok::Int(v) => v.to_string(),
            Tok::Str(s) => format!("\"{}\"", s),
            Tok::Punct(p) => p.to_string(),
            Tok::Newline | Tok::Eof => String::new(),
        }
    }
}
