// This module contains the source front ends of the two in-process compilers. Both
// dialects share the tokenizer, the token cursor, the diagnostic catalogue and the
// arena-allocated syntax tree; each has its own recursive-descent parser. The Basic
// parser lowers its loop forms onto the shared statements so that the code generator
// sees a single shape per construct.

//! Source front ends.
//!
//! - [`lexer`] - tokenizer for both dialects
//! - [`csharp`] / [`vb`] - parsers producing [`ast::CompilationUnit`]
//! - [`messages`] - diagnostic codes and wording per dialect

pub mod ast;
pub mod csharp;
pub mod cursor;
pub mod lexer;
pub mod messages;
pub mod vb;

pub use messages::{DiagnosticSink, Message};

/// Lexical family of a source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// C-style braces and semicolons, case-sensitive.
    Brace,
    /// Line-oriented, case-insensitive.
    Basic,
}

impl Dialect {
    /// Extension of the scratch source file.
    pub fn source_extension(self) -> &'static str {
        match self {
            Dialect::Brace => "cs",
            Dialect::Basic => "vb",
        }
    }
}
