// This module defines the error types of every pipeline stage using the thiserror crate.
// BackendError covers failures of a compiler backend itself (I/O on the scratch directory,
// object file writing, an unknown compiler version, code generation inconsistencies) and is
// what the compiler adapter turns into a tooling failure. MetadataError and DecodeError
// describe malformed metadata sections and instruction streams; LoadError wraps them together
// with I/O and object parsing problems met while opening an artifact. RenderError reports
// internal inconsistencies found while disassembling (branches into the middle of an
// instruction, unknown tokens, exception clauses outside the method body). Diagnostics
// produced for user source are not errors and live in the diagnostic module.

//! Error types for the compile and disassemble stages.
//!
//! Using thiserror for idiomatic error handling.

use crate::il::opcodes::OpCode;
use thiserror::Error;

/// Failure of a compiler backend, as opposed to a problem in user source.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("I/O error in compiler scratch space: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object file generation failed: {0}")]
    Object(#[from] object::write::Error),

    #[error("Unknown compiler version '{0}'")]
    UnknownCompilerVersion(String),

    #[error("Code generation failed: {reason}")]
    Codegen { reason: String },
}

impl BackendError {
    pub(crate) fn codegen(reason: impl Into<String>) -> Self {
        BackendError::Codegen { reason: reason.into() }
    }

    /// Short type name shown to users next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Io(_) => "IoError",
            BackendError::Object(_) => "ObjectWriteError",
            BackendError::UnknownCompilerVersion(_) => "UnknownCompilerVersion",
            BackendError::Codegen { .. } => "CodegenError",
        }
    }
}

/// Malformed metadata section.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Metadata truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error("Bad metadata signature 0x{found:08x}")]
    BadSignature { found: u32 },

    #[error("Unsupported metadata version {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidString { offset: usize },

    #[error("Invalid {what} tag {tag} at offset {offset}")]
    InvalidTag { what: &'static str, tag: u8, offset: usize },

    #[error("Type {index} has an invalid enclosing type {enclosing}")]
    BadEnclosingType { index: usize, enclosing: usize },
}

/// Malformed instruction stream.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown opcode 0x{code:02x} at IL_{offset:04x}")]
    UnknownOpcode { offset: u32, code: u16 },

    #[error("Truncated operand for {opcode} at IL_{offset:04x}")]
    TruncatedOperand { offset: u32, opcode: OpCode },

    #[error("Branch at IL_{offset:04x} leaves the address space")]
    BranchOutOfRange { offset: u32 },
}

/// The artifact could not be opened as a compiled module.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Cannot read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact is not a valid object file: {0}")]
    Object(#[from] object::read::Error),

    #[error("Artifact has no {0} section")]
    MissingSection(&'static str),

    #[error("No method body for {symbol}")]
    MissingBody { symbol: String },

    #[error("Method body of {symbol} lies outside the code section")]
    BodyOutOfRange { symbol: String },

    #[error("Invalid metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Invalid instruction stream in {method}: {source}")]
    Decode {
        method: String,
        #[source]
        source: DecodeError,
    },
}

/// Internal inconsistency found while rendering a loaded module.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Branch at IL_{offset:04x} in {method} targets IL_{target:04x}, which is not an instruction boundary")]
    BadBranchTarget { method: String, offset: u32, target: u32 },

    #[error("Unknown token {token} in {method}")]
    UnknownToken { method: String, token: crate::il::metadata::Token },

    #[error("Malformed exception clause in {method}: {reason}")]
    BadClause { method: String, reason: String },

    #[error("Formatting failed")]
    Format(#[from] std::fmt::Error),
}

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
