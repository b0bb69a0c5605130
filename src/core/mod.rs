// This module gathers the infrastructure shared by every stage of ilsnip: the arena-based
// compilation session with its statistics, the error enums of each stage, compiler
// diagnostics, and the static configuration (reference set, compiler versions, example
// snippets, option string).

//! Core infrastructure.
//!
//! ## Session Management (`session`)
//! - Arena-based memory allocation using `bumpalo`
//! - Compilation statistics
//!
//! ## Errors (`error`)
//! - One `thiserror` enum per failure domain
//!
//! ## Diagnostics (`diagnostic`)
//! - Messages about user source, kept in emission order

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod session;

pub use diagnostic::{Diagnostic, Severity};
pub use error::{BackendError, BackendResult, DecodeError, LoadError, MetadataError, RenderError};
pub use session::{CompilationSession, SessionStats};
