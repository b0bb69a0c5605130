//! ilsnip - compile a source snippet and show its IL.
//!
//! A C# or Visual Basic snippet is compiled in-process into a binary module,
//! the module is loaded back and its method bodies are rendered as textual
//! IL, either flat or with loops, conditionals and exception regions made
//! visible.
//!
//! # Primary Usage
//!
//! ```no_run
//! use ilsnip::compiler::{CompileRequest, Language};
//! use ilsnip::disasm::RenderOptions;
//! use ilsnip::pipeline::{Pipeline, PipelineResult};
//!
//! let pipeline = Pipeline::default();
//! let request = CompileRequest::new("class P { static void Main() {} }", Language::CSharp);
//! if let PipelineResult::Il(text) = pipeline.run(&request, RenderOptions::default()) {
//!     print!("{}", text);
//! }
//! ```
//!
//! # Architecture
//!
//! - [`frontend`] - lexers and parsers for both source dialects
//! - [`backend`] - binding, code generation and the artifact writer
//! - [`compiler`] - language registry, scratch space and compile outcomes
//! - [`il`] - opcodes, instructions and the metadata model
//! - [`loader`] - reads an artifact back into a module
//! - [`disasm`] - the IL renderer
//! - [`pipeline`] - compile, load and render in one call
//! - [`core`] - session, errors, diagnostics and configuration

pub mod backend;
pub mod compiler;
pub mod core;
pub mod disasm;
pub mod frontend;
pub mod il;
pub mod loader;
pub mod pipeline;

pub use compiler::{CompileOutcome, CompileRequest, CompilerRegistry, Language};
pub use core::{CompilationSession, Diagnostic, SessionStats, Severity};
pub use disasm::RenderOptions;
pub use pipeline::{Failure, FailureKind, Pipeline, PipelineResult};
