// This module runs a request end to end: the compiler adapter produces an outcome, and a
// successful outcome's artifact is loaded and rendered before its handle is released. Compiler
// diagnostics and tooling failures pass straight through without touching the loader. Load and
// render errors are captured as failures of their own kind so callers can tell a broken
// snippet from a broken toolchain. The scratch directory is released on every path; a release
// that fails is logged and does not change the result.

//! Compile, load and render in one call.

use crate::compiler::{ArtifactHandle, CompileOutcome, CompileRequest, CompilerRegistry};
use crate::core::diagnostic::Diagnostic;
use crate::disasm::{self, RenderOptions};
use crate::loader;
use std::fmt;

/// Which stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Tooling,
    Load,
    Render,
}

impl FailureKind {
    /// Heading shown above the failure message.
    pub fn title(self) -> &'static str {
        match self {
            FailureKind::Tooling => "Uh oh, the compiler freaked out",
            FailureKind::Load => "Uh oh, the loader freaked out",
            FailureKind::Render => "Uh oh, the disassembler freaked out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:\n\n{}", self.kind.title(), self.message)
    }
}

/// Result of one pipeline run; exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    Il(String),
    Diagnostics(Vec<Diagnostic>),
    Failure(Failure),
}

impl PipelineResult {
    fn failure(kind: FailureKind, message: String) -> Self {
        PipelineResult::Failure(Failure { kind, message })
    }

    /// Text shown to the user.
    pub fn present(&self) -> String {
        match self {
            PipelineResult::Il(text) => text.clone(),
            PipelineResult::Diagnostics(diagnostics) => {
                let mut text = String::from("Sorry, your code might be broken:\n");
                for diagnostic in diagnostics {
                    text.push('\n');
                    text.push_str(&diagnostic.to_string());
                }
                text
            }
            PipelineResult::Failure(failure) => failure.to_string(),
        }
    }
}

/// Adapter, loader and renderer behind one entry point.
pub struct Pipeline {
    registry: CompilerRegistry,
}

impl Pipeline {
    pub fn new(registry: CompilerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CompilerRegistry {
        &self.registry
    }

    pub fn run(&self, request: &CompileRequest, options: RenderOptions) -> PipelineResult {
        match self.registry.compile(request) {
            CompileOutcome::Success(handle) => Self::finish(handle, options),
            CompileOutcome::Diagnostics(diagnostics) => {
                log::debug!("compilation reported {} diagnostics", diagnostics.len());
                PipelineResult::Diagnostics(diagnostics)
            }
            CompileOutcome::ToolingFailure { message } => PipelineResult::failure(FailureKind::Tooling, message),
        }
    }

    /// Load and render the artifact of a successful compilation, then
    /// release it.
    pub fn finish(handle: ArtifactHandle, options: RenderOptions) -> PipelineResult {
        for warning in handle.warnings() {
            log::debug!("compiler warning: {}", warning);
        }
        let result = match loader::load(&handle) {
            Ok(module) => match disasm::render(&module, options) {
                Ok(text) => PipelineResult::Il(text),
                Err(err) => PipelineResult::failure(FailureKind::Render, format!("RenderError :{}", err)),
            },
            Err(err) => PipelineResult::failure(FailureKind::Load, format!("LoadError :{}", err)),
        };
        if let Err(err) = handle.release() {
            log::warn!("failed to release artifact: {}", err);
        }
        result
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(CompilerRegistry::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_listed_under_a_heading() {
        let result = PipelineResult::Diagnostics(vec![
            Diagnostic::error("CS1002", "; expected").at("snippet.cs", 3, 7),
        ]);
        assert_eq!(
            result.present(),
            "Sorry, your code might be broken:\n\nLine 3 (Column 7) : error CS1002: ; expected"
        );
    }

    #[test]
    fn failures_name_their_stage() {
        let result = PipelineResult::failure(FailureKind::Tooling, "Panic :boom".into());
        assert_eq!(result.present(), "Uh oh, the compiler freaked out:\n\nPanic :boom");
    }
}
