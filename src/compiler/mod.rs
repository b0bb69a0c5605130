// This module is the compiler adapter. It maps a language key to a registered backend, hands
// it the fixed reference set and the global option string, and folds whatever comes back into
// exactly one CompileOutcome. Each call gets its own collision-free scratch directory from
// tempfile; on success ownership of that directory moves into the ArtifactHandle, on every
// other path it is deleted before `compile` returns. Backend errors and panics alike become
// tooling failures carrying the error's type name and message.

//! Compiler adapter.

pub mod artifact;

pub use artifact::ArtifactHandle;

use crate::backend::{CSharpBackend, CompileJob, CompilerBackend, VbBackend};
use crate::core::config::{option_string, DEFAULT_COMPILER_VERSION, REFERENCES};
use crate::core::diagnostic::Diagnostic;
use hashbrown::HashMap;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

const MISSING_ARTIFACT: &str = "The assembly file is missing without explanation.";

/// Source languages with a built-in backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    CSharp,
    VisualBasic,
}

impl Language {
    pub const ALL: &'static [Language] = &[Language::CSharp, Language::VisualBasic];

    /// Key callers select the language by.
    pub fn key(self) -> &'static str {
        match self {
            Language::CSharp => "C#",
            Language::VisualBasic => "VB",
        }
    }

    pub fn from_key(key: &str) -> Option<Language> {
        Language::ALL.iter().copied().find(|l| l.key() == key)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One compilation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub source_text: String,
    /// Language key, e.g. `"C#"`.
    pub language: String,
    pub compiler_version: String,
    pub optimize: bool,
    pub include_debug_info: bool,
}

impl CompileRequest {
    /// A request with the default settings: `v4.0`, optimized, with debug info.
    pub fn new(source_text: impl Into<String>, language: Language) -> Self {
        Self {
            source_text: source_text.into(),
            language: language.key().to_string(),
            compiler_version: DEFAULT_COMPILER_VERSION.to_string(),
            optimize: true,
            include_debug_info: true,
        }
    }
}

/// Result of one compilation; exactly one variant.
#[derive(Debug)]
pub enum CompileOutcome {
    Success(ArtifactHandle),
    Diagnostics(Vec<Diagnostic>),
    ToolingFailure { message: String },
}

impl CompileOutcome {
    fn tooling(message: impl Into<String>) -> Self {
        CompileOutcome::ToolingFailure { message: message.into() }
    }
}

/// Runtime settings of the adapter.
#[derive(Debug, Clone, Default)]
pub struct CompilerSettings {
    /// Parent of the per-compilation scratch directories; the system temp
    /// directory when unset.
    pub temp_root: Option<PathBuf>,
}

/// Maps language keys to backends.
pub struct CompilerRegistry {
    backends: HashMap<String, Box<dyn CompilerBackend>>,
    settings: CompilerSettings,
}

impl CompilerRegistry {
    /// A registry without any backend.
    pub fn new(settings: CompilerSettings) -> Self {
        Self { backends: HashMap::new(), settings }
    }

    /// A registry with the C# and VB backends.
    pub fn with_default_backends(settings: CompilerSettings) -> Self {
        let mut registry = Self::new(settings);
        registry.register(Language::CSharp.key(), Box::new(CSharpBackend));
        registry.register(Language::VisualBasic.key(), Box::new(VbBackend));
        registry
    }

    pub fn register(&mut self, language_key: impl Into<String>, backend: Box<dyn CompilerBackend>) {
        self.backends.insert(language_key.into(), backend);
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn compile(&self, request: &CompileRequest) -> CompileOutcome {
        let Some(backend) = self.backends.get(&request.language) else {
            return CompileOutcome::tooling(format!("Missing compiler for language '{}'", request.language));
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("ilsnip-");
        let dir = match &self.settings.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        let dir = match dir {
            Ok(dir) => dir,
            Err(err) => return CompileOutcome::tooling(format!("IoError :{}", err)),
        };
        log::debug!("compiling {} snippet in {}", request.language, dir.path().display());

        let options = option_string(request.optimize, request.include_debug_info);
        let job = CompileJob {
            source: &request.source_text,
            output_dir: dir.path(),
            options: &options,
            compiler_version: &request.compiler_version,
            references: REFERENCES,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| backend.compile(&job)));

        // `dir` is dropped, and deleted, on every path that returns without a handle.
        match result {
            Ok(Ok(output)) => match output.artifact {
                Some(path) if path.exists() => {
                    CompileOutcome::Success(ArtifactHandle::new(dir, path, output.diagnostics))
                }
                _ if !output.diagnostics.is_empty() => CompileOutcome::Diagnostics(output.diagnostics),
                _ => CompileOutcome::tooling(MISSING_ARTIFACT),
            },
            Ok(Err(err)) => {
                log::warn!("backend failed: {}", err);
                CompileOutcome::tooling(format!("{} :{}", err.kind(), err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::warn!("backend panicked: {}", message);
                CompileOutcome::tooling(format!("Panic :{}", message))
            }
        }
    }
}

impl Default for CompilerRegistry {
    fn default() -> Self {
        Self::with_default_backends(CompilerSettings::default())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOutput, CompileJob};
    use crate::core::error::BackendResult;
    use crate::frontend::Dialect;

    struct Panicking;

    impl CompilerBackend for Panicking {
        fn dialect(&self) -> Dialect {
            Dialect::Brace
        }

        fn compile(&self, _job: &CompileJob<'_>) -> BackendResult<BackendOutput> {
            panic!("boom")
        }
    }

    struct Silent;

    impl CompilerBackend for Silent {
        fn dialect(&self) -> Dialect {
            Dialect::Brace
        }

        fn compile(&self, _job: &CompileJob<'_>) -> BackendResult<BackendOutput> {
            Ok(BackendOutput::default())
        }
    }

    fn registry(root: &std::path::Path) -> CompilerRegistry {
        CompilerRegistry::new(CompilerSettings { temp_root: Some(root.to_path_buf()) })
    }

    #[test]
    fn language_keys() {
        assert_eq!(Language::from_key("VB"), Some(Language::VisualBasic));
        assert_eq!(Language::from_key("F#"), None);
        assert_eq!(Language::CSharp.to_string(), "C#");
    }

    #[test]
    fn panics_become_tooling_failures() {
        let root = tempfile::tempdir().unwrap();
        let mut registry = registry(root.path());
        registry.register("C#", Box::new(Panicking));
        let outcome = registry.compile(&CompileRequest::new("", Language::CSharp));
        match outcome {
            CompileOutcome::ToolingFailure { message } => assert_eq!(message, "Panic :boom"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn silent_backend_is_a_tooling_failure() {
        let root = tempfile::tempdir().unwrap();
        let mut registry = registry(root.path());
        registry.register("C#", Box::new(Silent));
        let outcome = registry.compile(&CompileRequest::new("", Language::CSharp));
        assert!(matches!(
            outcome,
            CompileOutcome::ToolingFailure { ref message } if message == MISSING_ARTIFACT
        ));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_version_names_the_error() {
        let root = tempfile::tempdir().unwrap();
        let registry = CompilerRegistry::with_default_backends(CompilerSettings {
            temp_root: Some(root.path().to_path_buf()),
        });
        let mut request = CompileRequest::new("class P {}", Language::CSharp);
        request.compiler_version = "v1.1".into();
        match registry.compile(&request) {
            CompileOutcome::ToolingFailure { message } => {
                assert_eq!(message, "UnknownCompilerVersion :Unknown compiler version 'v1.1'")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
