// This module contains the in-process compiler backends. A backend receives a CompileJob
// (source text, scratch directory, option string, compiler version and reference set),
// writes the source to the scratch directory, parses it with the front end of its dialect,
// binds and generates code through the shared code generator, and writes the artifact and,
// under /debug, a symbol file. Problems in user source come back as diagnostics; only
// failures of the backend itself are errors. Both backends share one driver and differ only
// in their dialect.

//! Compiler backends.
//!
//! - [`library`] - the framework surface programs can call
//! - [`binder`] - declarations, name lookup and external references
//! - [`emitter`] - labels, stack tracking and branch sizing for one body
//! - [`codegen`] - type checking and CIL generation
//! - [`assembler`] / [`symbols`] - artifact and symbol file writers

pub mod assembler;
pub mod binder;
pub mod codegen;
pub mod emitter;
pub mod library;
pub mod options;
pub mod symbols;

use crate::core::config::{mscorlib_version, ASSEMBLY_NAME};
use crate::core::diagnostic::Diagnostic;
use crate::core::error::{BackendError, BackendResult};
use crate::core::session::CompilationSession;
use crate::frontend::{csharp, vb, Dialect, DiagnosticSink};
use binder::GenOptions;
use bumpalo::Bump;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Reference that enables the Basic runtime helpers.
const VISUAL_BASIC_RUNTIME: &str = "Microsoft.VisualBasic.dll";

/// Compiler version without implicitly typed locals.
const NO_INFERENCE_VERSION: &str = "v2.0";

/// Everything a backend needs for one compilation.
#[derive(Debug, Clone, Copy)]
pub struct CompileJob<'j> {
    pub source: &'j str,
    /// Scratch directory owned by the caller; every file goes here.
    pub output_dir: &'j Path,
    pub options: &'j str,
    pub compiler_version: &'j str,
    pub references: &'j [&'j str],
}

/// What a backend run produced.
#[derive(Debug, Default)]
pub struct BackendOutput {
    /// Path of the written module, absent when compilation failed.
    pub artifact: Option<PathBuf>,
    /// Diagnostics in emission order.
    pub diagnostics: Vec<Diagnostic>,
}

/// A compiler for one source language.
pub trait CompilerBackend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Compile `job`. `Err` means the backend itself failed.
    fn compile(&self, job: &CompileJob<'_>) -> BackendResult<BackendOutput>;
}

/// In-process C# compiler.
#[derive(Debug, Default, Clone, Copy)]
pub struct CSharpBackend;

impl CompilerBackend for CSharpBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Brace
    }

    fn compile(&self, job: &CompileJob<'_>) -> BackendResult<BackendOutput> {
        compile_source(Dialect::Brace, job)
    }
}

/// In-process Visual Basic compiler.
#[derive(Debug, Default, Clone, Copy)]
pub struct VbBackend;

impl CompilerBackend for VbBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Basic
    }

    fn compile(&self, job: &CompileJob<'_>) -> BackendResult<BackendOutput> {
        compile_source(Dialect::Basic, job)
    }
}

fn compile_source(dialect: Dialect, job: &CompileJob<'_>) -> BackendResult<BackendOutput> {
    let mscorlib = mscorlib_version(job.compiler_version)
        .ok_or_else(|| BackendError::UnknownCompilerVersion(job.compiler_version.to_string()))?;

    let source_name = format!("{}.{}", ASSEMBLY_NAME, dialect.source_extension());
    std::fs::write(job.output_dir.join(&source_name), job.source)?;

    let mut sink = DiagnosticSink::new(dialect, source_name);
    let cmd = options::parse(job.options, dialect, &mut sink);
    if sink.has_errors() {
        return Ok(BackendOutput { artifact: None, diagnostics: sink.into_diagnostics() });
    }

    let arena = Bump::new();
    let mut session = CompilationSession::new(&arena);
    let unit = match dialect {
        Dialect::Brace => csharp::parse(job.source, &session, &mut sink),
        Dialect::Basic => vb::parse(job.source, &session, &mut sink),
    };
    let Some(unit) = unit.filter(|_| !sink.has_errors()) else {
        log::debug!("parsing stopped with {} errors", sink.error_count());
        return Ok(BackendOutput { artifact: None, diagnostics: sink.into_diagnostics() });
    };

    let gen = GenOptions {
        optimize: cmd.optimize,
        debug: cmd.debug,
        infer_locals: job.compiler_version != NO_INFERENCE_VERSION,
        mscorlib,
        visual_basic_runtime: job.references.contains(&VISUAL_BASIC_RUNTIME),
    };
    let mvid = module_version_id(job);
    let image = codegen::generate(unit, &mut session, dialect, gen, mvid, &mut sink)?;
    log::debug!("{}", session.stats());

    let artifact = match image {
        Some(image) if !sink.has_errors() => {
            let path = job.output_dir.join(format!("{}.dll", ASSEMBLY_NAME));
            assembler::write_artifact(&image, &path)?;
            if cmd.debug {
                symbols::write_symbols(&image, &job.output_dir.join(format!("{}.pdb", ASSEMBLY_NAME)))?;
            }
            Some(path)
        }
        _ => None,
    };
    Ok(BackendOutput { artifact, diagnostics: sink.into_diagnostics() })
}

/// Module version id derived from the job so equal inputs give equal modules.
fn module_version_id(job: &CompileJob<'_>) -> [u8; 16] {
    let mut mvid = [0u8; 16];
    for (half, salt) in mvid.chunks_mut(8).zip([0u8, 1]) {
        let mut hasher = DefaultHasher::new();
        salt.hash(&mut hasher);
        job.source.hash(&mut hasher);
        job.options.hash(&mut hasher);
        job.compiler_version.hash(&mut hasher);
        half.copy_from_slice(&hasher.finish().to_le_bytes());
    }
    mvid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{example_snippet, REFERENCES};
    use crate::core::Severity;
    use object::{Object, ObjectSection};

    fn job<'j>(source: &'j str, dir: &'j Path, version: &'j str) -> CompileJob<'j> {
        CompileJob { source, output_dir: dir, options: "/unsafe /o+", compiler_version: version, references: REFERENCES }
    }

    #[test]
    fn csharp_example_produces_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let src = example_snippet("C#").unwrap();
        let out = CSharpBackend.compile(&job(src, dir.path(), "v4.0")).unwrap();
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        let path = out.artifact.unwrap();
        assert!(dir.path().join("snippet.cs").exists());

        let bytes = std::fs::read(path).unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        assert!(file.section_by_name(".il").is_some());
        assert!(file.section_by_name(".ilmeta").unwrap().data().unwrap().starts_with(b"BSJB"));
        assert!(file.symbol_by_name("Program::Main").is_some());
    }

    #[test]
    fn vb_reports_unsafe_and_compiles() {
        let dir = tempfile::tempdir().unwrap();
        let src = example_snippet("VB").unwrap();
        let out = VbBackend.compile(&job(src, dir.path(), "v4.0")).unwrap();
        assert!(out.artifact.is_some());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].severity, Severity::Warning);
        assert_eq!(out.diagnostics[0].code, "BC2007");
    }

    #[test]
    fn syntax_error_has_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let src = "class P { static void Main() { int x = 1 } }";
        let out = CSharpBackend.compile(&job(src, dir.path(), "v4.0")).unwrap();
        assert!(out.artifact.is_none());
        assert_eq!(out.diagnostics[0].code, "CS1002");
        assert!(!dir.path().join("snippet.dll").exists());
    }

    #[test]
    fn var_needs_a_newer_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let src = "class P { static void Main() { var x = 1; System.Console.WriteLine(x); } }";
        let out = CSharpBackend.compile(&job(src, dir.path(), "v2.0")).unwrap();
        assert_eq!(out.diagnostics[0].code, "CS0246");
        let out = CSharpBackend.compile(&job(src, dir.path(), "v3.5")).unwrap();
        assert!(out.artifact.is_some(), "{:?}", out.diagnostics);
    }

    #[test]
    fn unknown_version_is_a_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CSharpBackend.compile(&job("", dir.path(), "v9.9")).unwrap_err();
        assert!(matches!(err, BackendError::UnknownCompilerVersion(_)));
    }

    #[test]
    fn debug_writes_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let src = example_snippet("C#").unwrap();
        let job = CompileJob { options: "/unsafe /o- /debug", ..job(src, dir.path(), "v4.0") };
        let out = CSharpBackend.compile(&job).unwrap();
        assert!(out.artifact.is_some());
        let pdb = std::fs::read_to_string(dir.path().join("snippet.pdb")).unwrap();
        assert!(pdb.starts_with("method Program::Main\n"));
    }

    #[test]
    fn module_ids_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = module_version_id(&job("x", dir.path(), "v4.0"));
        assert_eq!(a, module_version_id(&job("x", dir.path(), "v4.0")));
        assert_ne!(a, module_version_id(&job("y", dir.path(), "v4.0")));
    }
}
