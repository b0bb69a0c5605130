use ilsnip::compiler::{CompileOutcome, CompileRequest, CompilerRegistry, CompilerSettings, Language};
use ilsnip::core::config::example_snippet;
use ilsnip::core::Severity;
use std::path::Path;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn registry(root: &Path) -> CompilerRegistry {
    CompilerRegistry::with_default_backends(CompilerSettings { temp_root: Some(root.to_path_buf()) })
}

fn entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

#[test]
fn example_compiles_in_both_languages() {
    init();
    let root = tempfile::tempdir().unwrap();
    let registry = registry(root.path());
    for &language in Language::ALL {
        let request = CompileRequest::new(example_snippet(language.key()).unwrap(), language);
        match registry.compile(&request) {
            CompileOutcome::Success(handle) => {
                assert!(handle.path().exists());
                assert!(handle.path().starts_with(root.path()));
                handle.release().unwrap();
            }
            other => panic!("{} example did not compile: {:?}", language, other),
        }
    }
    assert_eq!(entries(root.path()), 0);
}

#[test]
fn vb_unsafe_warning_travels_with_the_handle() {
    init();
    let root = tempfile::tempdir().unwrap();
    let request = CompileRequest::new(example_snippet("VB").unwrap(), Language::VisualBasic);
    let CompileOutcome::Success(handle) = registry(root.path()).compile(&request) else {
        panic!("VB example did not compile");
    };
    assert_eq!(handle.warnings().len(), 1);
    assert_eq!(handle.warnings()[0].severity, Severity::Warning);
}

#[test]
fn missing_semicolon_is_one_positioned_error() {
    init();
    let root = tempfile::tempdir().unwrap();
    let source = "class P\n{\n    static void Main()\n    {\n        int x = 1\n    }\n}\n";
    let outcome = registry(root.path()).compile(&CompileRequest::new(source, Language::CSharp));
    let CompileOutcome::Diagnostics(diagnostics) = outcome else {
        panic!("expected diagnostics, got {:?}", outcome);
    };
    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics[0];
    assert_eq!(diagnostic.severity, Severity::Error);
    assert_eq!(diagnostic.code, "CS1002");
    assert_eq!(diagnostic.line, Some(5));
    assert!(diagnostic.column.is_some());
    assert_eq!(diagnostic.file_name.as_deref(), Some("snippet.cs"));
    assert_eq!(entries(root.path()), 0);
}

#[test]
fn diagnostics_are_repeatable() {
    init();
    let root = tempfile::tempdir().unwrap();
    let registry = registry(root.path());
    let request = CompileRequest::new("class P { static void Main() { y = 1; } }", Language::CSharp);
    let first = registry.compile(&request);
    let second = registry.compile(&request);
    match (first, second) {
        (CompileOutcome::Diagnostics(a), CompileOutcome::Diagnostics(b)) => assert_eq!(a, b),
        other => panic!("expected diagnostics twice, got {:?}", other),
    }
}

#[test]
fn unregistered_language_is_a_tooling_failure() {
    init();
    let root = tempfile::tempdir().unwrap();
    let mut request = CompileRequest::new("let x = 1", Language::CSharp);
    request.language = "F#".into();
    match registry(root.path()).compile(&request) {
        CompileOutcome::ToolingFailure { message } => {
            assert_eq!(message, "Missing compiler for language 'F#'");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(entries(root.path()), 0);
}

#[test]
fn empty_registry_knows_no_language() {
    init();
    let root = tempfile::tempdir().unwrap();
    let registry = CompilerRegistry::new(CompilerSettings { temp_root: Some(root.path().to_path_buf()) });
    let request = CompileRequest::new(example_snippet("C#").unwrap(), Language::CSharp);
    assert!(matches!(registry.compile(&request), CompileOutcome::ToolingFailure { .. }));
    assert_eq!(entries(root.path()), 0);
}
