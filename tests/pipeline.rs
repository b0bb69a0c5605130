use ilsnip::compiler::{CompileOutcome, CompileRequest, CompilerRegistry, CompilerSettings, Language};
use ilsnip::core::config::example_snippet;
use ilsnip::core::Severity;
use ilsnip::disasm::RenderOptions;
use ilsnip::pipeline::{FailureKind, Pipeline, PipelineResult};
use std::path::Path;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pipeline(root: &Path) -> Pipeline {
    Pipeline::new(CompilerRegistry::with_default_backends(CompilerSettings {
        temp_root: Some(root.to_path_buf()),
    }))
}

fn entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

const FLAT: RenderOptions = RenderOptions { include_headers: false, detect_control_structures: false };

#[test]
fn hello_world_listing() {
    init();
    let root = tempfile::tempdir().unwrap();
    let request = CompileRequest::new(example_snippet("C#").unwrap(), Language::CSharp);
    let PipelineResult::Il(text) = pipeline(root.path()).run(&request, FLAT) else {
        panic!("no listing");
    };
    assert!(text.contains("\t\tIL_0000: ldstr \"Hello, MuchDifferent!\"\n"));
    assert!(text.contains("\t\tIL_0005: call void [mscorlib]System.Console::WriteLine(string)\n"));
    assert!(text.contains("\t\tIL_000a: ret\n"));
    assert_eq!(entries(root.path()), 0);
}

#[test]
fn missing_semicolon_is_reported_as_a_diagnostic() {
    init();
    let root = tempfile::tempdir().unwrap();
    let source = "class P\n{\n    static void Main()\n    {\n        int x = 1\n    }\n}\n";
    let result = pipeline(root.path()).run(&CompileRequest::new(source, Language::CSharp), RenderOptions::default());
    let PipelineResult::Diagnostics(diagnostics) = &result else {
        panic!("expected diagnostics, got {:?}", result);
    };
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, Severity::Error);
    assert_eq!(diagnostics[0].code, "CS1002");
    assert_eq!(diagnostics[0].line, Some(5));
    let shown = result.present();
    assert!(shown.starts_with("Sorry, your code might be broken:\n\nLine 5 (Column "));
    assert!(shown.ends_with(") : error CS1002: ; expected"));
    assert_eq!(entries(root.path()), 0);
}

#[test]
fn flat_mode_keeps_raw_targets() {
    init();
    let root = tempfile::tempdir().unwrap();
    let source = "using System; class P { static void Main() { int i = 0; while (i < 3) { if (i == 1) { Console.WriteLine(i); } i++; } } }";
    let PipelineResult::Il(text) = pipeline(root.path()).run(&CompileRequest::new(source, Language::CSharp), FLAT) else {
        panic!("no listing");
    };
    assert!(!text.contains("while"));
    assert!(!text.contains("if ("));
    assert!(!text.contains(" break\n"));
    assert!(!text.contains(" continue\n"));
    let branches = text
        .lines()
        .map(str::trim)
        .filter(|l| l.contains(": b") && !l.contains(": box"))
        .collect::<Vec<_>>();
    assert!(!branches.is_empty());
    for line in branches {
        let target = line.rsplit(' ').next().unwrap();
        assert!(target.starts_with("IL_"), "{}", line);
    }
}

#[test]
fn loops_render_as_while_blocks() {
    init();
    let root = tempfile::tempdir().unwrap();
    let source = "Imports System\nModule Program\nSub Main()\nDim i As Integer = 0\nDo While i < 5\ni += 1\nLoop\nConsole.WriteLine(i)\nEnd Sub\nEnd Module\n";
    let result = pipeline(root.path()).run(&CompileRequest::new(source, Language::VisualBasic), RenderOptions::default());
    let PipelineResult::Il(text) = result else {
        panic!("no listing: {:?}", result);
    };
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let head = lines.iter().position(|l| l.starts_with("while (true) // head: IL_")).unwrap();
    assert_eq!(lines[head + 1], "{");
    let end = lines.iter().position(|l| *l == "} // end while").unwrap();
    assert!(end > head + 2);
    assert!(lines[head + 2..end].iter().all(|l| l.starts_with("IL_")));
}

#[test]
fn unregistered_language_is_a_tooling_failure() {
    init();
    let root = tempfile::tempdir().unwrap();
    let mut request = CompileRequest::new("printfn \"hi\"", Language::CSharp);
    request.language = "F#".into();
    let result = pipeline(root.path()).run(&request, RenderOptions::default());
    match &result {
        PipelineResult::Failure(failure) => {
            assert_eq!(failure.kind, FailureKind::Tooling);
            assert_eq!(failure.message, "Missing compiler for language 'F#'");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(result.present().starts_with("Uh oh, the compiler freaked out:\n\n"));
    assert_eq!(entries(root.path()), 0);
}

#[test]
fn vanished_artifact_is_a_load_failure() {
    init();
    let root = tempfile::tempdir().unwrap();
    let registry = CompilerRegistry::with_default_backends(CompilerSettings { temp_root: Some(root.path().to_path_buf()) });
    let request = CompileRequest::new(example_snippet("C#").unwrap(), Language::CSharp);
    let CompileOutcome::Success(handle) = registry.compile(&request) else {
        panic!("example did not compile");
    };
    let scratch = handle.scratch_dir().to_path_buf();
    std::fs::remove_file(handle.path()).unwrap();

    let result = Pipeline::finish(handle, RenderOptions::default());
    match &result {
        PipelineResult::Failure(failure) => assert_eq!(failure.kind, FailureKind::Load),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(result.present().starts_with("Uh oh, the loader freaked out:\n\nLoadError :"));
    assert!(!scratch.exists());
    assert_eq!(entries(root.path()), 0);
}

#[test]
fn runs_are_idempotent() {
    init();
    let root = tempfile::tempdir().unwrap();
    let pipeline = pipeline(root.path());
    let source = "using System; class P { static int Twice(int n) { return n * 2; } \
                  static void Main() { try { Console.WriteLine(Twice(21)); } finally { Console.WriteLine(\"done\"); } } }";
    let options = RenderOptions { include_headers: true, detect_control_structures: true };
    for language_source in [(source, Language::CSharp), (example_snippet("VB").unwrap(), Language::VisualBasic)] {
        let request = CompileRequest::new(language_source.0, language_source.1);
        let first = pipeline.run(&request, options);
        assert!(matches!(first, PipelineResult::Il(_)), "{:?}", first);
        assert_eq!(first, pipeline.run(&request, options));
    }

    let broken = CompileRequest::new("class P { void M() { undefined(); } }", Language::CSharp);
    assert_eq!(pipeline.run(&broken, options), pipeline.run(&broken, options));
    assert_eq!(entries(root.path()), 0);
}
