use ilsnip::compiler::{CompileOutcome, CompileRequest, CompilerRegistry, CompilerSettings, Language};
use ilsnip::core::config::example_snippet;
use ilsnip::core::RenderError;
use ilsnip::disasm::{render, RenderOptions, MODULE_BOILERPLATE};
use ilsnip::il::metadata::{
    AssemblyDef, FieldDef, MethodDef, MethodFlags, MethodSig, TableKind, TypeDef, TypeSig, Version, Visibility,
};
use ilsnip::il::{Instruction, MethodBody, Module, ModuleMetadata, OpCode, Operand, Token, CODE_RVA_BASE};
use ilsnip::loader;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compiled(source: &str, language: Language) -> Module {
    let root = tempfile::tempdir().unwrap();
    let registry = CompilerRegistry::with_default_backends(CompilerSettings { temp_root: Some(root.path().to_path_buf()) });
    match registry.compile(&CompileRequest::new(source, language)) {
        CompileOutcome::Success(handle) => loader::load(&handle).unwrap(),
        other => panic!("compilation failed: {:?}", other),
    }
}

fn metadata(types: Vec<TypeDef>) -> ModuleMetadata {
    ModuleMetadata {
        assembly: AssemblyDef {
            name: "snippet".into(),
            version: Version::default(),
            hash_algorithm: 0x8004,
            custom_attributes: Vec::new(),
        },
        module_name: "snippet.dll".into(),
        mvid: [0; 16],
        assembly_refs: Vec::new(),
        type_refs: Vec::new(),
        member_refs: Vec::new(),
        user_strings: Vec::new(),
        types,
    }
}

fn body(instructions: Vec<Instruction>) -> MethodBody {
    let code_size = instructions.last().map_or(0, Instruction::next_offset);
    MethodBody { rva: CODE_RVA_BASE, code_size, instructions }
}

fn program_with_body(instructions: Vec<Instruction>) -> Module {
    let mut program = TypeDef::module_placeholder();
    program.name = "Program".into();
    program.methods.push(MethodDef {
        name: "Main".into(),
        flags: MethodFlags {
            visibility: Visibility::Private,
            is_static: true,
            hide_by_sig: true,
            special_name: false,
            rt_special_name: false,
        },
        sig: MethodSig::new_static(TypeSig::Void, Vec::new()),
        param_names: Vec::new(),
        locals: Vec::new(),
        max_stack: 8,
        clauses: Vec::new(),
        custom_attributes: Vec::new(),
    });
    Module {
        metadata: metadata(vec![TypeDef::module_placeholder(), program]),
        bodies: vec![Some(body(instructions))],
    }
}

fn il_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| l.starts_with("IL_")).collect()
}

#[test]
fn hello_world_flat_listing() {
    init();
    let module = compiled(example_snippet("C#").unwrap(), Language::CSharp);
    let text = render(&module, RenderOptions { include_headers: false, detect_control_structures: false }).unwrap();
    assert!(text.starts_with(".class public auto ansi beforefieldinit Program\n"));
    let main: Vec<&str> = il_lines(&text).into_iter().take(3).collect();
    assert_eq!(
        main,
        vec![
            "IL_0000: ldstr \"Hello, MuchDifferent!\"",
            "IL_0005: call void [mscorlib]System.Console::WriteLine(string)",
            "IL_000a: ret",
        ]
    );
    assert!(text.contains("IL_0001: call instance void [mscorlib]System.Object::.ctor()"));
    assert!(text.contains("} // end of method Program::Main\n"));
}

#[test]
fn boilerplate_is_stripped_without_headers() {
    init();
    let module = compiled(example_snippet("VB").unwrap(), Language::VisualBasic);
    let text = render(&module, RenderOptions::default()).unwrap();
    assert!(!text.starts_with(MODULE_BOILERPLATE));
    assert!(!text.contains("'<Module>'"));
    assert!(text.starts_with(".class public auto ansi sealed Program\n"));
}

#[test]
fn headers_have_one_assembly_and_one_module_block() {
    init();
    let module = compiled(example_snippet("C#").unwrap(), Language::CSharp);
    let text = render(&module, RenderOptions { include_headers: true, detect_control_structures: true }).unwrap();
    let assembly_blocks = text
        .lines()
        .filter(|l| l.starts_with(".assembly ") && !l.starts_with(".assembly extern "))
        .count();
    let module_blocks = text.lines().filter(|l| l.starts_with(".module ")).count();
    assert_eq!(assembly_blocks, 1);
    assert_eq!(module_blocks, 1);
    assert!(text.starts_with(".assembly extern mscorlib\n"));
    assert!(text.contains("\t.publickeytoken = (\n\t\tb7 7a 5c 56 19 34 e0 89\n\t)\n\t.ver 4:0:0:0\n"));
    assert!(text.contains("}\n\n.module snippet.dll\n"));
    assert!(text.contains("// ILOnly\n\n\n.class private auto ansi '<Module>'\n"));
    assert!(text.contains(MODULE_BOILERPLATE));
}

#[test]
fn placeholder_with_members_is_kept() {
    init();
    let mut placeholder = TypeDef::module_placeholder();
    placeholder.fields.push(FieldDef {
        name: "counter".into(),
        visibility: Visibility::Assembly,
        is_static: true,
        sig: TypeSig::Int32,
    });
    let module = Module { metadata: metadata(vec![placeholder]), bodies: Vec::new() };
    let text = render(&module, RenderOptions::default()).unwrap();
    assert_eq!(
        text,
        ".class private auto ansi '<Module>'\n{\n\t// Fields\n\t.field assembly static int32 counter\n\n} // end of class <Module>\n\n"
    );
}

#[test]
fn rendering_is_deterministic() {
    init();
    let source = "using System; class P { static void Main() { for (int i = 0; i < 3; i++) { Console.WriteLine(i); } } }";
    let module = compiled(source, Language::CSharp);
    for options in [
        RenderOptions::default(),
        RenderOptions { include_headers: true, detect_control_structures: false },
    ] {
        assert_eq!(render(&module, options).unwrap(), render(&module, options).unwrap());
    }
}

#[test]
fn loops_are_structured() {
    init();
    let source = "class P { static void Main() { int i = 0; while (i < 10) { i++; } } }";
    let module = compiled(source, Language::CSharp);

    let structured = render(&module, RenderOptions::default()).unwrap();
    assert!(structured.contains("\t\twhile (true) // head: IL_0002\n\t\t{\n"));
    assert!(structured.contains("\t\t\tIL_0005: bge.s break\n"));
    assert!(structured.contains("\t\t\tIL_000b: br.s continue\n"));
    assert!(structured.contains("\t\t} // end while\n\t\tIL_000d: ret\n"));

    let flat = render(&module, RenderOptions { include_headers: false, detect_control_structures: false }).unwrap();
    assert!(flat.contains("IL_0005: bge.s IL_000d\n"));
    assert!(flat.contains("IL_000b: br.s IL_0002\n"));
    assert!(!flat.contains("while"));
    assert!(!flat.contains("if ("));
}

#[test]
fn conditional_break_stays_an_if_inside_the_loop() {
    init();
    let source = "class P { static void Main() { int n = 5; while (n > 0) { if (n == 3) break; n--; } } }";
    let text = render(&compiled(source, Language::CSharp), RenderOptions::default()).unwrap();
    assert!(text.contains("\t\twhile (true) // head: IL_0002\n"));
    assert!(text.contains(
        "\t\t\tIL_0008: bne.un.s endif\n\t\t\tif (IL_0008)\n\t\t\t{\n\t\t\t\tIL_000a: br.s break\n\t\t\t} // end if\n"
    ));

    let source = "Module M\nSub Main()\nFor i As Integer = 1 To 5\nIf i = 3 Then Exit For\nNext\nEnd Sub\nEnd Module\n";
    let text = render(&compiled(source, Language::VisualBasic), RenderOptions::default()).unwrap();
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let open = lines.iter().position(|l| l.starts_with("if (IL_")).unwrap();
    assert!(lines[open - 1].ends_with(" endif"));
    assert_eq!(lines[open + 1], "{");
    assert!(lines[open + 2].ends_with("br.s break"));
    assert_eq!(lines[open + 3], "} // end if");
}

#[test]
fn conditionals_are_structured() {
    init();
    let source = "using System; class P { static void Main(string[] args) {\n\
                  if (args.Length > 0) { Console.WriteLine(1); } else { Console.WriteLine(2); }\n\
                  } }";
    let module = compiled(source, Language::CSharp);
    let text = render(&module, RenderOptions::default()).unwrap();
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let open = lines.iter().position(|l| l.starts_with("if (IL_")).unwrap();
    assert!(lines[open - 1].ends_with(" else"));
    assert_eq!(lines[open + 1], "{");
    assert!(lines.contains(&"else"));
    assert!(lines.iter().any(|l| l.ends_with("br.s endif")));
    assert!(lines.contains(&"} // end if"));
}

#[test]
fn exception_regions_are_structured() {
    init();
    let source = "using System; class P { static void Main() { try { Console.WriteLine(1); } \
                  catch (Exception e) { Console.WriteLine(e.Message); } finally { Console.WriteLine(2); } } }";
    let module = compiled(source, Language::CSharp);
    let text = render(&module, RenderOptions::default()).unwrap();
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    assert_eq!(lines.iter().filter(|l| **l == ".try").count(), 2);
    assert_eq!(lines.iter().filter(|l| **l == "} // end .try").count(), 2);
    assert!(lines.contains(&"catch [mscorlib]System.Exception"));
    assert!(lines.contains(&"finally"));
    assert_eq!(lines.iter().filter(|l| **l == "} // end handler").count(), 2);

    let flat = render(&module, RenderOptions { include_headers: false, detect_control_structures: false }).unwrap();
    assert!(flat.contains(" catch [mscorlib]System.Exception handler IL_"));
    assert!(flat.contains(" finally handler IL_"));
}

#[test]
fn unknown_tokens_are_render_errors() {
    init();
    let module = program_with_body(vec![
        Instruction::new(0, OpCode::Call, Operand::Token(Token::new(TableKind::MemberRef, 4))),
        Instruction::new(5, OpCode::Ret, Operand::None),
    ]);
    let err = render(&module, RenderOptions::default()).unwrap_err();
    assert!(matches!(err, RenderError::UnknownToken { ref method, .. } if method == "Program::Main"));
}

#[test]
fn branches_into_instructions_are_render_errors() {
    init();
    let module = program_with_body(vec![
        Instruction::new(0, OpCode::BrS, Operand::Target(1)),
        Instruction::new(2, OpCode::Ret, Operand::None),
    ]);
    for detect_control_structures in [true, false] {
        let options = RenderOptions { include_headers: false, detect_control_structures };
        let err = render(&module, options).unwrap_err();
        assert!(matches!(err, RenderError::BadBranchTarget { offset: 0, target: 1, .. }));
    }
}
