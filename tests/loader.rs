use ilsnip::compiler::{ArtifactHandle, CompileOutcome, CompileRequest, CompilerRegistry, CompilerSettings, Language};
use ilsnip::core::config::example_snippet;
use ilsnip::core::{LoadError, MetadataError};
use ilsnip::il::{codec, OpCode, CODE_RVA_BASE, CODE_SECTION, METADATA_SECTION};
use ilsnip::loader;
use object::write::{Object as WriteObject, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, Object, ObjectSection, ObjectSymbol, SectionKind, SymbolFlags,
    SymbolKind, SymbolScope,
};
use std::path::Path;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compile(root: &Path, source: &str, language: Language) -> ArtifactHandle {
    let registry = CompilerRegistry::with_default_backends(CompilerSettings { temp_root: Some(root.to_path_buf()) });
    match registry.compile(&CompileRequest::new(source, language)) {
        CompileOutcome::Success(handle) => handle,
        other => panic!("compilation failed: {:?}", other),
    }
}

#[test]
fn hello_world_round_trips() {
    init();
    let root = tempfile::tempdir().unwrap();
    let handle = compile(root.path(), example_snippet("C#").unwrap(), Language::CSharp);
    let module = loader::load(&handle).unwrap();

    let names: Vec<&str> = module.metadata.types.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["<Module>", "Program"]);
    assert_eq!(module.bodies.len(), 2);

    let main = module.body(0).unwrap();
    assert_eq!(main.rva, CODE_RVA_BASE);
    let ops: Vec<OpCode> = main.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(ops, vec![OpCode::Ldstr, OpCode::Call, OpCode::Ret]);

    let ctor = module.body(1).unwrap();
    assert!(ctor.rva > main.rva);
    assert_eq!((ctor.rva - CODE_RVA_BASE) % 4, 0);
}

#[test]
fn overloads_get_their_own_bodies() {
    init();
    let root = tempfile::tempdir().unwrap();
    let source = "class P {\n\
                  static int F(int a) { return a; }\n\
                  static int F(int a, int b) { return a + b; }\n\
                  static void Main() { System.Console.WriteLine(F(1) + F(2, 3)); }\n\
                  }";
    let handle = compile(root.path(), source, Language::CSharp);
    let module = loader::load(&handle).unwrap();
    let first: Vec<OpCode> = module.body(0).unwrap().instructions.iter().map(|i| i.opcode).collect();
    let second: Vec<OpCode> = module.body(1).unwrap().instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(first, vec![OpCode::Ldarg0, OpCode::Ret]);
    assert_eq!(second, vec![OpCode::Ldarg0, OpCode::Ldarg1, OpCode::Add, OpCode::Ret]);
}

#[test]
fn vb_module_is_a_sealed_standard_module() {
    init();
    let root = tempfile::tempdir().unwrap();
    let handle = compile(root.path(), example_snippet("VB").unwrap(), Language::VisualBasic);
    let module = loader::load(&handle).unwrap();
    let program = &module.metadata.types[1];
    assert!(program.flags.is_sealed);
    assert_eq!(program.custom_attributes.len(), 1);
    assert!(module.metadata.assembly_refs.iter().any(|r| r.name == "Microsoft.VisualBasic"));
}

#[test]
fn missing_artifact_is_an_io_error() {
    init();
    let root = tempfile::tempdir().unwrap();
    let err = loader::load_path(&root.path().join("nothing.dll")).unwrap_err();
    assert!(matches!(err, LoadError::Io(_)));
}

/// Rebuild `bytes` with its metadata passed through `edit`, keeping the code section and symbols.
fn with_metadata(bytes: &[u8], edit: impl FnOnce(&mut ilsnip::il::ModuleMetadata)) -> Vec<u8> {
    let file = object::File::parse(bytes).unwrap();
    let code = file.section_by_name(CODE_SECTION).unwrap();
    let mut meta = codec::decode(file.section_by_name(METADATA_SECTION).unwrap().data().unwrap()).unwrap();
    edit(&mut meta);

    let mut out = WriteObject::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let new_code = out.add_section(Vec::new(), CODE_SECTION.as_bytes().to_vec(), SectionKind::ReadOnlyData);
    let new_meta = out.add_section(Vec::new(), METADATA_SECTION.as_bytes().to_vec(), SectionKind::ReadOnlyData);
    out.append_section_data(new_code, code.data().unwrap(), 4);
    out.append_section_data(new_meta, &codec::encode(&meta), 1);
    for symbol in file.symbols().filter(|s| s.section_index() == Some(code.index()) && s.kind() == SymbolKind::Data) {
        out.add_symbol(Symbol {
            name: symbol.name().unwrap().as_bytes().to_vec(),
            value: symbol.address(),
            size: symbol.size(),
            kind: SymbolKind::Data,
            scope: SymbolScope::Compilation,
            weak: false,
            section: SymbolSection::Section(new_code),
            flags: SymbolFlags::None,
        });
    }
    out.write().unwrap()
}

#[test]
fn bad_enclosing_types_are_load_errors() {
    init();
    let root = tempfile::tempdir().unwrap();
    let handle = compile(root.path(), example_snippet("C#").unwrap(), Language::CSharp);
    let bytes = std::fs::read(handle.path()).unwrap();
    assert!(loader::load_bytes(&with_metadata(&bytes, |_| {})).is_ok());

    for enclosing in [42, 1] {
        let corrupt = with_metadata(&bytes, |meta| meta.types[1].enclosing = Some(enclosing));
        let err = loader::load_bytes(&corrupt).unwrap_err();
        assert!(
            matches!(err, LoadError::Metadata(MetadataError::BadEnclosingType { index: 1, enclosing: e }) if e == enclosing),
            "{:?}",
            err
        );
    }
}
