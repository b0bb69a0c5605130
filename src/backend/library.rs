//! The slice of the base class library the bundled compilers know about.
//!
//! Member signatures are static data; the code generator turns the ones a
//! program uses into TypeRef/MemberRef rows on first use.

use crate::frontend::Dialect;
use crate::il::metadata::Version;

/// Semantic type of an expression or declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty<'a> {
    Void,
    Bool,
    Int,
    String,
    Object,
    /// Type of the `null` / `Nothing` literal.
    Null,
    /// A library class other than the primitive ones.
    Lib(LibClass),
    /// A class defined by the program, by TypeDef index.
    Class(usize),
    Array(&'a Ty<'a>),
    /// Result of an expression that already produced a diagnostic.
    Error,
}

impl<'a> Ty<'a> {
    pub fn is_reference(self) -> bool {
        matches!(self, Ty::String | Ty::Object | Ty::Null | Ty::Lib(_) | Ty::Class(_) | Ty::Array(_))
    }

    /// Name used in diagnostics; user classes are named by the caller.
    pub fn display(self, dialect: Dialect) -> String {
        match (dialect, self) {
            (_, Ty::Array(elem)) => match dialect {
                Dialect::Brace => format!("{}[]", elem.display(dialect)),
                Dialect::Basic => format!("{}()", elem.display(dialect)),
            },
            (_, Ty::Lib(class)) => class.full_name(),
            (_, Ty::Class(index)) => format!("class #{}", index),
            (_, Ty::Error) => "?".into(),
            (Dialect::Brace, ty) => match ty {
                Ty::Void => "void",
                Ty::Bool => "bool",
                Ty::Int => "int",
                Ty::String => "string",
                Ty::Object => "object",
                _ => "<null>",
            }
            .into(),
            (Dialect::Basic, ty) => match ty {
                Ty::Void => "Void",
                Ty::Bool => "Boolean",
                Ty::Int => "Integer",
                Ty::String => "String",
                Ty::Object => "Object",
                _ => "Nothing",
            }
            .into(),
        }
    }
}

/// Assembly a library type lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibAssembly {
    Mscorlib,
    VisualBasic,
}

impl LibAssembly {
    pub fn name(self) -> &'static str {
        match self {
            LibAssembly::Mscorlib => "mscorlib",
            LibAssembly::VisualBasic => "Microsoft.VisualBasic",
        }
    }

    /// File name in the reference set.
    pub fn file_name(self) -> &'static str {
        match self {
            LibAssembly::Mscorlib => "mscorlib.dll",
            LibAssembly::VisualBasic => "Microsoft.VisualBasic.dll",
        }
    }

    pub fn public_key_token(self) -> [u8; 8] {
        match self {
            LibAssembly::Mscorlib => crate::core::config::ECMA_PUBLIC_KEY_TOKEN,
            LibAssembly::VisualBasic => [0xB0, 0x3F, 0x5F, 0x7F, 0x11, 0xD5, 0x0A, 0x3A],
        }
    }

    /// Version referenced when compiling against the given `mscorlib`.
    pub fn version(self, mscorlib: Version) -> Version {
        match self {
            LibAssembly::Mscorlib => mscorlib,
            LibAssembly::VisualBasic if mscorlib.major >= 4 => Version::new(10, 0, 0, 0),
            LibAssembly::VisualBasic => Version::new(8, 0, 0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibClass {
    Object,
    String,
    Int32,
    Boolean,
    Console,
    Math,
    Exception,
    CompilationRelaxationsAttribute,
    RuntimeCompatibilityAttribute,
    StandardModuleAttribute,
}

impl LibClass {
    pub const ALL: &'static [LibClass] = &[
        LibClass::Object,
        LibClass::String,
        LibClass::Int32,
        LibClass::Boolean,
        LibClass::Console,
        LibClass::Math,
        LibClass::Exception,
        LibClass::CompilationRelaxationsAttribute,
        LibClass::RuntimeCompatibilityAttribute,
        LibClass::StandardModuleAttribute,
    ];

    pub fn namespace(self) -> &'static str {
        match self {
            LibClass::CompilationRelaxationsAttribute | LibClass::RuntimeCompatibilityAttribute => {
                "System.Runtime.CompilerServices"
            }
            LibClass::StandardModuleAttribute => "Microsoft.VisualBasic.CompilerServices",
            _ => "System",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LibClass::Object => "Object",
            LibClass::String => "String",
            LibClass::Int32 => "Int32",
            LibClass::Boolean => "Boolean",
            LibClass::Console => "Console",
            LibClass::Math => "Math",
            LibClass::Exception => "Exception",
            LibClass::CompilationRelaxationsAttribute => "CompilationRelaxationsAttribute",
            LibClass::RuntimeCompatibilityAttribute => "RuntimeCompatibilityAttribute",
            LibClass::StandardModuleAttribute => "StandardModuleAttribute",
        }
    }

    pub fn full_name(self) -> String {
        format!("{}.{}", self.namespace(), self.name())
    }

    pub fn assembly(self) -> LibAssembly {
        match self {
            LibClass::StandardModuleAttribute => LibAssembly::VisualBasic,
            _ => LibAssembly::Mscorlib,
        }
    }

    /// Classes a program may name in source.
    fn is_nameable(self) -> bool {
        matches!(
            self,
            LibClass::Object
                | LibClass::String
                | LibClass::Int32
                | LibClass::Boolean
                | LibClass::Console
                | LibClass::Math
                | LibClass::Exception
        )
    }

    /// Find a class by a name as written in source. `imports` are the
    /// namespaces opened by `using` / `Imports`.
    pub fn lookup(name: &str, imports: &[&str], dialect: Dialect) -> Option<LibClass> {
        let eq = |a: &str, b: &str| match dialect {
            Dialect::Brace => a == b,
            Dialect::Basic => a.eq_ignore_ascii_case(b),
        };
        LibClass::ALL.iter().copied().filter(|c| c.is_nameable()).find(|class| {
            eq(name, &class.full_name())
                || (eq(name, class.name()) && imports.iter().any(|ns| eq(ns, class.namespace())))
        })
    }

    /// Map the primitive classes onto their built-in types.
    pub fn as_ty(self) -> Ty<'static> {
        match self {
            LibClass::Object => Ty::Object,
            LibClass::String => Ty::String,
            LibClass::Int32 => Ty::Int,
            LibClass::Boolean => Ty::Bool,
            other => Ty::Lib(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Static,
    /// Instance method, always called with `callvirt`.
    Instance,
    Ctor,
}

/// A library method signature.
#[derive(Debug)]
pub struct LibMethod {
    pub class: LibClass,
    pub name: &'static str,
    pub kind: CallKind,
    pub ret: Ty<'static>,
    pub params: &'static [Ty<'static>],
}

const fn m(
    class: LibClass,
    name: &'static str,
    kind: CallKind,
    ret: Ty<'static>,
    params: &'static [Ty<'static>],
) -> LibMethod {
    LibMethod { class, name, kind, ret, params }
}

use CallKind::{Ctor, Instance, Static};
use LibClass as C;

/// Overloads are listed in preference order.
pub static METHODS: &[LibMethod] = &[
    m(C::Console, "WriteLine", Static, Ty::Void, &[]),
    m(C::Console, "WriteLine", Static, Ty::Void, &[Ty::String]),
    m(C::Console, "WriteLine", Static, Ty::Void, &[Ty::Int]),
    m(C::Console, "WriteLine", Static, Ty::Void, &[Ty::Bool]),
    m(C::Console, "WriteLine", Static, Ty::Void, &[Ty::Object]),
    m(C::Console, "Write", Static, Ty::Void, &[Ty::String]),
    m(C::Console, "Write", Static, Ty::Void, &[Ty::Int]),
    m(C::Console, "Write", Static, Ty::Void, &[Ty::Bool]),
    m(C::Console, "Write", Static, Ty::Void, &[Ty::Object]),
    m(C::Console, "ReadLine", Static, Ty::String, &[]),
    m(C::Math, "Max", Static, Ty::Int, &[Ty::Int, Ty::Int]),
    m(C::Math, "Min", Static, Ty::Int, &[Ty::Int, Ty::Int]),
    m(C::Math, "Abs", Static, Ty::Int, &[Ty::Int]),
    m(C::String, "Concat", Static, Ty::String, &[Ty::String, Ty::String]),
    m(C::String, "Concat", Static, Ty::String, &[Ty::String, Ty::String, Ty::String]),
    m(C::String, "Concat", Static, Ty::String, &[Ty::Object, Ty::Object]),
    m(C::String, "IsNullOrEmpty", Static, Ty::Bool, &[Ty::String]),
    m(C::String, "op_Equality", Static, Ty::Bool, &[Ty::String, Ty::String]),
    m(C::String, "op_Inequality", Static, Ty::Bool, &[Ty::String, Ty::String]),
    m(C::String, "get_Length", Instance, Ty::Int, &[]),
    m(C::String, "ToUpper", Instance, Ty::String, &[]),
    m(C::String, "ToLower", Instance, Ty::String, &[]),
    m(C::Int32, "Parse", Static, Ty::Int, &[Ty::String]),
    m(C::Object, ".ctor", Ctor, Ty::Void, &[]),
    m(C::Object, "ToString", Instance, Ty::String, &[]),
    m(C::Exception, ".ctor", Ctor, Ty::Void, &[]),
    m(C::Exception, ".ctor", Ctor, Ty::Void, &[Ty::String]),
    m(C::Exception, "get_Message", Instance, Ty::String, &[]),
    m(C::CompilationRelaxationsAttribute, ".ctor", Ctor, Ty::Void, &[Ty::Int]),
    m(C::RuntimeCompatibilityAttribute, ".ctor", Ctor, Ty::Void, &[]),
    m(C::StandardModuleAttribute, ".ctor", Ctor, Ty::Void, &[]),
];

/// Index into [`METHODS`].
pub type LibMethodId = usize;

/// Candidate overloads of `class::name`, in preference order. Instance
/// lookups also see the members every object has.
pub fn overloads(class: LibClass, name: &str, kind: CallKind, dialect: Dialect) -> Vec<LibMethodId> {
    let eq = |a: &str, b: &str| match dialect {
        Dialect::Brace => a == b,
        Dialect::Basic => a.eq_ignore_ascii_case(b),
    };
    let own = METHODS
        .iter()
        .enumerate()
        .filter(|(_, method)| method.class == class && method.kind == kind && eq(method.name, name))
        .map(|(id, _)| id);
    let inherited = METHODS
        .iter()
        .enumerate()
        .filter(|(_, method)| {
            kind == CallKind::Instance
                && class != LibClass::Object
                && method.class == LibClass::Object
                && method.kind == kind
                && eq(method.name, name)
        })
        .map(|(id, _)| id);
    own.chain(inherited).collect()
}

/// The constructor `class::.ctor(params)`.
pub fn ctor(class: LibClass, params: &[Ty<'_>]) -> Option<LibMethodId> {
    METHODS
        .iter()
        .position(|method| method.class == class && method.kind == CallKind::Ctor && method.params == params)
}

/// `CompilationRelaxations(8)`.
pub const COMPILATION_RELAXATIONS_BLOB: &[u8] = &[0x01, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];

/// `RuntimeCompatibility(WrapNonExceptionThrows = true)`.
pub const RUNTIME_COMPATIBILITY_BLOB: &[u8] = &[
    0x01, 0x00, 0x01, 0x00, 0x54, 0x02, 0x16, 0x57, 0x72, 0x61, 0x70, 0x4E, 0x6F, 0x6E, 0x45, 0x78, 0x63,
    0x65, 0x70, 0x74, 0x69, 0x6F, 0x6E, 0x54, 0x68, 0x72, 0x6F, 0x77, 0x73, 0x01,
];

/// Attribute with no arguments.
pub const EMPTY_ATTRIBUTE_BLOB: &[u8] = &[0x01, 0x00, 0x00, 0x00];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_respects_imports_and_case() {
        assert_eq!(LibClass::lookup("Console", &["System"], Dialect::Brace), Some(LibClass::Console));
        assert_eq!(LibClass::lookup("Console", &[], Dialect::Brace), None);
        assert_eq!(LibClass::lookup("System.Console", &[], Dialect::Brace), Some(LibClass::Console));
        assert_eq!(LibClass::lookup("console", &["system"], Dialect::Basic), Some(LibClass::Console));
        assert_eq!(LibClass::lookup("console", &["System"], Dialect::Brace), None);
        assert_eq!(LibClass::lookup("StandardModuleAttribute", &["Microsoft.VisualBasic.CompilerServices"], Dialect::Basic), None);
    }

    #[test]
    fn overloads_in_preference_order() {
        let ids = overloads(LibClass::Console, "WriteLine", CallKind::Static, Dialect::Brace);
        let params: Vec<_> = ids.iter().map(|&id| METHODS[id].params).collect();
        assert_eq!(params[1], &[Ty::String]);
        assert_eq!(params.last().copied(), Some(&[Ty::Object][..]));
        let to_string = overloads(LibClass::Exception, "ToString", CallKind::Instance, Dialect::Brace);
        assert_eq!(METHODS[to_string[0]].class, LibClass::Object);
    }

    #[test]
    fn constructors_by_signature() {
        let id = ctor(LibClass::Exception, &[Ty::String]).unwrap();
        assert_eq!(METHODS[id].params, &[Ty::String]);
        assert!(ctor(LibClass::Console, &[]).is_none());
    }

    #[test]
    fn display_names_per_dialect() {
        let strings = Ty::Array(&Ty::String);
        assert_eq!(strings.display(Dialect::Brace), "string[]");
        assert_eq!(strings.display(Dialect::Basic), "String()");
        assert_eq!(Ty::Int.display(Dialect::Basic), "Integer");
    }
}
