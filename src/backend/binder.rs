//! Declaration binding: the program's types and members, name lookup, and
//! the reference tables (AssemblyRef, TypeRef, MemberRef, user strings)
//! that grow as method bodies use library members.

use super::library::{LibAssembly, LibClass, LibMethodId, Ty, METHODS};
use crate::frontend::ast::{self, Access, Pos, TypeKind, TypeName};
use crate::frontend::messages::{DiagnosticSink, Message};
use crate::frontend::Dialect;
use crate::il::metadata::{
    AssemblyRef, MemberRef, MethodSig, TableKind, Token, TypeRef, TypeSig, Version, Visibility, MODULE_TYPE_NAME,
};
use bumpalo::Bump;
use hashbrown::HashMap;

/// Settings that change generated code.
#[derive(Debug, Clone, Copy)]
pub struct GenOptions {
    pub optimize: bool,
    pub debug: bool,
    /// `var` / `Dim x = …` infer the local's type (compiler v3.5 and later).
    pub infer_locals: bool,
    pub mscorlib: Version,
    /// `Microsoft.VisualBasic.dll` is among the references.
    pub visual_basic_runtime: bool,
}

pub fn same_name(dialect: Dialect, a: &str, b: &str) -> bool {
    match dialect {
        Dialect::Brace => a == b,
        Dialect::Basic => a.eq_ignore_ascii_case(b),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MethodSource<'a> {
    User(&'a ast::MethodDecl<'a>),
    /// Compiler-provided instance constructor.
    Ctor,
    /// Compiler-provided type initializer.
    Cctor,
}

#[derive(Debug)]
pub struct FieldInfo<'a> {
    pub name: &'a str,
    pub ty: Ty<'a>,
    pub is_static: bool,
    pub visibility: Visibility,
    pub decl: &'a ast::FieldDecl<'a>,
    pub row: usize,
}

#[derive(Debug)]
pub struct MethodInfo<'a> {
    pub name: &'a str,
    pub ret: Ty<'a>,
    pub params: Vec<Ty<'a>>,
    pub param_names: Vec<&'a str>,
    pub is_static: bool,
    pub visibility: Visibility,
    pub source: MethodSource<'a>,
    pub row: usize,
}

impl MethodInfo<'_> {
    pub fn token(&self) -> Token {
        Token::new(TableKind::MethodDef, self.row)
    }
}

#[derive(Debug)]
pub struct TypeInfo<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub kind: TypeKind,
    pub visibility: Visibility,
    pub enclosing: Option<usize>,
    /// `None` for the `<Module>` placeholder.
    pub decl: Option<&'a ast::TypeDecl<'a>>,
    pub fields: Vec<FieldInfo<'a>>,
    pub methods: Vec<MethodInfo<'a>>,
}

impl TypeInfo<'_> {
    /// Static classes and Basic modules cannot be instantiated.
    pub fn is_static(&self) -> bool {
        matches!(self.kind, TypeKind::StaticClass | TypeKind::Module)
    }
}

/// Everything known about the program before method bodies are compiled.
pub struct Env<'a> {
    pub dialect: Dialect,
    pub options: GenOptions,
    pub imports: Vec<&'a str>,
    /// Indexed by TypeDef row; entry 0 is `<Module>`.
    pub types: Vec<TypeInfo<'a>>,
    arena: &'a Bump,
}

impl<'a> Env<'a> {
    /// Declare every type and member of `unit`.
    pub fn declare(
        unit: &'a ast::CompilationUnit<'a>,
        dialect: Dialect,
        options: GenOptions,
        arena: &'a Bump,
        sink: &mut DiagnosticSink,
    ) -> Self {
        let mut env = Env {
            dialect,
            options,
            imports: unit.imports.iter().map(|i| i.namespace).collect(),
            types: vec![TypeInfo {
                namespace: "",
                name: MODULE_TYPE_NAME,
                kind: TypeKind::Class,
                visibility: Visibility::Private,
                enclosing: None,
                decl: None,
                fields: Vec::new(),
                methods: Vec::new(),
            }],
            arena,
        };
        for decl in unit.types {
            env.declare_type(decl, None, sink);
        }
        for index in 1..env.types.len() {
            env.declare_members(index, sink);
        }
        env.number_rows();
        log::debug!("declared {} types", env.types.len() - 1);
        env
    }

    fn declare_type(&mut self, decl: &'a ast::TypeDecl<'a>, enclosing: Option<usize>, sink: &mut DiagnosticSink) {
        let duplicate = self.types.iter().any(|t| {
            t.enclosing == enclosing
                && same_name(self.dialect, t.namespace, decl.namespace)
                && same_name(self.dialect, t.name, decl.name)
        });
        if duplicate {
            let container = match enclosing {
                Some(outer) => self.types[outer].name.to_string(),
                None if decl.namespace.is_empty() => "<global namespace>".to_string(),
                None => decl.namespace.to_string(),
            };
            sink.report(decl.pos, Message::DuplicateMember { ty: container, name: decl.name.to_string() });
        }
        let index = self.types.len();
        let default_access = match (self.dialect, enclosing) {
            (Dialect::Brace, Some(_)) => Access::Private,
            (Dialect::Basic, Some(_)) => Access::Public,
            (_, None) => Access::Internal,
        };
        self.types.push(TypeInfo {
            namespace: decl.namespace,
            name: decl.name,
            kind: decl.kind,
            visibility: visibility(decl.access.unwrap_or(default_access)),
            enclosing,
            decl: Some(decl),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        for nested in decl.nested {
            self.declare_type(nested, Some(index), sink);
        }
    }

    fn declare_members(&mut self, index: usize, sink: &mut DiagnosticSink) {
        let Some(decl) = self.types[index].decl else { return };
        let dialect = self.dialect;
        let is_static_type = self.types[index].is_static();

        let mut fields = Vec::new();
        for field in decl.fields {
            if fields.iter().any(|f: &FieldInfo<'a>| same_name(dialect, f.name, field.name)) {
                sink.report(field.pos, Message::DuplicateMember { ty: decl.name.to_string(), name: field.name.to_string() });
            }
            if decl.kind == TypeKind::StaticClass && !field.is_static {
                sink.report(field.pos, Message::InstanceMemberInStaticClass(field.name.to_string()));
            }
            let ty = self.resolve_type(field.ty.name, field.ty.pos, index, sink);
            fields.push(FieldInfo {
                name: field.name,
                ty,
                is_static: field.is_static || decl.kind == TypeKind::Module,
                visibility: visibility(field.access.unwrap_or(Access::Private)),
                decl: field,
                row: 0,
            });
        }

        let mut methods: Vec<MethodInfo<'a>> = Vec::new();
        for method in decl.methods {
            if decl.kind == TypeKind::StaticClass && !method.is_static {
                sink.report(method.pos, Message::InstanceMemberInStaticClass(method.name.to_string()));
            }
            let ret = self.resolve_type(method.ret.name, method.ret.pos, index, sink);
            let params: Vec<Ty<'a>> = method
                .params
                .iter()
                .map(|p| self.resolve_type(p.ty.name, p.ty.pos, index, sink))
                .collect();
            let clash = methods
                .iter()
                .any(|m| same_name(dialect, m.name, method.name) && m.params == params);
            if clash {
                sink.report(method.pos, Message::DuplicateMember { ty: decl.name.to_string(), name: method.name.to_string() });
            }
            let default_access = match dialect {
                Dialect::Brace => Access::Private,
                Dialect::Basic => Access::Public,
            };
            methods.push(MethodInfo {
                name: method.name,
                ret,
                params,
                param_names: method.params.iter().map(|p| p.name).collect(),
                is_static: method.is_static || decl.kind == TypeKind::Module,
                visibility: visibility(method.access.unwrap_or(default_access)),
                source: MethodSource::User(method),
                row: 0,
            });
        }

        if !is_static_type {
            methods.push(MethodInfo {
                name: ".ctor",
                ret: Ty::Void,
                params: Vec::new(),
                param_names: Vec::new(),
                is_static: false,
                visibility: Visibility::Public,
                source: MethodSource::Ctor,
                row: 0,
            });
        }
        if fields.iter().any(|f| f.is_static && f.decl.init.is_some()) {
            methods.push(MethodInfo {
                name: ".cctor",
                ret: Ty::Void,
                params: Vec::new(),
                param_names: Vec::new(),
                is_static: true,
                visibility: Visibility::Private,
                source: MethodSource::Cctor,
                row: 0,
            });
        }

        let ty = &mut self.types[index];
        ty.fields = fields;
        ty.methods = methods;
    }

    fn number_rows(&mut self) {
        let (mut field_row, mut method_row) = (0, 0);
        for ty in &mut self.types {
            for field in &mut ty.fields {
                field.row = field_row;
                field_row += 1;
            }
            for method in &mut ty.methods {
                method.row = method_row;
                method_row += 1;
            }
        }
    }

    /// Resolve a type as written in source.
    pub fn resolve_type(&self, name: TypeName<'a>, pos: Pos, from: usize, sink: &mut DiagnosticSink) -> Ty<'a> {
        match name {
            TypeName::Void => Ty::Void,
            TypeName::Int => Ty::Int,
            TypeName::Bool => Ty::Bool,
            TypeName::String => Ty::String,
            TypeName::Object => Ty::Object,
            TypeName::Array(elem) => {
                let elem = self.resolve_type(*elem, pos, from, sink);
                if elem == Ty::Error {
                    return Ty::Error;
                }
                Ty::Array(self.arena.alloc(elem))
            }
            TypeName::Named(dotted) => match self.lookup_type(dotted, from) {
                Some(ty) => ty,
                None => {
                    sink.report(pos, Message::TypeNotFound(dotted.to_string()));
                    Ty::Error
                }
            },
        }
    }

    /// Find a user or library type by (possibly dotted) name, as seen from
    /// inside type `from`.
    pub fn lookup_type(&self, dotted: &str, from: usize) -> Option<Ty<'a>> {
        if let Some(index) = self.find_user_type(dotted, from) {
            return Some(Ty::Class(index));
        }
        LibClass::lookup(dotted, &self.imports, self.dialect).map(LibClass::as_ty)
    }

    fn find_user_type(&self, dotted: &str, from: usize) -> Option<usize> {
        let dialect = self.dialect;
        if !dotted.contains('.') {
            // Nested types of the current type and its enclosing types first.
            let mut scope = Some(from);
            while let Some(outer) = scope {
                let nested = (1..self.types.len())
                    .find(|&i| self.types[i].enclosing == Some(outer) && same_name(dialect, self.types[i].name, dotted));
                if nested.is_some() {
                    return nested;
                }
                scope = self.types[outer].enclosing;
            }
            let namespace = self.outermost(from).map_or("", |t| self.types[t].namespace);
            return (1..self.types.len()).find(|&i| {
                let ty = &self.types[i];
                ty.enclosing.is_none()
                    && same_name(dialect, ty.name, dotted)
                    && (ty.namespace.is_empty()
                        || same_name(dialect, ty.namespace, namespace)
                        || self.imports.iter().any(|ns| same_name(dialect, ns, ty.namespace)))
            });
        }
        (1..self.types.len()).find(|&i| same_name(dialect, &self.dotted_name(i), dotted))
    }

    fn outermost(&self, mut index: usize) -> Option<usize> {
        if index == 0 {
            return None;
        }
        while let Some(outer) = self.types[index].enclosing {
            index = outer;
        }
        Some(index)
    }

    /// Name with `.` between namespace and nesting levels, as written in source.
    fn dotted_name(&self, index: usize) -> String {
        let ty = &self.types[index];
        match ty.enclosing {
            Some(outer) => format!("{}.{}", self.dotted_name(outer), ty.name),
            None if ty.namespace.is_empty() => ty.name.to_string(),
            None => format!("{}.{}", ty.namespace, ty.name),
        }
    }

    /// Type name for diagnostics.
    pub fn ty_name(&self, ty: Ty<'a>) -> String {
        match ty {
            Ty::Class(index) => self.dotted_name(index),
            Ty::Array(elem) if matches!(elem, Ty::Class(_)) => match self.dialect {
                Dialect::Brace => format!("{}[]", self.ty_name(*elem)),
                Dialect::Basic => format!("{}()", self.ty_name(*elem)),
            },
            other => other.display(self.dialect),
        }
    }

    /// Fields named `name` visible from `from`: its own, then enclosing types'.
    pub fn find_field(&self, from: usize, name: &str) -> Option<(usize, &FieldInfo<'a>)> {
        let mut scope = Some(from);
        while let Some(index) = scope {
            if let Some(field) = self.field_of(index, name) {
                return Some((index, field));
            }
            scope = self.types[index].enclosing;
        }
        self.module_members(|ty| ty.fields.iter().find(|f| same_name(self.dialect, f.name, name)))
    }

    pub fn field_of(&self, index: usize, name: &str) -> Option<&FieldInfo<'a>> {
        self.types[index].fields.iter().find(|f| same_name(self.dialect, f.name, name))
    }

    /// Types whose user methods named `name` are visible from `from`.
    pub fn find_method_owner(&self, from: usize, name: &str) -> Option<usize> {
        let mut scope = Some(from);
        while let Some(index) = scope {
            if self.has_method(index, name) {
                return Some(index);
            }
            scope = self.types[index].enclosing;
        }
        self.module_members(|ty| ty.methods.iter().find(|m| same_name(self.dialect, m.name, name)))
            .map(|(index, _)| index)
    }

    pub fn has_method(&self, index: usize, name: &str) -> bool {
        self.types[index]
            .methods
            .iter()
            .any(|m| matches!(m.source, MethodSource::User(_)) && same_name(self.dialect, m.name, name))
    }

    /// Basic module members are visible without qualification.
    fn module_members<'s, T>(&'s self, find: impl Fn(&'s TypeInfo<'a>) -> Option<&'s T>) -> Option<(usize, &'s T)> {
        if self.dialect != Dialect::Basic {
            return None;
        }
        self.types
            .iter()
            .enumerate()
            .filter(|(_, ty)| ty.kind == TypeKind::Module)
            .find_map(|(index, ty)| find(ty).map(|item| (index, item)))
    }

    pub fn ctor_of(&self, index: usize) -> Option<&MethodInfo<'a>> {
        self.types[index].methods.iter().find(|m| matches!(m.source, MethodSource::Ctor))
    }
}

fn visibility(access: Access) -> Visibility {
    match access {
        Access::Public => Visibility::Public,
        Access::Private => Visibility::Private,
        Access::Internal => Visibility::Assembly,
        Access::Protected => Visibility::Family,
    }
}

/// Reference tables, grown on first use of each entry.
#[derive(Debug)]
pub struct Refs {
    mscorlib: Version,
    assembly_refs: Vec<AssemblyRef>,
    assemblies: HashMap<LibAssembly, Token>,
    type_refs: Vec<TypeRef>,
    classes: HashMap<LibClass, Token>,
    member_refs: Vec<MemberRef>,
    members: HashMap<LibMethodId, Token>,
    user_strings: Vec<String>,
    strings: HashMap<String, Token>,
}

/// The finished reference tables.
pub struct RefTables {
    pub assembly_refs: Vec<AssemblyRef>,
    pub type_refs: Vec<TypeRef>,
    pub member_refs: Vec<MemberRef>,
    pub user_strings: Vec<String>,
}

impl Refs {
    /// `mscorlib` is always the first assembly reference.
    pub fn new(mscorlib: Version) -> Self {
        let mut refs = Refs {
            mscorlib,
            assembly_refs: Vec::new(),
            assemblies: HashMap::new(),
            type_refs: Vec::new(),
            classes: HashMap::new(),
            member_refs: Vec::new(),
            members: HashMap::new(),
            user_strings: Vec::new(),
            strings: HashMap::new(),
        };
        refs.assembly(LibAssembly::Mscorlib);
        refs
    }

    pub fn assembly(&mut self, assembly: LibAssembly) -> Token {
        if let Some(&token) = self.assemblies.get(&assembly) {
            return token;
        }
        let token = Token::new(TableKind::AssemblyRef, self.assembly_refs.len());
        self.assembly_refs.push(AssemblyRef {
            name: assembly.name().to_string(),
            version: assembly.version(self.mscorlib),
            public_key_token: Some(assembly.public_key_token()),
        });
        self.assemblies.insert(assembly, token);
        token
    }

    pub fn class(&mut self, class: LibClass) -> Token {
        if let Some(&token) = self.classes.get(&class) {
            return token;
        }
        let scope = self.assembly(class.assembly());
        let token = Token::new(TableKind::TypeRef, self.type_refs.len());
        self.type_refs.push(TypeRef {
            scope,
            namespace: class.namespace().to_string(),
            name: class.name().to_string(),
        });
        self.classes.insert(class, token);
        token
    }

    pub fn method(&mut self, id: LibMethodId) -> Token {
        if let Some(&token) = self.members.get(&id) {
            return token;
        }
        let method = &METHODS[id];
        let parent = self.class(method.class);
        let params = method.params.iter().map(|&p| self.sig(p, &|_| TypeSig::Object)).collect();
        let ret = self.sig(method.ret, &|_| TypeSig::Object);
        let sig = match method.kind {
            super::library::CallKind::Static => MethodSig::new_static(ret, params),
            _ => MethodSig::new_instance(ret, params),
        };
        let token = Token::new(TableKind::MemberRef, self.member_refs.len());
        self.member_refs.push(MemberRef { parent, name: method.name.to_string(), sig });
        self.members.insert(id, token);
        token
    }

    pub fn string(&mut self, value: &str) -> Token {
        if let Some(&token) = self.strings.get(value) {
            return token;
        }
        let token = Token::new(TableKind::UserString, self.user_strings.len());
        self.user_strings.push(value.to_string());
        self.strings.insert(value.to_string(), token);
        token
    }

    /// Signature element of `ty`; `user` maps program classes.
    pub fn sig(&mut self, ty: Ty<'_>, user: &dyn Fn(usize) -> TypeSig) -> TypeSig {
        match ty {
            Ty::Void => TypeSig::Void,
            Ty::Bool => TypeSig::Boolean,
            Ty::Int => TypeSig::Int32,
            Ty::String => TypeSig::String,
            Ty::Object | Ty::Null | Ty::Error => TypeSig::Object,
            Ty::Lib(class) => TypeSig::Class(self.class(class)),
            Ty::Class(index) => user(index),
            Ty::Array(elem) => TypeSig::SzArray(Box::new(self.sig(*elem, user))),
        }
    }

    pub fn into_tables(self) -> RefTables {
        RefTables {
            assembly_refs: self.assembly_refs,
            type_refs: self.type_refs,
            member_refs: self.member_refs,
            user_strings: self.user_strings,
        }
    }
}

/// Signature element of a program class.
pub fn user_class_sig(index: usize) -> TypeSig {
    TypeSig::Class(Token::new(TableKind::TypeDef, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::CompilationSession;
    use crate::frontend::csharp;

    fn options() -> GenOptions {
        GenOptions {
            optimize: true,
            debug: false,
            infer_locals: true,
            mscorlib: Version::new(4, 0, 0, 0),
            visual_basic_runtime: true,
        }
    }

    #[test]
    fn declares_types_in_preorder_with_implicit_members() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut sink = DiagnosticSink::new(Dialect::Brace, "snippet.0.cs");
        let src = "class A { static int n = 1; class B { } void M() { } }\nstatic class C { static void S() { } }";
        let unit = csharp::parse(src, &session, &mut sink).unwrap();
        let env = Env::declare(unit, Dialect::Brace, options(), &arena, &mut sink);
        assert!(sink.diagnostics().is_empty());
        let names: Vec<_> = env.types.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["<Module>", "A", "B", "C"]);
        let a_methods: Vec<_> = env.types[1].methods.iter().map(|m| m.name).collect();
        assert_eq!(a_methods, vec!["M", ".ctor", ".cctor"]);
        assert!(env.ctor_of(3).is_none());
        assert_eq!(env.types[2].methods[0].row, 3);
        assert_eq!(env.lookup_type("B", 1), Some(Ty::Class(2)));
        assert_eq!(env.lookup_type("A.B", 3), Some(Ty::Class(2)));
    }

    #[test]
    fn unknown_types_are_reported() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut sink = DiagnosticSink::new(Dialect::Brace, "snippet.0.cs");
        let unit = csharp::parse("class A { Widget w; }", &session, &mut sink).unwrap();
        Env::declare(unit, Dialect::Brace, options(), &arena, &mut sink);
        assert_eq!(sink.diagnostics()[0].code, "CS0246");
    }

    #[test]
    fn references_are_created_once() {
        let mut refs = Refs::new(Version::new(2, 0, 0, 0));
        let id = super::super::library::ctor(LibClass::Exception, &[Ty::String]).unwrap();
        let first = refs.method(id);
        assert_eq!(refs.method(id), first);
        assert_eq!(refs.string("hi"), refs.string("hi"));
        let tables = refs.into_tables();
        assert_eq!(tables.assembly_refs.len(), 1);
        assert_eq!(tables.assembly_refs[0].version, Version::new(2, 0, 0, 0));
        assert_eq!(tables.type_refs[0].name, "Exception");
        assert!(tables.member_refs[0].sig.has_this);
    }
}
