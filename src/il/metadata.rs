//! In-memory model of a compiled module's metadata.
//!
//! The layout follows the ECMA-335 tables closely enough for the
//! disassembler: tokens carry the table tag in the high byte and a one-based
//! row index in the low 24 bits. Fields and methods are owned by their type
//! definition; their row numbers are the position in the module-wide order
//! (type by type, member by member).

use std::fmt;

/// Table tag in the high byte of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    TypeRef,
    TypeDef,
    Field,
    MethodDef,
    MemberRef,
    AssemblyRef,
    UserString,
}

impl TableKind {
    pub const fn tag(self) -> u8 {
        match self {
            TableKind::TypeRef => 0x01,
            TableKind::TypeDef => 0x02,
            TableKind::Field => 0x04,
            TableKind::MethodDef => 0x06,
            TableKind::MemberRef => 0x0A,
            TableKind::AssemblyRef => 0x23,
            TableKind::UserString => 0x70,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => TableKind::TypeRef,
            0x02 => TableKind::TypeDef,
            0x04 => TableKind::Field,
            0x06 => TableKind::MethodDef,
            0x0A => TableKind::MemberRef,
            0x23 => TableKind::AssemblyRef,
            0x70 => TableKind::UserString,
            _ => return None,
        })
    }
}

/// A metadata token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Build a token from a zero-based row index.
    pub const fn new(table: TableKind, index: usize) -> Self {
        Token(((table.tag() as u32) << 24) | ((index as u32 + 1) & 0x00FF_FFFF))
    }

    pub fn table(self) -> Option<TableKind> {
        TableKind::from_tag((self.0 >> 24) as u8)
    }

    /// Zero-based row index, `None` for the nil row.
    pub fn index(self) -> Option<usize> {
        let row = self.0 & 0x00FF_FFFF;
        (row != 0).then(|| row as usize - 1)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Four-part version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self { major, minor, build, revision }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.major, self.minor, self.build, self.revision)
    }
}

/// Element types of signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    Void,
    Boolean,
    Int32,
    String,
    Object,
    /// A class reached through a TypeRef or TypeDef token.
    Class(Token),
    SzArray(Box<TypeSig>),
}

/// Method signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    pub has_this: bool,
    pub ret: TypeSig,
    pub params: Vec<TypeSig>,
}

impl MethodSig {
    pub fn new_static(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        Self { has_this: false, ret, params }
    }

    pub fn new_instance(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        Self { has_this: true, ret, params }
    }
}

/// Member and type accessibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Assembly,
    Family,
    Public,
}

/// Custom attribute attached to an assembly, type or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAttribute {
    /// MemberRef of the attribute constructor.
    pub ctor: Token,
    pub blob: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyDef {
    pub name: String,
    pub version: Version,
    pub hash_algorithm: u32,
    pub custom_attributes: Vec<CustomAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRef {
    pub name: String,
    pub version: Version,
    pub public_key_token: Option<[u8; 8]>,
}

/// A type in a referenced assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    /// AssemblyRef token of the defining assembly.
    pub scope: Token,
    pub namespace: String,
    pub name: String,
}

/// A method of a referenced (or array) type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// TypeRef or TypeDef token of the declaring type.
    pub parent: Token,
    pub name: String,
    pub sig: MethodSig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFlags {
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub before_field_init: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub sig: TypeSig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodFlags {
    pub visibility: Visibility,
    pub is_static: bool,
    pub hide_by_sig: bool,
    pub special_name: bool,
    pub rt_special_name: bool,
}

/// Local variable slot of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub sig: TypeSig,
    /// Present only when the module was compiled with debug information.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    /// Catch clause with the TypeRef/TypeDef token of the caught type.
    Catch(Token),
    Finally,
}

/// Exception handling clause, offsets relative to the start of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionClause {
    pub kind: ClauseKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

impl ExceptionClause {
    pub fn try_end(&self) -> u32 {
        self.try_offset + self.try_length
    }

    pub fn handler_end(&self) -> u32 {
        self.handler_offset + self.handler_length
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    pub name: String,
    pub flags: MethodFlags,
    pub sig: MethodSig,
    pub param_names: Vec<String>,
    pub locals: Vec<LocalVar>,
    pub max_stack: u16,
    pub clauses: Vec<ExceptionClause>,
    pub custom_attributes: Vec<CustomAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub namespace: String,
    pub name: String,
    pub flags: TypeFlags,
    /// Base type, `None` for the `<Module>` placeholder.
    pub extends: Option<Token>,
    /// Index of the enclosing type for nested types.
    pub enclosing: Option<usize>,
    pub custom_attributes: Vec<CustomAttribute>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// The placeholder type every compiled module starts with.
    pub fn module_placeholder() -> Self {
        Self {
            namespace: String::new(),
            name: MODULE_TYPE_NAME.to_string(),
            flags: TypeFlags {
                visibility: Visibility::Private,
                is_abstract: false,
                is_sealed: false,
                before_field_init: false,
            },
            extends: None,
            enclosing: None,
            custom_attributes: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }
}

/// Name of the compiler-generated placeholder type.
pub const MODULE_TYPE_NAME: &str = "<Module>";

/// Everything stored in the artifact's metadata section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub assembly: AssemblyDef,
    pub module_name: String,
    pub mvid: [u8; 16],
    pub assembly_refs: Vec<AssemblyRef>,
    pub type_refs: Vec<TypeRef>,
    pub member_refs: Vec<MemberRef>,
    pub user_strings: Vec<String>,
    pub types: Vec<TypeDef>,
}

impl ModuleMetadata {
    /// Iterate methods in row order together with their type index.
    pub fn methods(&self) -> impl Iterator<Item = (usize, &MethodDef)> + '_ {
        self.types
            .iter()
            .enumerate()
            .flat_map(|(ti, ty)| ty.methods.iter().map(move |m| (ti, m)))
    }

    /// Iterate fields in row order together with their type index.
    pub fn fields(&self) -> impl Iterator<Item = (usize, &FieldDef)> + '_ {
        self.types
            .iter()
            .enumerate()
            .flat_map(|(ti, ty)| ty.fields.iter().map(move |f| (ti, f)))
    }

    /// Row of the first method of each type.
    pub fn method_rows(&self) -> Vec<usize> {
        let mut row = 0;
        self.types
            .iter()
            .map(|ty| {
                let first = row;
                row += ty.methods.len();
                first
            })
            .collect()
    }

    /// Row of the first field of each type.
    pub fn field_rows(&self) -> Vec<usize> {
        let mut row = 0;
        self.types
            .iter()
            .map(|ty| {
                let first = row;
                row += ty.fields.len();
                first
            })
            .collect()
    }

    /// Name used for the symbol of a method body.
    pub fn body_symbol(&self, type_index: usize, method: &MethodDef) -> String {
        format!("{}::{}", self.type_full_name(type_index), method.name)
    }

    /// `Namespace.Name`, with `/` separating nested types.
    pub fn type_full_name(&self, index: usize) -> String {
        let ty = &self.types[index];
        match ty.enclosing {
            Some(outer) => format!("{}/{}", self.type_full_name(outer), ty.name),
            None if ty.namespace.is_empty() => ty.name.clone(),
            None => format!("{}.{}", ty.namespace, ty.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = Token::new(TableKind::MethodDef, 4);
        assert_eq!(token.0, 0x0600_0005);
        assert_eq!(token.table(), Some(TableKind::MethodDef));
        assert_eq!(token.index(), Some(4));
        assert_eq!(Token(0x0100_0000).index(), None);
        assert_eq!(token.to_string(), "0x06000005");
    }

    #[test]
    fn nested_full_names() {
        let mut outer = TypeDef::module_placeholder();
        outer.name = "Outer".into();
        outer.namespace = "Demo".into();
        let mut inner = TypeDef::module_placeholder();
        inner.name = "Inner".into();
        inner.enclosing = Some(0);
        let meta = ModuleMetadata {
            assembly: AssemblyDef {
                name: "a".into(),
                version: Version::default(),
                hash_algorithm: 0,
                custom_attributes: Vec::new(),
            },
            module_name: "a.dll".into(),
            mvid: [0; 16],
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            member_refs: Vec::new(),
            user_strings: Vec::new(),
            types: vec![outer, inner],
        };
        assert_eq!(meta.type_full_name(1), "Demo.Outer/Inner");
    }
}
